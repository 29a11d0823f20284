// Query Engine Assembly
//
// split → summary index + vector index → tools → router

use tracing::info;

use super::{
    Document, LlmSingleSelector, Models, QueryEngineTool, RagError, RouterQueryEngine,
    SentenceSplitter, SummaryIndex, VectorIndex,
};
use crate::config::IndexConfig;

pub const SUMMARY_TOOL_DESCRIPTION: &str =
    "Useful for summary questions related to any topic in deep learning papers.";

pub const VECTOR_TOOL_DESCRIPTION: &str =
    "Useful for retrieving specific information from deep learning papers.";

/// Build the routed query engine over `documents`.
pub fn build_query_engine(
    documents: &[Document],
    models: &Models,
    settings: &IndexConfig,
) -> Result<RouterQueryEngine, RagError> {
    let splitter = SentenceSplitter::new(settings.chunk_size, settings.chunk_overlap);
    let nodes = splitter.split(documents);
    if nodes.is_empty() {
        return Err(RagError::EmptyIndex);
    }
    info!(nodes = nodes.len(), chunk_size = splitter.chunk_size(), "documents chunked");

    let summary_index = SummaryIndex::new(nodes.clone());
    let vector_index = VectorIndex::build(nodes, models.embedder.clone())?;
    info!(
        summary_nodes = summary_index.len(),
        vector_nodes = vector_index.len(),
        "indices built"
    );

    let summary_tool = QueryEngineTool::new(
        "summary",
        SUMMARY_TOOL_DESCRIPTION,
        summary_index.into_query_engine(models.llm.clone()),
    );
    let vector_tool = QueryEngineTool::new(
        "vector",
        VECTOR_TOOL_DESCRIPTION,
        vector_index.into_query_engine(models.llm.clone(), settings.similarity_top_k),
    );

    Ok(RouterQueryEngine::new(
        LlmSingleSelector::new(models.llm.clone()),
        vec![summary_tool, vector_tool],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{DocumentMetadata, EmbeddingModel, LanguageModel, QueryEngine};
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Picks the vector tool; each prompt kind gets a fixed answer.
    struct ScriptedLlm;

    impl LanguageModel for ScriptedLlm {
        fn complete(&self, prompt: &str) -> Result<String, RagError> {
            if prompt.contains("numbered list") {
                Ok("2".into())
            } else if prompt.contains("no prior knowledge") {
                Ok("vector answer".into())
            } else {
                Ok("summary answer".into())
            }
        }
    }

    struct LengthEmbedder;

    impl EmbeddingModel for LengthEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn models() -> Models {
        Models {
            llm: Arc::new(ScriptedLlm),
            embedder: Arc::new(LengthEmbedder),
        }
    }

    fn document(text: &str) -> Document {
        Document::new(
            text,
            DocumentMetadata {
                file_name: "paper.txt".into(),
                file_path: PathBuf::from("paper.txt"),
            },
        )
    }

    #[test]
    fn builds_router_with_both_tools() {
        let engine = build_query_engine(
            &[document("Transformers use attention. RNNs use recurrence.")],
            &models(),
            &IndexConfig::default(),
        )
        .unwrap();

        let names: Vec<&str> = engine.tools().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["summary", "vector"]);
        assert_eq!(engine.query("What do transformers use?").unwrap(), "vector answer");
    }

    #[test]
    fn documents_without_text_cannot_be_indexed() {
        let result = build_query_engine(&[document("   ")], &models(), &IndexConfig::default());
        assert!(matches!(result, Err(RagError::EmptyIndex)));
    }
}
