// Retrieval Indices
//
// Two views over the same nodes:
// - SummaryIndex answers from every node via tree summarization
// - VectorIndex answers from the nodes most similar to the question

use std::sync::Arc;

use tracing::{debug, info};

use super::{EmbeddingModel, LanguageModel, Node, QueryEngine, RagError};

/// Default prompt budget for one summarization call, in characters.
pub const DEFAULT_CONTEXT_BUDGET: usize = 12_000;

/// Holds every node; queries read all of them.
#[derive(Debug, Clone)]
pub struct SummaryIndex {
    nodes: Vec<Node>,
}

impl SummaryIndex {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_query_engine(self, llm: Arc<dyn LanguageModel>) -> SummaryQueryEngine {
        SummaryQueryEngine {
            nodes: self.nodes,
            llm,
            context_budget: DEFAULT_CONTEXT_BUDGET,
        }
    }
}

/// Tree-summarize query engine.
///
/// Node texts are packed into prompts under the context budget and each
/// prompt is answered; the partial answers are packed and answered again
/// until a single answer remains.
pub struct SummaryQueryEngine {
    nodes: Vec<Node>,
    llm: Arc<dyn LanguageModel>,
    context_budget: usize,
}

impl SummaryQueryEngine {
    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.context_budget = budget.max(1);
        self
    }

    fn summarize(&self, query: &str, texts: Vec<String>) -> Result<String, RagError> {
        let mut texts = texts;
        let mut round = 0;

        loop {
            round += 1;
            let groups = pack_groups(&texts, self.context_budget);
            debug!(round, inputs = texts.len(), prompts = groups.len(), "tree summarize");

            let mut answers = groups
                .iter()
                .map(|group| self.llm.complete(&summary_prompt(query, group)))
                .collect::<Result<Vec<_>, _>>()?;

            if answers.len() == 1 {
                return Ok(answers.remove(0));
            }
            texts = answers;
        }
    }
}

impl QueryEngine for SummaryQueryEngine {
    fn query(&self, query: &str) -> Result<String, RagError> {
        if self.nodes.is_empty() {
            return Err(RagError::EmptyIndex);
        }
        let texts = self.nodes.iter().map(|n| n.text.clone()).collect();
        self.summarize(query, texts)
    }
}

/// Greedily pack texts into groups whose joined length stays under
/// `budget`. A group takes at least two texts when two are available so
/// every round strictly shrinks the input.
fn pack_groups(texts: &[String], budget: usize) -> Vec<Vec<&str>> {
    let mut groups: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for text in texts {
        let len = text.chars().count();
        if current.len() >= 2 && current_len + len > budget {
            groups.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(text);
        current_len += len;
    }

    if !current.is_empty() {
        // A lone trailing text joins the previous group.
        match groups.last_mut() {
            Some(last) if current.len() == 1 => last.extend(current),
            _ => groups.push(current),
        }
    }
    groups
}

fn summary_prompt(query: &str, texts: &[&str]) -> String {
    format!(
        "Context information from multiple sources is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Using only the information above, answer the query.\n\
         Query: {}\n\
         Answer: ",
        texts.join("\n\n"),
        query
    )
}

fn answer_prompt(query: &str, context: &[&str]) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and no prior knowledge, answer the query.\n\
         Query: {}\n\
         Answer: ",
        context.join("\n\n"),
        query
    )
}

/// A node with its embedding.
#[derive(Debug, Clone)]
struct IndexedNode {
    node: Node,
    embedding: Vec<f32>,
}

/// A retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
}

/// Embeds every node once at build time and ranks by cosine similarity.
pub struct VectorIndex {
    entries: Vec<IndexedNode>,
    embedder: Arc<dyn EmbeddingModel>,
}

impl VectorIndex {
    pub fn build(nodes: Vec<Node>, embedder: Arc<dyn EmbeddingModel>) -> Result<Self, RagError> {
        let entries = nodes
            .into_iter()
            .map(|node| {
                let embedding = embedder.embed(&node.text)?;
                Ok(IndexedNode { node, embedding })
            })
            .collect::<Result<Vec<_>, RagError>>()?;

        info!(nodes = entries.len(), "vector index built");
        Ok(Self { entries, embedder })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `top_k` nodes most similar to `query`, best first.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ScoredNode>, RagError> {
        let query_embedding = self.embedder.embed(query)?;

        let mut hits: Vec<ScoredNode> = self
            .entries
            .iter()
            .map(|entry| ScoredNode {
                node: entry.node.clone(),
                score: cosine_similarity(&query_embedding, &entry.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn into_query_engine(self, llm: Arc<dyn LanguageModel>, top_k: usize) -> VectorQueryEngine {
        VectorQueryEngine {
            index: self,
            llm,
            top_k: top_k.max(1),
        }
    }
}

pub struct VectorQueryEngine {
    index: VectorIndex,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl QueryEngine for VectorQueryEngine {
    fn query(&self, query: &str) -> Result<String, RagError> {
        if self.index.is_empty() {
            return Err(RagError::EmptyIndex);
        }

        let hits = self.index.retrieve(query, self.top_k)?;
        debug!(
            hits = hits.len(),
            best = hits.first().map(|h| h.score).unwrap_or_default(),
            "context retrieved"
        );

        let context: Vec<&str> = hits.iter().map(|h| h.node.text.as_str()).collect();
        self.llm.complete(&answer_prompt(query, &context))
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
