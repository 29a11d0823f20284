// Retrieval-Augmented Question Answering
//
// Call shapes for the collaborators behind the chat flow, plus small
// default implementations: file loading, sentence chunking, a summary
// index, a vector index, and an LLM-routed query engine.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod gemini;
pub mod index;
pub mod loader;
pub mod pipeline;
pub mod router;
pub mod splitter;

pub use gemini::{GeminiClient, GeminiFactory};
pub use index::{ScoredNode, SummaryIndex, SummaryQueryEngine, VectorIndex, VectorQueryEngine};
pub use loader::FileLoader;
pub use pipeline::build_query_engine;
pub use router::{LlmSingleSelector, QueryEngineTool, RouterQueryEngine, Selector, ToolMetadata};
pub use splitter::SentenceSplitter;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract text from {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("unsupported document type: {0}")]
    UnsupportedFile(PathBuf),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("index holds no content")]
    EmptyIndex,

    #[error("selector could not choose a tool: {0}")]
    Selection(String),

    #[error("no query engine tools registered")]
    NoTools,

    #[error("API key is not set")]
    MissingApiKey,
}

/// Where a piece of text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub file_path: PathBuf,
}

/// Text extracted from one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            metadata,
        }
    }
}

/// A chunk of a document, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub document_id: Uuid,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Node {
    pub fn from_document(document: &Document, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: document.id,
            text,
            metadata: document.metadata.clone(),
        }
    }
}

/// Text completion model.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String, RagError>;
}

/// Text embedding model.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

/// Anything that can answer a natural-language query.
pub trait QueryEngine: Send + Sync {
    fn query(&self, query: &str) -> Result<String, RagError>;
}

/// The model pair the indices are built with.
#[derive(Clone)]
pub struct Models {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn EmbeddingModel>,
}

/// Creates models for an API key.
pub trait ModelFactory {
    fn create(&self, api_key: &str) -> Result<Models, RagError>;
}
