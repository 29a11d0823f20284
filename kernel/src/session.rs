// Chat Session
//
// Per-user application state and the handlers that drive a chat:
// upload documents, build the query engine, answer questions.
//
// Handlers never fail outright. Every boundary reports a tagged outcome
// and logs the cause, so one bad upload or API error leaves the session
// usable.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::log::{InteractionLog, LogBackend};
use crate::rag::{build_query_engine, Document, FileLoader, ModelFactory, QueryEngine};

/// A file handed to the session by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file as an upload named after its file name.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, bytes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// Result of processing uploaded documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Documents loaded and the query engine is ready.
    Ready { documents: usize },
    NoUploads,
    LoadFailed(String),
    /// Files loaded but yielded no documents.
    NoDocuments,
    /// Documents were kept but the models could not be created.
    ModelInit(String),
    /// Documents were kept but indexing failed.
    IndexFailed(String),
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready { documents } => write!(
                f,
                "Loaded {documents} documents. Ready to answer questions!"
            ),
            Self::NoUploads => write!(f, "No documents were provided."),
            Self::LoadFailed(e) => write!(f, "Error loading documents: {e}"),
            Self::NoDocuments => write!(f, "No documents could be loaded."),
            Self::ModelInit(e) => write!(f, "Error initializing models: {e}"),
            Self::IndexFailed(e) => write!(f, "Error creating query engine: {e}"),
        }
    }
}

/// Result of asking a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// `logged` is false if the interaction log could not record the turn.
    Answered { answer: String, logged: bool },
    EmptyQuery,
    EngineNotReady,
    Failed(String),
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answered { answer, .. } => write!(f, "{answer}"),
            Self::EmptyQuery => write!(f, "Please enter a question."),
            Self::EngineNotReady => {
                write!(f, "Please load documents and initialize models first.")
            }
            Self::Failed(e) => write!(f, "Error processing query: {e}"),
        }
    }
}

/// Application state for one user.
pub struct Session {
    api_key: String,
    documents: Option<Vec<Document>>,
    query_engine: Option<Box<dyn QueryEngine>>,
    chat_history: Vec<ChatTurn>,
    upload_dir: Option<TempDir>,
    index: IndexConfig,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

impl Session {
    pub fn new(index: IndexConfig) -> Self {
        Self {
            api_key: String::new(),
            documents: None,
            query_engine: None,
            chat_history: Vec::new(),
            upload_dir: None,
            index,
        }
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) {
        self.api_key = api_key.into();
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn documents(&self) -> Option<&[Document]> {
        self.documents.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.query_engine.is_some()
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.chat_history
    }

    /// Chat turns for display, most recent first.
    pub fn history_newest_first(&self) -> impl Iterator<Item = &ChatTurn> {
        self.chat_history.iter().rev()
    }

    pub fn clear_history(&mut self) {
        self.chat_history.clear();
        info!("chat history cleared");
    }

    /// Store uploads, load them as documents, and build the query engine.
    pub fn process_documents(
        &mut self,
        uploads: &[Upload],
        models: &dyn ModelFactory,
    ) -> ProcessOutcome {
        if uploads.is_empty() {
            return ProcessOutcome::NoUploads;
        }

        let documents = match self.save_uploads(uploads).and_then(|paths| {
            FileLoader::new().load(&paths).map_err(|e| e.to_string())
        }) {
            Ok(documents) => documents,
            Err(e) => {
                error!(error = %e, "failed to load documents");
                return ProcessOutcome::LoadFailed(e);
            }
        };

        if documents.is_empty() {
            warn!("uploads produced no documents");
            return ProcessOutcome::NoDocuments;
        }
        let count = documents.len();

        let models = match models.create(&self.api_key) {
            Ok(models) => models,
            Err(e) => {
                error!(error = %e, "failed to initialize models");
                self.documents = Some(documents);
                return ProcessOutcome::ModelInit(e.to_string());
            }
        };

        let outcome = match build_query_engine(&documents, &models, &self.index) {
            Ok(engine) => {
                self.query_engine = Some(Box::new(engine));
                info!(documents = count, "query engine ready");
                ProcessOutcome::Ready { documents: count }
            }
            Err(e) => {
                error!(error = %e, "failed to create query engine");
                self.query_engine = None;
                ProcessOutcome::IndexFailed(e.to_string())
            }
        };

        self.documents = Some(documents);
        outcome
    }

    /// Answer `query`, append the turn to history, and record it in `log`.
    pub fn process_query<B: LogBackend>(
        &mut self,
        query: &str,
        log: &InteractionLog<B>,
    ) -> QueryOutcome {
        if query.trim().is_empty() {
            return QueryOutcome::EmptyQuery;
        }

        let Some(engine) = self.query_engine.as_ref() else {
            return QueryOutcome::EngineNotReady;
        };

        let answer = match engine.query(query) {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "query failed");
                return QueryOutcome::Failed(e.to_string());
            }
        };

        self.chat_history.push(ChatTurn {
            question: query.to_string(),
            answer: answer.clone(),
        });

        let logged = log.record_exchange(query, &answer);
        if !logged {
            warn!("answer delivered but not recorded");
        }

        QueryOutcome::Answered { answer, logged }
    }

    /// Copy uploads into the session's scratch directory.
    fn save_uploads(&mut self, uploads: &[Upload]) -> Result<Vec<PathBuf>, String> {
        if self.upload_dir.is_none() {
            let dir = TempDir::new().map_err(|e| format!("cannot create upload directory: {e}"))?;
            self.upload_dir = Some(dir);
        }
        let Some(dir) = self.upload_dir.as_ref() else {
            return Err("upload directory unavailable".into());
        };

        // Each batch gets a fresh subdirectory and each upload its own slot
        // inside it, so equal file names never overwrite one another.
        let batch = dir.path().join(Uuid::new_v4().to_string());

        uploads
            .iter()
            .enumerate()
            .map(|(i, upload)| {
                // Only the final component is kept so names cannot escape the directory.
                let name = Path::new(&upload.name)
                    .file_name()
                    .ok_or_else(|| format!("invalid upload name {:?}", upload.name))?;
                let slot = batch.join(i.to_string());
                std::fs::create_dir_all(&slot)
                    .map_err(|e| format!("cannot store {}: {e}", upload.name))?;
                let path = slot.join(name);
                std::fs::write(&path, &upload.bytes)
                    .map_err(|e| format!("cannot store {}: {e}", upload.name))?;
                Ok(path)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::InMemoryBackend;
    use crate::rag::{EmbeddingModel, LanguageModel, Models, RagError};
    use serde_json::json;
    use std::sync::Arc;

    struct EchoLlm;

    impl LanguageModel for EchoLlm {
        fn complete(&self, prompt: &str) -> Result<String, RagError> {
            if prompt.contains("numbered list") {
                Ok("1".into())
            } else {
                Ok("Transformers rely on attention.".into())
            }
        }
    }

    struct FailingLlm;

    impl LanguageModel for FailingLlm {
        fn complete(&self, _prompt: &str) -> Result<String, RagError> {
            Err(RagError::Api {
                status: 503,
                message: "overloaded".into(),
            })
        }
    }

    struct UnitEmbedder;

    impl EmbeddingModel for UnitEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, RagError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct Factory<F: Fn() -> Arc<dyn LanguageModel>>(F);

    impl<F: Fn() -> Arc<dyn LanguageModel>> ModelFactory for Factory<F> {
        fn create(&self, api_key: &str) -> Result<Models, RagError> {
            if api_key.is_empty() {
                return Err(RagError::MissingApiKey);
            }
            Ok(Models {
                llm: (self.0)(),
                embedder: Arc::new(UnitEmbedder),
            })
        }
    }

    fn echo_factory() -> Factory<impl Fn() -> Arc<dyn LanguageModel>> {
        Factory(|| Arc::new(EchoLlm) as Arc<dyn LanguageModel>)
    }

    fn paper() -> Upload {
        Upload::new("paper.txt", "Attention is all you need. Transformers drop recurrence.")
    }

    fn ready_session() -> Session {
        let mut session = Session::default();
        session.set_api_key("key");
        assert_eq!(
            session.process_documents(&[paper()], &echo_factory()),
            ProcessOutcome::Ready { documents: 1 }
        );
        session
    }

    #[test]
    fn new_session_is_empty() {
        let session = Session::default();

        assert_eq!(session.api_key(), "");
        assert!(session.documents().is_none());
        assert!(!session.is_ready());
        assert!(session.history().is_empty());
    }

    #[test]
    fn answered_query_is_logged_once() {
        let mut session = ready_session();
        let log = InteractionLog::new(InMemoryBackend::default());

        let outcome = session.process_query("What matters?", &log);

        assert_eq!(
            outcome,
            QueryOutcome::Answered {
                answer: "Transformers rely on attention.".into(),
                logged: true,
            }
        );
        let store = log.read_all();
        assert_eq!(store.entries.len(), 1);
        assert_eq!(store.entries[0].fields["question"], json!("What matters?"));
        assert_eq!(
            store.entries[0].fields["answer"],
            json!("Transformers rely on attention.")
        );
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn blank_query_is_rejected_before_engine() {
        let mut session = Session::default();
        let log = InteractionLog::new(InMemoryBackend::default());

        assert_eq!(session.process_query("   ", &log), QueryOutcome::EmptyQuery);
        assert_eq!(session.process_query("hi", &log), QueryOutcome::EngineNotReady);
        assert!(log.read_all().is_empty());
    }

    #[test]
    fn engine_errors_do_not_touch_history_or_log() {
        let mut session = Session::default();
        session.set_api_key("key");
        let factory = Factory(|| Arc::new(FailingLlm) as Arc<dyn LanguageModel>);
        assert!(matches!(
            session.process_documents(&[paper()], &factory),
            ProcessOutcome::Ready { .. }
        ));

        let log = InteractionLog::new(InMemoryBackend::default());
        let outcome = session.process_query("anything", &log);

        assert!(matches!(outcome, QueryOutcome::Failed(msg) if msg.contains("503")));
        assert!(session.history().is_empty());
        assert!(log.read_all().is_empty());
    }

    #[test]
    fn missing_api_key_keeps_documents_without_engine() {
        let mut session = Session::default();

        let outcome = session.process_documents(&[paper()], &echo_factory());

        assert!(matches!(outcome, ProcessOutcome::ModelInit(_)));
        assert_eq!(session.documents().map(|d| d.len()), Some(1));
        assert!(!session.is_ready());
    }

    #[test]
    fn bad_uploads_are_reported() {
        let mut session = Session::default();
        session.set_api_key("key");

        assert_eq!(
            session.process_documents(&[], &echo_factory()),
            ProcessOutcome::NoUploads
        );

        let outcome =
            session.process_documents(&[Upload::new("scan.bmp", vec![0u8; 4])], &echo_factory());
        assert!(matches!(outcome, ProcessOutcome::LoadFailed(_)));
        assert!(session.documents().is_none());
    }

    #[test]
    fn upload_names_cannot_escape_scratch_directory() {
        let mut session = Session::default();
        session.set_api_key("key");

        let upload = Upload::new("../../outside.txt", "Contained text.");
        let outcome = session.process_documents(&[upload], &echo_factory());

        assert_eq!(outcome, ProcessOutcome::Ready { documents: 1 });
        let doc = &session.documents().unwrap()[0];
        assert_eq!(doc.metadata.file_name, "outside.txt");
        assert!(doc
            .metadata
            .file_path
            .starts_with(session.upload_dir.as_ref().unwrap().path()));
    }

    #[test]
    fn uploads_sharing_a_file_name_are_all_loaded() {
        let mut session = Session::default();
        session.set_api_key("key");

        let uploads = [
            Upload::new("a/paper.txt", "First paper on attention."),
            Upload::new("b/paper.txt", "Second paper on convolution."),
        ];
        let outcome = session.process_documents(&uploads, &echo_factory());

        assert_eq!(outcome, ProcessOutcome::Ready { documents: 2 });
        let docs = session.documents().unwrap();
        assert_eq!(docs[0].text.trim(), "First paper on attention.");
        assert_eq!(docs[1].text.trim(), "Second paper on convolution.");
        assert!(docs.iter().all(|d| d.metadata.file_name == "paper.txt"));
        assert_ne!(docs[0].metadata.file_path, docs[1].metadata.file_path);
    }

    #[test]
    fn reprocessing_does_not_reuse_earlier_files() {
        let mut session = Session::default();
        session.set_api_key("key");

        session.process_documents(&[Upload::new("paper.txt", "Old text.")], &echo_factory());
        session.process_documents(&[Upload::new("paper.txt", "New text.")], &echo_factory());

        let docs = session.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text.trim(), "New text.");
    }

    #[test]
    fn history_is_newest_first_and_clearable() {
        let mut session = ready_session();
        let log = InteractionLog::new(InMemoryBackend::default());

        session.process_query("first", &log);
        session.process_query("second", &log);

        let order: Vec<&str> = session
            .history_newest_first()
            .map(|t| t.question.as_str())
            .collect();
        assert_eq!(order, vec!["second", "first"]);

        session.clear_history();
        assert!(session.history().is_empty());
        // Clearing the chat leaves the durable log alone.
        assert_eq!(log.read_all().entries.len(), 2);
    }

    #[test]
    fn failed_log_write_still_answers() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let log = InteractionLog::open(blocker.join("storage.json"));

        let mut session = ready_session();
        let outcome = session.process_query("still answered?", &log);

        assert!(matches!(outcome, QueryOutcome::Answered { logged: false, .. }));
        assert_eq!(session.history().len(), 1);
    }
}
