// Interaction Log Storage
//
// Defines where the serialized log store lives. The log itself owns the
// read-modify-write cycle; backends only move whole documents.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::LogError;

/// Storage backend for the interaction log.
///
/// Implementations MUST:
/// - Return `Ok(None)` when nothing has been stored yet
/// - Replace the full contents on `persist`
/// - Never expose a partially written document to `load`
pub trait LogBackend: Send {
    /// Load the stored document, if any.
    fn load(&self) -> Result<Option<String>, LogError>;

    /// Replace the stored document.
    fn persist(&mut self, contents: &str) -> Result<(), LogError>;
}

/// JSON file on local disk.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old or the new
/// document.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl LogBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<String>, LogError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&mut self, contents: &str) -> Result<(), LogError> {
        let dir = self.directory();
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), bytes = contents.len(), "log store written");
        Ok(())
    }
}

/// Keeps the document in memory. Used for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    contents: Option<String>,
}

impl InMemoryBackend {
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Some(contents.into()),
        }
    }

    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }
}

impl LogBackend for InMemoryBackend {
    fn load(&self) -> Result<Option<String>, LogError> {
        Ok(self.contents.clone())
    }

    fn persist(&mut self, contents: &str) -> Result<(), LogError> {
        self.contents = Some(contents.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("absent.json"));

        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn persist_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("nested").join("storage.json");
        let mut backend = JsonFileBackend::new(&path);

        backend.persist("{}").unwrap();

        assert_eq!(backend.load().unwrap().as_deref(), Some("{}"));
        assert!(path.exists());
    }

    #[test]
    fn persist_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let mut backend = JsonFileBackend::new(dir.path().join("storage.json"));

        backend.persist("first, and longer").unwrap();
        backend.persist("second").unwrap();

        assert_eq!(backend.load().unwrap().as_deref(), Some("second"));
        let files = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn in_memory_round_trip() {
        let mut backend = InMemoryBackend::default();
        assert!(backend.load().unwrap().is_none());

        backend.persist("doc").unwrap();
        assert_eq!(backend.contents(), Some("doc"));
    }
}
