// Document Loading
//
// Turns input files into documents. PDFs go through text extraction;
// plain-text formats are read as UTF-8.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Document, DocumentMetadata, RagError};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Loads one document per input file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load every file, failing on the first unreadable one.
    pub fn load(&self, paths: &[PathBuf]) -> Result<Vec<Document>, RagError> {
        let documents = paths
            .iter()
            .map(|path| self.load_file(path))
            .collect::<Result<Vec<_>, _>>()?;

        info!(documents = documents.len(), "documents loaded");
        Ok(documents)
    }

    fn load_file(&self, path: &Path) -> Result<Document, RagError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let text = match extension.as_str() {
            "pdf" => pdf_extract::extract_text(path).map_err(|e| RagError::Pdf {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?,
            ext if TEXT_EXTENSIONS.contains(&ext) => {
                std::fs::read_to_string(path).map_err(|source| RagError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            _ => return Err(RagError::UnsupportedFile(path.to_path_buf())),
        };

        debug!(path = %path.display(), chars = text.chars().count(), "document extracted");

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Document::new(
            text,
            DocumentMetadata {
                file_name,
                file_path: path.to_path_buf(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_text_files_in_order() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.MD");
        std::fs::write(&a, "first file").unwrap();
        std::fs::write(&b, "# second").unwrap();

        let docs = FileLoader::new().load(&[a, b]).unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "first file");
        assert_eq!(docs[0].metadata.file_name, "a.txt");
        assert_eq!(docs[1].text, "# second");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sheet.xlsx");
        std::fs::write(&path, "binary").unwrap();

        let err = FileLoader::new().load(&[path]).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFile(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();

        let err = FileLoader::new()
            .load(&[dir.path().join("gone.txt")])
            .unwrap_err();
        assert!(matches!(err, RagError::Io { .. }));
    }
}
