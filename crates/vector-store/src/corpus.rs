use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SNIPPET_CORPUS_SCHEMA_VERSION: u32 = 1;

/// Ordered snippet texts. A snippet's identity is its position; the
/// embedding matrix and the flat index address snippets by that position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnippetCorpus {
    snippets: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSnippetCorpus {
    schema_version: u32,
    snippets: Vec<String>,
}

impl SnippetCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snippets(snippets: Vec<String>) -> Self {
        Self { snippets }
    }

    pub fn push(&mut self, snippet: String) {
        self.snippets.push(snippet);
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&str> {
        self.snippets.get(position).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.snippets.iter().map(String::as_str)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let persisted: PersistedSnippetCorpus = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != SNIPPET_CORPUS_SCHEMA_VERSION {
            return Err(VectorStoreError::SchemaVersion {
                expected: SNIPPET_CORPUS_SCHEMA_VERSION,
                found: persisted.schema_version,
            });
        }
        Ok(Self {
            snippets: persisted.snippets,
        })
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedSnippetCorpus {
            schema_version: SNIPPET_CORPUS_SCHEMA_VERSION,
            snippets: self.snippets.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn corpus_roundtrip_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snippets.json");

        let corpus = SnippetCorpus::from_snippets(vec![
            "alpha".to_string(),
            "beta".to_string(),
            "gamma".to_string(),
        ]);
        corpus.save(&path).await.unwrap();

        let loaded = SnippetCorpus::load(&path).await.unwrap();
        assert_eq!(loaded, corpus);
        assert_eq!(loaded.get(1), Some("beta"));
        assert_eq!(loaded.get(3), None);
    }

    #[tokio::test]
    async fn load_rejects_unknown_schema_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("snippets.json");
        tokio::fs::write(&path, r#"{"schema_version":7,"snippets":[]}"#)
            .await
            .unwrap();

        let err = SnippetCorpus::load(&path).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::SchemaVersion { found: 7, .. }));
    }
}
