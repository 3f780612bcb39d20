use crate::error::{Result, VectorStoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const EMBEDDING_MATRIX_SCHEMA_VERSION: u32 = 1;

/// The embedding vectors produced for a snippet corpus, in corpus order:
/// row i belongs to the snippet at position i.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    dimension: usize,
    rows: Vec<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEmbeddingMatrix {
    schema_version: u32,
    dimension: usize,
    rows: Vec<Vec<f32>>,
}

impl EmbeddingMatrix {
    pub fn new(dimension: usize, rows: Vec<Vec<f32>>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|row| row.len() != dimension) {
            return Err(VectorStoreError::InvalidDimension {
                expected: dimension,
                actual: bad.len(),
            });
        }
        Ok(Self { dimension, rows })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.rows
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedEmbeddingMatrix {
            schema_version: EMBEDDING_MATRIX_SCHEMA_VERSION,
            dimension: self.dimension,
            rows: self.rows.clone(),
        };
        let bytes = bincode::serialize(&persisted)?;
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let persisted: PersistedEmbeddingMatrix = bincode::deserialize(&bytes)?;
        if persisted.schema_version != EMBEDDING_MATRIX_SCHEMA_VERSION {
            return Err(VectorStoreError::SchemaVersion {
                expected: EMBEDDING_MATRIX_SCHEMA_VERSION,
                found: persisted.schema_version,
            });
        }
        Self::new(persisted.dimension, persisted.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn matrix_roundtrip_preserves_rows_bit_for_bit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("embeddings.bin");

        let matrix = EmbeddingMatrix::new(
            3,
            vec![
                vec![0.1, f32::MIN_POSITIVE, -0.0],
                vec![1.0e-30, 2.5, -7.125],
            ],
        )
        .unwrap();
        matrix.save(&path).await.unwrap();

        let loaded = EmbeddingMatrix::load(&path).await.unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.len(), 2);
        for (a, b) in loaded.rows().iter().flatten().zip(matrix.rows().iter().flatten()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = EmbeddingMatrix::new(3, vec![vec![0.0, 1.0]]).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 3,
                actual: 2
            }
        ));
    }
}
