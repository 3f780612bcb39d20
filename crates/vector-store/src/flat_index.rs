use crate::error::{Result, VectorStoreError};
use crate::types::SearchHit;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FLAT_INDEX_SCHEMA_VERSION: u32 = 1;

/// Exact nearest-neighbor index over the full vector batch.
///
/// Brute-force scan under squared L2 distance (the flat-index convention:
/// no approximation, no graph). Vectors are identified by their insertion
/// position, which is the only linkage back to the snippet corpus.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedFlatIndex {
    schema_version: u32,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    /// Builds an index from a batch; position i holds the i-th input vector.
    pub fn build(dimension: usize, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let mut index = Self::new(dimension);
        for vector in vectors {
            index.add(&vector)?;
        }
        Ok(index)
    }

    /// Appends a vector at the next position.
    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.vectors.push(vector.to_vec());
        Ok(())
    }

    /// Returns the k nearest stored vectors as (position, distance) hits,
    /// ascending by distance with position as tiebreak. Requesting more than
    /// the stored count returns everything stored.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| SearchHit {
                position,
                distance: squared_l2(query, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Persists the index as a schema-versioned binary blob. Written to a
    /// temp file and renamed, so a crash never leaves a torn artifact.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let persisted = PersistedFlatIndex {
            schema_version: FLAT_INDEX_SCHEMA_VERSION,
            dimension: self.dimension,
            vectors: self.vectors.clone(),
        };
        let bytes = bincode::serialize(&persisted)?;
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Loads an index saved with [`FlatIndex::save`]. Vector bits are carried
    /// verbatim, so post-reload searches rank identically to pre-save ones.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let persisted: PersistedFlatIndex = bincode::deserialize(&bytes)?;
        if persisted.schema_version != FLAT_INDEX_SCHEMA_VERSION {
            return Err(VectorStoreError::SchemaVersion {
                expected: FLAT_INDEX_SCHEMA_VERSION,
                found: persisted.schema_version,
            });
        }
        if let Some(bad) = persisted
            .vectors
            .iter()
            .find(|v| v.len() != persisted.dimension)
        {
            return Err(VectorStoreError::InvalidDimension {
                expected: persisted.dimension,
                actual: bad.len(),
            });
        }
        Ok(Self {
            dimension: persisted.dimension,
            vectors: persisted.vectors,
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn search_ranks_by_ascending_distance() {
        let index = FlatIndex::build(
            3,
            vec![
                vec![0.0, 1.0, 0.0],
                vec![1.0, 0.0, 0.0],
                vec![0.9, 0.1, 0.0],
            ],
        )
        .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].position, 1);
        assert!(hits[0].distance.abs() < 1e-6);
        assert_eq!(hits[1].position, 2);
        assert_eq!(hits[2].position, 0);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn equal_distances_break_ties_by_position() {
        let index = FlatIndex::build(2, vec![vec![0.0, 1.0], vec![0.0, -1.0]]).unwrap();
        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[1].position, 1);
        assert_eq!(hits[0].distance, hits[1].distance);
    }

    #[test]
    fn oversized_k_returns_stored_count() {
        let index = FlatIndex::build(2, vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let mut index = FlatIndex::new(3);
        assert!(index.add(&[1.0, 0.0]).is_err());

        index.add(&[1.0, 0.0, 0.0]).unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[tokio::test]
    async fn save_load_roundtrip_preserves_search_results() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.bin");

        let index = FlatIndex::build(
            4,
            vec![
                vec![0.1, 0.2, 0.3, 0.4],
                vec![0.4, 0.3, 0.2, 0.1],
                vec![-0.5, 0.5, 0.25, 0.125],
            ],
        )
        .unwrap();
        index.save(&path).await.unwrap();

        let reloaded = FlatIndex::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), index.len());
        assert_eq!(reloaded.dimension(), index.dimension());

        let query = vec![0.3, 0.1, 0.2, 0.05];
        let before = index.search(&query, 3).unwrap();
        let after = reloaded.search(&query, 3).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn load_rejects_unknown_schema_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.bin");

        let persisted = PersistedFlatIndex {
            schema_version: 99,
            dimension: 2,
            vectors: vec![vec![0.0, 1.0]],
        };
        tokio::fs::write(&path, bincode::serialize(&persisted).unwrap())
            .await
            .unwrap();

        let err = FlatIndex::load(&path).await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::SchemaVersion {
                expected: FLAT_INDEX_SCHEMA_VERSION,
                found: 99
            }
        ));
    }
}
