use crate::corpus::SnippetCorpus;
use crate::embeddings::EmbeddingModel;
use crate::error::{Result, VectorStoreError};
use crate::flat_index::FlatIndex;
use crate::matrix::EmbeddingMatrix;
use crate::types::RankedSnippet;
use std::path::Path;

pub const CORPUS_FILE: &str = "snippets.json";
pub const MATRIX_FILE: &str = "embeddings.bin";
pub const INDEX_FILE: &str = "index.bin";

/// Ties the three artifacts together: snippet texts, their embedding rows,
/// and the flat index over those rows. Position i means the same snippet in
/// all three, and that correspondence is checked on load.
#[derive(Debug)]
pub struct SnippetStore {
    corpus: SnippetCorpus,
    matrix: EmbeddingMatrix,
    index: FlatIndex,
    embedder: EmbeddingModel,
}

impl SnippetStore {
    pub fn new(embedder: EmbeddingModel) -> Result<Self> {
        let dimension = embedder.dimension();
        Ok(Self {
            corpus: SnippetCorpus::new(),
            matrix: EmbeddingMatrix::new(dimension, Vec::new())?,
            index: FlatIndex::new(dimension),
            embedder,
        })
    }

    /// Embedder selected by the `SNIPDEX_*` environment.
    pub fn from_env() -> Result<Self> {
        Self::new(EmbeddingModel::from_env()?)
    }

    /// Batch-embeds the snippets and appends them, preserving input order.
    pub async fn add_snippets(&mut self, snippets: Vec<String>) -> Result<()> {
        if snippets.is_empty() {
            return Ok(());
        }

        log::info!("Embedding {} snippets", snippets.len());
        let texts: Vec<&str> = snippets.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(texts).await?;

        let mut rows = self.matrix.rows().to_vec();
        for (snippet, vector) in snippets.into_iter().zip(vectors.into_iter()) {
            self.index.add(&vector)?;
            rows.push(vector);
            self.corpus.push(snippet);
        }
        self.matrix = EmbeddingMatrix::new(self.embedder.dimension(), rows)?;

        log::info!("Store now holds {} snippets", self.corpus.len());
        Ok(())
    }

    /// Embeds the query and returns the top-k snippets, ascending by
    /// distance.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedSnippet>> {
        log::debug!("Searching for '{query}' (k={k})");
        let query_vector = self.embedder.embed(query).await?;
        let hits = self.index.search(&query_vector, k)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let snippet = self.corpus.get(hit.position).ok_or_else(|| {
                VectorStoreError::NotFound(format!(
                    "No snippet at position {} for an indexed vector",
                    hit.position
                ))
            })?;
            results.push(RankedSnippet {
                position: hit.position,
                snippet: snippet.to_string(),
                distance: hit.distance,
            });
        }
        Ok(results)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Writes all three artifacts into `dir`.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        log::info!("Saving snippet store to {}", dir.display());
        self.corpus.save(dir.join(CORPUS_FILE)).await?;
        self.matrix.save(dir.join(MATRIX_FILE)).await?;
        self.index.save(dir.join(INDEX_FILE)).await?;
        Ok(())
    }

    /// Reloads artifacts written by [`SnippetStore::save`] and verifies the
    /// positional correspondence between them.
    pub async fn load(dir: impl AsRef<Path>, embedder: EmbeddingModel) -> Result<Self> {
        let dir = dir.as_ref();
        log::info!("Loading snippet store from {}", dir.display());

        let corpus = SnippetCorpus::load(dir.join(CORPUS_FILE)).await?;
        let matrix = EmbeddingMatrix::load(dir.join(MATRIX_FILE)).await?;
        let index = FlatIndex::load(dir.join(INDEX_FILE)).await?;

        if corpus.len() != matrix.len() || corpus.len() != index.len() {
            return Err(VectorStoreError::IndexError(format!(
                "Artifact mismatch: {} snippets, {} embedding rows, {} indexed vectors",
                corpus.len(),
                matrix.len(),
                index.len()
            )));
        }
        if matrix.dimension() != index.dimension() {
            return Err(VectorStoreError::InvalidDimension {
                expected: index.dimension(),
                actual: matrix.dimension(),
            });
        }

        log::info!("Loaded {} snippets", corpus.len());
        Ok(Self {
            corpus,
            matrix,
            index,
            embedder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn stub_store() -> SnippetStore {
        SnippetStore::new(EmbeddingModel::stub().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn add_and_search_joins_hits_to_snippets() {
        let mut store = stub_store();
        store
            .add_snippets(vec![
                "let x = 1;".to_string(),
                "println!(\"hi\")".to_string(),
            ])
            .await
            .unwrap();
        assert_eq!(store.len(), 2);

        // An exact query must rank its own snippet first: the stub embedder
        // is deterministic, so distance to itself is zero.
        let results = store.search("println!(\"hi\")", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].position, 1);
        assert_eq!(results[0].snippet, "println!(\"hi\")");
        assert!(results[0].distance.abs() < 1e-6);
        assert!(results[0].distance <= results[1].distance);
    }

    #[tokio::test]
    async fn save_load_preserves_positional_correspondence() {
        let tmp = TempDir::new().unwrap();
        let snippets = vec![
            "func changeNavigationBarColor(to color: UIColor)".to_string(),
            "let jsonString = try JSONEncoder().encode(object)".to_string(),
            "print('Hello, World!')".to_string(),
        ];

        let mut store = stub_store();
        store.add_snippets(snippets.clone()).await.unwrap();

        let before = store.search("encode an object as JSON", 3).await.unwrap();
        store.save(tmp.path()).await.unwrap();
        drop(store);

        let reloaded = SnippetStore::load(tmp.path(), EmbeddingModel::stub().unwrap())
            .await
            .unwrap();
        assert_eq!(reloaded.len(), 3);

        let after = reloaded.search("encode an object as JSON", 3).await.unwrap();
        assert_eq!(before, after);
        for hit in &after {
            assert_eq!(hit.snippet, snippets[hit.position]);
        }
    }

    #[tokio::test]
    async fn search_with_oversized_k_returns_all() {
        let mut store = stub_store();
        store.add_snippets(vec!["one".to_string()]).await.unwrap();
        let results = store.search("anything", 10).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    #[ignore = "Requires ONNX model assets in the model dir"]
    async fn navigation_bar_query_ranks_ui_snippet_first() {
        let mut store = SnippetStore::from_env().unwrap();
        store
            .add_snippets(vec![
                "func changeNavigationBarColor(to color: UIColor) { UINavigationBar.appearance().barTintColor = color }".to_string(),
                "let jsonString = try JSONEncoder().encode(object)".to_string(),
                "print('Hello, World!')".to_string(),
            ])
            .await
            .unwrap();

        let results = store
            .search("A function to change the navigation bar color", 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].position, 0);
    }

    #[tokio::test]
    async fn load_rejects_mismatched_artifacts() {
        let tmp = TempDir::new().unwrap();
        let mut store = stub_store();
        store
            .add_snippets(vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        store.save(tmp.path()).await.unwrap();

        // Truncate the corpus behind the store's back.
        let corpus = SnippetCorpus::from_snippets(vec!["a".to_string()]);
        corpus.save(tmp.path().join(CORPUS_FILE)).await.unwrap();

        let err = SnippetStore::load(tmp.path(), EmbeddingModel::stub().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::IndexError(_)));
    }
}
