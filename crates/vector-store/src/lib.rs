//! # Snipdex Vector Store
//!
//! Embedding, exact nearest-neighbor search, and artifact persistence for
//! text snippets.
//!
//! ## Architecture
//!
//! ```text
//! Snippet[]
//!     │
//!     ├──> EmbeddingModel (ONNX Runtime, or deterministic stub)
//!     │      └─> Vec<f32> per snippet, L2-normalized
//!     │
//!     ├──> FlatIndex
//!     │      └─> exact squared-L2 scan, (position, distance) hits
//!     │
//!     └──> Artifacts on disk
//!            ├─> snippets.json   (schema-versioned JSON)
//!            ├─> embeddings.bin  (schema-versioned bincode)
//!            └─> index.bin       (schema-versioned bincode)
//! ```
//!
//! The vector at position i always belongs to the snippet at position i;
//! that correspondence is the only linkage between the artifacts and is
//! verified when a [`SnippetStore`] is reloaded.
//!
//! ## Example
//!
//! ```no_run
//! use snipdex_vector_store::{EmbeddingModel, SnippetStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut store = SnippetStore::from_env()?;
//!     store
//!         .add_snippets(vec!["let x = 1;".to_string()])
//!         .await?;
//!     store.save("data").await?;
//!
//!     let reloaded = SnippetStore::load("data", EmbeddingModel::from_env()?).await?;
//!     for hit in reloaded.search("assign a variable", 3).await? {
//!         println!("{}: {:.4}", hit.snippet, hit.similarity());
//!     }
//!     Ok(())
//! }
//! ```

mod corpus;
mod embeddings;
mod error;
mod flat_index;
mod matrix;
mod store;
mod types;

pub use corpus::{SnippetCorpus, SNIPPET_CORPUS_SCHEMA_VERSION};
pub use embeddings::{model_dir, EmbeddingModel};
pub use error::{Result, VectorStoreError};
pub use flat_index::{FlatIndex, FLAT_INDEX_SCHEMA_VERSION};
pub use matrix::{EmbeddingMatrix, EMBEDDING_MATRIX_SCHEMA_VERSION};
pub use store::{SnippetStore, CORPUS_FILE, INDEX_FILE, MATRIX_FILE};
pub use types::{RankedSnippet, SearchHit};
