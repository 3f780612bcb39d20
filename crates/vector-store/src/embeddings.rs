use crate::error::{Result, VectorStoreError};
use ndarray::{Array, Axis, Dimension, Ix2, Ix3};
use once_cell::sync::OnceCell;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use ort::Error as OrtError;
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::task::spawn_blocking;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EmbeddingMode {
    Fast,
    Stub,
}

impl EmbeddingMode {
    fn from_env() -> Result<Self> {
        let raw = env::var("SNIPDEX_EMBEDDING_MODE")
            .unwrap_or_else(|_| "fast".to_string())
            .to_ascii_lowercase();
        match raw.as_str() {
            "fast" => Ok(Self::Fast),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported SNIPDEX_EMBEDDING_MODE '{other}' (expected 'fast' or 'stub')"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ModelId(String);

impl Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ModelId {
    fn from_raw(model_name: &str) -> Self {
        Self(Self::normalize(model_name))
    }

    fn from_env() -> Self {
        let model_name = env::var("SNIPDEX_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "all-minilm-l6-v2".to_string());
        Self::from_raw(&model_name)
    }

    fn normalize(raw: &str) -> String {
        let model_name = raw.trim().to_ascii_lowercase();
        match model_name.as_str() {
            "all-minilm-l6-v2" | "minilm" | "sentence-transformers/all-minilm-l6-v2" => {
                "all-minilm-l6-v2".to_string()
            }
            "bge-small-en-v1.5" => "bge-small".to_string(),
            other => other.to_string(),
        }
    }

    fn spec(&self) -> Result<ModelSpec> {
        let (dimension, max_length, max_batch) = match self.0.as_str() {
            "all-minilm-l6-v2" => (384, 256, 32),
            "bge-small" => (384, 512, 32),
            other => {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Unknown embedding model id '{other}'. Available: all-minilm-l6-v2, bge-small"
                )))
            }
        };
        Ok(ModelSpec {
            id: self.clone(),
            dimension,
            max_length,
            max_batch,
        })
    }
}

#[derive(Clone)]
struct ModelSpec {
    id: ModelId,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

impl ModelSpec {
    fn assets_in(&self, model_dir: &Path) -> ModelAssets {
        let model_dir = model_dir.join(self.id.to_string());
        ModelAssets {
            model_path: model_dir.join("model.onnx"),
            tokenizer_path: model_dir.join("tokenizer.json"),
        }
    }
}

struct ModelAssets {
    model_path: PathBuf,
    tokenizer_path: PathBuf,
}

/// Resolves the model asset directory. Precedence: explicit env override,
/// then a `models/` folder found walking up from the executable or the
/// current directory, then the user cache.
pub fn model_dir() -> PathBuf {
    if let Ok(path) = env::var("SNIPDEX_MODEL_DIR") {
        return PathBuf::from(path);
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(mut dir) = exe.parent().map(Path::to_path_buf) {
            loop {
                let candidate = dir.join("models");
                if candidate.is_dir() {
                    return candidate;
                }
                if !dir.pop() {
                    break;
                }
            }
        }
    }

    if let Ok(mut dir) = env::current_dir() {
        loop {
            let candidate = dir.join("models");
            if candidate.is_dir() {
                return candidate;
            }
            if !dir.pop() {
                break;
            }
        }
    }

    if let Ok(path) = env::var("XDG_CACHE_HOME") {
        return PathBuf::from(path).join("snipdex").join("models");
    }
    env::var("HOME")
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
        .join(".cache")
        .join("snipdex")
        .join("models")
}

#[derive(Debug)]
struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

impl OrtBackend {
    fn new(spec: &ModelSpec, model_dir: &Path) -> Result<Self> {
        // Deterministic, low-contention tokenization unless the user opted in
        // to parallelism explicitly.
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let assets = spec.assets_in(model_dir);
        if !assets.model_path.exists() || !assets.tokenizer_path.exists() {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {}. Place the exported model there or set SNIPDEX_MODEL_DIR.",
                spec.id,
                assets.model_path.display(),
                assets.tokenizer_path.display(),
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&assets.tokenizer_path)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Tokenizer truncation failed: {e}"))
            })?;

        let (intra_threads, inter_threads) = default_ort_threads();
        let session = Session::builder()
            .map_err(|e| to_embedding_error(&e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| to_embedding_error(&e))?
            .with_inter_threads(inter_threads)
            .map_err(|e| to_embedding_error(&e))?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| to_embedding_error(&e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| to_embedding_error(&e))?
            .commit_from_file(&assets.model_path)
            .map_err(|e| {
                VectorStoreError::EmbeddingError(format!("Failed to load ONNX model: {e}"))
            })?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_length: spec.max_length,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("Tokenization failed: {e}"))
                })?;

            if encodings.is_empty() {
                continue;
            }

            let seq_len = encodings[0].len();
            if seq_len > self.max_length {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Tokenized length {} exceeds max_length {}",
                    seq_len, self.max_length
                )));
            }
            if encodings.iter().any(|e| e.len() != seq_len) {
                return Err(VectorStoreError::EmbeddingError(
                    "Inconsistent sequence lengths after padding".to_string(),
                ));
            }
            let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

            let ids_array = Array::from_shape_vec((batch.len(), seq_len), ids)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("IDs shape error: {e}")))?;
            let mask_array = Array::from_shape_vec((batch.len(), seq_len), masks)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Mask shape error: {e}")))?;
            let type_array = Array::from_shape_vec((batch.len(), seq_len), type_ids)
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Types shape error: {e}")))?;
            let ids_shape = ids_array.raw_dim().into_dyn();

            let ids_tensor = Tensor::from_array(ids_array.into_dyn())
                .map_err(|e| to_embedding_error(&e))?
                .upcast();
            let mask_tensor = Tensor::from_array(mask_array.into_dyn())
                .map_err(|e| to_embedding_error(&e))?
                .upcast();
            let type_tensor = Tensor::from_array(type_array.into_dyn())
                .map_err(|e| to_embedding_error(&e))?
                .upcast();

            let array = {
                let mut session = self.session.lock().map_err(|_| {
                    VectorStoreError::EmbeddingError("Failed to lock ONNX session".into())
                })?;

                let mut available: HashMap<String, DynTensor> = HashMap::new();
                available.insert("input_ids".to_string(), ids_tensor);
                available.insert("attention_mask".to_string(), mask_tensor);
                available.insert("token_type_ids".to_string(), type_tensor);

                let mut feed: HashMap<String, DynTensor> = HashMap::new();
                for input in &session.inputs {
                    let key = input.name.clone();
                    if let Some(value) = available.get(&key) {
                        feed.insert(key, value.clone());
                    } else {
                        let zeros = zero_tensor(&ids_shape, input).map_err(|e| {
                            VectorStoreError::EmbeddingError(format!(
                                "Unsupported ONNX input '{key}': {e}"
                            ))
                        })?;
                        feed.insert(key, zeros);
                    }
                }

                let outputs = session.run(SessionInputs::from(feed)).map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("ONNX forward failed: {e}"))
                })?;

                if outputs.len() == 0 {
                    return Err(VectorStoreError::EmbeddingError(
                        "ONNX returned no outputs".to_string(),
                    ));
                }

                outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        VectorStoreError::EmbeddingError(format!(
                            "Failed to decode ONNX output: {e}"
                        ))
                    })?
                    .to_owned()
            };
            results.extend(embeddings_from_output(array, &mask_rows, self.dimension)?);
        }

        Ok(results)
    }
}

fn default_ort_threads() -> (usize, usize) {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    // Keep inference polite next to the rest of the process; this is not a
    // throughput-critical daemon.
    let intra_threads = if cpus <= 4 {
        1
    } else if cpus <= 12 {
        2
    } else {
        4
    };
    (intra_threads, 1)
}

const fn ensure_dimension(vec: &[f32], expected: usize) -> Result<()> {
    if vec.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vec.len(),
        });
    }
    Ok(())
}

fn embeddings_from_output(
    array: ndarray::ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::new();
    match array.ndim() {
        2 => {
            let embeddings = array
                .into_dimensionality::<Ix2>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            out.reserve(embeddings.len_of(Axis(0)));
            for row in embeddings.outer_iter() {
                let mut emb = row.to_owned().to_vec();
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        3 => {
            let hidden = array
                .into_dimensionality::<Ix3>()
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Bad output shape: {e}")))?;
            out.reserve(hidden.len_of(Axis(0)));
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let attn = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                let mut emb = mean_pool(sample.view(), &attn);
                ensure_dimension(&emb, expected_dimension)?;
                normalize(&mut emb);
                out.push(emb);
            }
        }
        _ => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }
    Ok(out)
}

fn mean_pool(sample: ndarray::ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    if sample.is_empty() {
        return vec![];
    }

    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token_idx, token) in sample.outer_iter().enumerate() {
        if *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }

    if count == 0.0 {
        return sum;
    }
    for value in &mut sum {
        *value /= count;
    }
    sum
}

fn build_flat_tensors(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let encoding_ids = encoding.get_ids();
        let encoding_masks = encoding.get_attention_mask();
        let encoding_types = encoding.get_type_ids();

        for idx in 0..seq_len {
            ids.push(i64::from(*encoding_ids.get(idx).unwrap_or(&0)));
            masks.push(i64::from(*encoding_masks.get(idx).unwrap_or(&0)));
            type_ids.push(i64::from(*encoding_types.get(idx).unwrap_or(&0)));
        }

        mask_rows.push(
            encoding_masks
                .iter()
                .take(seq_len)
                .map(|v| i64::from(*v))
                .collect(),
        );
    }

    (ids, masks, type_ids, mask_rows)
}

fn zero_tensor(shape: &ndarray::IxDyn, input: &Input) -> Result<DynTensor> {
    let tensor = match &input.input_type {
        ort::value::ValueType::Tensor { ty, .. } => match ty {
            TensorElementType::Int64 => {
                Tensor::from_array(ndarray::Array::<i64, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            TensorElementType::Bool => {
                Tensor::from_array(ndarray::Array::from_elem(shape.clone(), false))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            TensorElementType::Float32 => {
                Tensor::from_array(ndarray::Array::<f32, _>::zeros(shape.clone()))
                    .map_err(|e| to_embedding_error(&e))?
                    .upcast()
            }
            other => {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Cannot synthesize zeros for tensor type {other:?} (input {})",
                    input.name
                )))
            }
        },
        other => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unsupported input type for zero init: {other:?}"
            )))
        }
    };
    Ok(tensor)
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn to_embedding_error(error: &OrtError) -> VectorStoreError {
    VectorStoreError::EmbeddingError(format!("{error}"))
}

// One ONNX session per model id, shared across EmbeddingModel handles in the
// process. Loading a sentence-transformer session is expensive; embedding is
// not.
static BACKENDS: OnceCell<Mutex<HashMap<ModelId, Arc<OrtBackend>>>> = OnceCell::new();

#[derive(Debug)]
enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Stub { dimension: usize },
}

/// Sentence-embedding model: maps text to fixed-dimension, L2-normalized
/// vectors. Deterministic for a fixed model and input.
#[derive(Debug)]
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    dimension: usize,
}

impl EmbeddingModel {
    /// Model id and backend mode from the `SNIPDEX_*` environment.
    pub fn from_env() -> Result<Self> {
        Self::from_mode_and_id(EmbeddingMode::from_env()?, &ModelId::from_env())
    }

    /// Explicit model id; backend mode still honors the environment.
    pub fn for_model(model_id: &str) -> Result<Self> {
        Self::from_mode_and_id(EmbeddingMode::from_env()?, &ModelId::from_raw(model_id))
    }

    /// Deterministic hash backend, no model assets required. Used by tests
    /// and model-less environments.
    pub fn stub() -> Result<Self> {
        Self::from_mode_and_id(EmbeddingMode::Stub, &ModelId::from_env())
    }

    fn from_mode_and_id(mode: EmbeddingMode, id: &ModelId) -> Result<Self> {
        let spec = id.spec()?;

        if mode == EmbeddingMode::Stub {
            return Ok(Self {
                dimension: spec.dimension,
                backend: EmbeddingBackend::Stub {
                    dimension: spec.dimension,
                },
            });
        }

        let cache = BACKENDS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = cache
            .lock()
            .map_err(|_| VectorStoreError::EmbeddingError("Failed to lock backend cache".into()))?;
        let backend = match guard.get(id) {
            Some(backend) => backend.clone(),
            None => {
                let backend = Arc::new(OrtBackend::new(&spec, model_dir().as_path())?);
                guard.insert(id.clone(), backend.clone());
                backend
            }
        };

        Ok(Self {
            dimension: spec.dimension,
            backend: EmbeddingBackend::Ort(backend),
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }

    /// Embeds a batch, preserving input order and length. Empty strings are
    /// accepted; an empty batch yields an empty result.
    pub async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let owned: Vec<String> = texts.into_iter().map(ToString::to_string).collect();
        match &self.backend {
            EmbeddingBackend::Stub { dimension } => {
                let dimension = *dimension;
                Ok(owned.iter().map(|t| stub_embed(t, dimension)).collect())
            }
            EmbeddingBackend::Ort(backend) => {
                let backend = backend.clone();
                spawn_blocking(move || backend.embed_batch_blocking(&owned))
                    .await
                    .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn stub_embeddings_are_deterministic_and_ordered() {
        let model = EmbeddingModel::stub().unwrap();
        let texts = vec!["alpha", "beta", "gamma"];

        let first = model.embed_batch(texts.clone()).await.unwrap();
        let second = model.embed_batch(texts).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        // Order is positional: single embed of the same text matches its row.
        let beta = model.embed("beta").await.unwrap();
        assert_eq!(first[1], beta);
    }

    #[tokio::test]
    async fn stub_embeddings_are_normalized() {
        let model = EmbeddingModel::stub().unwrap();
        let vec = model.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), model.dimension());
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_result() {
        let model = EmbeddingModel::stub().unwrap();
        let out = model.embed_batch(vec![]).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn empty_string_is_accepted() {
        let model = EmbeddingModel::stub().unwrap();
        let vec = model.embed("").await.unwrap();
        assert_eq!(vec.len(), model.dimension());
    }

    #[tokio::test]
    #[ignore = "Requires ONNX model assets in the model dir"]
    async fn ort_embed_batch_matches_dimension() {
        let model = EmbeddingModel::from_env().unwrap();
        let embeddings = model.embed_batch(vec!["hello world", "foo"]).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        for emb in embeddings {
            assert_eq!(emb.len(), model.dimension());
        }
    }
}
