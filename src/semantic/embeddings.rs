//! Embedding model boundary.
//!
//! The model is an opaque collaborator:
//! - [`ModelLoader::load`] runs once (async) and yields a [`ModelHandle`]
//! - [`ModelRunner::run`] turns text into raw numeric output
//!
//! Pooling and normalization of the raw output happen in the provider, so a
//! loader only has to expose what its runtime produces. The fastembed-backed
//! loader is the production implementation; tests inject fakes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    /// Load failed earlier; every call fails fast until `retry` is requested.
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Cannot embed empty text")]
    EmptyInput,

    #[error("Model produced {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model produced a zero or non-finite vector")]
    DegenerateVector,
}

/// What a model run produces before pooling.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// One sentence-level vector (already pooled by the runtime).
    Pooled(Vec<f32>),
    /// One vector per token; mean-pooled by the provider.
    Tokens(Vec<Vec<f32>>),
}

/// A loaded, resident model.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn run(&self, text: &str) -> Result<RawOutput, EmbeddingError>;
}

pub type ModelHandle = Arc<dyn ModelRunner>;

#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Model name; also identifies the model version for persisted vectors.
    fn model_name(&self) -> &str;

    async fn load(&self) -> Result<ModelHandle, EmbeddingError>;
}

/// SHA256 of the model name, used to tag persisted vectors.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Loads a fastembed ONNX model, downloading it into `cache_dir/models` on
/// first use.
pub struct FastembedLoader {
    model_name: String,
    cache_dir: PathBuf,
    download_timeout: Duration,
}

impl FastembedLoader {
    pub fn new(model_name: &str, cache_dir: PathBuf, download_timeout: Option<Duration>) -> Result<Self, EmbeddingError> {
        // reject unknown names before any download starts
        parse_model_name(model_name)?;

        Ok(Self {
            model_name: model_name.to_string(),
            cache_dir,
            download_timeout: download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
        })
    }
}

#[async_trait]
impl ModelLoader for FastembedLoader {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn load(&self) -> Result<ModelHandle, EmbeddingError> {
        let model_enum = parse_model_name(&self.model_name)?;
        let models_dir = self.cache_dir.join("models");

        let init = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {e}"))
            })?;

            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true);

            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
            let dimensions = probe_dimensions(&mut model)?;

            Ok::<_, EmbeddingError>(FastembedRunner {
                model: Arc::new(Mutex::new(model)),
                dimensions,
            })
        });

        let runner = match tokio::time::timeout(self.download_timeout, init).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => return Err(EmbeddingError::InitFailed(join_err.to_string())),
            Err(_) => return Err(EmbeddingError::DownloadTimeout(self.download_timeout.as_secs())),
        };

        log::info!(
            "loaded embedding model '{}' ({} dimensions)",
            self.model_name,
            runner.dimensions
        );
        Ok(Arc::new(runner))
    }
}

/// fastembed's `embed()` takes `&mut self`, hence the mutex.
struct FastembedRunner {
    model: Arc<Mutex<TextEmbedding>>,
    dimensions: usize,
}

#[async_trait]
impl ModelRunner for FastembedRunner {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn run(&self, text: &str) -> Result<RawOutput, EmbeddingError> {
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {e}"))
            })?;

            let embeddings = model
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            embeddings
                .into_iter()
                .next()
                .map(RawOutput::Pooled)
                .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
    }
}

/// Parse model name string to fastembed enum.
fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-small-en-v1.5-q" | "bgesmallenv15q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
        "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-base-en-v1.5-q" | "bgebaseenv15q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
        _ => Err(EmbeddingError::InvalidModel(format!(
            "Unknown model: {name}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)"
        ))),
    }
}

fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
    let test_embeddings = model
        .embed(vec!["test"], None)
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {e}")))?;

    test_embeddings
        .first()
        .map(|v| v.len())
        .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
}
