//! Text embedding providers.
//!
//! [`EmbeddingProvider`] is the seam the lookup service and the ingestion
//! pipeline depend on; [`EmbeddingModel`] is the fastembed-backed
//! implementation used by the binary.
//!
//! Catalog vectors and query vectors must be produced by the same model with
//! the same `normalize` setting. The persisted catalog records both; nothing
//! here can check it for vectors produced elsewhere.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model download timed out after {0}s")]
    DownloadTimeout(u64),
}

/// Maps text to fixed-length vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, used to tag persisted catalogs.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per text, same order.
    fn embed_batch(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    fn embed(&self, text: &str, normalize: bool) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()], normalize)?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    /// SHA256 hash of the model name for storage identification.
    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.name())
    }
}

/// SHA256 hash of a model name.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Scale `v` to unit L2 length. All-zero vectors are left as they are.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = crate::catalog::l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
}

/// Run `task` on a worker thread and give up after `timeout`.
///
/// A timed-out worker is left to finish on its own; its result is dropped.
fn run_with_timeout<T, F>(timeout: Duration, task: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("model-load".to_string())
        .spawn(move || {
            let _ = tx.send(task());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to spawn loader thread: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::DownloadTimeout(timeout.as_secs())),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "Model loader exited without a result".to_string(),
        )),
    }
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    /// * `download_timeout` - Limit for fetching and loading the model files
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        log::debug!(
            "Loading embedding model '{}' (download timeout {}s)",
            model_name,
            timeout.as_secs()
        );

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = run_with_timeout(timeout, move || {
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        })?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, all-MiniLM-L6-v2-q, bge-small-en-v1.5, bge-base-en-v1.5",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl EmbeddingProvider for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let mut embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        if normalize {
            embeddings.iter_mut().for_each(|v| l2_normalize(v));
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires model download"]
    fn test_model_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let model = EmbeddingModel::new("all-MiniLM-L6-v2", temp_dir.path().to_path_buf(), None).unwrap();

        assert_eq!(model.name(), "all-MiniLM-L6-v2");
        assert_eq!(model.dimensions(), 384);
    }

    #[test]
    #[ignore = "requires model download"]
    fn test_embedding_is_normalized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let model = EmbeddingModel::new("all-MiniLM-L6-v2", temp_dir.path().to_path_buf(), None).unwrap();

        let embedding = model.embed("supply air temperature", true).unwrap();
        assert_eq!(embedding.len(), 384);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_invalid_model_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = EmbeddingModel::new("nonexistent-model", temp_dir.path().to_path_buf(), None);
        assert!(matches!(result, Err(EmbeddingError::InvalidModel(_))));
    }

    #[test]
    fn test_run_with_timeout_returns_result() {
        let value = run_with_timeout(Duration::from_secs(5), || Ok(42)).unwrap();
        assert_eq!(value, 42);

        let err = run_with_timeout::<(), _>(Duration::from_secs(5), || {
            Err(EmbeddingError::InitFailed("bad model file".to_string()))
        });
        assert!(matches!(err, Err(EmbeddingError::InitFailed(_))));
    }

    #[test]
    fn test_run_with_timeout_gives_up() {
        let result = run_with_timeout(Duration::from_millis(50), || {
            thread::sleep(Duration::from_secs(2));
            Ok(())
        });
        assert!(matches!(result, Err(EmbeddingError::DownloadTimeout(_))));
    }

    #[test]
    fn test_run_with_timeout_worker_panic() {
        let result = run_with_timeout::<(), _>(Duration::from_secs(5), || panic!("loader crashed"));
        assert!(matches!(result, Err(EmbeddingError::InitFailed(_))));
    }

    #[test]
    fn test_model_id_hash_is_stable() {
        assert_eq!(model_id_hash("all-MiniLM-L6-v2"), model_id_hash("all-MiniLM-L6-v2"));
        assert_ne!(model_id_hash("all-MiniLM-L6-v2"), model_id_hash("bge-base-en-v1.5"));
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
