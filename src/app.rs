use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::config::Config;
use crate::embeddings::EmbeddingModel;
use crate::service::LookupService;

/// Overrides the data directory
const BASE_PATH_ENV: &str = "FIND_MY_URI_BASE_PATH";

/// Wires configuration, the embedding model and the lookup service together.
pub struct AppFactory;

impl AppFactory {
    /// Get the data directory, creating it if needed.
    pub fn get_base_path() -> Result<String> {
        let base_path = match std::env::var(BASE_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => path,
            _ => {
                let home = my_home()
                    .context("Could not determine home directory")?
                    .context("Home directory path is empty")?;
                format!("{}/.local/share/find-my-uri", home.to_string_lossy())
            }
        };

        std::fs::create_dir_all(&base_path)
            .with_context(|| format!("Failed to create data directory {base_path}"))?;

        Ok(base_path)
    }

    /// Load config and the embedding model, then build the service.
    ///
    /// The model is downloaded into `<base>/models` on first use.
    pub fn create_service(base_path: &str) -> Result<LookupService> {
        let config = Config::load_with(base_path)?;

        let model = EmbeddingModel::new(
            &config.embedding.model,
            PathBuf::from(base_path),
            Some(Duration::from_secs(config.embedding.download_timeout_secs)),
        )
        .context("Failed to load embedding model")?;
        log::info!("Using embedding model '{}'", config.embedding.model);

        Ok(LookupService::new(
            config,
            PathBuf::from(base_path),
            Arc::new(model),
        ))
    }
}
