use std::collections::HashSet;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{NamespaceEntry, NamespaceTable},
    storage::{BackendLocal, StorageManager},
};

const CONFIG_FILE: &str = "config.yaml";

/// Default number of results per query
const DEFAULT_RESULTS: usize = 3;
/// Default embedding model
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
/// Default number of texts per embedding call during a build
const DEFAULT_BATCH_SIZE: usize = 256;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Embedding settings. Catalog and queries must agree on all of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// L2-normalize every vector before storing or querying
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Texts per embedding call while building the catalog
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            normalize: true,
            batch_size: DEFAULT_BATCH_SIZE,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_normalize() -> bool {
    true
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_results() -> usize {
    DEFAULT_RESULTS
}

/// The vocabularies the catalog is built from.
pub fn default_namespaces() -> Vec<NamespaceEntry> {
    [
        ("S223", "http://data.ashrae.org/standard223#", "ASHRAE Standard 223"),
        ("WATR", "urn:nawi-water-ontology#", "Water ontology"),
        ("UNIT", "http://qudt.org/vocab/unit/", "QUDT units"),
        ("QK", "http://qudt.org/vocab/quantitykind/", "QUDT quantity kinds"),
    ]
    .into_iter()
    .map(|(tag, prefix, description)| NamespaceEntry {
        tag: tag.to_string(),
        prefix: prefix.to_string(),
        description: description.to_string(),
    })
    .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Results per query when `-n` is not given
    #[serde(default = "default_results")]
    pub default_results: usize,

    /// Record files (CSV or JSON) used by `build` when none are given
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Namespace tag <-> URI prefix table shared by ingestion and queries
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<NamespaceEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_results: DEFAULT_RESULTS,
            sources: Vec::new(),
            embedding: EmbeddingConfig::default(),
            namespaces: default_namespaces(),
        }
    }
}

impl Config {
    pub fn namespace_table(&self) -> NamespaceTable {
        NamespaceTable::new(self.namespaces.clone())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_results == 0 {
            bail!("default_results must be greater than 0");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }

        if self.embedding.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }

        if self.namespaces.is_empty() {
            bail!("namespaces must list at least one vocabulary");
        }

        let mut tags = HashSet::new();
        let mut prefixes = HashSet::new();
        for (idx, ns) in self.namespaces.iter().enumerate() {
            let idx = idx + 1;
            if ns.tag.trim().is_empty() || ns.prefix.trim().is_empty() {
                bail!("namespace #{idx} needs both a tag and a prefix");
            }
            if !tags.insert(ns.tag.to_uppercase()) {
                bail!("namespace tag '{}' is listed more than once", ns.tag);
            }
            if !prefixes.insert(ns.prefix.as_str()) {
                bail!("namespace prefix '{}' is listed more than once", ns.prefix);
            }
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if missing.
    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = BackendLocal::new(base_path)
            .with_context(|| format!("Failed to create base directory {base_path}"))?;

        if !store.exists(CONFIG_FILE) {
            log::info!("Creating default config at {base_path}/{CONFIG_FILE}");
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save(base_path)?;
        }

        Ok(config)
    }

    pub fn save(&self, base_path: &str) -> anyhow::Result<()> {
        let store = BackendLocal::new(base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}
