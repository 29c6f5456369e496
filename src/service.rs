//! Lookup service: phrase in, ranked ontology classes out.
//!
//! Coordinates the embedding provider, the catalog store, the ranker and the
//! persisted catalog:
//! - `search`: validate -> snapshot -> embed -> rank
//! - `rebuild` / `update` / `import`: ingest -> publish new snapshot -> save
//!
//! Errors are typed; turning them into user-facing text is the CLI's job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::{
    Catalog, CatalogError, CatalogItem, CatalogStorage, CatalogStorageError, CatalogStore,
    NamespaceTable,
};
use crate::config::Config;
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::ingest::{self, IngestError};
use crate::lock::FileLock;
use crate::ranker::{self, QueryResult, RankError};

/// Name of the persisted catalog inside the base directory
pub const CATALOG_FILE: &str = "catalog.bin";

/// Errors that can occur during lookup operations.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Search phrase is empty")]
    EmptyPhrase,

    #[error("Result count must be a positive integer")]
    InvalidCount,

    #[error("Unknown namespace: {0}")]
    InvalidFilter(String),

    #[error("No sources to build from: pass record files or set `sources` in config.yaml")]
    NoSources,

    #[error("No catalog found at {0}")]
    MissingCatalog(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Ranking error: {0}")]
    Rank(RankError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Storage error: {0}")]
    Storage(#[from] CatalogStorageError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Imported vectors have {got} dimensions, model '{model}' produces {expected}")]
    ProviderDimensions {
        model: String,
        expected: usize,
        got: usize,
    },

    #[error("Failed to lock catalog: {0}")]
    Lock(std::io::Error),
}

impl From<RankError> for LookupError {
    fn from(err: RankError) -> Self {
        match err {
            RankError::InvalidFilter(tag) => Self::InvalidFilter(tag),
            other => Self::Rank(other),
        }
    }
}

impl LookupError {
    /// Bad input from the user: report and ask again, nothing changed.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyPhrase | Self::InvalidCount | Self::InvalidFilter(_) | Self::NoSources
        )
    }

    /// The catalog cannot be trusted any more; the session should end.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Rank(RankError::DimensionMismatch { .. })
                | Self::Catalog(_)
                | Self::Storage(_)
                | Self::ProviderDimensions { .. }
        )
    }
}

/// A validated-on-use search request.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub phrase: String,
    /// Number of results; the configured default when `None`
    pub count: Option<usize>,
    /// Namespace tag or full prefix
    pub namespace: Option<String>,
}

impl SearchRequest {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            ..Default::default()
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// One hit, borrowed from the snapshot it was ranked against.
#[derive(Debug, Serialize)]
pub struct Hit<'a> {
    pub rank: usize,
    pub position: usize,
    pub score: f64,
    #[serde(flatten)]
    pub item: &'a CatalogItem,
}

/// Ranked results plus the catalog snapshot they refer to.
pub struct SearchResponse {
    catalog: Arc<Catalog>,
    results: Vec<QueryResult>,
}

impl SearchResponse {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn hits(&self) -> impl Iterator<Item = Hit<'_>> {
        self.results.iter().enumerate().filter_map(|(idx, result)| {
            self.catalog.get(result.position).map(|item| Hit {
                rank: idx + 1,
                position: result.position,
                score: result.score,
                item,
            })
        })
    }
}

/// Counts reported after a build, update or import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub added: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub total: usize,
}

/// Service for looking up ontology classes by phrase.
pub struct LookupService {
    config: Config,
    store: CatalogStore,
    storage: CatalogStorage,
    provider: Arc<dyn EmbeddingProvider>,
    base_path: PathBuf,
}

impl LookupService {
    /// Create a service with an empty catalog.
    ///
    /// # Arguments
    /// * `config` - Loaded configuration
    /// * `base_path` - Directory holding `catalog.bin`
    /// * `provider` - Embedding provider for queries and builds
    pub fn new(config: Config, base_path: PathBuf, provider: Arc<dyn EmbeddingProvider>) -> Self {
        let store = CatalogStore::new(config.namespace_table());
        let storage = CatalogStorage::new(base_path.join(CATALOG_FILE));
        Self {
            config,
            store,
            storage,
            provider,
            base_path,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn namespaces(&self) -> NamespaceTable {
        self.config.namespace_table()
    }

    pub fn catalog_path(&self) -> &Path {
        self.storage.path()
    }

    /// Whether a persisted catalog exists on disk.
    pub fn has_persisted_catalog(&self) -> bool {
        self.storage.exists()
    }

    pub fn snapshot(&self) -> Result<Arc<Catalog>, LookupError> {
        Ok(self.store.snapshot()?)
    }

    pub fn indexed_count(&self) -> Result<usize, LookupError> {
        Ok(self.store.size()?)
    }

    /// Replace the in-memory catalog with the persisted one.
    ///
    /// Any mismatch with the configured model or normalization is fatal.
    pub fn load_persisted(&self) -> Result<usize, LookupError> {
        if !self.storage.exists() {
            return Err(LookupError::MissingCatalog(
                self.storage.path().display().to_string(),
            ));
        }

        let catalog = self.storage.load(
            &self.provider.model_id_hash(),
            self.provider.dimensions(),
            self.config.embedding.normalize,
            self.namespaces(),
        )?;
        let count = self.store.load(catalog.into_items())?;

        log::info!(
            "Loaded {} catalog items from {}",
            count,
            self.storage.path().display()
        );
        Ok(count)
    }

    /// Resolve a namespace tag or prefix to its canonical tag.
    pub fn resolve_namespace(&self, input: &str) -> Result<String, LookupError> {
        self.namespaces()
            .resolve(input)
            .map(str::to_string)
            .ok_or_else(|| LookupError::InvalidFilter(input.trim().to_string()))
    }

    /// Find the catalog entries most similar to a phrase.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, LookupError> {
        let phrase = request.phrase.trim();
        if phrase.is_empty() {
            return Err(LookupError::EmptyPhrase);
        }

        let k = match request.count {
            Some(0) => return Err(LookupError::InvalidCount),
            Some(k) => k,
            None => self.config.default_results,
        };

        let namespace = request
            .namespace
            .as_deref()
            .map(|ns| self.resolve_namespace(ns))
            .transpose()?;

        // pin the snapshot before the (possibly slow) embedding step
        let catalog = self.store.snapshot()?;

        let query = self.provider.embed(phrase, self.config.embedding.normalize)?;
        let results = ranker::top_k(&catalog, &query, namespace.as_deref(), k)?;

        log::debug!("'{}' -> {} results", phrase, results.len());
        Ok(SearchResponse { catalog, results })
    }

    fn sources_or_configured(&self, sources: &[PathBuf]) -> Result<Vec<PathBuf>, LookupError> {
        let sources: Vec<PathBuf> = if sources.is_empty() {
            self.config.sources.iter().map(PathBuf::from).collect()
        } else {
            sources.to_vec()
        };

        if sources.is_empty() {
            return Err(LookupError::NoSources);
        }
        Ok(sources)
    }

    fn ingest(&self, sources: &[PathBuf], show_progress: bool) -> Result<(Vec<CatalogItem>, usize), LookupError> {
        let records = ingest::read_sources(sources)?;
        let prepared = ingest::prepare(&records, &self.namespaces());
        log::info!(
            "Prepared {} records ({} rejected)",
            prepared.records.len(),
            prepared.rejected
        );

        let items = ingest::embed_records(
            prepared.records,
            self.provider.as_ref(),
            self.config.embedding.normalize,
            self.config.embedding.batch_size,
            show_progress,
        )?;
        Ok((items, prepared.rejected))
    }

    /// Re-ingest every source and replace the catalog.
    pub fn rebuild(&self, sources: &[PathBuf], show_progress: bool) -> Result<BuildReport, LookupError> {
        let sources = self.sources_or_configured(sources)?;
        let _span = tracing::info_span!("rebuild", sources = sources.len()).entered();
        let _lock = FileLock::try_acquire(&self.base_path).map_err(LookupError::Lock)?;

        let (items, rejected) = self.ingest(&sources, show_progress)?;
        let added = self.store.load(items)?;
        self.save()?;

        log::info!("Rebuilt catalog with {} items", added);
        Ok(BuildReport {
            added,
            skipped: 0,
            rejected,
            total: added,
        })
    }

    /// Ingest sources and append items not already in the catalog.
    pub fn update(&self, sources: &[PathBuf], show_progress: bool) -> Result<BuildReport, LookupError> {
        let sources = self.sources_or_configured(sources)?;
        let _span = tracing::info_span!("update", sources = sources.len()).entered();
        let _lock = FileLock::try_acquire(&self.base_path).map_err(LookupError::Lock)?;

        let (items, rejected) = self.ingest(&sources, show_progress)?;
        let outcome = self.store.append(items)?;
        self.save()?;

        let total = self.indexed_count()?;
        log::info!(
            "Added {} items, skipped {} duplicates ({} total)",
            outcome.added,
            outcome.skipped,
            total
        );
        Ok(BuildReport {
            added: outcome.added,
            skipped: outcome.skipped,
            rejected,
            total,
        })
    }

    /// Replace the catalog with precomputed embeddings.
    ///
    /// The vectors must come from the configured model with the configured
    /// normalization; only their length can be checked here.
    pub fn import(&self, metadata: &Path, embeddings: &Path) -> Result<BuildReport, LookupError> {
        let _span = tracing::info_span!("import").entered();
        let _lock = FileLock::try_acquire(&self.base_path).map_err(LookupError::Lock)?;

        let (items, rejected) = ingest::import_precomputed(metadata, embeddings, &self.namespaces())?;
        if let Some(got) = items.first().map(|item| item.embedding.len()) {
            let expected = self.provider.dimensions();
            if got != expected {
                return Err(LookupError::ProviderDimensions {
                    model: self.provider.name().to_string(),
                    expected,
                    got,
                });
            }
        }

        let added = self.store.load(items)?;
        self.save()?;

        Ok(BuildReport {
            added,
            skipped: 0,
            rejected,
            total: added,
        })
    }

    /// Persist the current snapshot.
    pub fn save(&self) -> Result<(), LookupError> {
        let catalog = self.store.snapshot()?;
        self.storage.save(
            &catalog,
            &self.provider.model_id_hash(),
            self.config.embedding.normalize,
        )?;
        log::info!(
            "Saved {} catalog items to {}",
            catalog.len(),
            self.storage.path().display()
        );
        Ok(())
    }
}
