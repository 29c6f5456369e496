//! Catalog of ontology classes and their embeddings.
//!
//! A [`Catalog`] is an immutable, position-ordered snapshot. Each entry owns
//! its metadata and its embedding together, so the two can never drift out of
//! alignment. [`CatalogStore`] holds the current snapshot and replaces it
//! wholesale on `load`/`append`; readers keep whatever `Arc<Catalog>` they
//! took, so a rebuild is never visible half-way through a scan.
//!
//! - `text`: short name / namespace prefix derivation and canonical embedding text
//! - `storage`: binary persistence for `catalog.bin`

pub mod storage;
pub mod text;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

pub use storage::{CatalogStorage, CatalogStorageError};

/// One searchable ontology class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Full URI of the class. Exact-match key, never interpreted by the ranker.
    pub identifier: String,
    /// Local name derived from the identifier.
    pub short_name: String,
    /// Display label (may be empty)
    pub label: String,
    /// Free-text annotation (may be empty)
    pub description: String,
    /// Namespace tag, e.g. `S223`
    pub namespace: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// A known vocabulary: short tag plus the URI prefix it abbreviates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    pub tag: String,
    pub prefix: String,
    #[serde(default)]
    pub description: String,
}

/// The shared tag <-> prefix table. Ingestion and querying both go through it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NamespaceTable {
    entries: Vec<NamespaceEntry>,
}

impl NamespaceTable {
    pub fn new(entries: Vec<NamespaceEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[NamespaceEntry] {
        &self.entries
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.entries.iter().any(|e| e.tag == tag)
    }

    /// Resolve user input to a canonical tag.
    ///
    /// Accepts a tag (case-insensitive) or a full prefix.
    pub fn resolve(&self, input: &str) -> Option<&str> {
        let input = input.trim();
        self.entries
            .iter()
            .find(|e| e.tag.eq_ignore_ascii_case(input) || e.prefix == input)
            .map(|e| e.tag.as_str())
    }

    /// Tag for a namespace prefix, if it is a known vocabulary.
    pub fn tag_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.prefix == prefix)
            .map(|e| e.tag.as_str())
    }
}

/// Errors raised while building a catalog snapshot.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Dimension mismatch at position {position}: expected {expected}, got {got}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        got: usize,
    },

    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Unknown namespace '{namespace}' for {identifier}")]
    UnknownNamespace {
        identifier: String,
        namespace: String,
    },

    #[error("Embedding for {0} contains non-finite values")]
    NonFiniteEmbedding(String),

    #[error("Catalog lock poisoned")]
    Poisoned,
}

/// Catalog entry with its cached squared L2 norm.
#[derive(Debug, Clone)]
struct Entry {
    item: CatalogItem,
    norm_sq: f64,
}

/// Immutable, position-ordered set of catalog items.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Entry>,
    dimensions: Option<usize>,
    namespaces: NamespaceTable,
}

impl Catalog {
    /// Empty catalog bound to a namespace table.
    pub fn empty(namespaces: NamespaceTable) -> Self {
        Self {
            entries: Vec::new(),
            dimensions: None,
            namespaces,
        }
    }

    /// Build a snapshot from an ordered sequence of items.
    ///
    /// All-or-nothing: fails on the first inconsistent dimension, duplicate
    /// identifier, unknown namespace, or non-finite embedding.
    pub fn new(items: Vec<CatalogItem>, namespaces: NamespaceTable) -> Result<Self, CatalogError> {
        let mut catalog = Self::empty(namespaces);
        let mut seen = HashSet::with_capacity(items.len());

        catalog.entries.reserve(items.len());
        for item in items {
            if !seen.insert(item.identifier.clone()) {
                return Err(CatalogError::DuplicateIdentifier(item.identifier));
            }
            catalog.push_checked(item)?;
        }

        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length shared by every item, `None` while empty.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    pub fn get(&self, position: usize) -> Option<&CatalogItem> {
        self.entries.get(position).map(|e| &e.item)
    }

    /// Cached squared L2 norm of the embedding at `position`.
    pub(crate) fn norm_sq(&self, position: usize) -> Option<f64> {
        self.entries.get(position).map(|e| e.norm_sq)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.position_of(identifier).is_some()
    }

    pub fn position_of(&self, identifier: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.item.identifier == identifier)
    }

    /// Items in position order.
    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn into_items(self) -> Vec<CatalogItem> {
        self.entries.into_iter().map(|e| e.item).collect()
    }

    /// Ordered positions whose namespace equals `tag`.
    pub fn by_namespace(&self, tag: &str) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.item.namespace == tag)
            .map(|(position, _)| position)
            .collect()
    }

    /// Copy of this snapshot with `items` appended after the existing entries.
    ///
    /// Existing positions are untouched. Items whose identifier is already
    /// present (or repeated within `items`) are skipped and counted.
    fn with_appended(&self, items: Vec<CatalogItem>) -> Result<(Self, AppendOutcome), CatalogError> {
        let mut next = self.clone();
        let mut seen: HashSet<String> = self
            .entries
            .iter()
            .map(|e| e.item.identifier.clone())
            .collect();
        let mut outcome = AppendOutcome::default();

        for item in items {
            if !seen.insert(item.identifier.clone()) {
                log::debug!("Skipping duplicate identifier {}", item.identifier);
                outcome.skipped += 1;
                continue;
            }
            next.push_checked(item)?;
            outcome.added += 1;
        }

        Ok((next, outcome))
    }

    fn push_checked(&mut self, item: CatalogItem) -> Result<(), CatalogError> {
        let position = self.entries.len();
        let got = item.embedding.len();

        match self.dimensions {
            Some(expected) if expected != got => {
                return Err(CatalogError::DimensionMismatch {
                    position,
                    expected,
                    got,
                });
            }
            _ => {}
        }

        if !self.namespaces.contains_tag(&item.namespace) {
            return Err(CatalogError::UnknownNamespace {
                identifier: item.identifier,
                namespace: item.namespace,
            });
        }

        if item.embedding.iter().any(|x| !x.is_finite()) {
            return Err(CatalogError::NonFiniteEmbedding(item.identifier));
        }

        let norm_sq = squared_norm(&item.embedding);
        self.dimensions = Some(got);
        self.entries.push(Entry { item, norm_sq });
        Ok(())
    }
}

/// Result of [`CatalogStore::append`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Owner of the current catalog snapshot.
///
/// `load` and `append` publish a new `Arc<Catalog>`; queries hold on to the
/// snapshot they started with.
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    pub fn new(namespaces: NamespaceTable) -> Self {
        Self::from_catalog(Catalog::empty(namespaces))
    }

    pub fn from_catalog(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The catalog as of now. Later `load`/`append` calls do not affect it.
    pub fn snapshot(&self) -> Result<Arc<Catalog>, CatalogError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| CatalogError::Poisoned)
    }

    /// Replace the whole catalog. On error the previous snapshot stays current.
    pub fn load(&self, items: Vec<CatalogItem>) -> Result<usize, CatalogError> {
        let namespaces = self.snapshot()?.namespaces().clone();
        let catalog = Catalog::new(items, namespaces)?;
        let count = catalog.len();
        self.publish(catalog)?;
        Ok(count)
    }

    /// Add new items after the existing ones, skipping duplicate identifiers.
    pub fn append(&self, items: Vec<CatalogItem>) -> Result<AppendOutcome, CatalogError> {
        let mut guard = self.current.write().map_err(|_| CatalogError::Poisoned)?;
        let (next, outcome) = guard.with_appended(items)?;
        *guard = Arc::new(next);
        Ok(outcome)
    }

    pub fn size(&self) -> Result<usize, CatalogError> {
        Ok(self.snapshot()?.len())
    }

    pub fn by_namespace(&self, tag: &str) -> Result<Vec<usize>, CatalogError> {
        Ok(self.snapshot()?.by_namespace(tag))
    }

    /// Poison the lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.current.write();
            panic!("poisoning catalog lock");
        }));
    }

    fn publish(&self, catalog: Catalog) -> Result<(), CatalogError> {
        let mut guard = self.current.write().map_err(|_| CatalogError::Poisoned)?;
        *guard = Arc::new(catalog);
        Ok(())
    }
}

/// Sum of squares, accumulated in f64 in index order.
pub(crate) fn squared_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum()
}

/// L2 norm, accumulated in f64.
pub(crate) fn l2_norm(v: &[f32]) -> f64 {
    squared_norm(v).sqrt()
}
