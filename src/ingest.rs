//! Catalog ingestion.
//!
//! Turns record files into [`CatalogItem`]s. Records are validated here, at
//! the boundary, so the catalog and the ranker only ever see fixed-shape,
//! well-formed items:
//! - identifier must be an absolute URI
//! - its namespace prefix must be in the namespace table
//! - empty labels fall back to the local name
//!
//! Rejected records are logged and counted, never silently dropped.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use crate::catalog::{text, CatalogItem, NamespaceTable};
use crate::embeddings::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("Unsupported source format: {0} (expected .csv or .json)")]
    UnsupportedFormat(String),

    #[error("Metadata has {metadata} records but embeddings has {embeddings} vectors")]
    LengthMismatch { metadata: usize, embeddings: usize },

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// A raw record as it appears in a source file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRecord {
    #[serde(alias = "uri")]
    pub identifier: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "comment")]
    pub description: String,
    /// Only present in precomputed metadata; derived otherwise.
    #[serde(default, alias = "local_name", alias = "shortName")]
    pub short_name: Option<String>,
    /// Tag or full prefix. Derived from the identifier when absent.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// A validated record ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    pub identifier: String,
    pub short_name: String,
    pub label: String,
    pub description: String,
    pub namespace: String,
    /// Text the embedding is computed from
    pub text: String,
}

impl PreparedRecord {
    pub fn into_item(self, embedding: Vec<f32>) -> CatalogItem {
        CatalogItem {
            identifier: self.identifier,
            short_name: self.short_name,
            label: self.label,
            description: self.description,
            namespace: self.namespace,
            embedding,
        }
    }
}

/// Outcome of validating a batch of records.
#[derive(Debug, Default)]
pub struct Prepared {
    pub records: Vec<PreparedRecord>,
    pub rejected: usize,
}

/// Read records from a `.csv` or `.json` file.
pub fn read_records(path: &Path) -> Result<Vec<SourceRecord>, IngestError> {
    let display = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => {
            let mut reader = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .flexible(true)
                .from_path(path)
                .map_err(|source| IngestError::Csv {
                    path: display.clone(),
                    source,
                })?;
            reader
                .deserialize()
                .collect::<Result<Vec<SourceRecord>, _>>()
                .map_err(|source| IngestError::Csv {
                    path: display,
                    source,
                })
        }
        Some("json") => read_json(path),
        _ => Err(IngestError::UnsupportedFormat(display)),
    }
}

/// Read every source in order and concatenate their records.
pub fn read_sources<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<SourceRecord>, IngestError> {
    let mut records = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let batch = read_records(path)?;
        log::info!("Read {} records from {}", batch.len(), path.display());
        records.extend(batch);
    }
    Ok(records)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IngestError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| IngestError::Json {
        path: display,
        source,
    })
}

/// Validate a single record against the namespace table.
pub fn prepare_record(record: &SourceRecord, namespaces: &NamespaceTable) -> Result<PreparedRecord, String> {
    let identifier = record.identifier.trim();
    if identifier.is_empty() {
        return Err("empty identifier".to_string());
    }

    url::Url::parse(identifier).map_err(|e| format!("invalid URI '{}': {}", identifier, e))?;

    let namespace = match record.namespace.as_deref().map(str::trim) {
        Some(ns) if !ns.is_empty() => namespaces.resolve(ns),
        _ => namespaces.tag_for_prefix(text::namespace_prefix(identifier)),
    }
    .ok_or_else(|| format!("{} is not in a known namespace", identifier))?
    .to_string();

    let short_name = match record.short_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => text::local_name(identifier).to_string(),
    };
    let label = text::display_label(&record.label, &short_name);
    let text = text::canonical_text(&short_name, &label);

    Ok(PreparedRecord {
        identifier: identifier.to_string(),
        short_name,
        label,
        description: record.description.trim().to_string(),
        namespace,
        text,
    })
}

/// Validate records, skipping (and counting) the malformed ones.
/// Only the first record for an identifier is kept.
pub fn prepare(records: &[SourceRecord], namespaces: &NamespaceTable) -> Prepared {
    let mut prepared = Prepared::default();
    let mut seen = HashSet::new();

    for record in records {
        match prepare_record(record, namespaces) {
            Ok(rec) if !seen.insert(rec.identifier.clone()) => {
                log::warn!("Rejected record: duplicate identifier {}", rec.identifier);
                prepared.rejected += 1;
            }
            Ok(rec) => prepared.records.push(rec),
            Err(reason) => {
                log::warn!("Rejected record: {}", reason);
                prepared.rejected += 1;
            }
        }
    }

    prepared
}

/// Embed prepared records in batches, preserving order.
pub fn embed_records(
    records: Vec<PreparedRecord>,
    provider: &dyn EmbeddingProvider,
    normalize: bool,
    batch_size: usize,
    show_progress: bool,
) -> Result<Vec<CatalogItem>, IngestError> {
    let batch_size = batch_size.max(1);
    let progress = if show_progress {
        let bar = ProgressBar::new(records.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} embedding {msg}") {
            bar.set_style(style);
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut items = Vec::with_capacity(records.len());
    let mut records = records.into_iter().peekable();

    while records.peek().is_some() {
        let chunk: Vec<PreparedRecord> = records.by_ref().take(batch_size).collect();
        let texts: Vec<String> = chunk.iter().map(|r| r.text.clone()).collect();
        let embeddings = provider.embed_batch(&texts, normalize)?;

        if embeddings.len() != chunk.len() {
            return Err(IngestError::Embedding(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                chunk.len(),
                embeddings.len()
            ))));
        }

        progress.inc(chunk.len() as u64);
        items.extend(
            chunk
                .into_iter()
                .zip(embeddings)
                .map(|(record, embedding)| record.into_item(embedding)),
        );
    }

    progress.finish_and_clear();
    Ok(items)
}

/// Import a catalog whose embeddings were computed elsewhere.
///
/// `metadata_path` holds a JSON array of records, `embeddings_path` a JSON
/// array of vectors in the same order. Records that fail validation are
/// skipped together with their vector.
pub fn import_precomputed(
    metadata_path: &Path,
    embeddings_path: &Path,
    namespaces: &NamespaceTable,
) -> Result<(Vec<CatalogItem>, usize), IngestError> {
    let metadata: Vec<SourceRecord> = read_json(metadata_path)?;
    let embeddings: Vec<Vec<f32>> = read_json(embeddings_path)?;

    if metadata.len() != embeddings.len() {
        return Err(IngestError::LengthMismatch {
            metadata: metadata.len(),
            embeddings: embeddings.len(),
        });
    }

    let mut items = Vec::with_capacity(metadata.len());
    let mut rejected = 0;
    let mut seen = HashSet::new();
    for (record, embedding) in metadata.iter().zip(embeddings) {
        match prepare_record(record, namespaces) {
            Ok(prepared) if !seen.insert(prepared.identifier.clone()) => {
                log::warn!("Rejected record: duplicate identifier {}", prepared.identifier);
                rejected += 1;
            }
            Ok(prepared) => items.push(prepared.into_item(embedding)),
            Err(reason) => {
                log::warn!("Rejected record: {}", reason);
                rejected += 1;
            }
        }
    }

    Ok((items, rejected))
}
