//! Crate-level tests that exercise several modules together.
//!
//! They run against [`HashEmbedder`], a deterministic bag-of-words provider,
//! so no model download is needed. Tests that need the real model are in the
//! module tests and marked `#[ignore]`.

mod service;

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embeddings::{l2_normalize, EmbeddingError, EmbeddingProvider};
use crate::service::LookupService;

pub const HASH_DIMS: usize = 64;

/// Each lowercase alphanumeric token adds 1 to bucket `fnv1a(token) % HASH_DIMS`.
pub struct HashEmbedder {
    name: String,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            name: "hash-bow-64".to_string(),
        }
    }

    fn bucket(token: &str) -> usize {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % HASH_DIMS as u64) as usize
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        HASH_DIMS
    }

    fn embed_batch(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; HASH_DIMS];
                for token in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    v[Self::bucket(token)] += 1.0;
                }
                if normalize {
                    l2_normalize(&mut v);
                }
                v
            })
            .collect())
    }
}

/// Provider whose every call fails.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimensions(&self) -> usize {
        HASH_DIMS
    }

    fn embed_batch(&self, _texts: &[String], _normalize: bool) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("model unavailable".to_string()))
    }
}

/// Four valid classes and one record outside every known namespace.
pub const SAMPLE_CSV: &str = "\
identifier,label,description
http://data.ashrae.org/standard223#Pump,Pump,Moves liquid
http://data.ashrae.org/standard223#Fan,Fan,Moves air
urn:nawi-water-ontology#Pump,Pump,Water pump
http://qudt.org/vocab/unit/M,meter,
http://example.org/other#Thing,Thing,
";

pub fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

pub fn hash_service(base: &Path, config: Config) -> LookupService {
    LookupService::new(config, base.to_path_buf(), Arc::new(HashEmbedder::new()))
}

/// A service over `SAMPLE_CSV`, already built.
pub fn built_service(base: &Path) -> LookupService {
    let source = write_file(base, "classes.csv", SAMPLE_CSV);
    let service = hash_service(base, Config::default());
    service.rebuild(&[source], false).unwrap();
    service
}
