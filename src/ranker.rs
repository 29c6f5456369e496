//! Exact top-K ranking by cosine similarity.
//!
//! Every eligible catalog entry is scored (full linear scan) and the K best
//! are returned in descending score order. Equal scores keep catalog order:
//! the comparison key is `(-score, position)`, so results are reproducible
//! for a fixed catalog snapshot and query vector. Scores stay `f64` from
//! accumulation through sorting; equality is exact, with no tolerance.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::Serialize;

use crate::catalog::{squared_norm, Catalog};

/// Catalogs at least this large are scored on the rayon pool.
const PARALLEL_THRESHOLD: usize = 4096;

/// One ranked hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryResult {
    /// Position of the item in the catalog snapshot
    pub position: usize,
    /// Cosine similarity in [-1.0, 1.0]
    pub score: f64,
}

/// Errors that stop a query from being scored.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Dimension mismatch: catalog has {expected}, query has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Unknown namespace filter: {0}")]
    InvalidFilter(String),

    #[error("Query embedding contains non-finite values")]
    NonFiniteQuery,
}

/// Cosine similarity of two equal-length vectors.
///
/// An all-zero vector has similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine_with_norms(a, squared_norm(a), b, squared_norm(b))
}

/// Takes squared norms so that `sqrt(n * n) == n` makes a vector's
/// similarity with itself exactly 1.0.
fn cosine_with_norms(query: &[f32], query_norm_sq: f64, target: &[f32], target_norm_sq: f64) -> f64 {
    if query_norm_sq == 0.0 || target_norm_sq == 0.0 {
        return 0.0;
    }

    let dot: f64 = query
        .iter()
        .zip(target.iter())
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum();

    (dot / (query_norm_sq * target_norm_sq).sqrt()).clamp(-1.0, 1.0)
}

/// Rank `catalog` against `query`.
///
/// # Arguments
/// * `catalog` - Snapshot to score; never mutated
/// * `query` - Query embedding, same length as the catalog embeddings
/// * `namespace` - Optional namespace tag; must be in the catalog's table
/// * `k` - Maximum number of results; 0 yields an empty result
///
/// # Returns
/// At most `min(k, eligible)` results, best first.
pub fn top_k(
    catalog: &Catalog,
    query: &[f32],
    namespace: Option<&str>,
    k: usize,
) -> Result<Vec<QueryResult>, RankError> {
    if let Some(tag) = namespace {
        if !catalog.namespaces().contains_tag(tag) {
            return Err(RankError::InvalidFilter(tag.to_string()));
        }
    }

    if let Some(expected) = catalog.dimensions() {
        if query.len() != expected {
            return Err(RankError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }
    }

    if query.iter().any(|x| !x.is_finite()) {
        return Err(RankError::NonFiniteQuery);
    }

    if k == 0 || catalog.is_empty() {
        return Ok(Vec::new());
    }

    let eligible: Vec<usize> = match namespace {
        Some(tag) => catalog.by_namespace(tag),
        None => (0..catalog.len()).collect(),
    };

    let mut results = score_positions(catalog, query, &eligible);

    if k < results.len() {
        // keys are unique (position breaks every tie), so the partition is deterministic
        results.select_nth_unstable_by(k - 1, rank_order);
        results.truncate(k);
    }
    results.sort_by(rank_order);

    log::debug!(
        "Ranked {} of {} items (k={}, namespace={:?})",
        eligible.len(),
        catalog.len(),
        k,
        namespace
    );

    Ok(results)
}

fn score_positions(catalog: &Catalog, query: &[f32], positions: &[usize]) -> Vec<QueryResult> {
    let query_norm_sq = squared_norm(query);

    let score = |&position: &usize| -> Option<QueryResult> {
        let item = catalog.get(position)?;
        let norm_sq = catalog.norm_sq(position)?;
        Some(QueryResult {
            position,
            score: cosine_with_norms(query, query_norm_sq, &item.embedding, norm_sq),
        })
    };

    if positions.len() >= PARALLEL_THRESHOLD {
        positions.par_iter().filter_map(score).collect()
    } else {
        positions.iter().filter_map(score).collect()
    }
}

/// Descending score, then ascending position. Scores are always finite.
fn rank_order(a: &QueryResult, b: &QueryResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.position.cmp(&b.position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, NamespaceEntry, NamespaceTable};

    fn table() -> NamespaceTable {
        NamespaceTable::new(
            ["S223", "WATR", "UNIT", "QK"]
                .iter()
                .map(|tag| NamespaceEntry {
                    tag: tag.to_string(),
                    prefix: format!("urn:{}#", tag.to_lowercase()),
                    description: String::new(),
                })
                .collect(),
        )
    }

    fn catalog(entries: &[(&str, &str, Vec<f32>)]) -> Catalog {
        let items = entries
            .iter()
            .map(|(id, ns, embedding)| CatalogItem {
                identifier: id.to_string(),
                short_name: id.to_string(),
                label: String::new(),
                description: String::new(),
                namespace: ns.to_string(),
                embedding: embedding.clone(),
            })
            .collect();
        Catalog::new(items, table()).unwrap()
    }

    fn abc() -> Catalog {
        catalog(&[
            ("A", "S223", vec![1.0, 0.0]),
            ("B", "WATR", vec![0.0, 1.0]),
            ("C", "S223", vec![0.7071, 0.7071]),
        ])
    }

    #[test]
    fn test_cosine_basic() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]), -1.0);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_is_scale_invariant() {
        let a = cosine_similarity(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]);
        let b = cosine_similarity(&[10.0, 20.0, 30.0], &[0.3, 0.2, 0.1]);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_concrete_scenario() {
        let results = top_k(&abc(), &[1.0, 0.0], None, 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].position, 0);
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[1].position, 2);
        assert!((results[1].score - 0.7071).abs() < 1e-3);
    }

    #[test]
    fn test_top_k_empty_catalog() {
        let empty = Catalog::empty(table());
        assert!(top_k(&empty, &[1.0, 2.0, 3.0], None, 5).unwrap().is_empty());
    }

    #[test]
    fn test_top_k_zero_k() {
        assert!(top_k(&abc(), &[1.0, 0.0], None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_top_k_k_larger_than_catalog() {
        let results = top_k(&abc(), &[1.0, 0.0], None, 50).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].position, 1);
    }

    #[test]
    fn test_unknown_filter_is_error() {
        let result = top_k(&abc(), &[1.0, 0.0], Some("ZZZ"), 3);
        assert!(matches!(result, Err(RankError::InvalidFilter(tag)) if tag == "ZZZ"));
    }

    #[test]
    fn test_unknown_filter_on_empty_catalog_is_error() {
        let empty = Catalog::empty(table());
        assert!(matches!(
            top_k(&empty, &[1.0], Some("ZZZ"), 3),
            Err(RankError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_known_filter_with_no_members_is_empty() {
        let results = top_k(&abc(), &[1.0, 0.0], Some("QK"), 3).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_filter_restricts_namespace() {
        let cat = abc();
        let results = top_k(&cat, &[0.0, 1.0], Some("S223"), 10).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| cat.get(r.position).unwrap().namespace == "S223"));
        assert_eq!(results[0].position, 2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = top_k(&abc(), &[1.0, 0.0, 0.0], None, 3);
        assert!(matches!(
            result,
            Err(RankError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_non_finite_query() {
        let result = top_k(&abc(), &[f32::INFINITY, 0.0], None, 3);
        assert!(matches!(result, Err(RankError::NonFiniteQuery)));
    }

    #[test]
    fn test_zero_query_scores_zero_in_catalog_order() {
        let results = top_k(&abc(), &[0.0, 0.0], None, 3).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert!(results.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let cat = catalog(&[
            ("far", "S223", vec![0.0, 1.0]),
            ("dup1", "S223", vec![1.0, 1.0]),
            ("dup2", "UNIT", vec![1.0, 1.0]),
            ("dup3", "S223", vec![2.0, 2.0]),
        ]);

        let results = top_k(&cat, &[1.0, 1.0], None, 4).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 0]);

        // same ordering when k cuts inside the tie group
        let results = top_k(&cat, &[1.0, 1.0], None, 2).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_near_duplicate_does_not_tie_with_exact_match() {
        // differs from the query by far less than f32 precision in cosine
        let cat = catalog(&[("near", "S223", vec![1.0, 1e-4]), ("exact", "S223", vec![1.0, 0.0])]);
        let results = top_k(&cat, &[1.0, 0.0], None, 2).unwrap();

        assert_eq!(results[0].position, 1);
        assert_eq!(results[0].score, 1.0);
        assert!(results[1].score < 1.0);
    }

    #[test]
    fn test_self_similarity_is_exactly_one() {
        let v = [0.3f32, -1.7, 2.25, 1e-3];
        assert_eq!(cosine_similarity(&v, &v), 1.0);
    }

    #[test]
    fn test_zero_catalog_vector_scores_zero() {
        let cat = catalog(&[("zero", "S223", vec![0.0, 0.0]), ("neg", "S223", vec![-1.0, 0.0])]);
        let results = top_k(&cat, &[1.0, 0.0], None, 2).unwrap();

        assert_eq!(results[0].position, 0);
        assert_eq!(results[0].score, 0.0);
        assert_eq!(results[1].score, -1.0);
    }
}
