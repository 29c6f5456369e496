use std::sync::Arc;

use crate::catalog::CatalogStorageError;
use crate::config::Config;
use crate::service::{LookupError, LookupService, SearchRequest, CATALOG_FILE};

use super::{built_service, hash_service, write_file, FailingEmbedder, HashEmbedder};

fn identifiers(service: &LookupService, request: &SearchRequest) -> Vec<String> {
    let response = service.search(request).unwrap();
    response
        .hits()
        .map(|hit| hit.item.identifier.clone())
        .collect()
}

#[test]
fn test_build_reports_counts() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "classes.csv", super::SAMPLE_CSV);
    let service = hash_service(dir.path(), Config::default());

    let report = service.rebuild(&[source], false).unwrap();
    assert_eq!(report.added, 4);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.total, 4);
    assert_eq!(service.indexed_count().unwrap(), 4);
    assert!(dir.path().join(CATALOG_FILE).exists());
}

#[test]
fn test_search_ranks_exact_match_first() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());

    let response = service.search(&SearchRequest::new("pump")).unwrap();
    assert_eq!(response.len(), 3);

    let hits: Vec<_> = response.hits().collect();
    assert_eq!(hits[0].item.identifier, "http://data.ashrae.org/standard223#Pump");
    assert_eq!(hits[1].item.identifier, "urn:nawi-water-ontology#Pump");
    assert_eq!(hits[0].score, 1.0);
    assert_eq!(hits[1].score, 1.0);
    // unrelated classes tie at zero and keep catalog order
    assert_eq!(hits[2].item.short_name, "Fan");
    assert_eq!(hits[2].score, 0.0);
    assert_eq!(hits[0].rank, 1);
}

#[test]
fn test_search_count() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());

    let ids = identifiers(&service, &SearchRequest::new("pump").with_count(1));
    assert_eq!(ids, vec!["http://data.ashrae.org/standard223#Pump"]);

    // asking for more than exists returns everything
    let ids = identifiers(&service, &SearchRequest::new("pump").with_count(50));
    assert_eq!(ids.len(), 4);
}

#[test]
fn test_search_namespace_filter() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());

    let ids = identifiers(&service, &SearchRequest::new("pump").with_namespace("WATR"));
    assert_eq!(ids, vec!["urn:nawi-water-ontology#Pump"]);

    // tags are case-insensitive and full prefixes work too
    let by_tag = identifiers(&service, &SearchRequest::new("pump").with_namespace("watr"));
    let by_prefix = identifiers(
        &service,
        &SearchRequest::new("pump").with_namespace("urn:nawi-water-ontology#"),
    );
    assert_eq!(by_tag, ids);
    assert_eq!(by_prefix, ids);

    // known namespace with no matching classes
    let response = service
        .search(&SearchRequest::new("pump").with_namespace("QK"))
        .unwrap();
    assert!(response.is_empty());
}

#[test]
fn test_search_partial_match_score() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());

    let response = service
        .search(&SearchRequest::new("meter").with_namespace("UNIT"))
        .unwrap();
    let hit = response.hits().next().unwrap();
    assert_eq!(hit.item.identifier, "http://qudt.org/vocab/unit/M");
    assert!((hit.score - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-4);
}

#[test]
fn test_search_rejects_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());

    let err = service.search(&SearchRequest::new("   ")).err().unwrap();
    assert!(matches!(err, LookupError::EmptyPhrase));
    assert!(err.is_user_error());

    let err = service
        .search(&SearchRequest::new("pump").with_count(0))
        .err()
        .unwrap();
    assert!(matches!(err, LookupError::InvalidCount));

    let err = service
        .search(&SearchRequest::new("pump").with_namespace("ZZZ"))
        .err()
        .unwrap();
    assert!(matches!(err, LookupError::InvalidFilter(ref tag) if tag == "ZZZ"));
    assert!(err.is_user_error());
    assert!(!err.is_fatal());
}

#[test]
fn test_search_empty_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let service = hash_service(dir.path(), Config::default());

    let response = service.search(&SearchRequest::new("pump")).unwrap();
    assert!(response.is_empty());
}

#[test]
fn test_embedding_failure_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    let service = LookupService::new(
        Config::default(),
        dir.path().to_path_buf(),
        Arc::new(FailingEmbedder),
    );

    let err = service.search(&SearchRequest::new("pump")).err().unwrap();
    assert!(matches!(err, LookupError::Embedding(_)));
    assert!(!err.is_user_error());
    assert!(!err.is_fatal());
}

#[test]
fn test_update_appends_new_and_skips_known() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());
    let before = service.snapshot().unwrap();

    let extra = write_file(
        dir.path(),
        "extra.json",
        r#"[
            {"uri": "http://data.ashrae.org/standard223#Pump", "label": "Pump"},
            {"uri": "http://data.ashrae.org/standard223#Valve", "label": "Valve"}
        ]"#,
    );
    let report = service.update(&[extra], false).unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.total, 5);

    // existing positions are unchanged, the new class goes last
    let after = service.snapshot().unwrap();
    for (position, item) in before.items().enumerate() {
        assert_eq!(after.get(position).unwrap().identifier, item.identifier);
    }
    assert_eq!(
        after.get(4).unwrap().identifier,
        "http://data.ashrae.org/standard223#Valve"
    );

    // the snapshot taken earlier is untouched
    assert_eq!(before.len(), 4);
}

#[test]
fn test_build_without_sources() {
    let dir = tempfile::tempdir().unwrap();
    let service = hash_service(dir.path(), Config::default());

    let err = service.rebuild(&[], false).err().unwrap();
    assert!(matches!(err, LookupError::NoSources));
    assert!(err.is_user_error());
}

#[test]
fn test_build_uses_configured_sources() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "classes.csv", super::SAMPLE_CSV);
    let config = Config {
        sources: vec![source.to_string_lossy().to_string()],
        ..Config::default()
    };
    let service = hash_service(dir.path(), config);

    let report = service.rebuild(&[], false).unwrap();
    assert_eq!(report.total, 4);
}

#[test]
fn test_failed_build_keeps_previous_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let service = built_service(dir.path());

    let missing = dir.path().join("missing.csv");
    let err = service.rebuild(&[missing], false).err().unwrap();
    assert!(matches!(err, LookupError::Ingest(_)));
    assert_eq!(service.indexed_count().unwrap(), 4);
}

#[test]
fn test_persisted_catalog_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let built = built_service(dir.path());
    let expected = identifiers(&built, &SearchRequest::new("water pump"));

    let service = hash_service(dir.path(), Config::default());
    assert!(service.has_persisted_catalog());
    assert_eq!(service.load_persisted().unwrap(), 4);
    assert_eq!(identifiers(&service, &SearchRequest::new("water pump")), expected);
}

#[test]
fn test_missing_persisted_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let service = hash_service(dir.path(), Config::default());

    assert!(!service.has_persisted_catalog());
    assert!(matches!(
        service.load_persisted(),
        Err(LookupError::MissingCatalog(_))
    ));
}

#[test]
fn test_normalization_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    built_service(dir.path());

    let mut config = Config::default();
    config.embedding.normalize = false;
    let service = hash_service(dir.path(), config);

    let err = service.load_persisted().err().unwrap();
    assert!(matches!(
        err,
        LookupError::Storage(CatalogStorageError::NormalizationMismatch { .. })
    ));
    assert!(err.is_fatal());
}

#[test]
fn test_import_precomputed() {
    let dir = tempfile::tempdir().unwrap();
    let service = hash_service(dir.path(), Config::default());

    let provider = HashEmbedder::new();
    let texts = vec!["Pump: Pump".to_string(), "Fan: Fan".to_string()];
    let vectors = crate::embeddings::EmbeddingProvider::embed_batch(&provider, &texts, true).unwrap();

    let metadata = write_file(
        dir.path(),
        "metadata.json",
        r#"[
            {"uri": "http://data.ashrae.org/standard223#Pump", "label": "Pump", "local_name": "Pump"},
            {"uri": "http://data.ashrae.org/standard223#Fan", "label": "Fan", "local_name": "Fan"}
        ]"#,
    );
    let embeddings = write_file(
        dir.path(),
        "embeddings.json",
        &serde_json::to_string(&vectors).unwrap(),
    );

    let report = service.import(&metadata, &embeddings).unwrap();
    assert_eq!(report.added, 2);

    let ids = identifiers(&service, &SearchRequest::new("fan").with_count(1));
    assert_eq!(ids, vec!["http://data.ashrae.org/standard223#Fan"]);
}

#[test]
fn test_import_wrong_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let service = hash_service(dir.path(), Config::default());

    let metadata = write_file(
        dir.path(),
        "metadata.json",
        r#"[{"uri": "http://data.ashrae.org/standard223#Pump", "label": "Pump"}]"#,
    );
    let embeddings = write_file(dir.path(), "embeddings.json", "[[0.1, 0.2, 0.3]]");

    let err = service.import(&metadata, &embeddings).err().unwrap();
    assert!(matches!(
        err,
        LookupError::ProviderDimensions { expected: 64, got: 3, .. }
    ));
    assert_eq!(service.indexed_count().unwrap(), 0);
}
