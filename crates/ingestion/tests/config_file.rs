use ingestion::{FailurePolicy, IngestConfig};
use std::path::Path;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_shipped_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/ingester.yaml");
    let config = assert_ok!(IngestConfig::load(&path));

    assert_eq!(config.table, "cosmo");
    assert_eq!(config.start.to_string(), "1995-01");
    assert_eq!(config.end.to_string(), "2018-12");
    assert_eq!(config.variables, weather_common::VariableSet::cosmo_rea6());
    assert_eq!(config.pipeline.failure_policy, FailurePolicy::Halt);
    assert_eq!(config.index.detail_levels.level_for("DE"), Some(3));
    assert_ok!(config.validate());
}

#[test]
fn test_missing_config_file_is_a_read_error() {
    let err = assert_err!(IngestConfig::load(Path::new("/nonexistent/ingester.yaml")));
    assert!(matches!(err, ingestion::IngestionError::ConfigRead { .. }));
}
