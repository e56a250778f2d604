//! Config Loading Tests
//!
//! Tests that a JSON config file drives service construction: overrides are
//! applied, missing fields keep their defaults, invalid values are rejected.

use anyhow::Result;
use pagespace_core::config::TreeConfig;
use pagespace_core::db::MemoryStore;
use pagespace_core::models::NewPage;
use pagespace_core::services::{ErrorKind, PageTreeService};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_load_applies_overrides() -> Result<()> {
    pagespace_core::logging::init_tracing();

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("tree.json");
    tokio::fs::write(
        &path,
        r#"{ "protected_title_prefixes": ["Home", "__system:"], "trash_retention_days": 7 }"#,
    )
    .await?;

    let config = TreeConfig::load(&path).await?;
    assert_eq!(config.protected_title_prefixes, vec!["Home", "__system:"]);
    assert_eq!(config.trash_retention_days, 7);
    assert_eq!(config.jitter_rounds, TreeConfig::default().jitter_rounds);

    let service = PageTreeService::new(Arc::new(MemoryStore::new()), config)?;
    let home = service.create(NewPage::new("c1").with_title("Home")).await?;
    let err = service.force_delete(&home.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    Ok(())
}

#[tokio::test]
async fn test_load_rejects_invalid_values() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("tree.json");
    tokio::fs::write(&path, r#"{ "event_channel_capacity": 0 }"#).await?;

    let err = TreeConfig::load(&path).await.unwrap_err();
    assert!(err.to_string().contains("event_channel_capacity"));
    Ok(())
}

#[tokio::test]
async fn test_load_reports_missing_file() {
    let err = TreeConfig::load("/nonexistent/tree.json").await.unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
