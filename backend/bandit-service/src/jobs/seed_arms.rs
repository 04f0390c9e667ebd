// ============================================
// Arm Seeding Job
// ============================================
//
// Reads the upstream ranking export (a JSON array of
// {community, category, item_id, rank_score} objects) and seeds every
// bandit instance it describes.
//
// Usage:
//   bandit-service seed data/ranked_interactions.json

use crate::models::RankedInteraction;
use crate::services::generator::{ArmGenerator, GeneratorConfig, SeedReport};
use crate::services::store::ArmStore;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub async fn load_ranked_interactions(path: &Path) -> Result<Vec<RankedInteraction>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rows: Vec<RankedInteraction> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse ranked interactions in {}", path.display()))?;
    Ok(rows)
}

pub async fn seed_from_file(
    store: Arc<dyn ArmStore>,
    config: GeneratorConfig,
    path: &Path,
) -> Result<SeedReport> {
    let started = Instant::now();
    let rows = load_ranked_interactions(path).await?;

    info!(
        path = %path.display(),
        rows = rows.len(),
        min_arm_pool = config.min_arm_pool,
        "Starting arm seeding"
    );

    let report = ArmGenerator::new(store, config)
        .seed(&rows)
        .await
        .context("arm generation failed")?;

    info!(
        instances = report.instances_written,
        skipped = report.skipped_pools.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Arm seeding finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstanceKey;
    use crate::services::store::InMemoryArmStore;

    #[tokio::test]
    async fn test_seed_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranked.json");
        std::fs::write(
            &path,
            r#"[
                {"community": "eosc", "category": "AI", "item_id": "p1", "rank_score": 3.0},
                {"community": "eosc", "category": "AI", "item": "p2", "rank_score": 1.0}
            ]"#,
        )
        .unwrap();

        let store = Arc::new(InMemoryArmStore::new());
        let config = GeneratorConfig {
            min_arm_pool: 2,
            ..GeneratorConfig::default()
        };
        let report = seed_from_file(store.clone(), config, &path).await.unwrap();

        assert_eq!(report.instances_written, 2);
        let items = store.get(&InstanceKey::item("eosc", "AI")).await.unwrap();
        assert_eq!(items.arms(), &["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let store = Arc::new(InMemoryArmStore::new());
        let result = seed_from_file(
            store,
            GeneratorConfig::default(),
            Path::new("/nonexistent/ranked.json"),
        )
        .await;
        assert!(result.is_err());
    }
}
