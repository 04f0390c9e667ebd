// ============================================
// Store Bootstrap Job
// ============================================
//
// Loads every `*.json` instance record from a directory into the configured
// store. The directory layout is the one FileArmStore writes, so offline
// output can be promoted to the online backend as-is.
//
// Existing keys are left alone unless `force` is set. A forced load never
// moves a live version backwards: it lands at `live + 1` at least, so a
// compare-and-swap prepared against the replaced record fails.

use crate::error::StoreError;
use crate::services::store::file::key_from_file_name;
use crate::services::store::{decode, ArmStore};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub loaded: usize,
    pub kept_existing: usize,
    /// Live records that failed to decode and were left for a forced run
    pub unreadable_existing: usize,
    pub ignored: usize,
}

pub async fn bootstrap_from_dir(
    store: Arc<dyn ArmStore>,
    dir: &Path,
    force: bool,
) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(key) = key_from_file_name(&name) else {
            debug!(file = %name, "Ignoring non-instance file");
            report.ignored += 1;
            continue;
        };

        let raw = tokio::fs::read_to_string(entry.path())
            .await
            .with_context(|| format!("failed to read {name}"))?;
        let incoming = match decode(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping invalid instance record");
                report.ignored += 1;
                continue;
            }
        };

        let version = match store.get(&key).await {
            Ok(_) if !force => {
                debug!(key = %key, "Instance already present, keeping it");
                report.kept_existing += 1;
                continue;
            }
            Ok(live) => incoming.version().max(live.version() + 1),
            Err(StoreError::NotFound(_)) => incoming.version(),
            Err(StoreError::Corrupted(msg)) if !force => {
                warn!(
                    key = %key,
                    error = %msg,
                    "Live instance unreadable, rerun with --force to replace"
                );
                report.unreadable_existing += 1;
                continue;
            }
            Err(StoreError::Corrupted(msg)) => {
                warn!(key = %key, error = %msg, "Replacing unreadable live instance");
                incoming.version()
            }
            Err(e) => return Err(e).with_context(|| format!("failed to look up {key}")),
        };

        store
            .put(&key, &incoming.with_version(version))
            .await
            .with_context(|| format!("failed to store {key}"))?;
        info!(key = %key, version, "Bootstrapped bandit instance");
        report.loaded += 1;
    }

    info!(
        dir = %dir.display(),
        loaded = report.loaded,
        kept_existing = report.kept_existing,
        unreadable_existing = report.unreadable_existing,
        ignored = report.ignored,
        "Bootstrap finished"
    );

    Ok(report)
}
