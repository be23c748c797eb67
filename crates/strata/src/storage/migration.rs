//! Tier migration
//!
//! Entries idle in the hot tier longer than `hot_idle` move to warm, entries
//! idle in warm longer than `warm_idle` move to cold. A move writes the
//! destination first and deletes the source only once that write is
//! confirmed, so a crash in between leaves the key in two tiers rather than
//! none. The scan takes no locks; concurrent writers win.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::error::{Result, StrataError};
use crate::memory::{MemoryEntry, StorageTier};
use crate::storage::tiers::TierSet;
use crate::tasks::{BackgroundTask, spawn_periodic};

/// Idle-time thresholds for automatic migration.
#[derive(Debug, Clone, Copy)]
pub struct MigrationPolicy {
    pub hot_idle: Duration,
    pub warm_idle: Duration,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            hot_idle: Duration::from_secs(3600),
            warm_idle: Duration::from_secs(86400),
        }
    }
}

impl From<&MigrationConfig> for MigrationPolicy {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            hot_idle: Duration::from_secs(config.hot_idle_secs),
            warm_idle: Duration::from_secs(config.warm_idle_secs),
        }
    }
}

impl MigrationPolicy {
    /// Destination tier for `entry` at `now`, if it should move.
    pub fn should_migrate(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> Option<StorageTier> {
        let threshold = match entry.metadata.tier {
            StorageTier::Hot => self.hot_idle,
            StorageTier::Warm => self.warm_idle,
            StorageTier::Cold => return None,
        };
        let idle = entry.metadata.idle_for(now).to_std().unwrap_or_default();
        if idle > threshold {
            entry.metadata.tier.colder()
        } else {
            None
        }
    }
}

/// Outcome of one migration scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Entries read from a source tier
    pub scanned: u64,
    pub migrated: u64,
    /// Moves or listings that failed; retried on the next scan
    pub failed: u64,
    /// Entries left in place by the policy or because the destination is a stub
    pub skipped: u64,
}

pub struct MigrationCoordinator {
    tiers: TierSet,
    policy: MigrationPolicy,
}

impl MigrationCoordinator {
    pub fn new(tiers: TierSet, policy: MigrationPolicy) -> Self {
        Self { tiers, policy }
    }

    pub fn policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    /// Move `entry` from its current tier to `target`.
    ///
    /// Returns `Ok(false)` when the destination is a stub and nothing moved.
    /// Only colder targets are accepted.
    pub async fn migrate_to_tier(&self, entry: &MemoryEntry, target: StorageTier) -> Result<bool> {
        let source = entry.metadata.tier;
        if target <= source {
            return Err(StrataError::Migration(format!(
                "cannot move {} from {} to {}",
                entry.key, source, target
            )));
        }

        let destination = self.tiers.tier(target);
        if destination.is_stub() {
            tracing::debug!("Skipping {}: {} tier is a stub", entry.key, target);
            return Ok(false);
        }

        let mut moved = entry.clone();
        moved.metadata.tier = target;
        moved.metadata.updated_at = Utc::now();

        if !destination.save(&moved).await? {
            return Err(StrataError::Migration(format!(
                "{} tier refused {}",
                target, entry.key
            )));
        }
        self.tiers.tier(source).delete(&entry.key).await?;

        tracing::debug!("Migrated {} from {} to {}", entry.key, source, target);
        Ok(true)
    }

    /// Scan hot and warm once, moving idle entries one tier colder.
    pub async fn run_once(&self, token: &CancellationToken) -> MigrationReport {
        let mut report = MigrationReport::default();
        for source in [StorageTier::Hot, StorageTier::Warm] {
            if token.is_cancelled() {
                break;
            }
            self.scan_tier(source, token, &mut report).await;
        }

        if report.migrated > 0 || report.failed > 0 {
            tracing::info!(
                "Migration scan: {} scanned, {} migrated, {} failed, {} skipped",
                report.scanned,
                report.migrated,
                report.failed,
                report.skipped
            );
        }
        report
    }

    async fn scan_tier(
        &self,
        source: StorageTier,
        token: &CancellationToken,
        report: &mut MigrationReport,
    ) {
        let Some(target) = source.colder() else {
            return;
        };
        if self.tiers.tier(target).is_stub() {
            tracing::debug!("Not scanning {}: {} tier is a stub", source, target);
            return;
        }

        let backend = self.tiers.tier(source);
        let mut keys = backend.list_keys("");
        while let Some(key) = keys.next().await {
            if token.is_cancelled() {
                tracing::debug!("Migration scan of {} cancelled", source);
                return;
            }
            let key = match key {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!("Listing {} tier failed: {}", source, e);
                    report.failed += 1;
                    return;
                }
            };

            let entry = match backend.peek(&key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Reading {} from {} failed: {}", key, source, e);
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            if self.policy.should_migrate(&entry, Utc::now()) != Some(target) {
                report.skipped += 1;
                continue;
            }
            match self.migrate_to_tier(&entry, target).await {
                Ok(true) => report.migrated += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!("Migrating {} to {} failed: {}", key, target, e);
                    report.failed += 1;
                }
            }
        }
    }

    /// Run [`run_once`](Self::run_once) every `period` until cancelled.
    pub fn spawn(self: Arc<Self>, period: Duration, parent: &CancellationToken) -> BackgroundTask {
        spawn_periodic("migration", period, parent, move |token| {
            let coordinator = self.clone();
            async move {
                coordinator.run_once(&token).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn idle_entry(tier: StorageTier, idle_secs: i64) -> MemoryEntry {
        let mut entry = MemoryEntry::new("k", "v").with_tier(tier);
        entry.metadata.accessed_at = Utc::now() - ChronoDuration::seconds(idle_secs);
        entry
    }

    #[test]
    fn test_policy_thresholds() {
        let policy = MigrationPolicy::default();
        let now = Utc::now();

        assert_eq!(policy.should_migrate(&idle_entry(StorageTier::Hot, 60), now), None);
        assert_eq!(
            policy.should_migrate(&idle_entry(StorageTier::Hot, 3700), now),
            Some(StorageTier::Warm)
        );
        assert_eq!(policy.should_migrate(&idle_entry(StorageTier::Warm, 3700), now), None);
        assert_eq!(
            policy.should_migrate(&idle_entry(StorageTier::Warm, 90_000), now),
            Some(StorageTier::Cold)
        );
        assert_eq!(policy.should_migrate(&idle_entry(StorageTier::Cold, 1_000_000), now), None);
    }

    #[test]
    fn test_policy_from_config() {
        let config = MigrationConfig {
            hot_idle_secs: 10,
            warm_idle_secs: 20,
            ..Default::default()
        };
        let policy = MigrationPolicy::from(&config);
        assert_eq!(policy.hot_idle, Duration::from_secs(10));
        assert_eq!(
            policy.should_migrate(&idle_entry(StorageTier::Warm, 30), Utc::now()),
            Some(StorageTier::Cold)
        );
    }
}
