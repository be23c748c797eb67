//! The three tiers bundled together
//!
//! [`TierSet`] owns shared handles to the hot, warm and cold backends and
//! implements read-through lookup across them.

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::memory::{MemoryEntry, StorageTier};
use crate::storage::{HealthReport, TierBackend, TierStats};

/// Hot, warm and cold backends behind one handle. Cheap to clone.
#[derive(Clone)]
pub struct TierSet {
    hot: Arc<dyn TierBackend>,
    warm: Arc<dyn TierBackend>,
    cold: Arc<dyn TierBackend>,
}

impl TierSet {
    pub fn new(
        hot: Arc<dyn TierBackend>,
        warm: Arc<dyn TierBackend>,
        cold: Arc<dyn TierBackend>,
    ) -> Self {
        Self { hot, warm, cold }
    }

    pub fn tier(&self, tier: StorageTier) -> &Arc<dyn TierBackend> {
        match tier {
            StorageTier::Hot => &self.hot,
            StorageTier::Warm => &self.warm,
            StorageTier::Cold => &self.cold,
        }
    }

    pub fn hot(&self) -> &Arc<dyn TierBackend> {
        &self.hot
    }

    pub fn warm(&self) -> &Arc<dyn TierBackend> {
        &self.warm
    }

    pub fn cold(&self) -> &Arc<dyn TierBackend> {
        &self.cold
    }

    /// Initialize every tier. A failing tier stays closed; the others are
    /// still brought up. Returns the first failure.
    pub async fn initialize_all(&self) -> Result<()> {
        let mut first_error = None;
        for tier in StorageTier::ALL {
            if let Err(e) = self.tier(tier).initialize().await {
                tracing::warn!("{} tier failed to initialize: {}", tier, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn shutdown_all(&self) {
        for tier in StorageTier::ALL {
            if let Err(e) = self.tier(tier).shutdown().await {
                tracing::warn!("{} tier failed to shut down cleanly: {}", tier, e);
            }
        }
    }

    /// Save into the tier named by the entry's metadata.
    pub async fn save(&self, entry: &MemoryEntry) -> Result<bool> {
        self.tier(entry.metadata.tier).save(entry).await
    }

    /// Look `key` up Hot, then Warm, then Cold.
    ///
    /// A tier that errors is skipped. A hit in Warm or Cold is copied back
    /// into Hot; the farther copy stays where it is. Errors only surface
    /// when every tier failed.
    pub async fn get_through(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let mut last_error: Option<StrataError> = None;
        let mut answered = false;

        for tier in StorageTier::ALL {
            match self.tier(tier).get(key).await {
                Ok(Some(entry)) => {
                    if tier != StorageTier::Hot {
                        self.repopulate_hot(&entry).await;
                    }
                    return Ok(Some(entry));
                }
                Ok(None) => answered = true,
                Err(e) => {
                    tracing::debug!("{} tier lookup of {} failed: {}", tier, key, e);
                    last_error = Some(e);
                }
            }
        }

        match (answered, last_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(None),
        }
    }

    async fn repopulate_hot(&self, entry: &MemoryEntry) {
        let mut promoted = entry.clone();
        promoted.metadata.tier = StorageTier::Hot;
        match self.hot.save(&promoted).await {
            Ok(true) => tracing::debug!("Re-populated hot tier with {}", entry.key),
            Ok(false) => tracing::debug!("Hot tier refused {}", entry.key),
            Err(e) => tracing::warn!("Failed to re-populate hot tier with {}: {}", entry.key, e),
        }
    }

    /// Delete `key` from every tier. True if any tier held it.
    pub async fn delete_everywhere(&self, key: &str) -> Result<bool> {
        let mut removed = false;
        for tier in StorageTier::ALL {
            removed |= self.tier(tier).delete(key).await?;
        }
        Ok(removed)
    }

    pub async fn stats_all(&self) -> Vec<Result<TierStats>> {
        let mut stats = Vec::with_capacity(3);
        for tier in StorageTier::ALL {
            stats.push(self.tier(tier).stats().await);
        }
        stats
    }

    pub async fn health_all(&self) -> Vec<(StorageTier, HealthReport)> {
        let mut reports = Vec::with_capacity(3);
        for tier in StorageTier::ALL {
            reports.push((tier, self.tier(tier).health_check().await));
        }
        reports
    }
}
