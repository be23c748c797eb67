//! Storage context
//!
//! Built once at process start and handed to every consumer. It owns the pool
//! registry, the three tiers, the caches, the migration coordinator and the
//! background tasks, and tears them down in that reverse order.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::cache::{KvL2Backend, SemanticCache, TieredCache};
use crate::config::{ColdBackend, Config};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::storage::registry::AnyConnector;
use crate::storage::{
    ColdTier, HotTier, MigrationCoordinator, MigrationPolicy, PoolConfig, PoolRegistry, RetryPolicy,
    StubColdTier, TierBackend, TierSet, WarmTier,
};
use crate::tasks::{BackgroundTask, spawn_periodic};

pub struct StorageContext {
    config: Config,
    registry: Arc<PoolRegistry>,
    hot: Arc<HotTier<AnyConnector>>,
    warm: Arc<WarmTier>,
    tiers: TierSet,
    cache: Arc<TieredCache>,
    semantic: Option<Arc<SemanticCache>>,
    migration: Arc<MigrationCoordinator>,
    token: CancellationToken,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl StorageContext {
    /// Wire every component from `config`. No connection is opened until
    /// [`initialize`](Self::initialize). Without an embedder the semantic
    /// cache is disabled and the cold tier only accepts pre-embedded entries.
    pub fn build(config: Config, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(PoolRegistry::new());
        let retry = RetryPolicy::from(&config.retry);
        let pool_config = PoolConfig::from_config(&config.hot, &config.retry);

        let hot_pool = registry.pool(&config.hot.url, pool_config.clone())?;
        let hot = Arc::new(HotTier::new(hot_pool, config.hot.clone()));
        let warm = Arc::new(WarmTier::new(config.warm.clone(), retry.clone()));
        let cold: Arc<dyn TierBackend> = match config.cold.backend {
            ColdBackend::Lance => {
                let mut cold = ColdTier::new(config.cold.clone(), retry);
                if let Some(ref embedder) = embedder {
                    cold = cold.with_embedder(embedder.clone());
                }
                Arc::new(cold)
            }
            ColdBackend::Stub => Arc::new(StubColdTier::new()),
        };
        let tiers = TierSet::new(hot.clone(), warm.clone(), cold);

        let l2_url = config.l2.url.as_deref().unwrap_or(&config.hot.url);
        let l2_pool = registry.pool(l2_url, pool_config)?;
        let l2 = KvL2Backend::new(l2_pool, config.l2.namespace.clone())
            .with_scan_count(config.hot.scan_count);
        let cache = Arc::new(TieredCache::new(&config.l1, &config.l2, Arc::new(l2)));

        let semantic = embedder.map(|embedder| {
            Arc::new(SemanticCache::new(
                cache.clone(),
                embedder,
                config.semantic.clone(),
            ))
        });
        if semantic.is_none() {
            tracing::warn!("No embedder configured, semantic cache disabled");
        }

        let migration = Arc::new(MigrationCoordinator::new(
            tiers.clone(),
            MigrationPolicy::from(&config.migration),
        ));

        Ok(Self {
            config,
            registry,
            hot,
            warm,
            tiers,
            cache,
            semantic,
            migration,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Initialize all tiers. Tiers that fail stay closed and report
    /// `DegradedCapability`; the first failure is returned.
    pub async fn initialize(&self) -> Result<()> {
        self.tiers.initialize_all().await
    }

    /// Start the warm sweep, the migration scan and the pool health check.
    pub fn start_background(&self) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let warm = self.warm.clone();
        tasks.push(spawn_periodic(
            "warm-sweep",
            self.config.warm.sweep_interval(),
            &self.token,
            move |_| {
                let warm = warm.clone();
                async move {
                    match warm.sweep_expired().await {
                        Ok(0) => {}
                        Ok(removed) => {
                            tracing::info!("Warm sweep removed {} expired entries", removed)
                        }
                        Err(e) => tracing::warn!("Warm sweep failed: {}", e),
                    }
                }
            },
        ));

        if self.config.migration.enabled {
            tasks.push(
                self.migration
                    .clone()
                    .spawn(self.config.migration.scan_interval(), &self.token),
            );
        }

        let registry = self.registry.clone();
        tasks.push(spawn_periodic(
            "pool-health",
            self.config.hot.health_check_interval(),
            &self.token,
            move |_| {
                let registry = registry.clone();
                async move { registry.health_check_all().await }
            },
        ));

        tracing::info!("Started {} background tasks", tasks.len());
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    pub fn hot(&self) -> &Arc<HotTier<AnyConnector>> {
        &self.hot
    }

    pub fn warm(&self) -> &Arc<WarmTier> {
        &self.warm
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn semantic(&self) -> Option<&Arc<SemanticCache>> {
        self.semantic.as_ref()
    }

    pub fn migration(&self) -> &Arc<MigrationCoordinator> {
        &self.migration
    }

    /// Stop background tasks, drain and close the tiers, then the pools.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let name = task.name().to_string();
            task.stop().await;
            tracing::debug!("Stopped background task {}", name);
        }
        self.tiers.shutdown_all().await;
        self.registry.close_all();
        tracing::info!("Storage context shut down");
    }
}
