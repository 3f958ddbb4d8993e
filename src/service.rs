//! Feed watching service.
//!
//! [`FeedService`] is the context object tying the registry, the seen-item
//! store, the pipeline and the scheduler together. It is created once at
//! startup, shared behind an `Arc`, and torn down with [`FeedService::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{DatabaseConfig, SchedulerConfig, SeenConfig, SeenStrategy, StorageBackend};
use crate::db::Database;
use crate::feed::{Feed, FeedDefinition, NewFeed};
use crate::fetch::FeedFetcher;
use crate::notify::Notifier;
use crate::pipeline::{PollOutcome, UpdatePipeline};
use crate::registry::{FeedRegistry, MemoryRegistry, SqliteRegistry};
use crate::scheduler::Scheduler;
use crate::seen::{
    ApproximateStore, FilterBlobStore, MemoryBlobStore, MemoryTtlStore, SeenItemStore,
    SqliteBlobStore, SqliteTtlStore,
};
use crate::{FeedhookError, Result};

/// Watches feeds and notifies their webhooks of new items.
pub struct FeedService {
    registry: Arc<dyn FeedRegistry>,
    store: Arc<dyn SeenItemStore>,
    pipeline: Arc<UpdatePipeline>,
    scheduler: Scheduler,
    run_on_register: bool,
}

impl FeedService {
    pub fn new(
        registry: Arc<dyn FeedRegistry>,
        store: Arc<dyn SeenItemStore>,
        fetcher: Arc<dyn FeedFetcher>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        let pipeline = Arc::new(UpdatePipeline::new(
            registry.clone(),
            store.clone(),
            fetcher,
            notifier,
        ));
        let scheduler = Scheduler::new(pipeline.clone(), &config);

        Self {
            registry,
            store,
            pipeline,
            scheduler,
            run_on_register: config.run_on_register,
        }
    }

    /// Rebuild the poll triggers from the registry.
    ///
    /// A storage failure here is fatal for startup and is returned as is.
    pub async fn start(&self) -> Result<()> {
        if !self.store.supports_rollback() {
            warn!(
                "Seen-item store cannot roll back marks; failed notifications will not be retried"
            );
        }
        match self.scheduler.reconcile(self.registry.as_ref()).await {
            Ok(created) => {
                info!("Feed service started ({} triggers created)", created);
                Ok(())
            }
            Err(e) => {
                error!("Startup reconciliation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Register a feed and start polling it.
    pub async fn watch(&self, request: NewFeed) -> Result<FeedDefinition> {
        let definition = request.into_definition()?;
        {
            // A poll left over from an earlier registration of the same id
            // finishes against the removed feed before this one exists.
            let _idle = self.pipeline.hold(&definition.id).await;
            self.registry.register(definition.clone()).await?;
        }

        self.scheduler
            .schedule(
                &definition.id,
                Duration::from_secs(definition.refresh_interval_secs),
                self.run_on_register,
            )
            .await;
        info!("Watching feed {} ({})", definition.id, definition.url);
        Ok(definition)
    }

    /// Stop polling a feed and forget everything about it.
    pub async fn unwatch(&self, feed_id: &str) -> Result<()> {
        // Cancel the trigger first so no new run starts for a removed feed.
        let interval = self.scheduler.interval_of(feed_id).await;
        self.scheduler.unschedule(feed_id).await;

        if let Err(e) = self.registry.remove(feed_id).await {
            // The feed is still registered unless it was never there.
            if let (false, Some(interval)) = (matches!(e, FeedhookError::NotFound(_)), interval) {
                self.scheduler.schedule(feed_id, interval, false).await;
            }
            return Err(e);
        }

        self.store.purge(feed_id).await?;
        self.pipeline.forget(feed_id).await;
        info!("Stopped watching feed {}", feed_id);
        Ok(())
    }

    /// Read model of a feed including its latest snapshot.
    pub async fn get(&self, feed_id: &str) -> Result<Feed> {
        self.registry.get(feed_id).await
    }

    /// Read models of all feeds.
    pub async fn list(&self) -> Result<Vec<Feed>> {
        self.registry.list_feeds().await
    }

    /// Poll a feed right away, outside its schedule.
    pub async fn poll_now(&self, feed_id: &str) -> Result<PollOutcome> {
        self.pipeline.poll(feed_id).await
    }

    /// The scheduler owning the poll triggers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Cancel all triggers and wait for running polls.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("Feed service stopped");
    }
}

/// Storage backends selected by configuration.
pub struct Backends {
    pub registry: Arc<dyn FeedRegistry>,
    pub store: Arc<dyn SeenItemStore>,
    /// Open database, when a SQLite backend is in use.
    pub database: Option<Database>,
}

impl Backends {
    /// Open the registry and seen-item store described by the configuration.
    pub async fn open(database: &DatabaseConfig, seen: &SeenConfig) -> Result<Self> {
        match database.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage; feeds are lost on exit");
                let store: Arc<dyn SeenItemStore> = match seen.strategy {
                    SeenStrategy::Exact => Arc::new(MemoryTtlStore::new(seen.ttl_cycles)),
                    SeenStrategy::Approximate => Arc::new(ApproximateStore::new(
                        Arc::new(MemoryBlobStore::new()),
                        seen.initial_capacity,
                        seen.error_rate,
                    )),
                };
                Ok(Self {
                    registry: Arc::new(MemoryRegistry::new()),
                    store,
                    database: None,
                })
            }
            StorageBackend::Sqlite => {
                let db = Database::open(&database.path).await?;
                let pool = db.pool().clone();
                let store: Arc<dyn SeenItemStore> = match seen.strategy {
                    SeenStrategy::Exact => {
                        Arc::new(SqliteTtlStore::new(pool.clone(), seen.ttl_cycles))
                    }
                    SeenStrategy::Approximate => {
                        let blobs: Arc<dyn FilterBlobStore> =
                            Arc::new(SqliteBlobStore::new(pool.clone()));
                        Arc::new(ApproximateStore::new(
                            blobs,
                            seen.initial_capacity,
                            seen.error_rate,
                        ))
                    }
                };
                Ok(Self {
                    registry: Arc::new(SqliteRegistry::new(pool)),
                    store,
                    database: Some(db),
                })
            }
        }
    }
}
