use std::sync::Arc;

use tracing::{debug, error, info, warn};

use ordersync_core::clock;
use ordersync_storage::{LAST_SYNC_AT, Storage};

use crate::config::{SyncConfig, SyncMode};
use crate::error::EngineError;
use crate::remote::RemoteApi;
use crate::state::SyncState;
use crate::SharedStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another sync held the sentinel; nothing was fetched.
    Skipped,
    /// The remote returned no orders; the base table was left alone.
    Empty,
    /// The base table was replaced with the remote snapshot.
    Replaced {
        fetched: usize,
        inserted: usize,
        orphaned_changes: usize,
    },
    /// Orders updated since the last sync were merged into the base table.
    Merged { fetched: usize, merged: usize },
}

/// Refreshes the base table from the remote. At most one sync runs at a time.
pub struct SyncCoordinator {
    storage: SharedStorage,
    remote: Arc<dyn RemoteApi>,
    state: SyncState,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        storage: SharedStorage,
        remote: Arc<dyn RemoteApi>,
        state: SyncState,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            remote,
            state,
            config,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Run one sync unless one is already in flight, in which case return
    /// `SyncOutcome::Skipped` immediately. Failures leave the base table untouched
    /// and are not retried here; the next poll tick tries again.
    pub async fn sync_orders(&self) -> Result<SyncOutcome, EngineError> {
        let started_at = clock::now_ms()?;
        let Some(_guard) = self.state.try_begin(started_at) else {
            debug!(
                running_since = self.state.sync_started_at(),
                "sync already in progress, skipping"
            );
            return Ok(SyncOutcome::Skipped);
        };

        info!("sync orders start");
        match self.run(started_at).await {
            Ok(outcome) => {
                info!(?outcome, "sync orders success");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "sync orders failed");
                Err(e)
            }
        }
    }

    async fn run(&self, started_at: i64) -> Result<SyncOutcome, EngineError> {
        let since = match self.config.mode {
            SyncMode::Full => None,
            SyncMode::Incremental => Some(self.state.last_sync_at()).filter(|t| *t > 0),
        };

        let fetched = self.remote.fetch_orders(since).await?;

        // SQLite work runs on the blocking pool; a full replace can take a while.
        let mut storage = Arc::clone(&self.storage).lock_owned().await;
        let batch_size = self.config.batch_size;
        let outcome = tokio::task::spawn_blocking(move || -> Result<SyncOutcome, EngineError> {
            let outcome = if fetched.is_empty() {
                debug!("remote returned no orders");
                SyncOutcome::Empty
            } else if since.is_some() {
                let merged = storage.upsert_orders(&fetched, batch_size)?;
                SyncOutcome::Merged {
                    fetched: fetched.len(),
                    merged,
                }
            } else {
                let stats = storage.replace_orders(&fetched, batch_size)?;
                if stats.inserted != fetched.len() {
                    warn!(
                        inserted = stats.inserted,
                        expected = fetched.len(),
                        "inserted orders count mismatch"
                    );
                }
                SyncOutcome::Replaced {
                    fetched: fetched.len(),
                    inserted: stats.inserted,
                    orphaned_changes: stats.orphaned_changes,
                }
            };
            // The start time is the cursor: anything the remote changed while this
            // sync was in flight is picked up next time.
            storage.set_meta(LAST_SYNC_AT, started_at)?;
            Ok(outcome)
        })
        .await??;

        self.state.mark_synced(started_at);
        Ok(outcome)
    }
}
