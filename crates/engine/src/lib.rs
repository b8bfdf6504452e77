pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod optimistic;
pub mod overlay;
pub mod reconcile;
pub mod remote;
pub mod scheduler;
pub mod state;

pub use config::{DatabaseConfig, EngineConfig, RemoteConfig, SyncConfig, SyncMode};
pub use coordinator::{SyncCoordinator, SyncOutcome};
pub use error::EngineError;
pub use http::HttpRemote;
pub use optimistic::OptimisticEdit;
pub use overlay::{EffectiveOrder, overlay, overlay_all};
pub use reconcile::{FlushReport, FlushedOrder, Reconciler, Refresh};
pub use remote::{RemoteApi, RemoteError};
pub use scheduler::{Connectivity, ConnectivityMonitor, SchedulerHandle, SchedulerState};
pub use state::SyncState;

use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;
use tracing::debug;

use ordersync_core::{ChangeValue, EditClock, OrderChange, OrderField, OrderId};
use ordersync_storage::{ChangeWrite, LAST_SYNC_AT, SqliteStorage, Storage, StorageError};

/// The local store, shared by the engine and its background tasks. The guard is
/// never held across a remote call.
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Entry point for the host application. Cheap to clone; every clone drives the
/// same store, remote and sync state.
#[derive(Clone)]
pub struct SyncEngine {
    storage: SharedStorage,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<std::sync::Mutex<EditClock>>,
    state: SyncState,
    coordinator: Arc<SyncCoordinator>,
    reconciler: Arc<Reconciler>,
    config: Arc<EngineConfig>,
}

impl SyncEngine {
    pub fn new(
        storage: SqliteStorage,
        remote: Arc<dyn RemoteApi>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let last_sync_at = storage.get_meta(LAST_SYNC_AT)?.unwrap_or(0);
        let storage: SharedStorage = Arc::new(Mutex::new(storage));
        let state = SyncState::new(last_sync_at);
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&remote),
            state.clone(),
            config.sync.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&storage),
            Arc::clone(&remote),
            Arc::clone(&coordinator),
            config.sync.refresh_after_flush,
        ));

        Ok(Self {
            storage,
            remote,
            clock: Arc::new(std::sync::Mutex::new(EditClock::new())),
            state,
            coordinator,
            reconciler,
            config: Arc::new(config),
        })
    }

    /// Open the configured database and talk to the configured HTTP remote.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open(&config.database.path)?;
        let remote = Arc::new(HttpRemote::new(&config.remote)?);
        Self::new(storage, remote, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.state
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.remote
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Record an edit and return it as an optimistic edit that can be rolled back.
    pub async fn edit(
        &self,
        order_id: &OrderId,
        field: OrderField,
        value: impl Into<ChangeValue>,
    ) -> Result<OptimisticEdit, EngineError> {
        // Stored and sent in the field's own type, e.g. quantity "12" becomes 12.
        let value = field.coerce(&value.into())?.to_change_value();
        let updated_at = self.tick()?;

        let mut storage = self.storage.lock().await;
        let ChangeWrite { change, previous } = storage
            .upsert_change(order_id, field, &value, updated_at)
            .map_err(|e| match e {
                StorageError::OrderNotFound(id) => EngineError::OrderNotFound(id),
                other => EngineError::Storage(other),
            })?;
        let base = storage
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        let pending = storage.get_changes_for_order(order_id)?;
        drop(storage);

        debug!(order_id = %order_id, field = %field, updated_at, "recorded order change");
        let effective = overlay(&base, &pending)?;
        Ok(OptimisticEdit::new(change, previous, effective))
    }

    /// Record an edit without keeping a rollback handle.
    pub async fn record_change(
        &self,
        order_id: &OrderId,
        field: OrderField,
        value: impl Into<ChangeValue>,
    ) -> Result<OrderChange, EngineError> {
        let edit = self.edit(order_id, field, value).await?;
        Ok(edit.change().clone())
    }

    /// Drop the pending edit of one field. Returns whether there was one.
    pub async fn discard_change(&self, order_id: &OrderId, field: OrderField) -> Result<bool, EngineError> {
        Ok(self.storage.lock().await.delete_change(order_id, field)?)
    }

    pub(crate) async fn revert_change(
        &self,
        change: &OrderChange,
        previous: Option<&OrderChange>,
    ) -> Result<bool, EngineError> {
        let mut storage = self.storage.lock().await;
        let current = storage.get_change(&change.order_id, change.field)?;
        let still_ours = current
            .as_ref()
            .is_some_and(|c| c.id == change.id && c.updated_at == change.updated_at);
        if !still_ours {
            debug!(
                order_id = %change.order_id,
                field = %change.field,
                "slot changed since the edit, nothing to roll back"
            );
            return Ok(false);
        }

        match previous {
            Some(previous) => storage.restore_change(previous)?,
            None => {
                storage.delete_change(&change.order_id, change.field)?;
            }
        }
        debug!(order_id = %change.order_id, field = %change.field, "rolled back order change");
        Ok(true)
    }

    pub async fn pending_changes(&self) -> Result<Vec<OrderChange>, EngineError> {
        Ok(self.storage.lock().await.get_changes()?)
    }

    /// Every base order with its pending changes applied.
    pub async fn orders(&self) -> Result<Vec<EffectiveOrder>, EngineError> {
        let (orders, changes) = {
            let storage = self.storage.lock().await;
            (storage.get_orders()?, storage.get_changes()?)
        };
        Ok(overlay_all(&orders, &changes)?)
    }

    pub async fn order(&self, order_id: &OrderId) -> Result<Option<EffectiveOrder>, EngineError> {
        let (order, changes) = {
            let storage = self.storage.lock().await;
            (storage.get_order(order_id)?, storage.get_changes_for_order(order_id)?)
        };
        order
            .map(|order| overlay(&order, &changes).map_err(EngineError::from))
            .transpose()
    }

    pub async fn sync_orders(&self) -> Result<SyncOutcome, EngineError> {
        self.coordinator.sync_orders().await
    }

    pub async fn flush(&self) -> Result<FlushReport, EngineError> {
        self.reconciler.flush().await
    }

    /// Start connectivity-driven polling. Must be called inside a tokio runtime.
    pub fn start_scheduler(&self, connectivity: Arc<dyn Connectivity>) -> SchedulerHandle {
        scheduler::spawn(
            Arc::clone(&self.coordinator),
            connectivity,
            self.config.sync.poll_interval(),
            self.config.sync.sync_on_start,
        )
    }

    fn tick(&self) -> Result<i64, EngineError> {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(clock.tick()?)
    }
}
