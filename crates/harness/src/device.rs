use std::path::Path;
use std::sync::Arc;

use ordersync_core::{Order, OrderId};
use ordersync_engine::{
    ConnectivityMonitor, EngineConfig, EngineError, SchedulerHandle, SyncEngine,
};
use ordersync_storage::{SqliteStorage, Storage};

use crate::mock::MockRemote;

/// One device: an engine over its own database, wired to a shared mock remote.
pub struct TestDevice {
    pub engine: SyncEngine,
    pub remote: Arc<MockRemote>,
    pub connectivity: Arc<ConnectivityMonitor>,
}

impl TestDevice {
    /// Configuration for tests: no sync on scheduler start, no refresh after flush,
    /// so every remote call a test sees is one it asked for.
    pub fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.database.path = ":memory:".to_string();
        config.sync.sync_on_start = false;
        config.sync.refresh_after_flush = false;
        config
    }

    pub fn new(remote: Arc<MockRemote>) -> Result<Self, EngineError> {
        Self::with_config(remote, Self::test_config())
    }

    pub fn with_config(remote: Arc<MockRemote>, config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory()?;
        Self::build(storage, remote, config)
    }

    /// A device backed by a database file, for restart tests.
    pub fn open(remote: Arc<MockRemote>, path: &Path, mut config: EngineConfig) -> Result<Self, EngineError> {
        config.database.path = path.to_string_lossy().into_owned();
        let storage = SqliteStorage::open(&config.database.path)?;
        Self::build(storage, remote, config)
    }

    fn build(storage: SqliteStorage, remote: Arc<MockRemote>, config: EngineConfig) -> Result<Self, EngineError> {
        let engine = SyncEngine::new(storage, remote.clone(), config)?;
        Ok(Self {
            engine,
            remote,
            connectivity: Arc::new(ConnectivityMonitor::new(false)),
        })
    }

    /// A device that has already pulled `orders` from a fresh remote.
    pub async fn synced(orders: Vec<Order>) -> Result<Self, EngineError> {
        let device = Self::new(Arc::new(MockRemote::with_orders(orders)))?;
        device.engine.sync_orders().await?;
        Ok(device)
    }

    pub fn start_scheduler(&self) -> SchedulerHandle {
        self.engine.start_scheduler(self.connectivity.clone())
    }

    /// The order as readers see it, pending changes applied.
    pub async fn effective(&self, order_id: &OrderId) -> Result<Option<Order>, EngineError> {
        Ok(self.engine.order(order_id).await?.map(|e| e.order))
    }

    /// The synced base row, without pending changes.
    pub async fn base(&self, order_id: &OrderId) -> Result<Option<Order>, EngineError> {
        Ok(self.engine.storage().lock().await.get_order(order_id)?)
    }

    pub async fn base_orders(&self) -> Result<Vec<Order>, EngineError> {
        Ok(self.engine.storage().lock().await.get_orders()?)
    }

    pub async fn change_count(&self) -> Result<u64, EngineError> {
        Ok(self.engine.storage().lock().await.change_count()?)
    }

    /// Run raw SQL against the device database, e.g. to install failure triggers.
    pub async fn execute_sql(&self, sql: &str) -> Result<(), EngineError> {
        self.engine
            .storage()
            .lock()
            .await
            .conn()
            .execute_batch(sql)
            .map_err(|e| EngineError::Storage(e.into()))
    }
}
