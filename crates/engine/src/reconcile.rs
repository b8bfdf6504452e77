use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use ordersync_core::{ChangeRequest, OrderChange, OrderField, OrderId};
use ordersync_storage::Storage;

use crate::coordinator::{SyncCoordinator, SyncOutcome};
use crate::error::EngineError;
use crate::overlay::overlay;
use crate::remote::RemoteApi;
use crate::SharedStorage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedOrder {
    pub order_id: OrderId,
    /// Fields that had a pending change in the flushed batch.
    pub changed_fields: Vec<OrderField>,
    /// Of those, the fields where the remote's canonical value differs from what we sent.
    pub diverged_fields: Vec<OrderField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    NotRequested,
    Completed(SyncOutcome),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub sent_changes: usize,
    /// Change rows removed. Lower than `sent_changes` when a field was edited again
    /// while the batch was in flight; that newer edit stays pending.
    pub cleared_changes: usize,
    pub orders: Vec<FlushedOrder>,
    pub refresh: Refresh,
}

impl FlushReport {
    fn empty() -> Self {
        Self {
            sent_changes: 0,
            cleared_changes: 0,
            orders: Vec::new(),
            refresh: Refresh::NotRequested,
        }
    }
}

/// Pushes the change log to the remote and clears what the remote accepted.
pub struct Reconciler {
    storage: SharedStorage,
    remote: Arc<dyn RemoteApi>,
    coordinator: Arc<SyncCoordinator>,
    refresh_after_flush: bool,
}

impl Reconciler {
    pub fn new(
        storage: SharedStorage,
        remote: Arc<dyn RemoteApi>,
        coordinator: Arc<SyncCoordinator>,
        refresh_after_flush: bool,
    ) -> Self {
        Self {
            storage,
            remote,
            coordinator,
            refresh_after_flush,
        }
    }

    pub async fn flush(&self) -> Result<FlushReport, EngineError> {
        let pending = self.storage.lock().await.get_changes()?;
        if pending.is_empty() {
            debug!("no pending order changes to flush");
            return Ok(FlushReport::empty());
        }

        let requests: Vec<ChangeRequest> = pending.iter().map(OrderChange::to_request).collect();
        let expected = requests
            .iter()
            .map(|r| &r.order_id)
            .collect::<HashSet<_>>()
            .len();
        info!(changes = requests.len(), orders = expected, "flushing order changes");

        let canonical = match self.remote.apply_changes(&requests).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "apply changes request failed");
                return Err(e.into());
            }
        };

        if canonical.len() != expected {
            error!(
                expected,
                received = canonical.len(),
                "remote returned unexpected number of orders, keeping changes"
            );
            return Err(EngineError::FlushMismatch {
                expected,
                received: canonical.len(),
            });
        }

        let mut orders = Vec::with_capacity(canonical.len());
        for order in &canonical {
            let sent = overlay(order, &pending)?;
            let diverged_fields: Vec<OrderField> = sent
                .changed_fields
                .iter()
                .copied()
                .filter(|field| sent.order.get(*field) != order.get(*field))
                .collect();
            debug!(
                order_id = %order.id,
                changed = ?sent.changed_fields,
                diverged = ?diverged_fields,
                "order reconciled"
            );
            orders.push(FlushedOrder {
                order_id: order.id.clone(),
                changed_fields: sent.changed_fields,
                diverged_fields,
            });
        }

        let sent_changes = pending.len();
        let mut storage = Arc::clone(&self.storage).lock_owned().await;
        let stats =
            tokio::task::spawn_blocking(move || storage.apply_flush(&canonical, &pending)).await??;
        info!(
            updated_orders = stats.updated_orders,
            cleared_changes = stats.deleted_changes,
            "flush committed"
        );

        let refresh = if self.refresh_after_flush {
            match self.coordinator.sync_orders().await {
                Ok(outcome) => Refresh::Completed(outcome),
                Err(e) => {
                    warn!(error = %e, "refresh after flush failed");
                    Refresh::Failed(e.to_string())
                }
            }
        } else {
            Refresh::NotRequested
        };

        Ok(FlushReport {
            sent_changes,
            cleared_changes: stats.deleted_changes,
            orders,
            refresh,
        })
    }
}
