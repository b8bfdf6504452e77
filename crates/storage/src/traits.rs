use ordersync_core::{ChangeValue, Order, OrderChange, OrderField, OrderId};

use crate::error::StorageError;

/// Meta key holding the millisecond timestamp of the last successful sync.
pub const LAST_SYNC_AT: &str = "last_sync_at";

/// Result of a full replace of the base table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceStats {
    pub deleted: usize,
    pub inserted: usize,
    pub batches: usize,
    /// Pending changes dropped because their order is gone from the new snapshot.
    pub orphaned_changes: usize,
}

/// Result of writing a change into the single-slot change log.
#[derive(Debug, Clone)]
pub struct ChangeWrite {
    pub change: OrderChange,
    /// The pending change this write replaced, if the slot was occupied.
    pub previous: Option<OrderChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    pub updated_orders: usize,
    pub deleted_changes: usize,
}

pub trait Storage {
    fn get_orders(&self) -> Result<Vec<Order>, StorageError>;

    fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>, StorageError>;

    fn order_count(&self) -> Result<u64, StorageError>;

    /// Delete every base row and insert `orders` in batches of `batch_size`, all in
    /// one transaction. Nothing is written unless every batch succeeds.
    fn replace_orders(
        &mut self,
        orders: &[Order],
        batch_size: usize,
    ) -> Result<ReplaceStats, StorageError>;

    /// Insert or overwrite the given rows, leaving every other base row alone.
    fn upsert_orders(&mut self, orders: &[Order], batch_size: usize) -> Result<usize, StorageError>;

    /// Delete one base row. Its pending changes go with it.
    fn delete_order(&mut self, order_id: &OrderId) -> Result<bool, StorageError>;

    fn get_changes(&self) -> Result<Vec<OrderChange>, StorageError>;

    fn get_changes_for_order(&self, order_id: &OrderId) -> Result<Vec<OrderChange>, StorageError>;

    fn get_change(
        &self,
        order_id: &OrderId,
        field: OrderField,
    ) -> Result<Option<OrderChange>, StorageError>;

    fn change_count(&self) -> Result<u64, StorageError>;

    fn upsert_change(
        &mut self,
        order_id: &OrderId,
        field: OrderField,
        value: &ChangeValue,
        updated_at: i64,
    ) -> Result<ChangeWrite, StorageError>;

    /// Put a previously read change back exactly as it was, id included.
    fn restore_change(&mut self, change: &OrderChange) -> Result<(), StorageError>;

    fn delete_change(&mut self, order_id: &OrderId, field: OrderField) -> Result<bool, StorageError>;

    /// Write back canonical orders and drop the flushed changes, in one transaction.
    /// A flushed change is only dropped if its slot still holds the same id and
    /// `updated_at`; anything written to the slot since stays pending.
    fn apply_flush(
        &mut self,
        canonical: &[Order],
        flushed: &[OrderChange],
    ) -> Result<FlushStats, StorageError>;

    fn get_meta(&self, key: &str) -> Result<Option<i64>, StorageError>;

    fn set_meta(&mut self, key: &str, value: i64) -> Result<(), StorageError>;
}
