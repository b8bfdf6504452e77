use ordersync_core::OrderChange;

use crate::error::EngineError;
use crate::overlay::EffectiveOrder;
use crate::SyncEngine;

/// A local edit that is already visible through the overlay, paired with the
/// means to undo it.
///
/// The edit is durable as soon as this value exists. `commit` only gives up the
/// ability to roll back; `rollback` puts the slot back the way it was.
#[must_use = "an optimistic edit should be committed or rolled back"]
#[derive(Debug, Clone)]
pub struct OptimisticEdit {
    change: OrderChange,
    previous: Option<OrderChange>,
    effective: EffectiveOrder,
}

impl OptimisticEdit {
    pub(crate) fn new(change: OrderChange, previous: Option<OrderChange>, effective: EffectiveOrder) -> Self {
        Self {
            change,
            previous,
            effective,
        }
    }

    pub fn change(&self) -> &OrderChange {
        &self.change
    }

    /// The pending change this edit replaced, if any.
    pub fn previous(&self) -> Option<&OrderChange> {
        self.previous.as_ref()
    }

    /// The order as readers see it with this edit applied.
    pub fn effective(&self) -> &EffectiveOrder {
        &self.effective
    }

    pub fn commit(self) -> EffectiveOrder {
        self.effective
    }

    /// Restore the previous pending value, or remove the slot if there was none.
    ///
    /// Returns `false` and leaves the log alone when the slot no longer holds this
    /// edit, because a newer edit overwrote it or a flush already sent it.
    pub async fn rollback(self, engine: &SyncEngine) -> Result<bool, EngineError> {
        engine.revert_change(&self.change, self.previous.as_ref()).await
    }
}
