use std::collections::{BTreeMap, HashMap};

use ordersync_core::{CoreError, FieldValue, Order, OrderChange, OrderField, OrderId};

/// A base order with its pending changes laid over it. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveOrder {
    pub order: Order,
    /// Fields whose value comes from a pending change, in field order.
    pub changed_fields: Vec<OrderField>,
    /// Newest `updated_at` among the applied changes. Pending edits count as newer
    /// than the base row regardless of the base's own `updated_at`.
    pub pending_updated_at: Option<i64>,
}

impl EffectiveOrder {
    pub fn id(&self) -> &OrderId {
        &self.order.id
    }

    pub fn has_pending(&self) -> bool {
        !self.changed_fields.is_empty()
    }

    pub fn is_changed(&self, field: OrderField) -> bool {
        self.changed_fields.contains(&field)
    }
}

/// Merge `changes` into `base`.
///
/// Changes for other orders are ignored, so callers may pass the whole change log.
/// If several changes target the same field, the one with the greatest `updated_at`
/// wins; on a tie the later one in iteration order wins. Pure: same input, same output.
pub fn overlay<'a, I>(base: &Order, changes: I) -> Result<EffectiveOrder, CoreError>
where
    I: IntoIterator<Item = &'a OrderChange>,
{
    let mut overrides: BTreeMap<OrderField, (i64, FieldValue)> = BTreeMap::new();

    for change in changes.into_iter().filter(|c| c.order_id == base.id) {
        let superseded = overrides
            .get(&change.field)
            .is_some_and(|(applied_at, _)| *applied_at > change.updated_at);
        if superseded {
            continue;
        }
        overrides.insert(change.field, (change.updated_at, change.coerced_value()?));
    }

    let mut order = base.clone();
    let mut changed_fields = Vec::with_capacity(overrides.len());
    let mut pending_updated_at: Option<i64> = None;
    for (field, (updated_at, value)) in overrides {
        order.set(field, value)?;
        changed_fields.push(field);
        pending_updated_at = Some(pending_updated_at.map_or(updated_at, |t| t.max(updated_at)));
    }

    Ok(EffectiveOrder {
        order,
        changed_fields,
        pending_updated_at,
    })
}

/// Overlay every base order, keeping the base order's sequence.
pub fn overlay_all(orders: &[Order], changes: &[OrderChange]) -> Result<Vec<EffectiveOrder>, CoreError> {
    let mut by_order: HashMap<&OrderId, Vec<&OrderChange>> = HashMap::new();
    for change in changes {
        by_order.entry(&change.order_id).or_default().push(change);
    }

    orders
        .iter()
        .map(|order| {
            let pending = by_order.get(&order.id).map(Vec::as_slice).unwrap_or_default();
            overlay(order, pending.iter().copied())
        })
        .collect()
}
