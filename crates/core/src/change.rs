use serde::{Deserialize, Serialize};

use crate::field_value::{ChangeValue, FieldValue};
use crate::ids::{ChangeId, OrderId};
use crate::order::OrderField;
use crate::CoreError;

/// A pending, not yet flushed edit of one order field. At most one exists per
/// `(order_id, field)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderChange {
    pub id: ChangeId,
    pub order_id: OrderId,
    pub field: OrderField,
    pub value: ChangeValue,
    pub updated_at: i64,
}

impl OrderChange {
    pub fn coerced_value(&self) -> Result<FieldValue, CoreError> {
        self.field.coerce(&self.value)
    }

    pub fn to_request(&self) -> ChangeRequest {
        ChangeRequest {
            order_id: self.order_id.clone(),
            change_key: self.field,
            change_value: self.value.clone(),
        }
    }
}

/// Wire form of a pending change in the apply-changes batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub order_id: OrderId,
    pub change_key: OrderField,
    pub change_value: ChangeValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_keys() {
        let change = OrderChange {
            id: ChangeId::new(),
            order_id: OrderId::new("o1"),
            field: OrderField::ProductId,
            value: ChangeValue::Text("p2".into()),
            updated_at: 10,
        };
        let json = serde_json::to_value(change.to_request()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"orderId": "o1", "changeKey": "productId", "changeValue": "p2"})
        );
    }
}
