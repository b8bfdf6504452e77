use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field_value::{ChangeValue, FieldValue};
use crate::ids::{OrderId, ProductId};
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Kg,
    Pcs,
    Liter,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kg => "kg",
            Self::Pcs => "pcs",
            Self::Liter => "liter",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "kg" => Ok(Self::Kg),
            "pcs" => Ok(Self::Pcs),
            "liter" => Ok(Self::Liter),
            _ => Err(CoreError::InvalidData(format!("unknown unit: {s}"))),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base order record, mirrored from the remote. Field names match the remote JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub name: String,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit: Unit,
    pub department: String,
    pub updated_at: i64,
}

impl Order {
    pub fn get(&self, field: OrderField) -> FieldValue {
        match field {
            OrderField::Name => FieldValue::Text(self.name.clone()),
            OrderField::ProductId => FieldValue::Text(self.product_id.to_string()),
            OrderField::Quantity => FieldValue::Integer(self.quantity),
            OrderField::Unit => FieldValue::Unit(self.unit),
            OrderField::Department => FieldValue::Text(self.department.clone()),
        }
    }

    /// Substitute an already-coerced value. Fails if the value's type does not
    /// match the field.
    pub fn set(&mut self, field: OrderField, value: FieldValue) -> Result<(), CoreError> {
        match (field, value) {
            (OrderField::Name, FieldValue::Text(s)) => self.name = s,
            (OrderField::ProductId, FieldValue::Text(s)) => self.product_id = ProductId::new(s),
            (OrderField::Quantity, FieldValue::Integer(n)) => self.quantity = n,
            (OrderField::Unit, FieldValue::Unit(u)) => self.unit = u,
            (OrderField::Department, FieldValue::Text(s)) => self.department = s,
            (field, value) => {
                return Err(CoreError::InvalidChangeValue {
                    field: field.as_str().to_string(),
                    reason: format!("type mismatch for {value:?}"),
                });
            }
        }
        Ok(())
    }
}

/// The order fields a pending change may override. `as_str` is the `changeKey`
/// used locally and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderField {
    Name,
    ProductId,
    Quantity,
    Unit,
    Department,
}

impl OrderField {
    pub const ALL: [OrderField; 5] = [
        OrderField::Name,
        OrderField::ProductId,
        OrderField::Quantity,
        OrderField::Unit,
        OrderField::Department,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::ProductId => "productId",
            Self::Quantity => "quantity",
            Self::Unit => "unit",
            Self::Department => "department",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "name" => Ok(Self::Name),
            "productId" => Ok(Self::ProductId),
            "quantity" => Ok(Self::Quantity),
            "unit" => Ok(Self::Unit),
            "department" => Ok(Self::Department),
            _ => Err(CoreError::UnknownField(s.to_string())),
        }
    }

    /// Convert a loosely typed change value into this field's native type.
    ///
    /// Text fields take text, or an integer rendered in decimal. `quantity` takes an
    /// integer or decimal text. `unit` takes one of the unit names only.
    pub fn coerce(&self, value: &ChangeValue) -> Result<FieldValue, CoreError> {
        let invalid = |reason: String| CoreError::InvalidChangeValue {
            field: self.as_str().to_string(),
            reason,
        };
        match (self, value) {
            (Self::Name | Self::ProductId | Self::Department, ChangeValue::Text(s)) => {
                Ok(FieldValue::Text(s.clone()))
            }
            (Self::Name | Self::ProductId | Self::Department, ChangeValue::Integer(n)) => {
                Ok(FieldValue::Text(n.to_string()))
            }
            (Self::Quantity, ChangeValue::Integer(n)) => Ok(FieldValue::Integer(*n)),
            (Self::Quantity, ChangeValue::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|e| invalid(format!("{s:?} is not an integer: {e}"))),
            (Self::Unit, ChangeValue::Text(s)) => Unit::parse(s.trim())
                .map(FieldValue::Unit)
                .map_err(|e| invalid(e.to_string())),
            (Self::Unit, ChangeValue::Integer(n)) => Err(invalid(format!("{n} is not a unit"))),
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Partial body for `PATCH /orders/:id`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.product_id.is_none()
            && self.quantity.is_none()
            && self.unit.is_none()
            && self.department.is_none()
    }

    pub fn apply_to(&self, order: &mut Order) {
        if let Some(name) = &self.name {
            order.name = name.clone();
        }
        if let Some(product_id) = &self.product_id {
            order.product_id = product_id.clone();
        }
        if let Some(quantity) = self.quantity {
            order.quantity = quantity;
        }
        if let Some(unit) = self.unit {
            order.unit = unit;
        }
        if let Some(department) = &self.department {
            order.department = department.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order {
            id: OrderId::new("o1"),
            name: "Order #1".into(),
            product_id: ProductId::new("p1"),
            quantity: 2,
            unit: Unit::Kg,
            department: "Groceries".into(),
            updated_at: 1_000,
        }
    }

    #[test]
    fn field_keys_round_trip() {
        for field in OrderField::ALL {
            assert_eq!(OrderField::parse(field.as_str()).unwrap(), field);
        }
        assert!(matches!(
            OrderField::parse("updatedAt"),
            Err(CoreError::UnknownField(_))
        ));
    }

    #[test]
    fn quantity_coerces_from_text() {
        let v = OrderField::Quantity.coerce(&ChangeValue::Text(" 7 ".into())).unwrap();
        assert_eq!(v, FieldValue::Integer(7));
    }

    #[test]
    fn quantity_rejects_non_numeric_text() {
        let err = OrderField::Quantity
            .coerce(&ChangeValue::Text("seven".into()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidChangeValue { .. }));
    }

    #[test]
    fn text_fields_render_integers() {
        let v = OrderField::Department.coerce(&ChangeValue::Integer(42)).unwrap();
        assert_eq!(v, FieldValue::Text("42".into()));
    }

    #[test]
    fn unit_accepts_names_only() {
        assert_eq!(
            OrderField::Unit.coerce(&ChangeValue::Text("pcs".into())).unwrap(),
            FieldValue::Unit(Unit::Pcs)
        );
        assert!(OrderField::Unit.coerce(&ChangeValue::Text("tons".into())).is_err());
        assert!(OrderField::Unit.coerce(&ChangeValue::Integer(1)).is_err());
    }

    #[test]
    fn set_rejects_mismatched_type() {
        let mut o = order();
        assert!(o.set(OrderField::Quantity, FieldValue::Text("x".into())).is_err());
        o.set(OrderField::Quantity, FieldValue::Integer(9)).unwrap();
        assert_eq!(o.quantity, 9);
    }

    #[test]
    fn decodes_remote_json_and_ignores_extra_fields() {
        let json = r#"{
            "id": "o1", "name": "Order #1", "product_id": "p1", "quantity": 2,
            "unit": "kg", "department": "Groceries",
            "created_at": 5, "updated_at": 1000, "deleted_at": null
        }"#;
        let decoded: Order = serde_json::from_str(json).unwrap();
        assert_eq!(decoded, order());
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = OrderPatch {
            quantity: Some(3),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"quantity":3}"#);
    }
}
