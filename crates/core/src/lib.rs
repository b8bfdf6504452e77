pub mod change;
pub mod clock;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod order;
pub mod product;

pub use change::{ChangeRequest, OrderChange};
pub use clock::EditClock;
pub use error::CoreError;
pub use field_value::{ChangeValue, FieldValue};
pub use ids::*;
pub use order::{Order, OrderField, OrderPatch, Unit};
pub use product::{Product, ProductPatch};
