use ordersync_core::{Order, OrderId, Product, ProductId, Unit};

/// Timestamp every fixture row is created with.
pub const BASE_TIME: i64 = 1_700_000_000_000;

pub const DEPARTMENT: &str = "Groceries";

pub const PRODUCT_NAMES: [&str; 10] = [
    "Organic Apples",
    "Whole Wheat Bread",
    "Free-Range Eggs",
    "Almond Milk",
    "Grass-Fed Beef",
    "Wild Salmon",
    "Quinoa",
    "Spinach",
    "Avocado",
    "Dark Chocolate",
];

const UNITS: [Unit; 3] = [Unit::Kg, Unit::Pcs, Unit::Liter];

pub fn product_id(index: usize) -> ProductId {
    ProductId::new(format!("product-{:02}", index % PRODUCT_NAMES.len()))
}

pub fn order_id(index: usize) -> OrderId {
    OrderId::new(format!("order-{index:05}"))
}

pub fn products() -> Vec<Product> {
    PRODUCT_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| Product {
            id: product_id(i),
            name: (*name).to_string(),
            price: 5.0 + i as f64 * 4.5,
            created_at: BASE_TIME,
            updated_at: BASE_TIME,
        })
        .collect()
}

/// Deterministic order `index`: `Order #index+1`, products and units cycling.
pub fn order(index: usize) -> Order {
    Order {
        id: order_id(index),
        name: format!("Order #{}", index + 1),
        product_id: product_id(index),
        quantity: (index % 10) as i64 + 1,
        unit: UNITS[index % UNITS.len()],
        department: DEPARTMENT.to_string(),
        updated_at: BASE_TIME,
    }
}

pub fn orders(count: usize) -> Vec<Order> {
    (0..count).map(order).collect()
}
