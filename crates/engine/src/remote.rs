use async_trait::async_trait;
use thiserror::Error;

use ordersync_core::{ChangeRequest, Order, OrderId, OrderPatch, Product, ProductId, ProductPatch};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("remote is offline")]
    Offline,

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }
}

/// The authoritative order service.
///
/// `fetch_orders` with `updated_since` asks only for orders changed after that
/// millisecond timestamp. `apply_changes` applies the whole batch atomically on the
/// remote and returns one canonical order per distinct order id in the batch.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_orders(&self, updated_since: Option<i64>) -> Result<Vec<Order>, RemoteError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, RemoteError>;

    async fn update_order(&self, order_id: &OrderId, patch: &OrderPatch) -> Result<Order, RemoteError>;

    async fn apply_changes(&self, changes: &[ChangeRequest]) -> Result<Vec<Order>, RemoteError>;

    async fn fetch_products(&self) -> Result<Vec<Product>, RemoteError>;

    async fn fetch_product(&self, product_id: &ProductId) -> Result<Option<Product>, RemoteError>;

    async fn update_product(
        &self,
        product_id: &ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, RemoteError>;
}
