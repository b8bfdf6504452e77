use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use ordersync_core::{ChangeRequest, Order, OrderId, OrderPatch, Product, ProductId, ProductPatch};

use crate::config::RemoteConfig;
use crate::remote::{RemoteApi, RemoteError};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// JSON-over-HTTP client for the order service.
pub struct HttpRemote {
    client: Client,
    base_url: String,
    offline: AtomicBool,
}

impl HttpRemote {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            offline: AtomicBool::new(false),
        })
    }

    /// While offline every call fails fast with `RemoteError::Offline`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        if self.is_offline() {
            return Err(RemoteError::Offline);
        }

        let response = request
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let status = response.status();
        debug!(url = %response.url(), status = status.as_u16(), "remote response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, RemoteError> {
        match self.send(request).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The service reports failures as `{"error": "..."}`; fall back to the status line.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| format!("Request failed with status {}", status.as_u16()))
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch_orders(&self, updated_since: Option<i64>) -> Result<Vec<Order>, RemoteError> {
        let mut request = self.client.get(self.url("orders"));
        if let Some(since) = updated_since {
            request = request.query(&[("updated_at_since", since)]);
        }
        self.send(request).await
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, RemoteError> {
        let request = self.client.get(self.url(&format!("orders/{order_id}")));
        self.send_optional(request).await
    }

    async fn update_order(&self, order_id: &OrderId, patch: &OrderPatch) -> Result<Order, RemoteError> {
        let request = self
            .client
            .patch(self.url(&format!("orders/{order_id}")))
            .json(patch);
        self.send(request).await
    }

    async fn apply_changes(&self, changes: &[ChangeRequest]) -> Result<Vec<Order>, RemoteError> {
        let request = self
            .client
            .post(self.url("orders/apply-changes"))
            .json(changes);
        self.send(request).await
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, RemoteError> {
        self.send(self.client.get(self.url("products"))).await
    }

    async fn fetch_product(&self, product_id: &ProductId) -> Result<Option<Product>, RemoteError> {
        let request = self.client.get(self.url(&format!("products/{product_id}")));
        self.send_optional(request).await
    }

    async fn update_product(
        &self,
        product_id: &ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, RemoteError> {
        let request = self
            .client
            .patch(self.url(&format!("products/{product_id}")))
            .json(patch);
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> HttpRemote {
        HttpRemote::new(&RemoteConfig {
            base_url: "http://localhost:3000/".into(),
            timeout_ms: 1_000,
        })
        .unwrap()
    }

    #[test]
    fn urls_join_without_double_slash() {
        assert_eq!(remote().url("orders/apply-changes"), "http://localhost:3000/orders/apply-changes");
    }

    #[test]
    fn error_body_message_is_preferred() {
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, r#"{"error":"Not Found"}"#),
            "Not Found"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "<html>"),
            "Request failed with status 502"
        );
    }

    #[tokio::test]
    async fn offline_short_circuits() {
        let remote = remote();
        remote.set_offline(true);
        let err = remote.fetch_orders(None).await.unwrap_err();
        assert!(matches!(err, RemoteError::Offline));
    }
}
