use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use ordersync_core::{
    ChangeRequest, EditClock, Order, OrderId, OrderPatch, Product, ProductId, ProductPatch,
};
use ordersync_engine::{RemoteApi, RemoteError};

type ApplyHook = Box<dyn Fn(&mut Order) + Send + Sync>;

#[derive(Default)]
struct MockState {
    orders: Vec<Order>,
    products: Vec<Product>,
    clock: EditClock,
    fetch_count: usize,
    apply_count: usize,
    fetch_cursors: Vec<Option<i64>>,
    offline: bool,
    fail_next_fetch: bool,
    fail_next_apply: bool,
    truncate_apply_response: Option<usize>,
    apply_hook: Option<ApplyHook>,
    fetch_gate: Option<Arc<Semaphore>>,
    apply_gate: Option<Arc<Semaphore>>,
}

impl MockState {
    fn stamp(&mut self) -> i64 {
        self.clock
            .tick()
            .unwrap_or_else(|_| self.clock.last() + 1)
    }

    fn order_mut(&mut self, order_id: &OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| &o.id == order_id)
    }
}

/// In-memory stand-in for the authoritative order service.
///
/// Every write bumps the row's `updated_at`. Failures are injected per call.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

fn not_found() -> RemoteError {
    RemoteError::Status {
        status: 404,
        message: "Not Found".into(),
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Status {
        status: 503,
        message: "Service Unavailable".into(),
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: Vec<Order>) -> Self {
        let remote = Self::new();
        remote.set_orders(orders);
        remote
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        self.lock().orders = orders;
    }

    pub fn set_products(&self, products: Vec<Product>) {
        self.lock().products = products;
    }

    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.lock().orders.iter().find(|o| &o.id == order_id).cloned()
    }

    /// Add an order or overwrite one, stamping it as freshly written.
    pub fn put_order(&self, mut order: Order) -> Order {
        let mut state = self.lock();
        order.updated_at = state.stamp();
        match state.order_mut(&order.id) {
            Some(existing) => *existing = order.clone(),
            None => state.orders.push(order.clone()),
        }
        order
    }

    pub fn remove_order(&self, order_id: &OrderId) -> bool {
        let mut state = self.lock();
        let before = state.orders.len();
        state.orders.retain(|o| &o.id != order_id);
        state.orders.len() != before
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetch_count
    }

    pub fn apply_count(&self) -> usize {
        self.lock().apply_count
    }

    /// The `updated_since` argument of every order list fetch, oldest first.
    pub fn fetch_cursors(&self) -> Vec<Option<i64>> {
        self.lock().fetch_cursors.clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn fail_next_fetch(&self) {
        self.lock().fail_next_fetch = true;
    }

    pub fn fail_next_apply(&self) {
        self.lock().fail_next_apply = true;
    }

    /// The next apply-changes call applies the batch but answers with at most
    /// `keep` orders.
    pub fn truncate_apply_response(&self, keep: usize) {
        self.lock().truncate_apply_response = Some(keep);
    }

    /// Run `hook` on every order an apply-changes batch touched, after the changes
    /// are applied. Models server-side normalisation.
    pub fn on_apply(&self, hook: impl Fn(&mut Order) + Send + Sync + 'static) {
        self.lock().apply_hook = Some(Box::new(hook));
    }

    /// Hold every order list fetch until permits are added to the returned gate.
    /// Each fetch is counted before it blocks.
    pub fn gate_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().fetch_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn open_fetches(&self) {
        if let Some(gate) = self.lock().fetch_gate.take() {
            gate.add_permits(1 << 20);
        }
    }

    /// Hold every apply-changes call until [`MockRemote::open_applies`]. Each call is
    /// counted before it blocks; the batch is applied after it resumes.
    pub fn gate_applies(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().apply_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn open_applies(&self) {
        if let Some(gate) = self.lock().apply_gate.take() {
            gate.add_permits(1 << 20);
        }
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn fetch_orders(&self, updated_since: Option<i64>) -> Result<Vec<Order>, RemoteError> {
        let gate = {
            let mut state = self.lock();
            if state.offline {
                return Err(RemoteError::Offline);
            }
            state.fetch_count += 1;
            state.fetch_cursors.push(updated_since);
            state.fetch_gate.clone()
        };

        if let Some(gate) = gate {
            let _permit = gate.acquire().await.map_err(|_| unavailable())?;
        }

        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_fetch) {
            return Err(unavailable());
        }
        Ok(state
            .orders
            .iter()
            .filter(|o| updated_since.is_none_or(|since| o.updated_at > since))
            .cloned()
            .collect())
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, RemoteError> {
        let state = self.lock();
        if state.offline {
            return Err(RemoteError::Offline);
        }
        Ok(state.orders.iter().find(|o| &o.id == order_id).cloned())
    }

    async fn update_order(&self, order_id: &OrderId, patch: &OrderPatch) -> Result<Order, RemoteError> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Offline);
        }
        let updated_at = state.stamp();
        let order = state.order_mut(order_id).ok_or_else(not_found)?;
        patch.apply_to(order);
        order.updated_at = updated_at;
        Ok(order.clone())
    }

    async fn apply_changes(&self, changes: &[ChangeRequest]) -> Result<Vec<Order>, RemoteError> {
        let gate = {
            let mut state = self.lock();
            if state.offline {
                return Err(RemoteError::Offline);
            }
            state.apply_count += 1;
            state.apply_gate.clone()
        };

        if let Some(gate) = gate {
            let _permit = gate.acquire().await.map_err(|_| unavailable())?;
        }

        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_apply) {
            return Err(RemoteError::Status {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }

        // Validate the whole batch before touching anything.
        let mut working = state.orders.clone();
        let mut touched: Vec<OrderId> = Vec::new();
        let mut seen = HashSet::new();
        for change in changes {
            let order = working
                .iter_mut()
                .find(|o| o.id == change.order_id)
                .ok_or_else(not_found)?;
            let value = change
                .change_key
                .coerce(&change.change_value)
                .map_err(|e| RemoteError::Status {
                    status: 400,
                    message: e.to_string(),
                })?;
            order.set(change.change_key, value).map_err(|e| RemoteError::Status {
                status: 400,
                message: e.to_string(),
            })?;
            if seen.insert(change.order_id.clone()) {
                touched.push(change.order_id.clone());
            }
        }

        let updated_at = state.stamp();
        let mut canonical = Vec::with_capacity(touched.len());
        for id in &touched {
            if let Some(order) = working.iter_mut().find(|o| &o.id == id) {
                if let Some(hook) = &state.apply_hook {
                    hook(order);
                }
                order.updated_at = updated_at;
                canonical.push(order.clone());
            }
        }
        state.orders = working;

        if let Some(keep) = state.truncate_apply_response.take() {
            canonical.truncate(keep);
        }
        Ok(canonical)
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, RemoteError> {
        let state = self.lock();
        if state.offline {
            return Err(RemoteError::Offline);
        }
        Ok(state.products.clone())
    }

    async fn fetch_product(&self, product_id: &ProductId) -> Result<Option<Product>, RemoteError> {
        let state = self.lock();
        if state.offline {
            return Err(RemoteError::Offline);
        }
        Ok(state.products.iter().find(|p| &p.id == product_id).cloned())
    }

    async fn update_product(
        &self,
        product_id: &ProductId,
        patch: &ProductPatch,
    ) -> Result<Product, RemoteError> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Offline);
        }
        let updated_at = state.stamp();
        let product = state
            .products
            .iter_mut()
            .find(|p| &p.id == product_id)
            .ok_or_else(not_found)?;
        patch.apply_to(product);
        product.updated_at = updated_at;
        Ok(product.clone())
    }
}
