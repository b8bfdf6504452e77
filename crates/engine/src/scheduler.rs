use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::SyncCoordinator;

/// Source of the device's "is connected" signal.
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// One-shot check of the current state.
    async fn probe(&self) -> bool;

    /// Change feed. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// In-process connectivity source, fed by the host application.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(connected: bool) -> Self {
        let (tx, _) = watch::channel(connected);
        Self { tx }
    }

    pub fn set_connected(&self, connected: bool) {
        self.tx.send_replace(connected);
    }

    pub fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    /// Live subscriptions, i.e. receivers not yet dropped.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Connectivity for ConnectivityMonitor {
    async fn probe(&self) -> bool {
        self.is_connected()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Disconnected,
    ConnectedPolling,
}

/// Owner of the background polling task. Dropping it cancels the task.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<SchedulerState>,
}

impl SchedulerHandle {
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Cancel the task and wait for it to release its timer and subscription.
    /// Syncs already spawned by a tick run to completion.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn(
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn Connectivity>,
    period: Duration,
    sync_on_start: bool,
) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let (state_tx, state) = watch::channel(SchedulerState::Disconnected);
    let task = tokio::spawn(run(
        coordinator,
        connectivity,
        period,
        sync_on_start,
        cancel.clone(),
        state_tx,
    ));
    SchedulerHandle {
        cancel,
        task: Some(task),
        state,
    }
}

async fn run(
    coordinator: Arc<SyncCoordinator>,
    connectivity: Arc<dyn Connectivity>,
    period: Duration,
    sync_on_start: bool,
    cancel: CancellationToken,
    state: watch::Sender<SchedulerState>,
) {
    // Subscribe before probing so a transition in between is not lost.
    let mut events = connectivity.subscribe();
    events.borrow_and_update();
    let connected = connectivity.probe().await;

    let mut timer = connected.then(|| polling_timer(period));
    state.send_replace(state_for(connected));
    info!(connected, period_ms = period.as_millis() as u64, "scheduler started");

    if sync_on_start {
        spawn_sync(&coordinator);
    }

    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = events.changed(), if events_open => {
                if changed.is_err() {
                    debug!("connectivity source closed, keeping current state");
                    events_open = false;
                    continue;
                }
                let connected = *events.borrow_and_update();
                // Reconnecting while already polling restarts the timer.
                timer = connected.then(|| polling_timer(period));
                let next = state_for(connected);
                let previous = state.send_replace(next);
                debug!(?previous, ?next, "scheduler transition");
            }
            _ = next_tick(&mut timer) => spawn_sync(&coordinator),
        }
    }

    state.send_replace(SchedulerState::Disconnected);
    info!("scheduler stopped");
}

fn state_for(connected: bool) -> SchedulerState {
    if connected {
        SchedulerState::ConnectedPolling
    } else {
        SchedulerState::Disconnected
    }
}

/// First tick fires one full period from now, not immediately.
fn polling_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

// Syncs are detached so a slow fetch never delays the next tick; overlapping
// ones are turned away by the coordinator's sentinel.
fn spawn_sync(coordinator: &Arc<SyncCoordinator>) {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        // Failures are logged by the coordinator and retried on the next tick.
        let _ = coordinator.sync_orders().await;
    });
}
