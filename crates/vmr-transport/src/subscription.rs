//! Push subscriptions fanned out over every relay in a [`RelaySet`].
//!
//! Each relay gets its own task. The task subscribes, hands matching events
//! to the handler in the order that relay sent them, and re-subscribes with
//! exponential backoff whenever the relay ends the stream. Events are not
//! deduplicated across relays.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vmr_crypto::Envelope;

use crate::message::Filter;
use crate::reconnect::Backoff;
use crate::relay_set::RelaySet;
use crate::traits::RelayConnection;

/// Callback for delivered events.
pub type EventHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Handler calls hold the read side; `close` takes the write side.
type DeliveryGate = Arc<RwLock<()>>;

thread_local! {
    /// Gate of the handler currently running on this thread, if any.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

fn gate_key(gate: &DeliveryGate) -> usize {
    Arc::as_ptr(gate) as usize
}

pub struct Subscription;

impl Subscription {
    /// Open one logical subscription across all relays in `relays`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<F>(relays: &RelaySet, filter: Filter, on_event: F) -> SubscriptionHandle
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        let id = new_subscription_id();
        let closed = Arc::new(AtomicBool::new(false));
        let gate: DeliveryGate = Arc::new(RwLock::new(()));
        let handler: EventHandler = Arc::new(on_event);

        let tasks = relays
            .relays()
            .iter()
            .map(|relay| {
                tokio::spawn(run_relay(
                    Arc::clone(relay),
                    id.clone(),
                    filter.clone(),
                    Arc::clone(&closed),
                    Arc::clone(&gate),
                    Arc::clone(&handler),
                ))
            })
            .collect();

        info!(subscription = %id, relays = relays.len(), "subscription opened");
        SubscriptionHandle {
            id,
            closed,
            gate,
            tasks: Mutex::new(tasks),
            relays: relays.relays().to_vec(),
        }
    }
}

/// A live subscription. Closing is idempotent; dropping the handle closes it.
pub struct SubscriptionHandle {
    id: String,
    closed: Arc<AtomicBool>,
    gate: DeliveryGate,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    relays: Vec<Arc<dyn RelayConnection>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop delivery and release the per-relay resources.
    ///
    /// Waits for handler calls already in progress, so no handler runs
    /// once this returns. Called from inside this subscription's own
    /// handler, it does not wait; only the calling handler may still be
    /// running then.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if DELIVERING.with(Cell::get) != gate_key(&self.gate) {
            drop(self.gate.write());
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for relay in &self.relays {
            relay.unsubscribe(&self.id);
        }
        info!(subscription = %self.id, "subscription closed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_relay(
    relay: Arc<dyn RelayConnection>,
    id: String,
    filter: Filter,
    closed: Arc<AtomicBool>,
    gate: DeliveryGate,
    handler: EventHandler,
) {
    let mut backoff = Backoff::default();
    while !closed.load(Ordering::SeqCst) {
        match relay.subscribe(&id, &filter).await {
            Ok(mut events) => {
                debug!(relay = %relay.url(), subscription = %id, "subscribed");
                while let Some(event) = events.recv().await {
                    if !filter.matches(&event) {
                        debug!(relay = %relay.url(), event_id = %event.id(), "dropping event outside filter");
                        continue;
                    }
                    if !deliver(&gate, &closed, &handler, event) {
                        return;
                    }
                    backoff.reset();
                }
                info!(relay = %relay.url(), subscription = %id, "relay ended subscription stream");
            }
            Err(e) => {
                warn!(relay = %relay.url(), subscription = %id, error = %e, "subscribe failed");
            }
        }
        let delay = backoff.next_delay();
        debug!(relay = %relay.url(), delay_ms = delay.as_millis() as u64, "resubscribing after backoff");
        tokio::time::sleep(delay).await;
    }
}

/// Run the handler under the read side of the gate. Returns false once closed.
fn deliver(
    gate: &DeliveryGate,
    closed: &AtomicBool,
    handler: &EventHandler,
    event: Envelope,
) -> bool {
    let _guard = gate.read();
    if closed.load(Ordering::SeqCst) {
        return false;
    }
    let previous = DELIVERING.with(|d| d.replace(gate_key(gate)));
    handler(event);
    DELIVERING.with(|d| d.set(previous));
    true
}

fn new_subscription_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
