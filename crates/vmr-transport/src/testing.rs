//! Testing utilities for relay consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;

use vmr_crypto::Envelope;

use crate::message::Filter;
use crate::traits::{PublishOutcome, RelayConnection, RelayError};

/// How a [`MockRelay`] answers publishes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockBehavior {
    Accept,
    Reject(String),
    /// Never answer.
    Hang,
    /// Fail as if the socket could not be reached.
    Fail(String),
}

/// Scriptable in-memory relay.
pub struct MockRelay {
    url: String,
    behavior: Mutex<MockBehavior>,
    delay: Duration,
    published: Mutex<Vec<Envelope>>,
    subscriptions: Mutex<HashMap<String, (Filter, mpsc::Sender<Envelope>)>>,
    unsubscribed: Mutex<Vec<String>>,
    subscribe_calls: AtomicUsize,
    fail_subscribe: AtomicBool,
    shut_down: AtomicBool,
}

impl MockRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            behavior: Mutex::new(MockBehavior::Accept),
            delay: Duration::ZERO,
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            unsubscribed: Mutex::new(Vec::new()),
            subscribe_calls: AtomicUsize::new(0),
            fail_subscribe: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        *self.behavior.lock() = behavior;
        self
    }

    /// Delay before a publish is answered.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Envelopes this relay accepted.
    pub fn published(&self) -> Vec<Envelope> {
        self.published.lock().clone()
    }

    /// Push an event to every open subscription, unfiltered. Returns how
    /// many subscriptions received it.
    pub fn inject(&self, event: &Envelope) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|_, (_, tx)| !tx.is_closed());
        subscriptions
            .values()
            .filter(|(_, tx)| tx.try_send(event.clone()).is_ok())
            .count()
    }

    /// End every open subscription stream, as a relay restart would.
    pub fn drop_subscriptions(&self) {
        self.subscriptions.lock().clear();
    }

    /// Filters of the open subscriptions.
    pub fn filters(&self) -> Vec<Filter> {
        self.subscriptions
            .lock()
            .values()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    pub fn active_subscriptions(&self) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|_, (_, tx)| !tx.is_closed());
        subscriptions.len()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Wait until at least one subscription is open.
    pub async fn wait_for_subscription(&self) {
        while self.active_subscriptions() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RelayConnection for MockRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, envelope: &Envelope) -> Result<PublishOutcome, RelayError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let behavior = self.behavior.lock().clone();
        match behavior {
            MockBehavior::Accept => {
                self.published.lock().push(envelope.clone());
                Ok(PublishOutcome::Accepted)
            }
            MockBehavior::Reject(reason) => Ok(PublishOutcome::Rejected(reason)),
            MockBehavior::Hang => std::future::pending().await,
            MockBehavior::Fail(reason) => Err(RelayError::Connection(reason)),
        }
    }

    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: &Filter,
    ) -> Result<mpsc::Receiver<Envelope>, RelayError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(RelayError::Connection("mock subscribe failure".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.subscriptions
            .lock()
            .insert(subscription_id.to_string(), (filter.clone(), tx));
        Ok(rx)
    }

    fn unsubscribe(&self, subscription_id: &str) {
        self.subscriptions.lock().remove(subscription_id);
        self.unsubscribed.lock().push(subscription_id.to_string());
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.subscriptions.lock().clear();
    }
}
