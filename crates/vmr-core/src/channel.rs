//! The encrypted command channel.
//!
//! [`CommandChannel::send`] turns a [`Command`] into a signed, encrypted
//! envelope and publishes it redundantly. [`CommandChannel::subscribe_to_device_updates`]
//! listens for the device's inventory pushes. These two calls are the whole
//! surface the presentation layer uses.
//!
//! A successful send means a relay accepted the envelope, not that the
//! device acted on it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use vmr_crypto::conversation::{self, derive_conversation_key};
use vmr_crypto::keys::normalize_public_key;
use vmr_crypto::{
    Clock, Envelope, Identity, PublicKey, UnsignedEnvelope, KIND_ENCRYPTED_DIRECT_MESSAGE,
};
use vmr_transport::{Ack, Filter, RelaySet, Subscription, SubscriptionHandle};

use crate::collaborators::Credentials;
use crate::command::Command;
use crate::errors::SendFailure;
use crate::inventory::InventorySnapshot;

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Sending,
}

/// Result of the most recent completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Acked(Ack),
    Failed(SendFailure),
}

pub struct CommandChannel {
    relays: Arc<RelaySet>,
    clock: Arc<dyn Clock>,
    publish_timeout: Duration,
    in_flight: AtomicUsize,
    last_outcome: Mutex<Option<SendOutcome>>,
}

impl CommandChannel {
    /// `publish_timeout` bounds each relay's answer separately.
    pub fn new(relays: Arc<RelaySet>, clock: Arc<dyn Clock>, publish_timeout: Duration) -> Self {
        Self {
            relays,
            clock,
            publish_timeout,
            in_flight: AtomicUsize::new(0),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn relays(&self) -> &Arc<RelaySet> {
        &self.relays
    }

    pub fn state(&self) -> ChannelState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            ChannelState::Sending
        } else {
            ChannelState::Idle
        }
    }

    pub fn last_outcome(&self) -> Option<SendOutcome> {
        self.last_outcome.lock().clone()
    }

    /// Encrypt, sign and publish `command` to `device`.
    ///
    /// Key and crypto failures are returned immediately and never retried.
    pub async fn send(
        &self,
        operator: &Identity,
        device: &PublicKey,
        command: &Command,
    ) -> Result<Ack, SendFailure> {
        let _sending = InFlight::enter(&self.in_flight);
        let result = self.publish_command(operator, device, command).await;
        self.record(&result);
        result
    }

    /// Like [`send`](Self::send), starting from stored key strings.
    pub async fn send_with_credentials(
        &self,
        credentials: &Credentials,
        command: &Command,
    ) -> Result<Ack, SendFailure> {
        match resolve_credentials(credentials) {
            Ok((operator, device)) => self.send(&operator, &device, command).await,
            Err(failure) => {
                let result = Err(failure);
                self.record(&result);
                result
            }
        }
    }

    async fn publish_command(
        &self,
        operator: &Identity,
        device: &PublicKey,
        command: &Command,
    ) -> Result<Ack, SendFailure> {
        let plaintext = command.to_json()?;
        let key = derive_conversation_key(operator.secret_key(), device)?;
        let payload = conversation::encrypt(&key, plaintext.as_bytes())?;
        let envelope = UnsignedEnvelope::build(
            operator.public_key(),
            device,
            KIND_ENCRYPTED_DIRECT_MESSAGE,
            payload,
            self.clock.as_ref(),
        )
        .sign(operator.secret_key())?;

        debug!(command = command.name(), event_id = %envelope.id(), "publishing command");
        let ack = self
            .relays
            .publish_and_await_ack(&envelope, self.publish_timeout)
            .await?;
        info!(command = command.name(), relay = %ack.relay_url, "command sent");
        Ok(ack)
    }

    fn record(&self, result: &Result<Ack, SendFailure>) {
        let outcome = match result {
            Ok(ack) => SendOutcome::Acked(ack.clone()),
            Err(failure) => {
                warn!(kind = ?failure.kind(), cause = %failure, "command send failed");
                SendOutcome::Failed(failure.clone())
            }
        };
        *self.last_outcome.lock() = Some(outcome);
    }

    /// Listen for inventory pushes from `device` addressed to `operator`.
    ///
    /// Each accepted push is decrypted and parsed; a push that does not
    /// decrypt or parse is reported as the empty snapshot. Pushes whose
    /// signature does not verify are ignored.
    pub fn subscribe_to_device_updates<F>(
        &self,
        operator: &Identity,
        device: &PublicKey,
        on_snapshot: F,
    ) -> Unsubscribe
    where
        F: Fn(InventorySnapshot) + Send + Sync + 'static,
    {
        // limit 1 makes relays replay only the latest stored snapshot
        let filter = Filter::new()
            .author(device)
            .kind(KIND_ENCRYPTED_DIRECT_MESSAGE)
            .recipient(operator.public_key())
            .limit(1);

        let operator = operator.clone();
        let device = *device;
        let handle = Subscription::open(&self.relays, filter, move |event| {
            if let Some(snapshot) = decode_update(&operator, &device, &event) {
                on_snapshot(snapshot);
            }
        });
        info!(device = %device, subscription = handle.id(), "watching device updates");
        Unsubscribe { handle }
    }
}

/// Closes a device update subscription. Idempotent; dropping it also closes.
#[derive(Debug)]
pub struct Unsubscribe {
    handle: SubscriptionHandle,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        self.handle.close();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_closed()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn resolve_credentials(credentials: &Credentials) -> Result<(Identity, PublicKey), SendFailure> {
    let operator = Identity::from_text(&credentials.private_key).map_err(SendFailure::private_key)?;
    let device =
        normalize_public_key(&credentials.target_public_key).map_err(SendFailure::device_key)?;
    Ok((operator, device))
}

fn decode_update(operator: &Identity, device: &PublicKey, event: &Envelope) -> Option<InventorySnapshot> {
    if let Err(e) = event.verify() {
        warn!(event_id = %event.id(), error = %e, "ignoring update with bad signature");
        return None;
    }
    let plaintext = derive_conversation_key(operator.secret_key(), device)
        .and_then(|key| conversation::decrypt(&key, event.content()));
    let snapshot = match plaintext {
        Ok(bytes) => InventorySnapshot::parse_or_empty(&bytes),
        Err(e) => {
            debug!(event_id = %event.id(), error = %e, "undecryptable update, using empty inventory");
            InventorySnapshot::default()
        }
    };
    Some(snapshot)
}
