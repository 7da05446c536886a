//! Test harness for the command channel.
//!
//! A [`SimulatedDevice`] plays the vending machine side of the conversation,
//! and the recording collaborators capture what an [`OperatorSession`] shows
//! to the user.
//!
//! [`OperatorSession`]: crate::session::OperatorSession

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::sleep;

use vmr_crypto::conversation::{self, derive_conversation_key};
use vmr_crypto::{
    ConversationError, Envelope, EnvelopeError, FixedClock, Identity, PublicKey,
    UnsignedEnvelope, KIND_ENCRYPTED_DIRECT_MESSAGE,
};

use crate::collaborators::{Notification, NotificationSink, StateStore};
use crate::command::Command;
use crate::inventory::InventorySnapshot;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("envelope rejected: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("conversation failed: {0}")]
    Conversation(#[from] ConversationError),
    #[error("command payload: {0}")]
    Command(#[from] serde_json::Error),
    #[error("envelope is not addressed to this device")]
    WrongRecipient,
}

/// The machine end of the channel.
///
/// Applies received commands to its own inventory and can push that
/// inventory back as a signed, encrypted snapshot.
pub struct SimulatedDevice {
    identity: Identity,
    inventory: Mutex<InventorySnapshot>,
    received: Mutex<Vec<Command>>,
    clock: FixedClock,
}

impl SimulatedDevice {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            inventory: Mutex::new(InventorySnapshot::empty()),
            received: Mutex::new(Vec::new()),
            clock: FixedClock::new(1_700_000_000),
        }
    }

    /// Device with a fresh random key.
    pub fn generate() -> Self {
        Self::new(Identity::generate().expect("rng"))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn public_key(&self) -> &PublicKey {
        self.identity.public_key()
    }

    pub fn inventory(&self) -> InventorySnapshot {
        self.inventory.lock().clone()
    }

    pub fn set_inventory(&self, snapshot: InventorySnapshot) {
        *self.inventory.lock() = snapshot;
    }

    /// Commands accepted so far, in arrival order.
    pub fn received(&self) -> Vec<Command> {
        self.received.lock().clone()
    }

    /// Verify, decrypt and apply one command envelope.
    pub fn receive(&self, envelope: &Envelope) -> Result<Command, DeviceError> {
        envelope.verify()?;
        if envelope.recipient() != Some(*self.public_key()) {
            return Err(DeviceError::WrongRecipient);
        }
        let operator = envelope.author()?;
        let key = derive_conversation_key(self.identity.secret_key(), &operator)?;
        let plaintext = conversation::decrypt(&key, envelope.content())?;
        let command = Command::from_json(&plaintext)?;

        self.inventory.lock().apply_optimistic(&command);
        self.received.lock().push(command.clone());
        Ok(command)
    }

    /// Current inventory, encrypted to `operator`.
    pub fn snapshot_envelope(&self, operator: &PublicKey) -> Result<Envelope, DeviceError> {
        let payload = self.inventory.lock().to_json()?;
        self.raw_envelope(operator, payload.as_bytes())
    }

    /// Arbitrary payload, encrypted to `operator`.
    pub fn raw_envelope(&self, operator: &PublicKey, payload: &[u8]) -> Result<Envelope, DeviceError> {
        let key = derive_conversation_key(self.identity.secret_key(), operator)?;
        let content = conversation::encrypt(&key, payload)?;
        self.clock.advance(1);
        let envelope = UnsignedEnvelope::build(
            self.public_key(),
            operator,
            KIND_ENCRYPTED_DIRECT_MESSAGE,
            content,
            &self.clock,
        )
        .sign(self.identity.secret_key())?;
        Ok(envelope)
    }
}

/// Notification sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .map(|n| n.message.clone())
            .collect()
    }

    pub fn last(&self) -> Option<Notification> {
        self.notifications.lock().last().cloned()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

/// State store that records every update.
#[derive(Default)]
pub struct RecordingStateStore {
    inventories: Mutex<Vec<InventorySnapshot>>,
    connected: Mutex<Vec<bool>>,
}

impl RecordingStateStore {
    pub fn inventories(&self) -> Vec<InventorySnapshot> {
        self.inventories.lock().clone()
    }

    pub fn connected(&self) -> Vec<bool> {
        self.connected.lock().clone()
    }

    /// Wait until at least `count` inventory updates have arrived.
    pub async fn wait_for_inventories(&self, count: usize) {
        while self.inventories.lock().len() < count {
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl StateStore for RecordingStateStore {
    fn set_inventory(&self, snapshot: &InventorySnapshot) {
        self.inventories.lock().push(snapshot.clone());
    }

    fn set_connected(&self, connected: bool) {
        self.connected.lock().push(connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_rejects_commands_for_someone_else() {
        let device = SimulatedDevice::generate();
        let other = SimulatedDevice::generate();
        let envelope = other.raw_envelope(other.public_key(), b"{}").unwrap();
        assert!(matches!(
            device.receive(&envelope),
            Err(DeviceError::WrongRecipient)
        ));
    }

    #[test]
    fn test_snapshot_envelopes_get_fresh_timestamps() {
        let device = SimulatedDevice::generate();
        let operator = Identity::generate().unwrap();
        let first = device.snapshot_envelope(operator.public_key()).unwrap();
        let second = device.snapshot_envelope(operator.public_key()).unwrap();
        assert!(second.created_at() > first.created_at());
        assert_eq!(first.recipient(), Some(*operator.public_key()));
    }
}
