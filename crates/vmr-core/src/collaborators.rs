//! Interfaces to the presentation layer around the channel.
//!
//! The channel itself never touches storage or UI. An [`OperatorSession`]
//! drives these traits; the controller binary supplies console and file
//! implementations.
//!
//! [`OperatorSession`]: crate::session::OperatorSession

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::inventory::InventorySnapshot;

/// Operator-supplied key strings, stored as entered.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Operator private key, hex or `nsec1...`.
    pub private_key: String,
    /// Device public key, hex or `npub1...`.
    pub target_public_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &"<redacted>")
            .field("target_public_key", &self.target_public_key)
            .finish()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credentials>, StoreError>;
    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory credential store.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(Some(credentials)),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credentials>, StoreError> {
        Ok(self.credentials.lock().clone())
    }

    async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.credentials.lock() = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.credentials.lock() = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One piece of user feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub auto_dismiss_after: Option<Duration>,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Receives reconciled state for display.
pub trait StateStore: Send + Sync {
    fn set_inventory(&self, snapshot: &InventorySnapshot);
    fn set_connected(&self, connected: bool);
}
