//! VMR Core - encrypted command channel for remote vending machine control.
//!
//! This crate implements:
//! - The command vocabulary and its JSON wire form
//! - Inventory snapshots and optimistic local updates
//! - The command channel (encrypt, sign, publish, subscribe)
//! - The operator session that drives notifications and displayed state

#![forbid(unsafe_code)]

pub mod channel;
pub mod session;

pub mod command;
pub mod inventory;

pub mod collaborators;
pub mod errors;
pub mod harness;

pub use channel::{ChannelState, CommandChannel, SendOutcome, Unsubscribe, DEFAULT_PUBLISH_TIMEOUT};
pub use collaborators::{
    CredentialStore, Credentials, InMemoryCredentialStore, Notification, NotificationSink,
    Severity, StateStore,
};
pub use command::Command;
pub use errors::{SendFailure, SendFailureKind, SessionError, StoreError};
pub use inventory::{InventoryItem, InventorySnapshot, MalformedSnapshot};
pub use session::OperatorSession;
