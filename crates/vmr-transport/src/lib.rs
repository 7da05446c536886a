//! Relay transport for the vending machine remote channel.
//!
//! Envelopes travel over Nostr relays speaking NIP-01 on WebSockets.
//! [`RelaySet`] publishes redundantly with first-success-wins semantics and
//! [`Subscription`] keeps a filtered push stream alive across relay drops.

#![forbid(unsafe_code)]

pub mod message;
pub mod reconnect;
pub mod relay_set;
pub mod subscription;
pub mod testing;
pub mod traits;
pub mod ws;

pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use relay_set::{Ack, FailureReason, PublishFailure, RelaySet};
pub use subscription::{EventHandler, Subscription, SubscriptionHandle};
pub use traits::{PublishOutcome, RelayConnection, RelayError};
pub use ws::WsRelay;
