#![forbid(unsafe_code)]

pub mod hash;
pub mod keys;
pub mod clock;

pub mod conversation;
pub mod envelope;

pub mod utils;

pub use clock::{Clock, FixedClock, SystemClock};
pub use conversation::{ConversationError, ConversationKey};
pub use envelope::{Envelope, EnvelopeError, UnsignedEnvelope, KIND_ENCRYPTED_DIRECT_MESSAGE};
pub use keys::{Identity, KeyError, PublicKey, SecretKey};

#[cfg(test)]
mod proptests;
