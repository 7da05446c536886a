//! Error types surfaced by the command channel.
//!
//! Every failed send collapses into one [`SendFailure`]: a kind for callers
//! that branch, a human-readable cause for display, and the per-relay reasons
//! when publishing was the step that failed.

use thiserror::Error;

use vmr_crypto::{ConversationError, EnvelopeError, KeyError};
use vmr_transport::PublishFailure;

// ============================================================================
// Send Failures
// ============================================================================

/// Which step of a send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailureKind {
    InvalidKeyEncoding,
    InvalidKeyMaterial,
    KeyAgreementFailed,
    EncryptionFailed,
    DecryptionFailed,
    SigningFailed,
    Encoding,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{cause}")]
pub struct SendFailure {
    kind: SendFailureKind,
    cause: String,
    publish: Option<PublishFailure>,
}

impl SendFailure {
    pub fn new(kind: SendFailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
            publish: None,
        }
    }

    pub fn kind(&self) -> SendFailureKind {
        self.kind
    }

    pub fn cause(&self) -> &str {
        &self.cause
    }

    /// Per-relay reasons, when the failure happened while publishing.
    pub fn publish_failure(&self) -> Option<&PublishFailure> {
        self.publish.as_ref()
    }

    /// True when relays timed out or could not be reached.
    pub fn relay_unavailable(&self) -> bool {
        self.publish
            .as_ref()
            .is_some_and(PublishFailure::mentions_unavailability)
    }

    /// Key failure for the operator's private key.
    pub(crate) fn private_key(e: KeyError) -> Self {
        Self::from_key_error("private key", e)
    }

    /// Key failure for the device's public key.
    pub(crate) fn device_key(e: KeyError) -> Self {
        Self::from_key_error("device public key", e)
    }

    fn from_key_error(role: &str, e: KeyError) -> Self {
        match e {
            KeyError::InvalidKeyEncoding(detail) => Self::new(
                SendFailureKind::InvalidKeyEncoding,
                format!("Invalid {role} format: {detail}"),
            ),
            KeyError::InvalidKeyMaterial => Self::new(
                SendFailureKind::InvalidKeyMaterial,
                format!("Invalid {role}: not a valid secp256k1 key"),
            ),
            KeyError::RngError => Self::new(
                SendFailureKind::InvalidKeyMaterial,
                "Random number generator failed",
            ),
        }
    }
}

impl From<ConversationError> for SendFailure {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::KeyAgreementFailed => Self::new(
                SendFailureKind::KeyAgreementFailed,
                "Key agreement with the device key failed",
            ),
            ConversationError::EncryptionFailed(detail) => Self::new(
                SendFailureKind::EncryptionFailed,
                format!("NIP-44 encryption failed: {detail}"),
            ),
            ConversationError::DecryptionFailed(detail) => Self::new(
                SendFailureKind::DecryptionFailed,
                format!("NIP-44 decryption failed: {detail}"),
            ),
        }
    }
}

impl From<EnvelopeError> for SendFailure {
    fn from(e: EnvelopeError) -> Self {
        Self::new(SendFailureKind::SigningFailed, format!("Signing failed: {e}"))
    }
}

impl From<serde_json::Error> for SendFailure {
    fn from(e: serde_json::Error) -> Self {
        Self::new(
            SendFailureKind::Encoding,
            format!("Command encoding failed: {e}"),
        )
    }
}

impl From<PublishFailure> for SendFailure {
    fn from(e: PublishFailure) -> Self {
        let mut cause = String::from("Failed to publish to any relay");
        if e.reasons.is_empty() {
            cause.push_str(": no relays configured");
        } else if e.mentions_unavailability() {
            cause.push_str(": relay timeout or connection error");
        }
        Self {
            kind: SendFailureKind::Publish,
            cause,
            publish: Some(e),
        }
    }
}

// ============================================================================
// Store Errors
// ============================================================================

/// Errors from credential storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("stored credentials are corrupt: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Session Errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("{0}")]
    InvalidCredentials(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Send(#[from] SendFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmr_transport::FailureReason;

    #[test]
    fn test_key_errors_name_the_key() {
        let failure = SendFailure::device_key(KeyError::InvalidKeyEncoding("bad checksum".into()));
        assert_eq!(failure.kind(), SendFailureKind::InvalidKeyEncoding);
        assert_eq!(
            failure.to_string(),
            "Invalid device public key format: bad checksum"
        );
        assert!(!failure.relay_unavailable());
    }

    #[test]
    fn test_publish_failure_keeps_reasons() {
        let failure = SendFailure::from(PublishFailure {
            reasons: vec![("ws://a".to_string(), FailureReason::Timeout)],
        });
        assert_eq!(failure.kind(), SendFailureKind::Publish);
        assert!(failure.relay_unavailable());
        assert!(failure.cause().contains("relay"));
        assert_eq!(failure.publish_failure().unwrap().reasons.len(), 1);
    }

    #[test]
    fn test_conversation_errors_keep_direction() {
        let encrypt = SendFailure::from(ConversationError::EncryptionFailed("RNG failed"));
        assert_eq!(encrypt.kind(), SendFailureKind::EncryptionFailed);
        assert_eq!(encrypt.cause(), "NIP-44 encryption failed: RNG failed");

        let decrypt = SendFailure::from(ConversationError::DecryptionFailed("invalid MAC"));
        assert_eq!(decrypt.kind(), SendFailureKind::DecryptionFailed);
        assert_eq!(decrypt.cause(), "NIP-44 decryption failed: invalid MAC");
        assert!(!decrypt.relay_unavailable());
    }

    #[test]
    fn test_rejections_are_not_unavailability() {
        let failure = SendFailure::from(PublishFailure {
            reasons: vec![(
                "ws://a".to_string(),
                FailureReason::Rejected("blocked".to_string()),
            )],
        });
        assert!(!failure.relay_unavailable());
        assert_eq!(failure.cause(), "Failed to publish to any relay");
    }
}
