//! Relay connection trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use vmr_crypto::Envelope;

use crate::message::Filter;

/// A relay's answer to a published envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    Rejected(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("relay connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One relay endpoint.
///
/// Implementations own their live connection; callers only ever see
/// envelopes and outcomes.
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// Relay address.
    fn url(&self) -> &str;

    /// Submit an envelope and wait for the relay's verdict.
    ///
    /// Not bounded in time; callers apply their own timeout.
    async fn publish(&self, envelope: &Envelope) -> Result<PublishOutcome, RelayError>;

    /// Open a subscription. The receiver ends when the relay closes the
    /// subscription or the connection drops.
    async fn subscribe(
        &self,
        subscription_id: &str,
        filter: &Filter,
    ) -> Result<mpsc::Receiver<Envelope>, RelayError>;

    /// Best-effort close of a subscription. Never blocks.
    fn unsubscribe(&self, subscription_id: &str);

    /// Tear down the connection.
    async fn shutdown(&self);
}
