//! Redundant publishing across a set of relays.
//!
//! A [`RelaySet`] is built explicitly by its owner and torn down with
//! [`RelaySet::shutdown`]. Publishing is first-success-wins: the envelope
//! goes to every relay at once and the first acceptance settles the call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use vmr_crypto::Envelope;

use crate::traits::{PublishOutcome, RelayConnection, RelayError};
use crate::ws::WsRelay;

/// Proof that one relay accepted an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub relay_url: String,
    pub event_id: String,
}

/// Why a single relay did not accept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Rejected(String),
    Timeout,
    Connection(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected(reason) => write!(f, "rejected: {reason}"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Connection(reason) => write!(f, "connection error: {reason}"),
        }
    }
}

/// No relay accepted; one reason per relay, in configuration order.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("failed to publish to any relay{}", render_reasons(.reasons))]
pub struct PublishFailure {
    pub reasons: Vec<(String, FailureReason)>,
}

impl PublishFailure {
    /// True when any relay timed out or could not be reached.
    pub fn mentions_unavailability(&self) -> bool {
        self.reasons
            .iter()
            .any(|(_, r)| matches!(r, FailureReason::Timeout | FailureReason::Connection(_)))
    }
}

fn render_reasons(reasons: &[(String, FailureReason)]) -> String {
    if reasons.is_empty() {
        return " (no relays configured)".to_string();
    }
    let parts: Vec<String> = reasons
        .iter()
        .map(|(url, reason)| format!("{url}: {reason}"))
        .collect();
    format!(" ({})", parts.join("; "))
}

/// The relays a channel talks to.
pub struct RelaySet {
    relays: Vec<Arc<dyn RelayConnection>>,
}

impl RelaySet {
    /// Build WebSocket relays for each URL. Only `ws://` and `wss://` are accepted.
    pub fn from_urls<I, S>(urls: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut relays: Vec<Arc<dyn RelayConnection>> = Vec::new();
        for raw in urls {
            let raw = raw.as_ref();
            let parsed =
                url::Url::parse(raw).map_err(|e| RelayError::InvalidUrl(format!("{raw}: {e}")))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(RelayError::InvalidUrl(format!(
                    "{raw}: scheme must be ws or wss"
                )));
            }
            relays.push(Arc::new(WsRelay::new(raw)));
        }
        Ok(Self { relays })
    }

    pub fn from_connections(relays: Vec<Arc<dyn RelayConnection>>) -> Self {
        Self { relays }
    }

    pub fn relays(&self) -> &[Arc<dyn RelayConnection>] {
        &self.relays
    }

    pub fn urls(&self) -> Vec<String> {
        self.relays.iter().map(|r| r.url().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Publish to every relay concurrently and return on the first acceptance.
    ///
    /// Each relay is given `per_relay_timeout` on its own. Submissions still in
    /// flight when a winner is found are aborted.
    pub async fn publish_and_await_ack(
        &self,
        envelope: &Envelope,
        per_relay_timeout: Duration,
    ) -> Result<Ack, PublishFailure> {
        let mut attempts = JoinSet::new();
        for (index, relay) in self.relays.iter().enumerate() {
            let relay = Arc::clone(relay);
            let envelope = envelope.clone();
            attempts.spawn(async move {
                let outcome =
                    match tokio::time::timeout(per_relay_timeout, relay.publish(&envelope)).await {
                        Ok(Ok(PublishOutcome::Accepted)) => Ok(()),
                        Ok(Ok(PublishOutcome::Rejected(reason))) => {
                            Err(FailureReason::Rejected(reason))
                        }
                        Ok(Err(e)) => Err(FailureReason::Connection(e.to_string())),
                        Err(_) => Err(FailureReason::Timeout),
                    };
                (index, relay.url().to_string(), outcome)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok((_, url, Ok(()))) => {
                    info!(relay = %url, event_id = %envelope.id(), "relay accepted envelope");
                    attempts.abort_all();
                    return Ok(Ack {
                        relay_url: url,
                        event_id: envelope.id().to_string(),
                    });
                }
                Ok((index, url, Err(reason))) => {
                    debug!(relay = %url, %reason, "relay did not accept envelope");
                    failures.push((index, url, reason));
                }
                Err(e) => warn!(error = %e, "publish task failed"),
            }
        }

        failures.sort_by_key(|(index, _, _)| *index);
        let failure = PublishFailure {
            reasons: failures
                .into_iter()
                .map(|(_, url, reason)| (url, reason))
                .collect(),
        };
        warn!(error = %failure, "publish failed on every relay");
        Err(failure)
    }

    /// Close every relay connection.
    pub async fn shutdown(&self) {
        for relay in &self.relays {
            relay.shutdown().await;
        }
    }
}

impl fmt::Debug for RelaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySet").field("urls", &self.urls()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBehavior, MockRelay};
    use vmr_crypto::{FixedClock, Identity, UnsignedEnvelope, KIND_ENCRYPTED_DIRECT_MESSAGE};

    fn envelope() -> Envelope {
        let id = Identity::generate().unwrap();
        UnsignedEnvelope::build(
            id.public_key(),
            id.public_key(),
            KIND_ENCRYPTED_DIRECT_MESSAGE,
            "payload".to_string(),
            &FixedClock::new(1),
        )
        .sign(id.secret_key())
        .unwrap()
    }

    fn set(relays: &[Arc<MockRelay>]) -> RelaySet {
        RelaySet::from_connections(
            relays
                .iter()
                .map(|r| Arc::clone(r) as Arc<dyn RelayConnection>)
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_acceptance_wins() {
        let slow = Arc::new(
            MockRelay::new("ws://slow")
                .with_delay(Duration::from_millis(900)),
        );
        let fast = Arc::new(
            MockRelay::new("ws://fast")
                .with_delay(Duration::from_millis(100)),
        );
        let silent = Arc::new(MockRelay::new("ws://silent").with_behavior(MockBehavior::Hang));
        let relays = set(&[slow.clone(), fast.clone(), silent]);

        let env = envelope();
        let started = tokio::time::Instant::now();
        let ack = relays
            .publish_and_await_ack(&env, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(ack.relay_url, "ws://fast");
        assert_eq!(ack.event_id, env.id());
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(fast.published().len(), 1);
        // the slower submission was aborted before it completed
        assert!(slow.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_does_not_end_the_wait() {
        let rejecting = Arc::new(
            MockRelay::new("ws://a").with_behavior(MockBehavior::Reject("blocked".to_string())),
        );
        let accepting = Arc::new(MockRelay::new("ws://b").with_delay(Duration::from_secs(2)));
        let relays = set(&[rejecting, accepting]);

        let ack = relays
            .publish_and_await_ack(&envelope(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ack.relay_url, "ws://b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failures_are_aggregated_in_relay_order() {
        let relays = set(&[
            Arc::new(MockRelay::new("ws://hang").with_behavior(MockBehavior::Hang)),
            Arc::new(
                MockRelay::new("ws://reject")
                    .with_behavior(MockBehavior::Reject("invalid: bad sig".to_string())),
            ),
            Arc::new(
                MockRelay::new("ws://down")
                    .with_behavior(MockBehavior::Fail("refused".to_string())),
            ),
        ]);

        let started = tokio::time::Instant::now();
        let failure = relays
            .publish_and_await_ack(&envelope(), Duration::from_secs(5))
            .await
            .unwrap_err();

        // bounded by the per-relay timeout, not a sum of them
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(failure.reasons.len(), 3);
        assert_eq!(failure.reasons[0], ("ws://hang".to_string(), FailureReason::Timeout));
        assert_eq!(
            failure.reasons[1],
            (
                "ws://reject".to_string(),
                FailureReason::Rejected("invalid: bad sig".to_string())
            )
        );
        assert!(matches!(failure.reasons[2].1, FailureReason::Connection(_)));
        assert!(failure.mentions_unavailability());
        assert!(failure.to_string().starts_with("failed to publish to any relay"));
    }

    #[tokio::test]
    async fn test_rejections_only_do_not_mention_unavailability() {
        let relays = set(&[Arc::new(
            MockRelay::new("ws://reject").with_behavior(MockBehavior::Reject("no".to_string())),
        )]);
        let failure = relays
            .publish_and_await_ack(&envelope(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!failure.mentions_unavailability());
    }

    #[tokio::test]
    async fn test_empty_set_fails_immediately() {
        let relays = RelaySet::from_connections(Vec::new());
        let failure = relays
            .publish_and_await_ack(&envelope(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(failure.reasons.is_empty());
        assert!(failure.to_string().contains("no relays configured"));
    }

    #[test]
    fn test_from_urls_validates_scheme() {
        assert!(RelaySet::from_urls(["ws://localhost:7777", "wss://relay.example.com"]).is_ok());
        assert!(matches!(
            RelaySet::from_urls(["https://relay.example.com"]),
            Err(RelayError::InvalidUrl(_))
        ));
        assert!(matches!(
            RelaySet::from_urls(["not a url"]),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_reaches_every_relay() {
        let a = Arc::new(MockRelay::new("ws://a"));
        let b = Arc::new(MockRelay::new("ws://b"));
        let relays = set(&[a.clone(), b.clone()]);
        relays.shutdown().await;
        assert!(a.is_shut_down());
        assert!(b.is_shut_down());
    }
}
