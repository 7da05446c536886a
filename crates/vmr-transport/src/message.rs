//! Relay wire messages (NIP-01).
//!
//! Every frame is a JSON array whose first element names the message:
//!
//! - client to relay: `EVENT`, `REQ`, `CLOSE`
//! - relay to client: `EVENT`, `OK`, `EOSE`, `CLOSED`, `NOTICE`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vmr_crypto::{Envelope, PublicKey};

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("unknown message type: {0}")]
    Unknown(String),
}

/// Subscription filter.
///
/// Empty lists and unset bounds are left out of the wire form and match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: &PublicKey) -> Self {
        self.authors.push(author.to_hex());
        self
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn recipient(mut self, recipient: &PublicKey) -> Self {
        self.recipients.push(recipient.to_hex());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Local check of the same criteria a relay applies.
    ///
    /// `limit` only bounds the relay's stored-event replay and is ignored here.
    pub fn matches(&self, event: &Envelope) -> bool {
        if !self.authors.is_empty()
            && !self
                .authors
                .iter()
                .any(|a| a.eq_ignore_ascii_case(event.author_hex()))
        {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }
        if !self.recipients.is_empty()
            && !event
                .recipient_tags()
                .any(|p| self.recipients.iter().any(|r| r.eq_ignore_ascii_case(p)))
        {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at() < since {
                return false;
            }
        }
        true
    }
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Event(Envelope),
    Req {
        subscription_id: String,
        filter: Filter,
    },
    Close(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, MessageError> {
        let text = match self {
            ClientMessage::Event(event) => serde_json::to_string(&("EVENT", event))?,
            ClientMessage::Req {
                subscription_id,
                filter,
            } => serde_json::to_string(&("REQ", subscription_id, filter))?,
            ClientMessage::Close(id) => serde_json::to_string(&("CLOSE", id))?,
        };
        Ok(text)
    }

    /// Parse a client frame. Only the first filter of a `REQ` is kept.
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let frame: Vec<Value> = serde_json::from_str(text)?;
        let (tag, rest) = frame
            .split_first()
            .ok_or(MessageError::Malformed("empty frame"))?;
        match tag.as_str() {
            Some("EVENT") => Ok(ClientMessage::Event(field(rest, 0)?)),
            Some("REQ") => Ok(ClientMessage::Req {
                subscription_id: string_at(rest, 0)?,
                filter: field(rest, 1)?,
            }),
            Some("CLOSE") => Ok(ClientMessage::Close(string_at(rest, 0)?)),
            Some(other) => Err(MessageError::Unknown(other.to_string())),
            None => Err(MessageError::Malformed("message type is not a string")),
        }
    }
}

/// Frames sent by a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Envelope,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Eose(String),
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice(String),
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let frame: Vec<Value> = serde_json::from_str(text)?;
        let (tag, rest) = frame
            .split_first()
            .ok_or(MessageError::Malformed("empty frame"))?;
        match tag.as_str() {
            Some("EVENT") => Ok(RelayMessage::Event {
                subscription_id: string_at(rest, 0)?,
                event: field(rest, 1)?,
            }),
            Some("OK") => Ok(RelayMessage::Ok {
                event_id: string_at(rest, 0)?,
                accepted: rest
                    .get(1)
                    .and_then(Value::as_bool)
                    .ok_or(MessageError::Malformed("OK without status"))?,
                // Some relays omit the message on success.
                message: string_at(rest, 2).unwrap_or_default(),
            }),
            Some("EOSE") => Ok(RelayMessage::Eose(string_at(rest, 0)?)),
            Some("CLOSED") => Ok(RelayMessage::Closed {
                subscription_id: string_at(rest, 0)?,
                message: string_at(rest, 1).unwrap_or_default(),
            }),
            Some("NOTICE") => Ok(RelayMessage::Notice(string_at(rest, 0)?)),
            Some(other) => Err(MessageError::Unknown(other.to_string())),
            None => Err(MessageError::Malformed("message type is not a string")),
        }
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        let text = match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => serde_json::to_string(&("EVENT", subscription_id, event))?,
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => serde_json::to_string(&("OK", event_id, accepted, message))?,
            RelayMessage::Eose(id) => serde_json::to_string(&("EOSE", id))?,
            RelayMessage::Closed {
                subscription_id,
                message,
            } => serde_json::to_string(&("CLOSED", subscription_id, message))?,
            RelayMessage::Notice(message) => serde_json::to_string(&("NOTICE", message))?,
        };
        Ok(text)
    }
}

fn string_at(rest: &[Value], index: usize) -> Result<String, MessageError> {
    rest.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(MessageError::Malformed("expected string"))
}

fn field<T: serde::de::DeserializeOwned>(rest: &[Value], index: usize) -> Result<T, MessageError> {
    let value = rest
        .get(index)
        .cloned()
        .ok_or(MessageError::Malformed("missing element"))?;
    Ok(serde_json::from_value(value)?)
}
