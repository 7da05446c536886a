//! Signed, addressed envelopes (Nostr events).
//!
//! An envelope is built as an [`UnsignedEnvelope`] draft and turned into an
//! immutable [`Envelope`] by [`UnsignedEnvelope::sign`]. The event id is the
//! SHA-256 of the canonical array `[0, pubkey, created_at, kind, tags, content]`
//! and the signature is BIP-340 Schnorr over that id, so any change to the
//! sender, timestamp, recipient tag or payload breaks [`Envelope::verify`].

use k256::schnorr::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::hash::sha256;
use crate::keys::{self, PublicKey, SecretKey};

/// Event kind for encrypted direct messages; used for commands and device pushes.
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u16 = 4;

const RECIPIENT_TAG: &str = "p";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("malformed field: {0}")]
    Malformed(&'static str),
    #[error("event id does not match contents")]
    IdMismatch,
    #[error("signature verification failed")]
    BadSignature,
}

/// An envelope draft awaiting a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEnvelope {
    pubkey: PublicKey,
    created_at: u64,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: String,
}

impl UnsignedEnvelope {
    /// Address `content` from `sender` to `recipient`, stamped with `clock`.
    pub fn build(
        sender: &PublicKey,
        recipient: &PublicKey,
        kind: u16,
        content: String,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            pubkey: *sender,
            created_at: clock.now_unix(),
            kind,
            tags: vec![vec![RECIPIENT_TAG.to_string(), recipient.to_hex()]],
            content,
        }
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Sign the draft.
    ///
    /// Fails if `secret` is not a valid scalar or does not belong to the
    /// draft's sender key.
    pub fn sign(self, secret: &SecretKey) -> Result<Envelope, EnvelopeError> {
        let signing =
            keys::signing_key(secret).map_err(|e| EnvelopeError::SigningFailed(e.to_string()))?;
        let derived: [u8; 32] = signing.verifying_key().to_bytes().into();
        if derived != *self.pubkey.as_bytes() {
            return Err(EnvelopeError::SigningFailed(
                "private key does not belong to the sender".to_string(),
            ));
        }

        let pubkey = self.pubkey.to_hex();
        let id = compute_id(&pubkey, self.created_at, self.kind, &self.tags, &self.content);

        let mut aux_rand = [0u8; 32];
        getrandom::getrandom(&mut aux_rand)
            .map_err(|_| EnvelopeError::SigningFailed("RNG failed".to_string()))?;
        let sig = signing
            .sign_raw(&id, &aux_rand)
            .map_err(|e| EnvelopeError::SigningFailed(e.to_string()))?;

        Ok(Envelope {
            id: hex::encode(id),
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig.to_bytes()),
        })
    }
}

/// A signed envelope as it travels over the relay wire.
///
/// Fields are private; an envelope is never modified after signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    id: String,
    pubkey: String,
    created_at: u64,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: String,
    sig: String,
}

impl Envelope {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn kind(&self) -> u16 {
        self.kind
    }

    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    /// The encrypted payload.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Author key as carried on the wire (hex).
    pub fn author_hex(&self) -> &str {
        &self.pubkey
    }

    pub fn author(&self) -> Result<PublicKey, EnvelopeError> {
        PublicKey::from_hex(&self.pubkey).map_err(|_| EnvelopeError::Malformed("pubkey"))
    }

    /// Values of all `p` tags, in order.
    pub fn recipient_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|tag| tag.first().map(String::as_str) == Some(RECIPIENT_TAG))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// The first addressed recipient, if it parses as a key.
    pub fn recipient(&self) -> Option<PublicKey> {
        self.recipient_tags()
            .next()
            .and_then(|hex| PublicKey::from_hex(hex).ok())
    }

    /// Recompute the id and check the signature against the author key.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        let expected = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        let mut id = [0u8; 32];
        hex::decode_to_slice(&self.id, &mut id).map_err(|_| EnvelopeError::Malformed("id"))?;
        if id != expected {
            return Err(EnvelopeError::IdMismatch);
        }

        let author = self.author()?;
        let key = VerifyingKey::from_bytes(author.as_bytes())
            .map_err(|_| EnvelopeError::Malformed("pubkey"))?;
        let sig_bytes = hex::decode(&self.sig).map_err(|_| EnvelopeError::Malformed("sig"))?;
        let sig = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| EnvelopeError::Malformed("sig"))?;
        key.verify_raw(&id, &sig)
            .map_err(|_| EnvelopeError::BadSignature)
    }
}

fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> [u8; 32] {
    let canonical = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    sha256(canonical.to_string().as_bytes())
}
