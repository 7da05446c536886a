//! Conversation encryption (NIP-44 version 2).
//!
//! A conversation key is derived once per (my secret, their public) pair via
//! secp256k1 ECDH and HKDF-extract. Each message then gets its own ChaCha20
//! key, nonce and HMAC key from HKDF-expand over a fresh 32-byte nonce.
//!
//! Wire format: base64(version(1) || nonce(32) || ciphertext || mac(32))

#![forbid(unsafe_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::keys::{PublicKey, SecretKey};
use crate::utils::constant_time_compare;

const VERSION: u8 = 2;
const SALT: &[u8] = b"nip44-v2";

const MIN_PLAINTEXT_LEN: usize = 1;
const MAX_PLAINTEXT_LEN: usize = 65535;

const MIN_PAYLOAD_LEN: usize = 132;
const MAX_PAYLOAD_LEN: usize = 87472;
const MIN_DECODED_LEN: usize = 99;
const MAX_DECODED_LEN: usize = 65603;

/// Error type for conversation crypto operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    #[error("key agreement failed")]
    KeyAgreementFailed,
    #[error("encryption failed: {0}")]
    EncryptionFailed(&'static str),
    #[error("decryption failed: {0}")]
    DecryptionFailed(&'static str),
}

/// Symmetric key shared by two identities.
///
/// Symmetric by construction: (A secret, B public) and (B secret, A public)
/// derive the same key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey([u8; 32]);

impl ConversationKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(<redacted>)")
    }
}

/// Derive the conversation key for `my_secret` talking to `their_public`.
pub fn derive_conversation_key(
    my_secret: &SecretKey,
    their_public: &PublicKey,
) -> Result<ConversationKey, ConversationError> {
    let secret = k256::SecretKey::from_bytes(&(*my_secret.as_bytes()).into())
        .map_err(|_| ConversationError::KeyAgreementFailed)?;

    // x-only keys lift to the point with even y.
    let mut sec1 = [0u8; 33];
    sec1[0] = 0x02;
    sec1[1..].copy_from_slice(their_public.as_bytes());
    let public = k256::PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| ConversationError::KeyAgreementFailed)?;

    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let (prk, _) = Hkdf::<Sha256>::extract(Some(SALT), shared.raw_secret_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&prk);
    Ok(ConversationKey(key))
}

/// Per-message keys expanded from the conversation key and nonce.
struct MessageKeys {
    chacha_key: Zeroizing<[u8; 32]>,
    chacha_nonce: [u8; 12],
    hmac_key: Zeroizing<[u8; 32]>,
}

fn message_keys(
    key: &ConversationKey,
    nonce: &[u8; 32],
) -> Result<MessageKeys, ConversationError> {
    let hk = Hkdf::<Sha256>::from_prk(key.as_bytes())
        .map_err(|_| ConversationError::KeyAgreementFailed)?;

    let mut okm = Zeroizing::new([0u8; 76]);
    // 76 bytes is well under the 255 * 32 HKDF limit
    hk.expand(nonce, &mut okm[..])
        .map_err(|_| ConversationError::KeyAgreementFailed)?;

    let mut chacha_key = Zeroizing::new([0u8; 32]);
    let mut chacha_nonce = [0u8; 12];
    let mut hmac_key = Zeroizing::new([0u8; 32]);
    chacha_key.copy_from_slice(&okm[0..32]);
    chacha_nonce.copy_from_slice(&okm[32..44]);
    hmac_key.copy_from_slice(&okm[44..76]);

    Ok(MessageKeys {
        chacha_key,
        chacha_nonce,
        hmac_key,
    })
}

fn compute_mac(
    hmac_key: &[u8; 32],
    nonce: &[u8; 32],
    ciphertext: &[u8],
) -> Result<[u8; 32], ConversationError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|_| ConversationError::KeyAgreementFailed)?;
    mac.update(nonce);
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().into())
}

/// Padded length for a plaintext of `unpadded_len` bytes.
pub fn calc_padded_len(unpadded_len: usize) -> usize {
    if unpadded_len <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - (unpadded_len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((unpadded_len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>, ConversationError> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT_LEN..=MAX_PLAINTEXT_LEN).contains(&len) {
        return Err(ConversationError::EncryptionFailed("plaintext length out of range"));
    }
    let padded_len = calc_padded_len(len);
    let mut out = Vec::with_capacity(2 + padded_len);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(2 + padded_len, 0);
    Ok(out)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>, ConversationError> {
    if padded.len() < 2 {
        return Err(ConversationError::DecryptionFailed("invalid padding"));
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT_LEN || padded.len() != 2 + calc_padded_len(len) {
        return Err(ConversationError::DecryptionFailed("invalid padding"));
    }
    Ok(padded[2..2 + len].to_vec())
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &ConversationKey, plaintext: &[u8]) -> Result<String, ConversationError> {
    let mut nonce = [0u8; 32];
    getrandom::getrandom(&mut nonce)
        .map_err(|_| ConversationError::EncryptionFailed("RNG failed"))?;
    encrypt_with_nonce(key, plaintext, &nonce)
}

pub(crate) fn encrypt_with_nonce(
    key: &ConversationKey,
    plaintext: &[u8],
    nonce: &[u8; 32],
) -> Result<String, ConversationError> {
    let keys = message_keys(key, nonce)?;

    let mut buf = pad(plaintext)?;
    let mut cipher = ChaCha20::new((&*keys.chacha_key).into(), (&keys.chacha_nonce).into());
    cipher.apply_keystream(&mut buf);

    let mac = compute_mac(&keys.hmac_key, nonce, &buf)?;

    let mut out = Vec::with_capacity(1 + 32 + buf.len() + 32);
    out.push(VERSION);
    out.extend_from_slice(nonce);
    out.extend_from_slice(&buf);
    out.extend_from_slice(&mac);
    Ok(STANDARD.encode(out))
}

/// Decrypt a payload produced by [`encrypt`].
///
/// Authenticates before decrypting; never returns partial plaintext.
pub fn decrypt(key: &ConversationKey, payload: &str) -> Result<Vec<u8>, ConversationError> {
    if payload.starts_with('#') {
        return Err(ConversationError::DecryptionFailed("unsupported version"));
    }
    if !(MIN_PAYLOAD_LEN..=MAX_PAYLOAD_LEN).contains(&payload.len()) {
        return Err(ConversationError::DecryptionFailed("invalid payload size"));
    }
    let data = STANDARD
        .decode(payload)
        .map_err(|_| ConversationError::DecryptionFailed("invalid base64"))?;
    if !(MIN_DECODED_LEN..=MAX_DECODED_LEN).contains(&data.len()) {
        return Err(ConversationError::DecryptionFailed("invalid data size"));
    }
    if data[0] != VERSION {
        return Err(ConversationError::DecryptionFailed("unknown version"));
    }

    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&data[1..33]);
    let (ciphertext, mac) = data[33..].split_at(data.len() - 33 - 32);

    let keys = message_keys(key, &nonce)?;
    let expected = compute_mac(&keys.hmac_key, &nonce, ciphertext)?;
    if !constant_time_compare(&expected, mac) {
        return Err(ConversationError::DecryptionFailed("invalid MAC"));
    }

    let mut padded = Zeroizing::new(ciphertext.to_vec());
    let mut cipher = ChaCha20::new((&*keys.chacha_key).into(), (&keys.chacha_nonce).into());
    cipher.apply_keystream(padded.as_mut_slice());
    unpad(&padded)
}
