//! Key module for operator and device keypair handling.
//!
//! Keys travel as text in two shapes: 64 hex characters, or the NIP-19
//! bech32 form (`nsec1...` for private keys, `npub1...` for public keys).
//! Both normalize to the same raw 32-byte values. Public keys are BIP-340
//! x-only keys on secp256k1.

use std::fmt;

use bech32::{Bech32, Hrp};
use k256::schnorr::SigningKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NSEC_HRP: Hrp = Hrp::parse_unchecked("nsec");
const NPUB_HRP: Hrp = Hrp::parse_unchecked("npub");

/// Error type for key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),
    #[error("invalid key material")]
    InvalidKeyMaterial,
    #[error("RNG failed")]
    RngError,
}

/// A raw 32-byte secp256k1 private scalar.
///
/// Validity as a scalar is only checked when the key is used
/// (see [`derive_public_key`]). Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as `nsec1...`.
    pub fn to_bech32(&self) -> Result<String, KeyError> {
        bech32::encode::<Bech32>(NSEC_HRP, &self.0)
            .map_err(|e| KeyError::InvalidKeyEncoding(e.to_string()))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A 32-byte x-only public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Encode as `npub1...`.
    pub fn to_bech32(&self) -> Result<String, KeyError> {
        bech32::encode::<Bech32>(NPUB_HRP, &self.0)
            .map_err(|e| KeyError::InvalidKeyEncoding(e.to_string()))
    }

    /// Parse the strict 64-hex form only (used for wire fields).
    pub fn from_hex(input: &str) -> Result<Self, KeyError> {
        decode_hex32(input).map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Normalize a private key given as hex or `nsec1...`.
pub fn normalize_private_key(input: &str) -> Result<SecretKey, KeyError> {
    let input = input.trim();
    if input.starts_with("nsec") {
        decode_bech32(input, NSEC_HRP).map(SecretKey)
    } else {
        decode_hex32(input).map(SecretKey)
    }
}

/// Normalize a public key given as hex or `npub1...`.
pub fn normalize_public_key(input: &str) -> Result<PublicKey, KeyError> {
    let input = input.trim();
    if input.starts_with("npub") {
        decode_bech32(input, NPUB_HRP).map(PublicKey)
    } else {
        decode_hex32(input).map(PublicKey)
    }
}

/// Derive the x-only public key for a private scalar.
///
/// Fails with [`KeyError::InvalidKeyMaterial`] for zero or out-of-range scalars.
pub fn derive_public_key(secret: &SecretKey) -> Result<PublicKey, KeyError> {
    let signing = signing_key(secret)?;
    let bytes: [u8; 32] = signing.verifying_key().to_bytes().into();
    Ok(PublicKey(bytes))
}

pub(crate) fn signing_key(secret: &SecretKey) -> Result<SigningKey, KeyError> {
    SigningKey::from_bytes(secret.as_bytes()).map_err(|_| KeyError::InvalidKeyMaterial)
}

fn decode_bech32(input: &str, expected: Hrp) -> Result<[u8; 32], KeyError> {
    let (hrp, data) =
        bech32::decode(input).map_err(|e| KeyError::InvalidKeyEncoding(e.to_string()))?;
    if hrp != expected {
        return Err(KeyError::InvalidKeyEncoding(format!(
            "expected {expected} prefix, got {hrp}"
        )));
    }
    data.try_into().map_err(|data: Vec<u8>| {
        KeyError::InvalidKeyEncoding(format!("expected 32 bytes, got {}", data.len()))
    })
}

fn decode_hex32(input: &str) -> Result<[u8; 32], KeyError> {
    if input.len() != 64 {
        return Err(KeyError::InvalidKeyEncoding(format!(
            "expected 64 hex characters, got {}",
            input.len()
        )));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(input, &mut out)
        .map_err(|e| KeyError::InvalidKeyEncoding(e.to_string()))?;
    Ok(out)
}

/// A private/public keypair loaded for the duration of a session.
///
/// The public half is always derived from the private half, so two
/// identities built from the same private key compare equal.
#[derive(Clone)]
pub struct Identity {
    secret: SecretKey,
    public: PublicKey,
}

impl Identity {
    pub fn from_secret(secret: SecretKey) -> Result<Self, KeyError> {
        let public = derive_public_key(&secret)?;
        Ok(Self { secret, public })
    }

    /// Parse an identity from operator-supplied text (hex or `nsec1...`).
    pub fn from_text(input: &str) -> Result<Self, KeyError> {
        Self::from_secret(normalize_private_key(input)?)
    }

    /// Generate a new random identity from the OS RNG.
    pub fn generate() -> Result<Self, KeyError> {
        loop {
            let mut bytes = [0u8; 32];
            getrandom::getrandom(&mut bytes).map_err(|_| KeyError::RngError)?;
            // Rejection sampling; out-of-range scalars are astronomically rare.
            match Self::from_secret(SecretKey(bytes)) {
                Ok(identity) => return Ok(identity),
                Err(KeyError::InvalidKeyMaterial) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        crate::utils::constant_time_compare_array(self.secret.as_bytes(), other.secret.as_bytes())
            && self.public == other.public
    }
}

impl Eq for Identity {}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP-340 test vector 0: secret key 3, public key F9308A01...
    const SK3: &str = "0000000000000000000000000000000000000000000000000000000000000003";
    const PK3: &str = "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

    #[test]
    fn test_derive_public_key_matches_bip340_vector() {
        let secret = normalize_private_key(SK3).unwrap();
        let public = derive_public_key(&secret).unwrap();
        assert_eq!(public.to_hex(), PK3);
    }

    #[test]
    fn test_bech32_round_trip_private() {
        let secret = normalize_private_key(SK3).unwrap();
        let nsec = secret.to_bech32().unwrap();
        assert!(nsec.starts_with("nsec1"));
        let back = normalize_private_key(&nsec).unwrap();
        assert_eq!(back.as_bytes(), secret.as_bytes());
    }

    #[test]
    fn test_bech32_round_trip_public() {
        let public = normalize_public_key(PK3).unwrap();
        let npub = public.to_bech32().unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(normalize_public_key(&npub).unwrap(), public);
    }

    #[test]
    fn test_hex_and_bech32_normalize_to_same_key() {
        let identity = Identity::generate().unwrap();
        let npub = identity.public_key().to_bech32().unwrap();
        let hex = identity.public_key().to_hex();
        assert_eq!(
            normalize_public_key(&npub).unwrap(),
            normalize_public_key(&hex).unwrap()
        );
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let padded = format!("  {PK3}\n");
        assert_eq!(normalize_public_key(&padded).unwrap().to_hex(), PK3);
    }

    #[test]
    fn test_corrupt_nsec_is_invalid_encoding() {
        let nsec = normalize_private_key(SK3).unwrap().to_bech32().unwrap();
        let mut corrupted = nsec.clone();
        corrupted.pop();
        corrupted.push(if nsec.ends_with('q') { 'p' } else { 'q' });
        assert!(matches!(
            normalize_private_key(&corrupted),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_npub_given_as_private_key_is_rejected() {
        // Starts with "n" but not "nsec"; falls through to the hex path.
        let npub = normalize_public_key(PK3).unwrap().to_bech32().unwrap();
        assert!(matches!(
            normalize_private_key(&npub),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_wrong_length_hex_is_invalid_encoding() {
        assert!(matches!(
            normalize_public_key("abcd"),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
        assert!(matches!(
            normalize_public_key(&"zz".repeat(32)),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_zero_scalar_is_invalid_material() {
        let zero = SecretKey::from_bytes([0u8; 32]);
        assert_eq!(derive_public_key(&zero), Err(KeyError::InvalidKeyMaterial));
    }

    #[test]
    fn test_scalar_above_curve_order_is_invalid_material() {
        let too_big = SecretKey::from_bytes([0xff; 32]);
        assert_eq!(derive_public_key(&too_big), Err(KeyError::InvalidKeyMaterial));
    }

    #[test]
    fn test_identity_determinism() {
        let a = Identity::from_text(SK3).unwrap();
        let b = Identity::from_text(SK3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.public_key().to_hex(), PK3);
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let identity = Identity::from_text(SK3).unwrap();
        let rendered = format!("{identity:?} {:?}", identity.secret_key());
        assert!(!rendered.contains(SK3));
    }
}
