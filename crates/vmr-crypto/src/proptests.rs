//! Property-based tests for the conversation and envelope invariants.

use proptest::prelude::*;

use crate::clock::FixedClock;
use crate::conversation::{calc_padded_len, decrypt, derive_conversation_key, encrypt};
use crate::envelope::{UnsignedEnvelope, KIND_ENCRYPTED_DIRECT_MESSAGE};
use crate::keys::{Identity, SecretKey};

/// Scalars in 1..2^248, always below the curve order.
fn valid_secret() -> impl Strategy<Value = SecretKey> {
    any::<[u8; 31]>()
        .prop_filter("non-zero scalar", |b| b.iter().any(|&x| x != 0))
        .prop_map(|tail| {
            let mut bytes = [0u8; 32];
            bytes[1..].copy_from_slice(&tail);
            SecretKey::from_bytes(bytes)
        })
}

fn identity() -> impl Strategy<Value = Identity> {
    valid_secret().prop_map(|s| Identity::from_secret(s).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_conversation_key_is_symmetric(a in identity(), b in identity()) {
        let ab = derive_conversation_key(a.secret_key(), b.public_key()).unwrap();
        let ba = derive_conversation_key(b.secret_key(), a.public_key()).unwrap();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn prop_encrypt_decrypt_round_trip(
        a in identity(),
        b in identity(),
        plaintext in proptest::collection::vec(any::<u8>(), 1..2048),
    ) {
        let key = derive_conversation_key(a.secret_key(), b.public_key()).unwrap();
        let payload = encrypt(&key, &plaintext).unwrap();
        prop_assert_eq!(decrypt(&key, &payload).unwrap(), plaintext);
    }

    #[test]
    fn prop_encrypt_is_non_deterministic(
        a in identity(),
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
    ) {
        let key = derive_conversation_key(a.secret_key(), a.public_key()).unwrap();
        let first = encrypt(&key, &plaintext).unwrap();
        let second = encrypt(&key, &plaintext).unwrap();
        prop_assert_ne!(first, second);
    }

    #[test]
    fn prop_wrong_key_never_decrypts(
        a in identity(),
        b in identity(),
        c in identity(),
        plaintext in proptest::collection::vec(any::<u8>(), 1..512),
    ) {
        let right = derive_conversation_key(a.secret_key(), b.public_key()).unwrap();
        let wrong = derive_conversation_key(a.secret_key(), c.public_key()).unwrap();
        prop_assume!(right != wrong);
        let payload = encrypt(&right, &plaintext).unwrap();
        prop_assert!(decrypt(&wrong, &payload).is_err());
    }

    #[test]
    fn prop_padded_len_bounds(len in 1usize..=65535) {
        let padded = calc_padded_len(len);
        prop_assert!(padded >= len);
        prop_assert!(padded >= 32);
        prop_assert!(calc_padded_len(len + 1) >= padded);
    }

    #[test]
    fn prop_signed_envelope_verifies(
        sender in identity(),
        recipient in identity(),
        created_at in any::<u32>(),
        content in ".{0,200}",
    ) {
        let clock = FixedClock::new(u64::from(created_at));
        let env = UnsignedEnvelope::build(
            sender.public_key(),
            recipient.public_key(),
            KIND_ENCRYPTED_DIRECT_MESSAGE,
            content,
            &clock,
        )
        .sign(sender.secret_key())
        .unwrap();
        prop_assert!(env.verify().is_ok());
        prop_assert_eq!(env.recipient(), Some(*recipient.public_key()));
    }
}
