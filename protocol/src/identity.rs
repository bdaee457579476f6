//! # Account Identities
//!
//! An [`AccountId`] is how the engine refers to a party: sponsor,
//! beneficiary, arbitrator, fee recipient, split recipient. It is derived
//! from the party's Ed25519 public key:
//!
//! ```text
//! public_key (32 bytes)
//!     -> BLAKE3 derive_key("accord.identity.account.v1", public_key)
//!     -> Bech32("acrd", hash) -> acrd1qw508d6qe…
//! ```
//!
//! Hashing instead of using the raw key gives a uniform 32-byte identity
//! whatever the future key scheme looks like, and the Bech32 rendering
//! catches copy-paste damage before it costs anyone money.
//!
//! Deriving an identity from a presented public key is also how the engine
//! authenticates detached authorizations: verify the signature against the
//! presented key, hash the key, and the resulting `AccountId` is the
//! authenticated signer — the Rust-native analogue of on-chain signer
//! recovery.

use std::fmt;

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ACCOUNT_HRP, DIGEST_LENGTH, DOMAIN_ACCOUNT_ID};
use crate::crypto::{domain_hash, PublicKey};

/// Errors that can occur parsing account addresses.
#[derive(Debug, Error)]
pub enum AccountIdError {
    /// The Bech32 string could not be decoded.
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    /// The decoded address has an unexpected human-readable prefix.
    #[error("invalid HRP: expected '{expected}', got '{got}'")]
    InvalidHrp { expected: String, got: String },

    /// The decoded data has an unexpected length.
    #[error("invalid address data length: expected {expected} bytes, got {got}")]
    InvalidDataLength { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// A party identity: the domain-separated BLAKE3 hash of an Ed25519 public
/// key.
///
/// `AccountId::ZERO` is the null identity. It is never a valid counterparty,
/// recipient, or signer — every entry point that accepts an identity rejects
/// it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId([u8; DIGEST_LENGTH]);

impl AccountId {
    /// The null identity.
    pub const ZERO: AccountId = AccountId([0u8; DIGEST_LENGTH]);

    /// Derives the identity belonging to a public key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(*domain_hash(DOMAIN_ACCOUNT_ID, &[key.as_bytes()]).as_bytes())
    }

    /// Wraps raw identity bytes (e.g. read back from storage or an event).
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw identity bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Returns `true` for the null identity.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Renders the Bech32 address, `acrd1…`.
    pub fn to_address(&self) -> String {
        let hrp = Hrp::parse(ACCOUNT_HRP).expect("static HRP is valid");
        bech32::encode::<Bech32>(hrp, &self.0)
            .expect("encoding a 32-byte payload should never fail")
    }

    /// Parses a Bech32 address back into an identity, validating the HRP,
    /// checksum, and payload length.
    pub fn from_address(addr: &str) -> Result<Self, AccountIdError> {
        let (hrp, data) =
            bech32::decode(addr).map_err(|e| AccountIdError::Bech32Decode(e.to_string()))?;

        let expected = Hrp::parse(ACCOUNT_HRP).expect("static HRP is valid");
        if hrp != expected {
            return Err(AccountIdError::InvalidHrp {
                expected: ACCOUNT_HRP.to_string(),
                got: hrp.to_string(),
            });
        }

        if data.len() != DIGEST_LENGTH {
            return Err(AccountIdError::InvalidDataLength {
                expected: DIGEST_LENGTH,
                got: data.len(),
            });
        }

        let mut bytes = [0u8; DIGEST_LENGTH];
        bytes.copy_from_slice(&data);
        Ok(Self(bytes))
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.to_address();
        // acrd1 + first 8 data chars is plenty for log correlation.
        write!(f, "AccountId({}…)", &addr[..13.min(addr.len())])
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn derivation_is_deterministic() {
        let kp = Keypair::from_seed_bytes(&[1u8; 32]).unwrap();
        let a = AccountId::from_public_key(&kp.public_key());
        let b = AccountId::from_public_key(&kp.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_different_identities() {
        let a = AccountId::from_public_key(&Keypair::generate().public_key());
        let b = AccountId::from_public_key(&Keypair::generate().public_key());
        assert_ne!(a, b);
    }

    #[test]
    fn identity_is_not_the_raw_key() {
        // The identity must be the domain hash, not the key bytes.
        let kp = Keypair::generate();
        let id = AccountId::from_public_key(&kp.public_key());
        assert_ne!(id.as_bytes(), kp.public_key().as_bytes());
    }

    #[test]
    fn address_roundtrip() {
        let id = AccountId::from_public_key(&Keypair::generate().public_key());
        let addr = id.to_address();
        assert!(addr.starts_with("acrd1"));
        assert_eq!(AccountId::from_address(&addr).unwrap(), id);
    }

    #[test]
    fn address_rejects_foreign_hrp() {
        let hrp = Hrp::parse("nope").unwrap();
        let foreign = bech32::encode::<Bech32>(hrp, &[0xAAu8; 32]).unwrap();
        assert!(matches!(
            AccountId::from_address(&foreign),
            Err(AccountIdError::InvalidHrp { .. })
        ));
    }

    #[test]
    fn address_rejects_wrong_payload_length() {
        let hrp = Hrp::parse(ACCOUNT_HRP).unwrap();
        let short = bech32::encode::<Bech32>(hrp, &[0xAAu8; 20]).unwrap();
        assert!(matches!(
            AccountId::from_address(&short),
            Err(AccountIdError::InvalidDataLength {
                expected: 32,
                got: 20
            })
        ));
    }

    #[test]
    fn address_rejects_garbage() {
        assert!(AccountId::from_address("not-an-address").is_err());
    }

    #[test]
    fn zero_sentinel() {
        assert!(AccountId::ZERO.is_zero());
        let real = AccountId::from_public_key(&Keypair::generate().public_key());
        assert!(!real.is_zero());
    }
}
