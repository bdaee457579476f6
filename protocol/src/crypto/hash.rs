//! # Hashing Utilities
//!
//! Two hash functions, two jobs, and we refuse to add a third without a
//! very good reason:
//!
//! - **BLAKE3** — engine-internal hashing: split content hashes, signing
//!   messages, account identity derivation. Fast on every platform and
//!   with a proper keyed/derive-key mode for domain separation.
//! - **SHA-256** — anchoring external documents. Terms sheets, delivery
//!   evidence, and payout reference tags are hashed by tooling that lives
//!   outside the engine, and the rest of the world speaks SHA-256.
//!
//! Whichever function produced it, a 32-byte digest is carried around as a
//! [`Digest`] — the engine never interprets digest bytes, it only stores
//! and compares them.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use crate::config::DIGEST_LENGTH;

/// Errors from parsing digests out of external representations.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The hex string did not decode to exactly 32 bytes.
    #[error("invalid digest length: expected {DIGEST_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// A 32-byte content hash.
///
/// Used for terms digests, evidence digests, attestation digests, split
/// content hashes, and payout reference tags. The zero digest is a valid
/// value meaning "no document attached" — entity state machines decide
/// whether that is acceptable, not this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// The all-zeroes digest. Conventionally "nothing attached".
    pub const ZERO: Digest = Digest([0u8; DIGEST_LENGTH]);

    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of an external document. Use this for terms, evidence, and
    /// anything else produced by off-engine tooling.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let out = hasher.finalize();
        let mut bytes = [0u8; DIGEST_LENGTH];
        bytes.copy_from_slice(&out);
        Self(bytes)
    }

    /// BLAKE3 of engine-internal data.
    pub fn blake3(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    /// Hex-encodes the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded digest.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != DIGEST_LENGTH {
            return Err(DigestError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; DIGEST_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns `true` for the all-zeroes digest.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}…)", &self.to_hex()[..12])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Domain-separated hashing
// ---------------------------------------------------------------------------

/// Compute a domain-separated BLAKE3 hash over a sequence of parts.
///
/// Uses BLAKE3's `derive_key` mode: the context string selects a distinct
/// internal IV, so two hashes under different contexts can never collide,
/// whatever the data. Parts are fed sequentially — callers are responsible
/// for an unambiguous part layout (fixed-width fields, or digests, which
/// are always 32 bytes).
pub fn domain_hash(context: &str, parts: &[&[u8]]) -> Digest {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    Digest(*hasher.finalize().as_bytes())
}
