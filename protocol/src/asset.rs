//! # Asset Identifiers
//!
//! Two kinds of value move through the engine:
//!
//! - the **native unit** of the host ledger, attached directly to a call;
//! - **fungible tokens**, pulled from the payer under a pre-authorized
//!   allowance.
//!
//! Both are identified by an [`Asset`]. Token identifiers are
//! content-addressed: the BLAKE3 hash of the token's canonical properties,
//! so the same token always gets the same id with no registry and no
//! coordination.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::Digest;

// ---------------------------------------------------------------------------
// TokenId
// ---------------------------------------------------------------------------

/// A unique, content-addressed identifier for a fungible token type.
///
/// Computed as `BLAKE3(name ‖ 0x00 ‖ symbol ‖ 0x00 ‖ issuer)`. The separator
/// bytes prevent ambiguity when one field's suffix matches another field's
/// prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId([u8; 32]);

impl TokenId {
    /// Wraps a raw 32-byte identifier.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives a `TokenId` from the token's canonical properties.
    pub fn derive(name: &str, symbol: &str, issuer: &str) -> Self {
        let mut preimage = Vec::with_capacity(name.len() + symbol.len() + issuer.len() + 2);
        preimage.extend_from_slice(name.as_bytes());
        preimage.push(0x00);
        preimage.extend_from_slice(symbol.as_bytes());
        preimage.push(0x00);
        preimage.extend_from_slice(issuer.as_bytes());
        Self(*Digest::blake3(&preimage).as_bytes())
    }

    /// Returns the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({}…)", &self.to_hex()[..12])
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// A named quantity-of-value type the engine can custody.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    /// The host ledger's native unit. Funding attaches value with the call.
    Native,
    /// A fungible token. Funding pulls value under a prior allowance.
    Token(TokenId),
}

impl Asset {
    /// Returns `true` for the native unit.
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }

    /// A fixed-width byte encoding for signing messages: a one-byte tag
    /// followed by 32 id bytes (zero for the native unit).
    pub fn to_signing_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        match self {
            Asset::Native => out[0] = 0x00,
            Asset::Token(id) => {
                out[0] = 0x01;
                out[1..].copy_from_slice(id.as_bytes());
            }
        }
        out
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "Native"),
            Asset::Token(id) => write!(f, "Token({id:?})"),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Token(id) => write!(f, "token:{id}"),
        }
    }
}
