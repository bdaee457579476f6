//! # Protocol Configuration & Constants
//!
//! Every magic number in Accord lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Several of these values are load-bearing for money math (the basis-point
//! denominator) or for signature replay protection (the signing domain
//! strings). Changing a signing domain invalidates every authorization
//! produced under the old one — that is the point of versioning them.

// ---------------------------------------------------------------------------
// Money Math
// ---------------------------------------------------------------------------

/// Basis-point denominator: 10 000 bps == 100%.
///
/// Split shares and settlement fees are both expressed in basis points and
/// both divide by this value with floor semantics.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Upper bound on the settlement fee an administrator may configure.
/// 1 000 bps == 10%. A custodian taking more than that is not a custodian,
/// it's a toll booth.
pub const MAX_FEE_BPS: u16 = 1_000;

/// Maximum number of recipients in a payout split.
///
/// Bounds the per-payout transfer fan-out so a single distribution stays a
/// small, predictable batch.
pub const MAX_SPLIT_RECIPIENTS: usize = 32;

// ---------------------------------------------------------------------------
// Signing Domains
// ---------------------------------------------------------------------------

/// Domain context for detached split-definition authorizations.
///
/// Versioned and distinct per action type: a signature produced for one
/// domain can never validate under another, so a define-split authorization
/// can never be replayed as a payout (or vice versa).
pub const DOMAIN_DEFINE_SPLIT: &str = "accord.payout.define-split.v1";

/// Domain context for detached payout authorizations.
pub const DOMAIN_PAYOUT: &str = "accord.payout.execute.v1";

/// Domain context for deriving account identities from public keys.
pub const DOMAIN_ACCOUNT_ID: &str = "accord.identity.account.v1";

/// Domain context for split content hashes.
pub const DOMAIN_SPLIT_CONTENT: &str = "accord.payout.split-content.v1";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Bech32 human-readable prefix for Accord account addresses.
pub const ACCOUNT_HRP: &str = "acrd";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 secret key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 public (verifying) key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes. If yours isn't, something
/// has gone terribly wrong.
pub const SIGNATURE_LENGTH: usize = 64;

/// Digest length for every content hash in the protocol.
pub const DIGEST_LENGTH: usize = 32;
