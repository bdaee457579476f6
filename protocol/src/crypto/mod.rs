//! # Cryptographic Primitives
//!
//! Digests and Ed25519 signatures. Everything here is a thin, audited
//! wrapper over `blake3`, `sha2`, and `ed25519-dalek` — no hand-rolled
//! crypto, today or ever.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{domain_hash, Digest, DigestError};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
pub use signatures::{sign, verify, verify_raw, SignatureError};
