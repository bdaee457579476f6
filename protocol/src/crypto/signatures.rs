//! # Digital Signatures
//!
//! Free-function facade over [`Keypair`]/[`PublicKey`] signing, plus the
//! raw-bytes verification path used when material arrives off the wire.
//!
//! Wrapping the operations gives us a single place to audit every signing
//! call and one consistent error type. Verification uses `ed25519-dalek`'s
//! strict mode semantics: edge-case signatures that lenient implementations
//! wave through are rejected here.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use thiserror::Error;

use super::keys::{Keypair, PublicKey, Signature};
use crate::config::{SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};

/// Errors during signature verification.
///
/// Intentionally vague — we don't tell attackers why verification failed.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Sign a message with a keypair.
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verify a signature against a public key and message.
///
/// Returns `true` iff the signature is valid. "Invalid signature" and
/// "wrong public key" are indistinguishable from the outside — both are
/// just "nope".
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// Verify a signature from raw byte components.
///
/// The "I got these bytes off the wire and need to check them" variant:
/// parses the public key and signature, then verifies.
pub fn verify_raw(
    public_key_bytes: &[u8; VERIFYING_KEY_LENGTH],
    message: &[u8],
    signature_bytes: &[u8; SIGNATURE_LENGTH],
) -> Result<(), SignatureError> {
    let key = VerifyingKey::from_bytes(public_key_bytes)
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig = DalekSignature::from_bytes(signature_bytes);
    key.verify(message, &sig)
        .map_err(|_| SignatureError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"release 100 units to beneficiary");
        assert!(verify(&kp.public_key(), b"release 100 units to beneficiary", &sig));
    }

    #[test]
    fn verify_raw_roundtrip() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"raw bytes path");
        assert!(verify_raw(
            kp.public_key().as_bytes(),
            b"raw bytes path",
            sig.as_bytes()
        )
        .is_ok());
    }

    #[test]
    fn verify_raw_rejects_identity_point() {
        // All zeros is a small-order point and must be rejected as a key.
        let err = verify_raw(&[0u8; 32], b"anything", &[0u8; 64]);
        assert!(err.is_err());
    }

    #[test]
    fn empty_message_signs_fine() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"");
        assert!(verify(&kp.public_key(), b"", &sig));
    }
}
