//! # Relayed Authorization
//!
//! Detached-signature authorization for the payout engine: an operator
//! signs a structured message off-band, and *anyone* — a relayer, a batch
//! service, the operator themselves — may submit it. Validity never depends
//! on who carried the message, only on:
//!
//! 1. the deadline not having passed,
//! 2. the Ed25519 signature verifying over the domain-separated action
//!    digest,
//! 3. the recovered signer (the hash of the presented public key) holding
//!    the operator or administrator capability,
//! 4. the nonce equaling the signer's expected nonce — which increments in
//!    the same operation, so the same signed payload can never clear twice.
//!
//! Each action type signs under its own versioned domain context, so a
//! define-split authorization can never be replayed as a payout, and
//! signatures from any future message version can never collide with v1.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_protocol::asset::Asset;
use accord_protocol::authority::{Authority, Capability};
use accord_protocol::config::{DOMAIN_DEFINE_SPLIT, DOMAIN_PAYOUT};
use accord_protocol::crypto::{domain_hash, Digest, Keypair, PublicKey, Signature};
use accord_protocol::identity::AccountId;

use crate::payout::SplitId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur verifying a relayed authorization.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The authorization deadline has passed.
    #[error("authorization expired at {deadline} (now {now})")]
    Expired {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The signature does not verify over the action digest.
    #[error("signature verification failed")]
    BadSignature,

    /// The recovered signer lacks the operator capability.
    #[error("unauthorized signer: {account} does not hold {capability}")]
    UnauthorizedSigner {
        account: AccountId,
        capability: Capability,
    },

    /// The nonce does not match the signer's expected nonce.
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
}

// ---------------------------------------------------------------------------
// RelayedAuthorization
// ---------------------------------------------------------------------------

/// A detached authorization: the signer's public key, the anti-replay
/// nonce, an expiry deadline, and the signature itself.
///
/// The signer's *identity* is not carried — it is recovered by hashing the
/// presented public key, which the signature proves possession of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedAuthorization {
    /// Public key the signature verifies under.
    pub signer_key: PublicKey,
    /// The signer's expected nonce at signing time.
    pub nonce: u64,
    /// Instant after which this authorization is dead.
    pub deadline: DateTime<Utc>,
    /// Ed25519 signature over the action digest.
    pub signature: Signature,
}

impl RelayedAuthorization {
    /// The account this authorization speaks for.
    pub fn signer(&self) -> AccountId {
        AccountId::from_public_key(&self.signer_key)
    }
}

// ---------------------------------------------------------------------------
// Action digests
// ---------------------------------------------------------------------------

/// The digest an operator signs to authorize a split definition.
///
/// Layout: `recipients_hash ‖ nonce_be8 ‖ deadline_unix_be8` under the
/// define-split domain. All fields fixed-width, no ambiguity.
pub fn define_split_digest(recipients_hash: Digest, nonce: u64, deadline: DateTime<Utc>) -> Digest {
    domain_hash(
        DOMAIN_DEFINE_SPLIT,
        &[
            recipients_hash.as_bytes(),
            &nonce.to_be_bytes(),
            &deadline.timestamp().to_be_bytes(),
        ],
    )
}

/// The digest an operator signs to authorize a payout.
///
/// Layout: `ref ‖ asset_tag33 ‖ amount_be16 ‖ split_id_be8 ‖ nonce_be8 ‖
/// deadline_unix_be8` under the payout domain.
pub fn payout_digest(
    reference: Digest,
    asset: Asset,
    amount: u128,
    split_id: SplitId,
    nonce: u64,
    deadline: DateTime<Utc>,
) -> Digest {
    domain_hash(
        DOMAIN_PAYOUT,
        &[
            reference.as_bytes(),
            &asset.to_signing_bytes(),
            &amount.to_be_bytes(),
            &split_id.0.to_be_bytes(),
            &nonce.to_be_bytes(),
            &deadline.timestamp().to_be_bytes(),
        ],
    )
}

// ---------------------------------------------------------------------------
// Signing helpers
// ---------------------------------------------------------------------------

/// Produces a define-split authorization from a keypair — the library
/// counterpart of the off-band ops signing tool.
pub fn sign_define_split(
    keypair: &Keypair,
    recipients_hash: Digest,
    nonce: u64,
    deadline: DateTime<Utc>,
) -> RelayedAuthorization {
    let digest = define_split_digest(recipients_hash, nonce, deadline);
    RelayedAuthorization {
        signer_key: keypair.public_key(),
        nonce,
        deadline,
        signature: keypair.sign(digest.as_bytes()),
    }
}

/// Produces a payout authorization from a keypair.
pub fn sign_payout(
    keypair: &Keypair,
    reference: Digest,
    asset: Asset,
    amount: u128,
    split_id: SplitId,
    nonce: u64,
    deadline: DateTime<Utc>,
) -> RelayedAuthorization {
    let digest = payout_digest(reference, asset, amount, split_id, nonce, deadline);
    RelayedAuthorization {
        signer_key: keypair.public_key(),
        nonce,
        deadline,
        signature: keypair.sign(digest.as_bytes()),
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// The shared verify-recover-check path behind every signature-authorized
/// entry point.
///
/// Checks deadline, signature, capability, and nonce in that order, and
/// increments the signer's nonce on success — read and increment happen
/// inside the same engine operation, so a concurrent replay of the same
/// payload can never pass the nonce check.
pub(crate) fn authorize(
    auth: &RelayedAuthorization,
    action_digest: Digest,
    now: DateTime<Utc>,
    authority: &dyn Authority,
    nonces: &mut HashMap<AccountId, u64>,
) -> Result<AccountId, RelayError> {
    if now > auth.deadline {
        return Err(RelayError::Expired {
            deadline: auth.deadline,
            now,
        });
    }
    if !auth
        .signer_key
        .verify(action_digest.as_bytes(), &auth.signature)
    {
        return Err(RelayError::BadSignature);
    }

    let signer = auth.signer();
    if !authority.has_capability(&signer, Capability::Operator)
        && !authority.has_capability(&signer, Capability::Administrator)
    {
        return Err(RelayError::UnauthorizedSigner {
            account: signer,
            capability: Capability::Operator,
        });
    }

    let expected = nonces.get(&signer).copied().unwrap_or(0);
    if auth.nonce != expected {
        return Err(RelayError::NonceMismatch {
            expected,
            got: auth.nonce,
        });
    }
    nonces.insert(signer, expected + 1);

    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use accord_protocol::authority::StaticAuthority;

    fn operator_setup() -> (Keypair, AccountId, StaticAuthority) {
        let kp = Keypair::generate();
        let account = AccountId::from_public_key(&kp.public_key());
        let mut authority = StaticAuthority::new();
        authority.grant(account, Capability::Operator);
        (kp, account, authority)
    }

    #[test]
    fn digests_differ_across_action_types() {
        let now = Utc::now();
        let content = Digest::blake3(b"recipients");
        let a = define_split_digest(content, 0, now);
        let b = payout_digest(content, Asset::Native, 1, SplitId(0), 0, now);
        assert_ne!(a, b);
    }

    #[test]
    fn digest_binds_every_field() {
        let now = Utc::now();
        let base = payout_digest(Digest::ZERO, Asset::Native, 10, SplitId(1), 2, now);
        assert_ne!(
            base,
            payout_digest(Digest::ZERO, Asset::Native, 11, SplitId(1), 2, now)
        );
        assert_ne!(
            base,
            payout_digest(Digest::ZERO, Asset::Native, 10, SplitId(2), 2, now)
        );
        assert_ne!(
            base,
            payout_digest(Digest::ZERO, Asset::Native, 10, SplitId(1), 3, now)
        );
        assert_ne!(
            base,
            payout_digest(
                Digest::ZERO,
                Asset::Native,
                10,
                SplitId(1),
                2,
                now + Duration::seconds(1)
            )
        );
    }

    #[test]
    fn authorize_happy_path_increments_nonce() {
        let (kp, account, authority) = operator_setup();
        let now = Utc::now();
        let content = Digest::blake3(b"split");
        let auth = sign_define_split(&kp, content, 0, now + Duration::hours(1));
        let digest = define_split_digest(content, 0, now + Duration::hours(1));

        let mut nonces = HashMap::new();
        let signer = authorize(&auth, digest, now, &authority, &mut nonces).unwrap();
        assert_eq!(signer, account);
        assert_eq!(nonces[&account], 1);
    }

    #[test]
    fn expired_deadline_rejected_before_nonce_moves() {
        let (kp, account, authority) = operator_setup();
        let now = Utc::now();
        let content = Digest::blake3(b"split");
        let deadline = now - Duration::seconds(1);
        let auth = sign_define_split(&kp, content, 0, deadline);
        let digest = define_split_digest(content, 0, deadline);

        let mut nonces = HashMap::new();
        let err = authorize(&auth, digest, now, &authority, &mut nonces).unwrap_err();
        assert!(matches!(err, RelayError::Expired { .. }));
        assert!(!nonces.contains_key(&account));
    }

    #[test]
    fn tampered_message_rejected() {
        let (kp, _, authority) = operator_setup();
        let now = Utc::now();
        let deadline = now + Duration::hours(1);
        let auth = sign_define_split(&kp, Digest::blake3(b"real"), 0, deadline);
        // Verifier computes the digest over different recipients.
        let forged = define_split_digest(Digest::blake3(b"forged"), 0, deadline);

        let mut nonces = HashMap::new();
        let err = authorize(&auth, forged, now, &authority, &mut nonces).unwrap_err();
        assert!(matches!(err, RelayError::BadSignature));
    }

    #[test]
    fn signer_without_capability_rejected() {
        let kp = Keypair::generate();
        let authority = StaticAuthority::new();
        let now = Utc::now();
        let deadline = now + Duration::hours(1);
        let content = Digest::blake3(b"split");
        let auth = sign_define_split(&kp, content, 0, deadline);
        let digest = define_split_digest(content, 0, deadline);

        let mut nonces = HashMap::new();
        let err = authorize(&auth, digest, now, &authority, &mut nonces).unwrap_err();
        assert!(matches!(err, RelayError::UnauthorizedSigner { .. }));
    }

    #[test]
    fn replay_of_consumed_payload_fails_on_nonce() {
        let (kp, account, authority) = operator_setup();
        let now = Utc::now();
        let deadline = now + Duration::hours(1);
        let content = Digest::blake3(b"split");
        let auth = sign_define_split(&kp, content, 0, deadline);
        let digest = define_split_digest(content, 0, deadline);

        let mut nonces = HashMap::new();
        authorize(&auth, digest, now, &authority, &mut nonces).unwrap();

        // The exact same signed payload again: nonce 0 vs expected 1.
        let err = authorize(&auth, digest, now, &authority, &mut nonces).unwrap_err();
        assert!(matches!(
            err,
            RelayError::NonceMismatch {
                expected: 1,
                got: 0
            }
        ));
        assert_eq!(nonces[&account], 1);
    }

    #[test]
    fn deadline_instant_itself_is_still_valid() {
        let (kp, _, authority) = operator_setup();
        let now = Utc::now();
        let content = Digest::blake3(b"split");
        let auth = sign_define_split(&kp, content, 0, now);
        let digest = define_split_digest(content, 0, now);

        let mut nonces = HashMap::new();
        assert!(authorize(&auth, digest, now, &authority, &mut nonces).is_ok());
    }
}
