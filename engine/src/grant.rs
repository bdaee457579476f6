//! # Grant Vault
//!
//! Unilateral timelocked escrow. A sponsor locks value for a beneficiary
//! until an unlock instant; optionally, the vault also demands a
//! third-party attestation before the beneficiary may withdraw. The sponsor
//! (or an administrator) can claw the grant back — but only *before* the
//! unlock instant. After unlock, the value belongs to the beneficiary's
//! side of the ledger and only a withdrawal can move it.
//!
//! ```text
//! Open ──withdraw (now ≥ unlock, attested if required)──> Withdrawn
//!   └───refund   (now < unlock)────────────────────────> Refunded
//! ```
//!
//! Withdrawn and Refunded are terminal, mutually exclusive, and each
//! reachable exactly once. The amount is zeroed at the terminal transition,
//! and — as everywhere in this engine — the record and the accounting are
//! finalized strictly before the external transfer runs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use accord_protocol::asset::Asset;
use accord_protocol::authority::Capability;
use accord_protocol::crypto::Digest;
use accord_protocol::identity::AccountId;

use crate::accounting::AccountingError;
use crate::context::OpCtx;
use crate::events::EngineEvent;
use crate::transfer::TransferError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during grant operations.
#[derive(Debug, Error)]
pub enum GrantError {
    /// The engine is paused; no state-advancing operation may run.
    #[error("engine is paused")]
    Paused,

    /// Grant amounts must be strictly positive.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The null identity cannot be a beneficiary.
    #[error("beneficiary must not be the null identity")]
    ZeroBeneficiary,

    /// The unlock time must lie strictly in the future at creation time.
    #[error("unlock time {unlock_time} is not in the future (now {now})")]
    UnlockNotFuture {
        unlock_time: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Native funding must attach exactly the grant amount; token funding
    /// must attach nothing.
    #[error("attached value {attached} does not match required {required}")]
    WrongAttachedValue { attached: u128, required: u128 },

    /// No grant exists under this identifier.
    #[error("unknown grant {0}")]
    UnknownGrant(GrantId),

    /// The grant is already closed (withdrawn or refunded).
    #[error("grant already closed")]
    AlreadyClosed,

    /// The grant has already been attested; attestation happens once.
    #[error("grant already attested")]
    AlreadyAttested,

    /// Withdrawal attempted before the unlock instant.
    #[error("grant locked until {unlock_time} (now {now})")]
    StillLocked {
        unlock_time: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Refund attempted at or after the unlock instant.
    #[error("refund window closed at {unlock_time} (now {now})")]
    RefundWindowClosed {
        unlock_time: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The vault requires an attestation this grant does not yet have.
    #[error("grant not attested")]
    NotAttested,

    /// The caller is not the party this operation is reserved for.
    #[error("unauthorized: {account} may not perform this action on this grant")]
    Unauthorized { account: AccountId },

    /// The caller lacks the capability this operation requires.
    #[error("missing capability: {account} does not hold {capability}")]
    MissingCapability {
        account: AccountId,
        capability: Capability,
    },

    /// A release re-entered the vault through the transfer sink.
    #[error("release already in progress")]
    Reentered,

    /// The external transfer step failed; the operation was rolled back.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Custody accounting rejected the operation.
    #[error(transparent)]
    Accounting(#[from] AccountingError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identifies a grant. Monotonically assigned, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(pub u64);

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grant-{}", self.0)
    }
}

/// A unilateral timelocked escrow obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    /// The funding party.
    pub sponsor: AccountId,
    /// The party who may withdraw after unlock.
    pub beneficiary: AccountId,
    /// What the grant is denominated in.
    pub asset: Asset,
    /// Custodied value. Zeroed exactly once, at the terminal transition.
    pub amount: u128,
    /// The instant withdrawal becomes possible (and refund impossible).
    pub unlock_time: DateTime<Utc>,
    /// Hash of the off-engine terms document.
    pub terms_digest: Digest,
    /// Hash recorded by the attester, if any.
    pub attestation_digest: Option<Digest>,
    /// Whether a capability-holding attester has confirmed the off-engine
    /// condition.
    pub attested: bool,
    /// Terminal flag: funds went to the beneficiary.
    pub withdrawn: bool,
    /// Terminal flag: funds went back to the sponsor.
    pub refunded: bool,
    /// When the grant was funded.
    pub created_at: DateTime<Utc>,
}

impl Grant {
    /// `true` once either terminal flag is set.
    pub fn is_closed(&self) -> bool {
        self.withdrawn || self.refunded
    }
}

// ---------------------------------------------------------------------------
// GrantVault
// ---------------------------------------------------------------------------

/// The grant arena.
#[derive(Debug)]
pub struct GrantVault {
    grants: Vec<Grant>,
    /// Whether withdrawal additionally requires an attestation.
    require_attestation: bool,
    /// Re-entry sentinel, set across the external transfer call.
    releasing: bool,
}

impl GrantVault {
    /// Creates an empty vault. `require_attestation` is fixed for the
    /// vault's lifetime.
    pub fn new(require_attestation: bool) -> Self {
        Self {
            grants: Vec::new(),
            require_attestation,
            releasing: false,
        }
    }

    // -- reads ---------------------------------------------------------

    /// Looks up a grant.
    pub fn grant(&self, id: GrantId) -> Option<&Grant> {
        self.grants.get(id.0 as usize)
    }

    /// Number of grants ever created.
    pub fn grant_count(&self) -> u64 {
        self.grants.len() as u64
    }

    /// Whether this vault demands attestation before withdrawal.
    pub fn requires_attestation(&self) -> bool {
        self.require_attestation
    }

    /// Sum of custodied amounts over open grants for `asset`.
    pub fn open_custody(&self, asset: Asset) -> u128 {
        self.grants
            .iter()
            .filter(|g| g.asset == asset && !g.is_closed())
            .map(|g| g.amount)
            .sum()
    }

    // -- entry points --------------------------------------------------

    /// Funds a new grant. Same funding semantics as the deal ledger:
    /// native value attaches exactly, tokens pull under allowance.
    #[allow(clippy::too_many_arguments)]
    pub fn create_grant(
        &mut self,
        ctx: &mut OpCtx<'_>,
        sponsor: AccountId,
        attached: u128,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
        unlock_time: DateTime<Utc>,
        terms_digest: Digest,
    ) -> Result<GrantId, GrantError> {
        self.guard_entry(ctx)?;
        if amount == 0 {
            return Err(GrantError::ZeroAmount);
        }
        if beneficiary.is_zero() {
            return Err(GrantError::ZeroBeneficiary);
        }
        if unlock_time <= ctx.now {
            return Err(GrantError::UnlockNotFuture {
                unlock_time,
                now: ctx.now,
            });
        }
        let required = if asset.is_native() { amount } else { 0 };
        if attached != required {
            return Err(GrantError::WrongAttachedValue { attached, required });
        }

        ctx.accounting.custody(asset, amount)?;
        if let Err(err) = ctx.transfer.pull(asset, sponsor, amount) {
            ctx.accounting
                .release(asset, amount)
                .expect("releasing a just-custodied amount cannot underflow");
            return Err(err.into());
        }

        let id = GrantId(self.grants.len() as u64);
        self.grants.push(Grant {
            sponsor,
            beneficiary,
            asset,
            amount,
            unlock_time,
            terms_digest,
            attestation_digest: None,
            attested: false,
            withdrawn: false,
            refunded: false,
            created_at: ctx.now,
        });

        ctx.events.append(
            ctx.now,
            EngineEvent::GrantCreated {
                grant_id: id,
                sponsor,
                beneficiary,
                asset,
                amount,
                unlock_time,
                terms_digest,
            },
        );
        info!(grant = %id, %asset, amount, "grant funded");
        Ok(id)
    }

    /// An attester confirms the off-engine condition. Once per grant, only
    /// while the grant is still open. Never moves value.
    pub fn attest_grant(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        grant_id: GrantId,
        attestation_digest: Digest,
    ) -> Result<(), GrantError> {
        self.guard_entry(ctx)?;
        if !ctx.authority.has_capability(&caller, Capability::Attester)
            && !ctx
                .authority
                .has_capability(&caller, Capability::Administrator)
        {
            return Err(GrantError::MissingCapability {
                account: caller,
                capability: Capability::Attester,
            });
        }
        let grant = self
            .grants
            .get_mut(grant_id.0 as usize)
            .ok_or(GrantError::UnknownGrant(grant_id))?;
        if grant.is_closed() {
            return Err(GrantError::AlreadyClosed);
        }
        if grant.attested {
            return Err(GrantError::AlreadyAttested);
        }

        grant.attested = true;
        grant.attestation_digest = Some(attestation_digest);

        ctx.events.append(
            ctx.now,
            EngineEvent::GrantAttested {
                grant_id,
                attester: caller,
                attestation_digest,
            },
        );
        info!(grant = %grant_id, "grant attested");
        Ok(())
    }

    /// Beneficiary withdraws an unlocked (and, if required, attested) grant.
    pub fn withdraw(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        grant_id: GrantId,
    ) -> Result<(), GrantError> {
        self.guard_entry(ctx)?;
        let grant = self
            .grants
            .get(grant_id.0 as usize)
            .ok_or(GrantError::UnknownGrant(grant_id))?;
        if caller != grant.beneficiary {
            return Err(GrantError::Unauthorized { account: caller });
        }
        if grant.is_closed() {
            return Err(GrantError::AlreadyClosed);
        }
        if ctx.now < grant.unlock_time {
            return Err(GrantError::StillLocked {
                unlock_time: grant.unlock_time,
                now: ctx.now,
            });
        }
        if self.require_attestation && !grant.attested {
            return Err(GrantError::NotAttested);
        }

        let (asset, amount, beneficiary) = (grant.asset, grant.amount, grant.beneficiary);

        // Finalize before interacting.
        {
            let grant = &mut self.grants[grant_id.0 as usize];
            grant.amount = 0;
            grant.withdrawn = true;
        }
        ctx.accounting.release(asset, amount)?;

        self.releasing = true;
        let pushed = ctx.transfer.push(asset, beneficiary, amount);
        self.releasing = false;

        if let Err(err) = pushed {
            let grant = &mut self.grants[grant_id.0 as usize];
            grant.amount = amount;
            grant.withdrawn = false;
            ctx.accounting
                .custody(asset, amount)
                .expect("restoring a just-released amount cannot overflow");
            return Err(err.into());
        }

        ctx.events.append(
            ctx.now,
            EngineEvent::GrantWithdrawn {
                grant_id,
                beneficiary,
                asset,
                amount,
            },
        );
        info!(grant = %grant_id, amount, "grant withdrawn");
        Ok(())
    }

    /// Sponsor (or administrator) claws the grant back before unlock.
    pub fn refund(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        grant_id: GrantId,
    ) -> Result<(), GrantError> {
        self.guard_entry(ctx)?;
        let grant = self
            .grants
            .get(grant_id.0 as usize)
            .ok_or(GrantError::UnknownGrant(grant_id))?;
        if caller != grant.sponsor
            && !ctx
                .authority
                .has_capability(&caller, Capability::Administrator)
        {
            return Err(GrantError::Unauthorized { account: caller });
        }
        if grant.is_closed() {
            return Err(GrantError::AlreadyClosed);
        }
        if ctx.now >= grant.unlock_time {
            return Err(GrantError::RefundWindowClosed {
                unlock_time: grant.unlock_time,
                now: ctx.now,
            });
        }

        let (asset, amount, sponsor) = (grant.asset, grant.amount, grant.sponsor);

        {
            let grant = &mut self.grants[grant_id.0 as usize];
            grant.amount = 0;
            grant.refunded = true;
        }
        ctx.accounting.release(asset, amount)?;

        self.releasing = true;
        let pushed = ctx.transfer.push(asset, sponsor, amount);
        self.releasing = false;

        if let Err(err) = pushed {
            let grant = &mut self.grants[grant_id.0 as usize];
            grant.amount = amount;
            grant.refunded = false;
            ctx.accounting
                .custody(asset, amount)
                .expect("restoring a just-released amount cannot overflow");
            return Err(err.into());
        }

        ctx.events.append(
            ctx.now,
            EngineEvent::GrantRefunded {
                grant_id,
                sponsor,
                asset,
                amount,
            },
        );
        info!(grant = %grant_id, amount, "grant refunded");
        Ok(())
    }

    // -- internals -----------------------------------------------------

    fn guard_entry(&self, ctx: &OpCtx<'_>) -> Result<(), GrantError> {
        if ctx.breaker.is_paused() {
            return Err(GrantError::Paused);
        }
        if self.releasing {
            return Err(GrantError::Reentered);
        }
        Ok(())
    }
}
