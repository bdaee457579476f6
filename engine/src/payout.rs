//! # Split Registry & Payout Engine
//!
//! Splits are immutable facts: an ordered list of `(recipient, share)`
//! pairs whose basis-point shares sum to exactly 10 000, registered under a
//! permanent identifier. There is no mutation and no deletion — a split
//! that needs changing is superseded by registering a new one.
//!
//! Payouts distribute an amount across a split's recipients. Integer
//! division leaves dust, and the dust has to live somewhere deterministic:
//! every recipient but the last gets `floor(amount · share / 10 000)`, and
//! **the last recipient in list order absorbs the remainder**, so the parts
//! always sum to exactly the input amount. Which recipient absorbs the dust
//! is a documented convention, not a law of nature — what is law is that
//! nothing leaks and nothing is created.
//!
//! Both registration and payout come in two flavors: direct invocation by a
//! capability-holding caller, and relayed submission carrying a detached
//! operator signature (see [`crate::relay`]).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use accord_protocol::asset::Asset;
use accord_protocol::authority::Capability;
use accord_protocol::config::{BPS_DENOMINATOR, DOMAIN_SPLIT_CONTENT, MAX_SPLIT_RECIPIENTS};
use accord_protocol::crypto::{domain_hash, Digest};
use accord_protocol::identity::AccountId;

use crate::accounting::AccountingError;
use crate::context::OpCtx;
use crate::events::EngineEvent;
use crate::math::bps_of;
use crate::relay::{self, RelayError, RelayedAuthorization};
use crate::transfer::TransferError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during split and payout operations.
#[derive(Debug, Error)]
pub enum PayoutError {
    /// The engine is paused; no state-advancing operation may run.
    #[error("engine is paused")]
    Paused,

    /// The caller lacks the capability this operation requires.
    #[error("missing capability: {account} does not hold {capability}")]
    MissingCapability {
        account: AccountId,
        capability: Capability,
    },

    /// A split needs at least one recipient.
    #[error("split has no recipients")]
    EmptySplit,

    /// The recipient list exceeds the protocol cap.
    #[error("split has {count} recipients, maximum is {max}")]
    TooManyRecipients { count: usize, max: usize },

    /// Every share must be strictly positive.
    #[error("share at position {index} is zero")]
    ZeroShare { index: usize },

    /// The null identity cannot receive a share.
    #[error("recipient at position {index} is the null identity")]
    ZeroRecipient { index: usize },

    /// Shares must sum to exactly 10 000 bps.
    #[error("shares sum to {total} bps, expected {BPS_DENOMINATOR}")]
    BadShareSum { total: u32 },

    /// No split exists under this identifier.
    #[error("unknown split {0}")]
    UnknownSplit(SplitId),

    /// Payout amounts must be strictly positive.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// Native payouts must attach exactly the amount; token payouts attach
    /// nothing.
    #[error("attached value {attached} does not match required {required}")]
    WrongAttachedValue { attached: u128, required: u128 },

    /// A distribution re-entered the engine through the transfer sink.
    #[error("distribution already in progress")]
    Reentered,

    /// The detached authorization did not verify.
    #[error(transparent)]
    Relay(#[from] RelayError),

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

/// Identifies a split. Monotonically assigned, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SplitId(pub u64);

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "split-{}", self.0)
    }
}

/// Identifies a payout record. Monotonically assigned, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayoutId(pub u64);

impl fmt::Display for PayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payout-{}", self.0)
    }
}

/// One recipient's slice of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareEntry {
    pub recipient: AccountId,
    /// Share in basis points; all entries of a split sum to 10 000.
    pub share_bps: u16,
}

/// An immutable distribution template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    /// Ordered recipients. The last entry absorbs rounding dust.
    pub entries: Vec<ShareEntry>,
    /// Content hash of the entry list, for off-band verification.
    pub content_hash: Digest,
    /// Who registered the split (direct caller or recovered signer).
    pub defined_by: AccountId,
    /// When it was registered.
    pub defined_at: DateTime<Utc>,
}

/// Write-once audit record of one executed payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRecord {
    /// Caller-supplied correlation tag.
    pub reference: Digest,
    pub asset: Asset,
    pub amount: u128,
    pub split_id: SplitId,
    /// Who supplied the funds (the caller, or the relayer on signed paths).
    pub payer: AccountId,
    /// The recovered signer on signed paths; `None` on direct ones.
    pub authorizer: Option<AccountId>,
    /// The operation's clock reading.
    pub at: DateTime<Utc>,
}

/// Canonical content hash of a recipient list.
///
/// `recipient_bytes32 ‖ share_be2` per entry, in order, under the
/// split-content domain. Off-band signers compute this to build the
/// define-split message; the registry stores it for later verification.
pub fn recipients_hash(entries: &[ShareEntry]) -> Digest {
    let shares: Vec<[u8; 2]> = entries.iter().map(|e| e.share_bps.to_be_bytes()).collect();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(entries.len() * 2);
    for (entry, share) in entries.iter().zip(&shares) {
        parts.push(entry.recipient.as_bytes());
        parts.push(share);
    }
    domain_hash(DOMAIN_SPLIT_CONTENT, &parts)
}

// ---------------------------------------------------------------------------
// PayoutEngine
// ---------------------------------------------------------------------------

/// The split arena, the payout journal, and the per-signer nonce table.
#[derive(Debug, Default)]
pub struct PayoutEngine {
    splits: Vec<Split>,
    payouts: Vec<PayoutRecord>,
    nonces: HashMap<AccountId, u64>,
    /// Re-entry sentinel, set across the external transfer call.
    distributing: bool,
}

impl PayoutEngine {
    /// Creates an engine with no splits registered.
    pub fn new() -> Self {
        Self::default()
    }

    // -- reads ---------------------------------------------------------

    /// Looks up a split.
    pub fn split(&self, id: SplitId) -> Option<&Split> {
        self.splits.get(id.0 as usize)
    }

    /// Number of splits ever registered.
    pub fn split_count(&self) -> u64 {
        self.splits.len() as u64
    }

    /// Looks up a payout record.
    pub fn payout_record(&self, id: PayoutId) -> Option<&PayoutRecord> {
        self.payouts.get(id.0 as usize)
    }

    /// Number of payouts ever executed.
    pub fn payout_count(&self) -> u64 {
        self.payouts.len() as u64
    }

    /// The nonce the given signer's next authorization must carry.
    pub fn expected_nonce(&self, signer: &AccountId) -> u64 {
        self.nonces.get(signer).copied().unwrap_or(0)
    }

    // -- split registration --------------------------------------------

    /// Registers a split. The caller must hold the operator or
    /// administrator capability.
    pub fn define_split(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        entries: Vec<ShareEntry>,
    ) -> Result<SplitId, PayoutError> {
        self.guard_entry(ctx)?;
        if !ctx.authority.has_capability(&caller, Capability::Operator)
            && !ctx
                .authority
                .has_capability(&caller, Capability::Administrator)
        {
            return Err(PayoutError::MissingCapability {
                account: caller,
                capability: Capability::Operator,
            });
        }
        Self::validate_entries(&entries)?;
        Ok(self.register_split(ctx, caller, entries))
    }

    /// Registers a split on the authority of a detached operator signature.
    ///
    /// The recipient list is validated before the signature so that a
    /// malformed submission cannot burn the signer's nonce; once the
    /// authorization clears, registration cannot fail.
    pub fn define_split_signed(
        &mut self,
        ctx: &mut OpCtx<'_>,
        entries: Vec<ShareEntry>,
        auth: &RelayedAuthorization,
    ) -> Result<SplitId, PayoutError> {
        self.guard_entry(ctx)?;
        Self::validate_entries(&entries)?;

        let digest = relay::define_split_digest(recipients_hash(&entries), auth.nonce, auth.deadline);
        let signer = relay::authorize(auth, digest, ctx.now, ctx.authority, &mut self.nonces)?;
        Ok(self.register_split(ctx, signer, entries))
    }

    // -- payout execution ----------------------------------------------

    /// Pulls `amount` from the caller and distributes it across the split.
    /// The caller must hold the operator or administrator capability.
    #[allow(clippy::too_many_arguments)]
    pub fn payout(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        attached: u128,
        reference: Digest,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
    ) -> Result<PayoutId, PayoutError> {
        self.guard_entry(ctx)?;
        if !ctx.authority.has_capability(&caller, Capability::Operator)
            && !ctx
                .authority
                .has_capability(&caller, Capability::Administrator)
        {
            return Err(PayoutError::MissingCapability {
                account: caller,
                capability: Capability::Operator,
            });
        }
        self.check_payout_inputs(attached, asset, amount, split_id)?;
        self.distribute(ctx, caller, None, reference, asset, amount, split_id)
    }

    /// Distributes on the authority of a detached operator signature; the
    /// submitting relayer supplies the funds, the recovered signer
    /// authorizes the parameters, and the record attributes both.
    #[allow(clippy::too_many_arguments)]
    pub fn payout_signed(
        &mut self,
        ctx: &mut OpCtx<'_>,
        relayer: AccountId,
        attached: u128,
        reference: Digest,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
        auth: &RelayedAuthorization,
    ) -> Result<PayoutId, PayoutError> {
        self.guard_entry(ctx)?;
        self.check_payout_inputs(attached, asset, amount, split_id)?;

        let digest =
            relay::payout_digest(reference, asset, amount, split_id, auth.nonce, auth.deadline);
        let signer = relay::authorize(auth, digest, ctx.now, ctx.authority, &mut self.nonces)?;
        self.distribute(ctx, relayer, Some(signer), reference, asset, amount, split_id)
    }

    // -- internals -----------------------------------------------------

    fn guard_entry(&self, ctx: &OpCtx<'_>) -> Result<(), PayoutError> {
        if ctx.breaker.is_paused() {
            return Err(PayoutError::Paused);
        }
        if self.distributing {
            return Err(PayoutError::Reentered);
        }
        Ok(())
    }

    fn validate_entries(entries: &[ShareEntry]) -> Result<(), PayoutError> {
        if entries.is_empty() {
            return Err(PayoutError::EmptySplit);
        }
        if entries.len() > MAX_SPLIT_RECIPIENTS {
            return Err(PayoutError::TooManyRecipients {
                count: entries.len(),
                max: MAX_SPLIT_RECIPIENTS,
            });
        }
        let mut total: u32 = 0;
        for (index, entry) in entries.iter().enumerate() {
            if entry.recipient.is_zero() {
                return Err(PayoutError::ZeroRecipient { index });
            }
            if entry.share_bps == 0 {
                return Err(PayoutError::ZeroShare { index });
            }
            total += u32::from(entry.share_bps);
        }
        if total != BPS_DENOMINATOR {
            return Err(PayoutError::BadShareSum { total });
        }
        Ok(())
    }

    fn register_split(
        &mut self,
        ctx: &mut OpCtx<'_>,
        defined_by: AccountId,
        entries: Vec<ShareEntry>,
    ) -> SplitId {
        let content_hash = recipients_hash(&entries);
        let id = SplitId(self.splits.len() as u64);
        let recipients = entries.len() as u32;
        self.splits.push(Split {
            entries,
            content_hash,
            defined_by,
            defined_at: ctx.now,
        });

        ctx.events.append(
            ctx.now,
            EngineEvent::SplitDefined {
                split_id: id,
                defined_by,
                content_hash,
                recipients,
            },
        );
        info!(split = %id, recipients, "split defined");
        id
    }

    fn check_payout_inputs(
        &self,
        attached: u128,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
    ) -> Result<(), PayoutError> {
        if amount == 0 {
            return Err(PayoutError::ZeroAmount);
        }
        let required = if asset.is_native() { amount } else { 0 };
        if attached != required {
            return Err(PayoutError::WrongAttachedValue { attached, required });
        }
        if self.split(split_id).is_none() {
            return Err(PayoutError::UnknownSplit(split_id));
        }
        Ok(())
    }

    /// Computes each recipient's part: proportional floor for all but the
    /// last entry, remainder to the last.
    fn parts_for(split: &Split, amount: u128) -> Vec<(AccountId, u128)> {
        let mut parts = Vec::with_capacity(split.entries.len());
        let mut distributed: u128 = 0;
        for entry in &split.entries[..split.entries.len() - 1] {
            let part = bps_of(amount, entry.share_bps);
            distributed += part;
            parts.push((entry.recipient, part));
        }
        let last = split
            .entries
            .last()
            .expect("validated splits are never empty");
        parts.push((last.recipient, amount - distributed));
        parts
    }

    #[allow(clippy::too_many_arguments)]
    fn distribute(
        &mut self,
        ctx: &mut OpCtx<'_>,
        payer: AccountId,
        authorizer: Option<AccountId>,
        reference: Digest,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
    ) -> Result<PayoutId, PayoutError> {
        let parts = Self::parts_for(&self.splits[split_id.0 as usize], amount);
        debug_assert_eq!(parts.iter().map(|(_, p)| p).sum::<u128>(), amount);

        // The custody window is the span of this one operation: counted in
        // before the pull, counted out before the distribution.
        ctx.accounting.custody(asset, amount)?;
        if let Err(err) = ctx.transfer.pull(asset, payer, amount) {
            ctx.accounting
                .release(asset, amount)
                .expect("releasing a just-custodied amount cannot underflow");
            return Err(err.into());
        }
        ctx.accounting
            .release(asset, amount)
            .expect("releasing a just-custodied amount cannot underflow");

        self.distributing = true;
        let pushed = ctx.transfer.push_batch(asset, &parts);
        self.distributing = false;

        if let Err(err) = pushed {
            // The batch applied nothing (sink contract); hand the pulled
            // funds back and surface the failure.
            ctx.transfer
                .push(asset, payer, amount)
                .expect("transfer sink refused to return just-pulled funds");
            return Err(err.into());
        }

        let id = PayoutId(self.payouts.len() as u64);
        self.payouts.push(PayoutRecord {
            reference,
            asset,
            amount,
            split_id,
            payer,
            authorizer,
            at: ctx.now,
        });

        ctx.events.append(
            ctx.now,
            EngineEvent::PayoutExecuted {
                payout_id: id,
                reference,
                asset,
                amount,
                split_id,
                payer,
                authorizer,
            },
        );
        info!(payout = %id, split = %split_id, amount, "payout executed");
        Ok(id)
    }
}
