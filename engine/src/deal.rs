//! # Deal Ledger
//!
//! The bilateral escrow state machine. A sponsor funds a deal for a
//! beneficiary; the beneficiary acknowledges delivery; the sponsor approves
//! release — or, if the sponsor goes quiet, the beneficiary forces
//! settlement after the deadline; or either party escalates to a dispute
//! and an arbitrator decides.
//!
//! ```text
//! Funded ──deliver──> Delivered ──approve/force──> Settled
//!   │                     │
//!   └──────dispute────────┴──> Disputed ──resolve──> Settled | Refunded
//! ```
//!
//! Settled and Refunded are terminal. A deal's `amount` is zeroed exactly
//! once, at its terminal transition — "amount == 0" doubles as the
//! already-settled guard, so no separate boolean can drift out of sync.
//!
//! Every money-releasing path follows the same ordering discipline: the
//! deal record and the accounting guard are finalized *before* the external
//! transfer is issued. Code running inside the transfer sink can therefore
//! only ever observe a deal that is already terminal.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use accord_protocol::asset::Asset;
use accord_protocol::authority::Capability;
use accord_protocol::config::MAX_FEE_BPS;
use accord_protocol::crypto::Digest;
use accord_protocol::identity::AccountId;

use crate::accounting::AccountingError;
use crate::context::OpCtx;
use crate::events::EngineEvent;
use crate::math::bps_of;
use crate::transfer::TransferError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during deal operations.
#[derive(Debug, Error)]
pub enum DealError {
    /// The engine is paused; no state-advancing operation may run.
    #[error("engine is paused")]
    Paused,

    /// Deal amounts must be strictly positive.
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// The null identity cannot be a counterparty.
    #[error("beneficiary must not be the null identity")]
    ZeroBeneficiary,

    /// The deadline must lie strictly in the future at creation time.
    #[error("deadline {deadline} is not in the future (now {now})")]
    DeadlineNotFuture {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Native funding must attach exactly the deal amount; token funding
    /// must attach nothing.
    #[error("attached value {attached} does not match required {required}")]
    WrongAttachedValue { attached: u128, required: u128 },

    /// No deal exists under this identifier.
    #[error("unknown deal {0}")]
    UnknownDeal(DealId),

    /// The deal is not in a status that allows this operation.
    #[error("invalid state: deal is {current}, expected {expected}")]
    InvalidState {
        current: DealStatus,
        expected: &'static str,
    },

    /// The caller is not the party this operation is reserved for.
    #[error("unauthorized: {account} may not perform this action on this deal")]
    Unauthorized { account: AccountId },

    /// The caller lacks the capability this operation requires.
    #[error("missing capability: {account} does not hold {capability}")]
    MissingCapability {
        account: AccountId,
        capability: Capability,
    },

    /// Forced settlement is only available once the deadline has passed.
    #[error("deadline {deadline} not reached yet (now {now})")]
    DeadlineNotReached {
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The deal's amount is already zero — it has already been settled or
    /// refunded.
    #[error("deal already settled")]
    AlreadySettled,

    /// A settlement re-entered the ledger through the transfer sink.
    #[error("settlement already in progress")]
    Reentered,

    /// The requested fee exceeds the protocol cap.
    #[error("fee {requested} bps exceeds maximum {max} bps")]
    FeeTooHigh { requested: u16, max: u16 },

    /// The fee recipient cannot be the null identity.
    #[error("fee recipient must not be the null identity")]
    ZeroFeeRecipient,

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

/// Identifies a deal. Monotonically assigned, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DealId(pub u64);

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deal-{}", self.0)
    }
}

/// The lifecycle status of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealStatus {
    /// Funded by the sponsor; waiting on delivery.
    Funded,
    /// Beneficiary acknowledged delivery; waiting on sponsor approval.
    Delivered,
    /// A party escalated; waiting on arbitration.
    Disputed,
    /// Funds released to the beneficiary (minus fee). Terminal.
    Settled,
    /// Funds returned to the sponsor. Terminal.
    Refunded,
}

impl DealStatus {
    /// `true` for the two terminal statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Settled | DealStatus::Refunded)
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DealStatus::Funded => write!(f, "Funded"),
            DealStatus::Delivered => write!(f, "Delivered"),
            DealStatus::Disputed => write!(f, "Disputed"),
            DealStatus::Settled => write!(f, "Settled"),
            DealStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

/// A bilateral escrow obligation.
///
/// Owned exclusively by the ledger. Never physically deleted — a terminal
/// status plus a zeroed amount is the deletion signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    /// The funding party.
    pub sponsor: AccountId,
    /// The party funds release to on settlement.
    pub beneficiary: AccountId,
    /// What the deal is denominated in.
    pub asset: Asset,
    /// Custodied value. Zeroed exactly once, at the terminal transition.
    pub amount: u128,
    /// After this instant the beneficiary may force settlement of a
    /// delivered deal.
    pub deadline: DateTime<Utc>,
    /// Hash of the off-engine terms document.
    pub terms_digest: Digest,
    /// Hash of the latest evidence document (delivery or dispute).
    pub evidence_digest: Option<Digest>,
    /// When delivery was acknowledged.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: DealStatus,
    /// When the deal was funded.
    pub created_at: DateTime<Utc>,
}

/// Settlement fee configuration.
///
/// A fee only applies when a recipient is configured; with no recipient the
/// full gross amount goes to the beneficiary, whatever `fee_bps` says.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Fee in basis points, capped at [`MAX_FEE_BPS`].
    pub fee_bps: u16,
    /// Where extracted fees go.
    pub fee_recipient: Option<AccountId>,
}

// ---------------------------------------------------------------------------
// DealLedger
// ---------------------------------------------------------------------------

/// The deal arena plus fee policy and reputation counters.
#[derive(Debug, Default)]
pub struct DealLedger {
    deals: Vec<Deal>,
    fee: FeePolicy,
    completed: HashMap<AccountId, u64>,
    disputes: HashMap<AccountId, u64>,
    /// Re-entry sentinel, set across the external transfer call.
    settling: bool,
}

impl DealLedger {
    /// Creates an empty ledger with a zero fee policy.
    pub fn new() -> Self {
        Self::default()
    }

    // -- reads ---------------------------------------------------------

    /// Looks up a deal.
    pub fn deal(&self, id: DealId) -> Option<&Deal> {
        self.deals.get(id.0 as usize)
    }

    /// Number of deals ever created.
    pub fn deal_count(&self) -> u64 {
        self.deals.len() as u64
    }

    /// The active fee policy.
    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fee
    }

    /// How many deals this account has completed (as either party).
    pub fn completed_count(&self, account: &AccountId) -> u64 {
        self.completed.get(account).copied().unwrap_or(0)
    }

    /// How many disputes this account has been involved in (as either party).
    pub fn dispute_count(&self, account: &AccountId) -> u64 {
        self.disputes.get(account).copied().unwrap_or(0)
    }

    /// Sum of custodied amounts over non-terminal deals for `asset` — the
    /// ledger's contribution to the accounting invariant.
    pub fn open_custody(&self, asset: Asset) -> u128 {
        self.deals
            .iter()
            .filter(|d| d.asset == asset && !d.status.is_terminal())
            .map(|d| d.amount)
            .sum()
    }

    // -- entry points --------------------------------------------------

    /// Funds a new deal.
    ///
    /// Native deals must attach exactly `amount`; token deals attach
    /// nothing and are pulled under the caller's prior allowance.
    ///
    /// # Errors
    ///
    /// Validation errors for a zero amount, null beneficiary, non-future
    /// deadline, or mismatched attached value; transfer errors if the pull
    /// fails. On any error nothing is recorded.
    #[allow(clippy::too_many_arguments)]
    pub fn create_deal(
        &mut self,
        ctx: &mut OpCtx<'_>,
        sponsor: AccountId,
        attached: u128,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
        deadline: DateTime<Utc>,
        terms_digest: Digest,
    ) -> Result<DealId, DealError> {
        self.guard_entry(ctx)?;
        if amount == 0 {
            return Err(DealError::ZeroAmount);
        }
        if beneficiary.is_zero() {
            return Err(DealError::ZeroBeneficiary);
        }
        if deadline <= ctx.now {
            return Err(DealError::DeadlineNotFuture {
                deadline,
                now: ctx.now,
            });
        }
        let required = if asset.is_native() { amount } else { 0 };
        if attached != required {
            return Err(DealError::WrongAttachedValue { attached, required });
        }

        ctx.accounting.custody(asset, amount)?;
        if let Err(err) = ctx.transfer.pull(asset, sponsor, amount) {
            ctx.accounting
                .release(asset, amount)
                .expect("releasing a just-custodied amount cannot underflow");
            return Err(err.into());
        }

        let id = DealId(self.deals.len() as u64);
        self.deals.push(Deal {
            sponsor,
            beneficiary,
            asset,
            amount,
            deadline,
            terms_digest,
            evidence_digest: None,
            delivered_at: None,
            status: DealStatus::Funded,
            created_at: ctx.now,
        });

        ctx.events.append(
            ctx.now,
            EngineEvent::DealCreated {
                deal_id: id,
                sponsor,
                beneficiary,
                asset,
                amount,
                deadline,
                terms_digest,
            },
        );
        info!(deal = %id, %asset, amount, "deal funded");
        Ok(id)
    }

    /// Beneficiary acknowledges delivery, attaching evidence.
    ///
    /// State-record side effects only — no value moves.
    pub fn mark_delivered(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        deal_id: DealId,
        evidence_digest: Digest,
    ) -> Result<(), DealError> {
        self.guard_entry(ctx)?;
        let deal = self
            .deals
            .get_mut(deal_id.0 as usize)
            .ok_or(DealError::UnknownDeal(deal_id))?;
        if caller != deal.beneficiary {
            return Err(DealError::Unauthorized { account: caller });
        }
        if deal.status != DealStatus::Funded {
            return Err(DealError::InvalidState {
                current: deal.status,
                expected: "Funded",
            });
        }

        deal.evidence_digest = Some(evidence_digest);
        deal.delivered_at = Some(ctx.now);
        deal.status = DealStatus::Delivered;

        ctx.events.append(
            ctx.now,
            EngineEvent::DealDelivered {
                deal_id,
                evidence_digest,
                delivered_at: ctx.now,
            },
        );
        info!(deal = %deal_id, "delivery acknowledged");
        Ok(())
    }

    /// Sponsor approves a delivered deal and releases funds.
    pub fn approve_and_settle(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        deal_id: DealId,
    ) -> Result<(), DealError> {
        self.guard_entry(ctx)?;
        let deal = self
            .deals
            .get(deal_id.0 as usize)
            .ok_or(DealError::UnknownDeal(deal_id))?;
        if caller != deal.sponsor {
            return Err(DealError::Unauthorized { account: caller });
        }
        if deal.status != DealStatus::Delivered {
            return Err(DealError::InvalidState {
                current: deal.status,
                expected: "Delivered",
            });
        }
        self.settle(ctx, deal_id)
    }

    /// Beneficiary forces settlement of a delivered deal once the deadline
    /// has passed — the remedy against a sponsor who acknowledges nothing
    /// and goes quiet.
    pub fn force_settle(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        deal_id: DealId,
    ) -> Result<(), DealError> {
        self.guard_entry(ctx)?;
        let deal = self
            .deals
            .get(deal_id.0 as usize)
            .ok_or(DealError::UnknownDeal(deal_id))?;
        if caller != deal.beneficiary {
            return Err(DealError::Unauthorized { account: caller });
        }
        if deal.status != DealStatus::Delivered {
            return Err(DealError::InvalidState {
                current: deal.status,
                expected: "Delivered",
            });
        }
        if ctx.now < deal.deadline {
            return Err(DealError::DeadlineNotReached {
                deadline: deal.deadline,
                now: ctx.now,
            });
        }
        self.settle(ctx, deal_id)
    }

    /// Either party escalates to arbitration. No value moves; both parties'
    /// dispute counters tick up.
    pub fn raise_dispute(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        deal_id: DealId,
        reason_code: u32,
        evidence_digest: Digest,
    ) -> Result<(), DealError> {
        self.guard_entry(ctx)?;
        let deal = self
            .deals
            .get_mut(deal_id.0 as usize)
            .ok_or(DealError::UnknownDeal(deal_id))?;
        if caller != deal.sponsor && caller != deal.beneficiary {
            return Err(DealError::Unauthorized { account: caller });
        }
        if !matches!(deal.status, DealStatus::Funded | DealStatus::Delivered) {
            return Err(DealError::InvalidState {
                current: deal.status,
                expected: "Funded or Delivered",
            });
        }

        deal.status = DealStatus::Disputed;
        deal.evidence_digest = Some(evidence_digest);
        let (sponsor, beneficiary) = (deal.sponsor, deal.beneficiary);
        *self.disputes.entry(sponsor).or_insert(0) += 1;
        *self.disputes.entry(beneficiary).or_insert(0) += 1;

        ctx.events.append(
            ctx.now,
            EngineEvent::DealDisputed {
                deal_id,
                raised_by: caller,
                reason_code,
                evidence_digest,
            },
        );
        info!(deal = %deal_id, reason_code, "dispute raised");
        Ok(())
    }

    /// Arbitrator (or administrator) rules on a disputed deal: refund the
    /// sponsor in full, or settle to the beneficiary under the fee policy.
    pub fn resolve_dispute(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        deal_id: DealId,
        refund: bool,
    ) -> Result<(), DealError> {
        self.guard_entry(ctx)?;
        if !ctx.authority.has_capability(&caller, Capability::Arbitrator)
            && !ctx
                .authority
                .has_capability(&caller, Capability::Administrator)
        {
            return Err(DealError::MissingCapability {
                account: caller,
                capability: Capability::Arbitrator,
            });
        }
        let deal = self
            .deals
            .get(deal_id.0 as usize)
            .ok_or(DealError::UnknownDeal(deal_id))?;
        if deal.status != DealStatus::Disputed {
            return Err(DealError::InvalidState {
                current: deal.status,
                expected: "Disputed",
            });
        }

        if refund {
            self.refund(ctx, deal_id)
        } else {
            self.settle(ctx, deal_id)
        }
    }

    /// Administrator updates the settlement fee policy.
    pub fn set_fee_policy(
        &mut self,
        ctx: &mut OpCtx<'_>,
        caller: AccountId,
        fee_bps: u16,
        fee_recipient: Option<AccountId>,
    ) -> Result<(), DealError> {
        self.guard_entry(ctx)?;
        if !ctx
            .authority
            .has_capability(&caller, Capability::Administrator)
        {
            return Err(DealError::MissingCapability {
                account: caller,
                capability: Capability::Administrator,
            });
        }
        if fee_bps > MAX_FEE_BPS {
            return Err(DealError::FeeTooHigh {
                requested: fee_bps,
                max: MAX_FEE_BPS,
            });
        }
        if matches!(fee_recipient, Some(r) if r.is_zero()) {
            return Err(DealError::ZeroFeeRecipient);
        }

        self.fee = FeePolicy {
            fee_bps,
            fee_recipient,
        };
        ctx.events.append(
            ctx.now,
            EngineEvent::FeePolicyUpdated {
                fee_bps,
                fee_recipient,
            },
        );
        info!(fee_bps, "fee policy updated");
        Ok(())
    }

    // -- internals -----------------------------------------------------

    fn guard_entry(&self, ctx: &OpCtx<'_>) -> Result<(), DealError> {
        if ctx.breaker.is_paused() {
            return Err(DealError::Paused);
        }
        if self.settling {
            return Err(DealError::Reentered);
        }
        Ok(())
    }

    /// The shared settlement routine behind approve, force, and
    /// dispute-settle.
    ///
    /// Ordering is the load-bearing part: amount zeroed, status set
    /// terminal, and accounting decremented strictly before the external
    /// transfer. If the transfer then fails, the finalization is restored —
    /// the sink has already returned by that point, so no third-party code
    /// can observe the rollback in progress.
    fn settle(&mut self, ctx: &mut OpCtx<'_>, deal_id: DealId) -> Result<(), DealError> {
        let idx = deal_id.0 as usize;
        let (gross, asset, sponsor, beneficiary, prev_status) = {
            let deal = &self.deals[idx];
            (
                deal.amount,
                deal.asset,
                deal.sponsor,
                deal.beneficiary,
                deal.status,
            )
        };
        if gross == 0 {
            return Err(DealError::AlreadySettled);
        }

        let fee = match self.fee.fee_recipient {
            Some(_) => bps_of(gross, self.fee.fee_bps),
            None => 0,
        };
        let net = gross - fee;

        // Finalize before interacting.
        {
            let deal = &mut self.deals[idx];
            deal.amount = 0;
            deal.status = DealStatus::Settled;
        }
        ctx.accounting.release(asset, gross)?;

        let mut outgoing: Vec<(AccountId, u128)> = Vec::with_capacity(2);
        if fee > 0 {
            let recipient = self
                .fee
                .fee_recipient
                .expect("fee is only nonzero with a recipient configured");
            outgoing.push((recipient, fee));
        }
        outgoing.push((beneficiary, net));

        self.settling = true;
        let pushed = ctx.transfer.push_batch(asset, &outgoing);
        self.settling = false;

        if let Err(err) = pushed {
            let deal = &mut self.deals[idx];
            deal.amount = gross;
            deal.status = prev_status;
            ctx.accounting
                .custody(asset, gross)
                .expect("restoring a just-released amount cannot overflow");
            return Err(err.into());
        }

        *self.completed.entry(sponsor).or_insert(0) += 1;
        *self.completed.entry(beneficiary).or_insert(0) += 1;

        ctx.events.append(
            ctx.now,
            EngineEvent::DealSettled {
                deal_id,
                beneficiary,
                asset,
                gross,
                fee,
                net,
            },
        );
        info!(deal = %deal_id, gross, fee, net, "deal settled");
        Ok(())
    }

    /// Full refund to the sponsor; same finalize-then-transfer discipline
    /// as [`settle`](Self::settle).
    fn refund(&mut self, ctx: &mut OpCtx<'_>, deal_id: DealId) -> Result<(), DealError> {
        let idx = deal_id.0 as usize;
        let (amount, asset, sponsor, prev_status) = {
            let deal = &self.deals[idx];
            (deal.amount, deal.asset, deal.sponsor, deal.status)
        };
        if amount == 0 {
            return Err(DealError::AlreadySettled);
        }

        {
            let deal = &mut self.deals[idx];
            deal.amount = 0;
            deal.status = DealStatus::Refunded;
        }
        ctx.accounting.release(asset, amount)?;

        self.settling = true;
        let pushed = ctx.transfer.push(asset, sponsor, amount);
        self.settling = false;

        if let Err(err) = pushed {
            let deal = &mut self.deals[idx];
            deal.amount = amount;
            deal.status = prev_status;
            ctx.accounting
                .custody(asset, amount)
                .expect("restoring a just-released amount cannot overflow");
            return Err(err.into());
        }

        ctx.events.append(
            ctx.now,
            EngineEvent::DealRefunded {
                deal_id,
                sponsor,
                asset,
                amount,
            },
        );
        info!(deal = %deal_id, amount, "deal refunded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use accord_protocol::authority::{StaticAuthority, Switch};
    use accord_protocol::crypto::Keypair;

    use crate::accounting::AccountingGuard;
    use crate::events::EventLog;
    use crate::transfer::BalanceBook;

    fn account() -> AccountId {
        AccountId::from_public_key(&Keypair::generate().public_key())
    }

    /// Everything a deal operation needs, owned in one place so tests can
    /// mint a fresh `OpCtx` per call.
    struct Bench {
        authority: StaticAuthority,
        breaker: Switch,
        book: BalanceBook,
        accounting: AccountingGuard,
        events: EventLog,
        now: DateTime<Utc>,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                authority: StaticAuthority::new(),
                breaker: Switch::new(),
                book: BalanceBook::new(account()),
                accounting: AccountingGuard::new(),
                events: EventLog::new(),
                now: Utc::now(),
            }
        }

        fn ctx(&mut self) -> OpCtx<'_> {
            OpCtx {
                now: self.now,
                authority: &self.authority,
                breaker: &self.breaker,
                transfer: &mut self.book,
                accounting: &mut self.accounting,
                events: &mut self.events,
            }
        }
    }

    /// Funds a native deal of `amount` and returns (sponsor, beneficiary, id).
    fn funded_deal(
        bench: &mut Bench,
        ledger: &mut DealLedger,
        amount: u128,
    ) -> (AccountId, AccountId, DealId) {
        let sponsor = account();
        let beneficiary = account();
        bench.book.mint(sponsor, Asset::Native, amount * 10);
        let deadline = bench.now + Duration::days(30);
        let id = ledger
            .create_deal(
                &mut bench.ctx(),
                sponsor,
                amount,
                beneficiary,
                Asset::Native,
                amount,
                deadline,
                Digest::sha256(b"terms"),
            )
            .unwrap();
        (sponsor, beneficiary, id)
    }

    #[test]
    fn create_funds_and_custodies() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, _, id) = funded_deal(&mut bench, &mut ledger, 1_000);

        let deal = ledger.deal(id).unwrap();
        assert_eq!(deal.status, DealStatus::Funded);
        assert_eq!(deal.amount, 1_000);
        assert_eq!(bench.accounting.custodied(Asset::Native), 1_000);
        assert_eq!(bench.book.balance(&sponsor, Asset::Native), 9_000);
        assert_eq!(bench.events.len(), 1);
    }

    #[test]
    fn create_rejects_zero_amount() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let sponsor = account();
        let deadline = bench.now + Duration::days(1);
        let err = ledger
            .create_deal(
                &mut bench.ctx(),
                sponsor,
                0,
                account(),
                Asset::Native,
                0,
                deadline,
                Digest::ZERO,
            )
            .unwrap_err();
        assert!(matches!(err, DealError::ZeroAmount));
        assert_eq!(ledger.deal_count(), 0);
        assert!(bench.events.is_empty());
    }

    #[test]
    fn create_rejects_past_deadline() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let sponsor = account();
        bench.book.mint(sponsor, Asset::Native, 100);
        let now = bench.now;
        let err = ledger
            .create_deal(
                &mut bench.ctx(),
                sponsor,
                100,
                account(),
                Asset::Native,
                100,
                now,
                Digest::ZERO,
            )
            .unwrap_err();
        assert!(matches!(err, DealError::DeadlineNotFuture { .. }));
    }

    #[test]
    fn create_rejects_wrong_attached_value() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let sponsor = account();
        bench.book.mint(sponsor, Asset::Native, 100);
        let deadline = bench.now + Duration::days(1);
        let err = ledger
            .create_deal(
                &mut bench.ctx(),
                sponsor,
                99,
                account(),
                Asset::Native,
                100,
                deadline,
                Digest::ZERO,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DealError::WrongAttachedValue {
                attached: 99,
                required: 100
            }
        ));
        // Failed creation leaves no trace.
        assert_eq!(bench.accounting.custodied(Asset::Native), 0);
        assert_eq!(bench.book.balance(&sponsor, Asset::Native), 100);
    }

    #[test]
    fn failed_pull_leaves_no_custody() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let sponsor = account(); // no balance minted
        let deadline = bench.now + Duration::days(1);
        let err = ledger
            .create_deal(
                &mut bench.ctx(),
                sponsor,
                100,
                account(),
                Asset::Native,
                100,
                deadline,
                Digest::ZERO,
            )
            .unwrap_err();
        assert!(matches!(err, DealError::Transfer(_)));
        assert_eq!(bench.accounting.custodied(Asset::Native), 0);
        assert_eq!(ledger.deal_count(), 0);
    }

    #[test]
    fn only_beneficiary_marks_delivered() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);

        let err = ledger
            .mark_delivered(&mut bench.ctx(), sponsor, id, Digest::sha256(b"ev"))
            .unwrap_err();
        assert!(matches!(err, DealError::Unauthorized { .. }));

        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::sha256(b"ev"))
            .unwrap();
        let deal = ledger.deal(id).unwrap();
        assert_eq!(deal.status, DealStatus::Delivered);
        assert!(deal.delivered_at.is_some());
        assert_eq!(deal.evidence_digest, Some(Digest::sha256(b"ev")));
    }

    #[test]
    fn approve_settles_with_fee_split() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let admin = account();
        let fee_recipient = account();
        bench.authority.grant(admin, Capability::Administrator);
        ledger
            .set_fee_policy(&mut bench.ctx(), admin, 200, Some(fee_recipient))
            .unwrap();

        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 1_000);
        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap();
        ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap();

        let deal = ledger.deal(id).unwrap();
        assert_eq!(deal.status, DealStatus::Settled);
        assert_eq!(deal.amount, 0);
        assert_eq!(bench.book.balance(&fee_recipient, Asset::Native), 20);
        assert_eq!(bench.book.balance(&beneficiary, Asset::Native), 980);
        assert_eq!(bench.accounting.custodied(Asset::Native), 0);
        assert_eq!(ledger.completed_count(&sponsor), 1);
        assert_eq!(ledger.completed_count(&beneficiary), 1);
    }

    #[test]
    fn settle_without_fee_recipient_pays_gross() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 1_000);
        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap();
        ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap();
        assert_eq!(bench.book.balance(&beneficiary, Asset::Native), 1_000);
    }

    #[test]
    fn approve_requires_delivered() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, _, id) = funded_deal(&mut bench, &mut ledger, 100);
        let err = ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap_err();
        assert!(matches!(
            err,
            DealError::InvalidState {
                current: DealStatus::Funded,
                ..
            }
        ));
    }

    #[test]
    fn double_settlement_is_rejected() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);
        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap();
        ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap();
        let err = ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap_err();
        // Terminal status trips the state check before the amount guard.
        assert!(matches!(err, DealError::InvalidState { .. }));
    }

    #[test]
    fn force_settle_only_after_deadline() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (_, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 500);
        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap();

        let err = ledger
            .force_settle(&mut bench.ctx(), beneficiary, id)
            .unwrap_err();
        assert!(matches!(err, DealError::DeadlineNotReached { .. }));

        bench.now += Duration::days(31);
        ledger
            .force_settle(&mut bench.ctx(), beneficiary, id)
            .unwrap();
        assert_eq!(bench.book.balance(&beneficiary, Asset::Native), 500);
    }

    #[test]
    fn dispute_then_refund_returns_funds() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let arbitrator = account();
        bench.authority.grant(arbitrator, Capability::Arbitrator);

        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);
        let before = bench.book.balance(&sponsor, Asset::Native);

        ledger
            .raise_dispute(&mut bench.ctx(), sponsor, id, 7, Digest::sha256(b"bad"))
            .unwrap();
        assert_eq!(ledger.dispute_count(&sponsor), 1);
        assert_eq!(ledger.dispute_count(&beneficiary), 1);

        ledger
            .resolve_dispute(&mut bench.ctx(), arbitrator, id, true)
            .unwrap();
        let deal = ledger.deal(id).unwrap();
        assert_eq!(deal.status, DealStatus::Refunded);
        assert_eq!(deal.amount, 0);
        assert_eq!(bench.book.balance(&sponsor, Asset::Native), before + 100);
        assert_eq!(bench.book.balance(&beneficiary, Asset::Native), 0);
        assert_eq!(bench.accounting.custodied(Asset::Native), 0);
    }

    #[test]
    fn dispute_resolution_can_settle_to_beneficiary() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let arbitrator = account();
        bench.authority.grant(arbitrator, Capability::Arbitrator);

        let (_, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);
        ledger
            .raise_dispute(&mut bench.ctx(), beneficiary, id, 1, Digest::ZERO)
            .unwrap();
        ledger
            .resolve_dispute(&mut bench.ctx(), arbitrator, id, false)
            .unwrap();
        assert_eq!(ledger.deal(id).unwrap().status, DealStatus::Settled);
        assert_eq!(bench.book.balance(&beneficiary, Asset::Native), 100);
    }

    #[test]
    fn dispute_resolution_requires_capability() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, _, id) = funded_deal(&mut bench, &mut ledger, 100);
        ledger
            .raise_dispute(&mut bench.ctx(), sponsor, id, 1, Digest::ZERO)
            .unwrap();

        let nobody = account();
        let err = ledger
            .resolve_dispute(&mut bench.ctx(), nobody, id, true)
            .unwrap_err();
        assert!(matches!(err, DealError::MissingCapability { .. }));
        assert_eq!(ledger.deal(id).unwrap().status, DealStatus::Disputed);
    }

    #[test]
    fn dispute_rejected_on_terminal_deal() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);
        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap();
        ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap();
        let err = ledger
            .raise_dispute(&mut bench.ctx(), sponsor, id, 1, Digest::ZERO)
            .unwrap_err();
        assert!(matches!(err, DealError::InvalidState { .. }));
    }

    #[test]
    fn paused_engine_rejects_everything() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);

        bench.breaker.set_paused(true);
        let err = ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap_err();
        assert!(matches!(err, DealError::Paused));
        let err = ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap_err();
        assert!(matches!(err, DealError::Paused));
        assert_eq!(ledger.deal(id).unwrap().status, DealStatus::Funded);
    }

    #[test]
    fn fee_policy_rejects_over_cap() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let admin = account();
        bench.authority.grant(admin, Capability::Administrator);
        let err = ledger
            .set_fee_policy(&mut bench.ctx(), admin, MAX_FEE_BPS + 1, Some(account()))
            .unwrap_err();
        assert!(matches!(err, DealError::FeeTooHigh { .. }));
    }

    #[test]
    fn fee_policy_requires_administrator() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let err = ledger
            .set_fee_policy(&mut bench.ctx(), account(), 100, None)
            .unwrap_err();
        assert!(matches!(err, DealError::MissingCapability { .. }));
    }

    #[test]
    fn open_custody_tracks_non_terminal_deals() {
        let mut bench = Bench::new();
        let mut ledger = DealLedger::new();
        let (sponsor, beneficiary, id) = funded_deal(&mut bench, &mut ledger, 100);
        let (_, _, _id2) = funded_deal(&mut bench, &mut ledger, 250);

        assert_eq!(ledger.open_custody(Asset::Native), 350);
        assert!(bench
            .accounting
            .verify(Asset::Native, ledger.open_custody(Asset::Native)));

        ledger
            .mark_delivered(&mut bench.ctx(), beneficiary, id, Digest::ZERO)
            .unwrap();
        ledger
            .approve_and_settle(&mut bench.ctx(), sponsor, id)
            .unwrap();
        assert_eq!(ledger.open_custody(Asset::Native), 250);
        assert!(bench
            .accounting
            .verify(Asset::Native, ledger.open_custody(Asset::Native)));
    }
}
