//! # Settlement Hub
//!
//! The facade that owns every engine component behind a single lock. The
//! concurrency contract of the engine is linearizability — each operation
//! runs to completion with nothing interleaved inside it — and the hub
//! implements the bluntest valid strategy: one global mutex, one lock
//! acquisition per entry point, one clock reading threaded through.
//!
//! Embedders that need finer-grained strategies can wire the components up
//! themselves; everything the hub does goes through the same public entry
//! points on [`DealLedger`], [`GrantVault`], and [`PayoutEngine`].
//!
//! The hub also carries the external receipt-minting collaborator: after a
//! deal settles, a [`ReceiptMinter`] (if configured) is invoked with the
//! settlement facts. Minting happens strictly after settlement has
//! committed — a minting failure is logged and swallowed, because the
//! settlement already happened and un-happening it is not on the menu.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use accord_protocol::asset::Asset;
use accord_protocol::authority::{Authority, CircuitBreaker};
use accord_protocol::crypto::Digest;
use accord_protocol::identity::AccountId;

use crate::accounting::AccountingGuard;
use crate::context::{Clock, OpCtx, SystemClock};
use crate::deal::{Deal, DealError, DealId, DealLedger};
use crate::events::{EngineEvent, EventLog, EventRecord};
use crate::grant::{Grant, GrantError, GrantId, GrantVault};
use crate::payout::{PayoutEngine, PayoutError, PayoutId, PayoutRecord, ShareEntry, Split, SplitId};
use crate::relay::RelayedAuthorization;
use crate::transfer::BalanceBook;

// ---------------------------------------------------------------------------
// ReceiptMinter
// ---------------------------------------------------------------------------

/// The settlement facts handed to the external receipt-minting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub deal_id: DealId,
    pub sponsor: AccountId,
    pub beneficiary: AccountId,
    pub asset: Asset,
    pub gross: u128,
    pub fee: u128,
    pub net: u128,
    pub at: DateTime<Utc>,
}

/// External non-fungible receipt minting service, consumed at its interface
/// only. Invoked after a deal settles through the hub.
pub trait ReceiptMinter: Send + Sync {
    /// Mint a receipt for a settled deal. Errors are reported, not acted on.
    fn mint(&self, receipt: &SettlementReceipt) -> Result<(), String>;
}

// ---------------------------------------------------------------------------
// SettlementHub
// ---------------------------------------------------------------------------

struct HubState {
    deals: DealLedger,
    grants: GrantVault,
    payouts: PayoutEngine,
    accounting: AccountingGuard,
    book: BalanceBook,
    events: EventLog,
}

/// The components, reborrowed disjointly from the locked state so that one
/// of them can run against an [`OpCtx`] borrowing the rest.
struct Components<'a> {
    deals: &'a mut DealLedger,
    grants: &'a mut GrantVault,
    payouts: &'a mut PayoutEngine,
}

impl HubState {
    fn split<'a>(
        &'a mut self,
        now: DateTime<Utc>,
        authority: &'a dyn Authority,
        breaker: &'a dyn CircuitBreaker,
    ) -> (OpCtx<'a>, Components<'a>) {
        (
            OpCtx {
                now,
                authority,
                breaker,
                transfer: &mut self.book,
                accounting: &mut self.accounting,
                events: &mut self.events,
            },
            Components {
                deals: &mut self.deals,
                grants: &mut self.grants,
                payouts: &mut self.payouts,
            },
        )
    }
}

/// Every component of the engine behind one mutex.
pub struct SettlementHub<C: Clock = SystemClock> {
    authority: Arc<dyn Authority + Send + Sync>,
    breaker: Arc<dyn CircuitBreaker + Send + Sync>,
    clock: C,
    minter: Option<Arc<dyn ReceiptMinter>>,
    state: Mutex<HubState>,
}

impl SettlementHub<SystemClock> {
    /// Creates a hub on the wall clock. `custodian` is the account the
    /// in-memory balance book holds custodied value under;
    /// `grants_require_attestation` fixes the vault's attestation policy.
    pub fn new(
        custodian: AccountId,
        authority: Arc<dyn Authority + Send + Sync>,
        breaker: Arc<dyn CircuitBreaker + Send + Sync>,
        grants_require_attestation: bool,
    ) -> Self {
        Self::with_clock(
            custodian,
            authority,
            breaker,
            grants_require_attestation,
            SystemClock,
        )
    }
}

impl<C: Clock> SettlementHub<C> {
    /// Creates a hub on an explicit clock (tests use [`ManualClock`]).
    ///
    /// [`ManualClock`]: crate::context::ManualClock
    pub fn with_clock(
        custodian: AccountId,
        authority: Arc<dyn Authority + Send + Sync>,
        breaker: Arc<dyn CircuitBreaker + Send + Sync>,
        grants_require_attestation: bool,
        clock: C,
    ) -> Self {
        Self {
            authority,
            breaker,
            clock,
            minter: None,
            state: Mutex::new(HubState {
                deals: DealLedger::new(),
                grants: GrantVault::new(grants_require_attestation),
                payouts: PayoutEngine::new(),
                accounting: AccountingGuard::new(),
                book: BalanceBook::new(custodian),
                events: EventLog::new(),
            }),
        }
    }

    /// Attaches the external receipt-minting collaborator.
    pub fn with_minter(mut self, minter: Arc<dyn ReceiptMinter>) -> Self {
        self.minter = Some(minter);
        self
    }

    // -- deposit rails (embedder/test seam) ----------------------------

    /// Seeds a holder's balance. Deposit rails proper are out of scope;
    /// this is the seam they connect to.
    pub fn seed_balance(&self, holder: AccountId, asset: Asset, amount: u128) {
        self.state.lock().book.mint(holder, asset, amount);
    }

    /// Records a token allowance from `owner` to the custodian.
    pub fn approve(&self, owner: AccountId, asset: Asset, amount: u128) {
        self.state.lock().book.approve(owner, asset, amount);
    }

    // -- deal entry points ---------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_deal(
        &self,
        sponsor: AccountId,
        attached: u128,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
        deadline: DateTime<Utc>,
        terms_digest: Digest,
    ) -> Result<DealId, DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.deals.create_deal(
            &mut ctx,
            sponsor,
            attached,
            beneficiary,
            asset,
            amount,
            deadline,
            terms_digest,
        )
    }

    pub fn mark_delivered(
        &self,
        caller: AccountId,
        deal_id: DealId,
        evidence_digest: Digest,
    ) -> Result<(), DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts
            .deals
            .mark_delivered(&mut ctx, caller, deal_id, evidence_digest)
    }

    pub fn approve_and_settle(&self, caller: AccountId, deal_id: DealId) -> Result<(), DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.deals.approve_and_settle(&mut ctx, caller, deal_id)?;
        self.mint_receipt(&guard, deal_id);
        Ok(())
    }

    pub fn force_settle(&self, caller: AccountId, deal_id: DealId) -> Result<(), DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.deals.force_settle(&mut ctx, caller, deal_id)?;
        self.mint_receipt(&guard, deal_id);
        Ok(())
    }

    pub fn raise_dispute(
        &self,
        caller: AccountId,
        deal_id: DealId,
        reason_code: u32,
        evidence_digest: Digest,
    ) -> Result<(), DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts
            .deals
            .raise_dispute(&mut ctx, caller, deal_id, reason_code, evidence_digest)
    }

    pub fn resolve_dispute(
        &self,
        caller: AccountId,
        deal_id: DealId,
        refund: bool,
    ) -> Result<(), DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts
            .deals
            .resolve_dispute(&mut ctx, caller, deal_id, refund)?;
        if !refund {
            self.mint_receipt(&guard, deal_id);
        }
        Ok(())
    }

    pub fn set_fee_policy(
        &self,
        caller: AccountId,
        fee_bps: u16,
        fee_recipient: Option<AccountId>,
    ) -> Result<(), DealError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts
            .deals
            .set_fee_policy(&mut ctx, caller, fee_bps, fee_recipient)
    }

    // -- grant entry points --------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_grant(
        &self,
        sponsor: AccountId,
        attached: u128,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
        unlock_time: DateTime<Utc>,
        terms_digest: Digest,
    ) -> Result<GrantId, GrantError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.grants.create_grant(
            &mut ctx,
            sponsor,
            attached,
            beneficiary,
            asset,
            amount,
            unlock_time,
            terms_digest,
        )
    }

    pub fn attest_grant(
        &self,
        caller: AccountId,
        grant_id: GrantId,
        attestation_digest: Digest,
    ) -> Result<(), GrantError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts
            .grants
            .attest_grant(&mut ctx, caller, grant_id, attestation_digest)
    }

    pub fn withdraw_grant(&self, caller: AccountId, grant_id: GrantId) -> Result<(), GrantError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.grants.withdraw(&mut ctx, caller, grant_id)
    }

    pub fn refund_grant(&self, caller: AccountId, grant_id: GrantId) -> Result<(), GrantError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.grants.refund(&mut ctx, caller, grant_id)
    }

    // -- payout entry points -------------------------------------------

    pub fn define_split(
        &self,
        caller: AccountId,
        entries: Vec<ShareEntry>,
    ) -> Result<SplitId, PayoutError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.payouts.define_split(&mut ctx, caller, entries)
    }

    pub fn define_split_signed(
        &self,
        entries: Vec<ShareEntry>,
        auth: &RelayedAuthorization,
    ) -> Result<SplitId, PayoutError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.payouts.define_split_signed(&mut ctx, entries, auth)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn payout(
        &self,
        caller: AccountId,
        attached: u128,
        reference: Digest,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
    ) -> Result<PayoutId, PayoutError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts
            .payouts
            .payout(&mut ctx, caller, attached, reference, asset, amount, split_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn payout_signed(
        &self,
        relayer: AccountId,
        attached: u128,
        reference: Digest,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
        auth: &RelayedAuthorization,
    ) -> Result<PayoutId, PayoutError> {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let (mut ctx, parts) = guard.split(now, &*self.authority, &*self.breaker);
        parts.payouts.payout_signed(
            &mut ctx, relayer, attached, reference, asset, amount, split_id, auth,
        )
    }

    // -- reads ---------------------------------------------------------

    pub fn deal(&self, id: DealId) -> Option<Deal> {
        self.state.lock().deals.deal(id).cloned()
    }

    pub fn grant(&self, id: GrantId) -> Option<Grant> {
        self.state.lock().grants.grant(id).cloned()
    }

    pub fn split(&self, id: SplitId) -> Option<Split> {
        self.state.lock().payouts.split(id).cloned()
    }

    pub fn payout_record(&self, id: PayoutId) -> Option<PayoutRecord> {
        self.state.lock().payouts.payout_record(id).cloned()
    }

    pub fn split_count(&self) -> u64 {
        self.state.lock().payouts.split_count()
    }

    pub fn expected_nonce(&self, signer: &AccountId) -> u64 {
        self.state.lock().payouts.expected_nonce(signer)
    }

    pub fn balance(&self, holder: &AccountId, asset: Asset) -> u128 {
        self.state.lock().book.balance(holder, asset)
    }

    pub fn custodied(&self, asset: Asset) -> u128 {
        self.state.lock().accounting.custodied(asset)
    }

    pub fn completed_count(&self, account: &AccountId) -> u64 {
        self.state.lock().deals.completed_count(account)
    }

    pub fn dispute_count(&self, account: &AccountId) -> u64 {
        self.state.lock().deals.dispute_count(account)
    }

    /// Snapshot of the audit journal.
    pub fn events(&self) -> Vec<EventRecord> {
        self.state.lock().events.records().to_vec()
    }

    /// The journal in the JSON-lines export format the external indexer
    /// consumes.
    pub fn export_events(&self) -> Result<String, serde_json::Error> {
        self.state.lock().events.export_json_lines()
    }

    // -- internals -----------------------------------------------------

    /// Hands the settlement facts to the minter, if one is attached. Runs
    /// after the settlement committed; failures are logged and dropped.
    fn mint_receipt(&self, st: &HubState, deal_id: DealId) {
        let Some(minter) = &self.minter else {
            return;
        };
        let settled = st.events.records().iter().rev().find_map(|r| match &r.event {
            EngineEvent::DealSettled {
                deal_id: id,
                asset,
                gross,
                fee,
                net,
                ..
            } if *id == deal_id => Some((*asset, *gross, *fee, *net, r.at)),
            _ => None,
        });
        let Some((asset, gross, fee, net, at)) = settled else {
            return;
        };
        let Some(deal) = st.deals.deal(deal_id) else {
            return;
        };
        let receipt = SettlementReceipt {
            deal_id,
            sponsor: deal.sponsor,
            beneficiary: deal.beneficiary,
            asset,
            gross,
            fee,
            net,
            at,
        };
        if let Err(reason) = minter.mint(&receipt) {
            warn!(deal = %deal_id, %reason, "receipt minting failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use accord_protocol::authority::{Capability, StaticAuthority, Switch};
    use accord_protocol::crypto::Keypair;

    use crate::context::ManualClock;

    fn account() -> AccountId {
        AccountId::from_public_key(&Keypair::generate().public_key())
    }

    fn hub_with(
        grants_require_attestation: bool,
        configure: impl FnOnce(&mut StaticAuthority),
    ) -> SettlementHub<ManualClock> {
        let mut authority = StaticAuthority::new();
        configure(&mut authority);
        SettlementHub::with_clock(
            account(),
            Arc::new(authority),
            Arc::new(Switch::new()),
            grants_require_attestation,
            ManualClock::new(Utc::now()),
        )
    }

    #[derive(Default)]
    struct RecordingMinter {
        minted: Mutex<Vec<SettlementReceipt>>,
    }

    impl ReceiptMinter for RecordingMinter {
        fn mint(&self, receipt: &SettlementReceipt) -> Result<(), String> {
            self.minted.lock().push(receipt.clone());
            Ok(())
        }
    }

    #[test]
    fn full_deal_flow_through_the_hub() {
        let hub = hub_with(false, |_| {});
        let sponsor = account();
        let beneficiary = account();
        hub.seed_balance(sponsor, Asset::Native, 1_000);

        let deadline = hub.clock.now() + Duration::days(7);
        let id = hub
            .create_deal(
                sponsor,
                1_000,
                beneficiary,
                Asset::Native,
                1_000,
                deadline,
                Digest::sha256(b"terms"),
            )
            .unwrap();
        hub.mark_delivered(beneficiary, id, Digest::sha256(b"done"))
            .unwrap();
        hub.approve_and_settle(sponsor, id).unwrap();

        assert_eq!(hub.balance(&beneficiary, Asset::Native), 1_000);
        assert_eq!(hub.custodied(Asset::Native), 0);
        assert_eq!(hub.events().len(), 3);
    }

    #[test]
    fn settlement_invokes_the_receipt_minter() {
        let minter = Arc::new(RecordingMinter::default());
        let hub = hub_with(false, |_| {}).with_minter(minter.clone());

        let sponsor = account();
        let beneficiary = account();
        hub.seed_balance(sponsor, Asset::Native, 500);
        let deadline = hub.clock.now() + Duration::days(1);
        let id = hub
            .create_deal(
                sponsor,
                500,
                beneficiary,
                Asset::Native,
                500,
                deadline,
                Digest::ZERO,
            )
            .unwrap();
        hub.mark_delivered(beneficiary, id, Digest::ZERO).unwrap();
        hub.approve_and_settle(sponsor, id).unwrap();

        let minted = minter.minted.lock();
        assert_eq!(minted.len(), 1);
        assert_eq!(minted[0].deal_id, id);
        assert_eq!(minted[0].gross, 500);
        assert_eq!(minted[0].net, 500);
        assert_eq!(minted[0].beneficiary, beneficiary);
    }

    #[test]
    fn refund_resolution_mints_no_receipt() {
        let minter = Arc::new(RecordingMinter::default());
        let arbitrator = account();
        let hub = hub_with(false, |auth| {
            auth.grant(arbitrator, Capability::Arbitrator);
        })
        .with_minter(minter.clone());

        let sponsor = account();
        hub.seed_balance(sponsor, Asset::Native, 100);
        let deadline = hub.clock.now() + Duration::days(1);
        let id = hub
            .create_deal(
                sponsor,
                100,
                account(),
                Asset::Native,
                100,
                deadline,
                Digest::ZERO,
            )
            .unwrap();
        hub.raise_dispute(sponsor, id, 1, Digest::ZERO).unwrap();
        hub.resolve_dispute(arbitrator, id, true).unwrap();

        assert!(minter.minted.lock().is_empty());
        assert_eq!(hub.balance(&sponsor, Asset::Native), 100);
    }

    #[test]
    fn grant_flow_with_time_travel() {
        let hub = hub_with(false, |_| {});
        let sponsor = account();
        let beneficiary = account();
        hub.seed_balance(sponsor, Asset::Native, 50);

        let unlock = hub.clock.now() + Duration::days(7);
        let id = hub
            .create_grant(
                sponsor,
                50,
                beneficiary,
                Asset::Native,
                50,
                unlock,
                Digest::ZERO,
            )
            .unwrap();

        assert!(matches!(
            hub.withdraw_grant(beneficiary, id),
            Err(GrantError::StillLocked { .. })
        ));

        hub.clock.advance(Duration::days(8));
        hub.withdraw_grant(beneficiary, id).unwrap();
        assert_eq!(hub.balance(&beneficiary, Asset::Native), 50);
    }

    #[test]
    fn export_is_json_lines() {
        let hub = hub_with(false, |_| {});
        let sponsor = account();
        hub.seed_balance(sponsor, Asset::Native, 10);
        let deadline = hub.clock.now() + Duration::days(1);
        hub.create_deal(
            sponsor,
            10,
            account(),
            Asset::Native,
            10,
            deadline,
            Digest::ZERO,
        )
        .unwrap();

        let exported = hub.export_events().unwrap();
        assert_eq!(exported.lines().count(), 1);
        assert!(exported.contains("deal_created"));
    }
}
