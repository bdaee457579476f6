//! # Accord Engine — Custodial Settlement
//!
//! Holds third-party funds on behalf of mutually distrusting parties and
//! releases them only when well-defined conditions are satisfied: delivery
//! acknowledgment plus counterparty approval, elapsed time plus
//! attestation, or arbitrated dispute resolution.
//!
//! ## Components
//!
//! - **transfer** — The [`AssetTransfer`](transfer::AssetTransfer) boundary:
//!   every unit of value enters through a pull and leaves through an
//!   all-or-nothing push batch.
//! - **accounting** — The [`AccountingGuard`](accounting::AccountingGuard):
//!   per-asset custodied totals, the invariant the whole engine answers to.
//! - **deal** — Bilateral escrow: fund, deliver, approve or force or
//!   dispute, settle or refund, with fee extraction.
//! - **grant** — Unilateral timelocked escrow with optional attestation
//!   gating.
//! - **payout** — Immutable basis-point splits and deterministic
//!   distributions, last recipient absorbing the rounding dust.
//! - **relay** — Detached-signature authorization: domain-separated,
//!   nonce- and deadline-bound, relayable by anyone.
//! - **events** — The append-only audit journal the external indexer tails.
//! - **hub** — Everything behind one mutex, plus the external
//!   receipt-minting collaborator.
//!
//! ## The two rules everything else follows
//!
//! 1. **State before interaction.** Every money-releasing path finalizes
//!    entity status, zeroes the amount, and updates accounting *before* the
//!    external transfer runs. Third-party code reached through a transfer
//!    can only ever observe finalized state.
//! 2. **All or nothing.** Every precondition failure aborts the whole
//!    operation with zero side effects — no partial mutation, no partial
//!    transfer, no event.

pub mod accounting;
pub mod context;
pub mod deal;
pub mod events;
pub mod grant;
pub mod hub;
mod math;
pub mod payout;
pub mod relay;
pub mod transfer;

pub use accounting::AccountingGuard;
pub use context::{Clock, ManualClock, OpCtx, SystemClock};
pub use deal::{Deal, DealId, DealLedger, DealStatus};
pub use events::{EngineEvent, EventLog, EventRecord};
pub use grant::{Grant, GrantId, GrantVault};
pub use hub::{ReceiptMinter, SettlementHub, SettlementReceipt};
pub use payout::{PayoutEngine, PayoutId, PayoutRecord, ShareEntry, Split, SplitId};
pub use relay::RelayedAuthorization;
pub use transfer::{AssetTransfer, BalanceBook, TransferError};
