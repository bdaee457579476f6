//! # Asset Transfer Abstraction
//!
//! [`AssetTransfer`] is the engine's only door to the outside world's money.
//! Every funding event comes in through [`pull`](AssetTransfer::pull) and
//! every release goes out through [`push_batch`](AssetTransfer::push_batch).
//!
//! The trait contract matters more than any single implementation:
//!
//! - A failed `pull` or `push_batch` must leave balances untouched. The
//!   engine aborts the whole operation on failure and there must be nothing
//!   to unwind inside the sink.
//! - `push_batch` is all-or-nothing across its entries. A payout that
//!   distributes to twelve recipients either pays all twelve or none.
//! - Implementations may run arbitrary third-party code (webhooks, bridge
//!   adapters, other ledgers). Every caller in this crate finalizes its own
//!   state *before* invoking the sink, so code running inside a transfer
//!   can only ever observe finalized engine state.
//!
//! [`BalanceBook`] is the in-memory reference implementation: per-account
//! per-asset balances, token allowances, and a custodian account that holds
//! everything the engine has in custody.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_protocol::asset::Asset;
use accord_protocol::identity::AccountId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by an asset-transfer sink.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The payer's balance cannot cover the pull.
    #[error("insufficient balance: holder has {available}, needed {requested} ({asset})")]
    InsufficientBalance {
        asset: Asset,
        available: u128,
        requested: u128,
    },

    /// The payer has not authorized the custodian to pull this much.
    #[error("insufficient allowance: approved {approved}, needed {requested} ({asset})")]
    InsufficientAllowance {
        asset: Asset,
        approved: u128,
        requested: u128,
    },

    /// A credit would overflow the recipient's balance.
    ///
    /// If you're hitting this, someone holds more than 2^128 - 1 units.
    /// That's either a bug or an attack.
    #[error("balance overflow crediting {amount} of {asset}")]
    Overflow { asset: Asset, amount: u128 },

    /// The sink refused the transfer for a reason of its own.
    #[error("transfer rejected by sink: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// AssetTransfer
// ---------------------------------------------------------------------------

/// Moves value between the outside world and the engine's custody.
pub trait AssetTransfer {
    /// Collect `amount` of `asset` from `from` into custody.
    ///
    /// For [`Asset::Native`] this is the attached-value rail: the engine has
    /// already checked that the caller attached exactly this amount. For
    /// tokens this is the allowance-then-transfer protocol: the pull fails
    /// unless `from` pre-authorized at least `amount`.
    fn pull(&mut self, asset: Asset, from: AccountId, amount: u128) -> Result<(), TransferError>;

    /// Pay out `outgoing` from custody, all-or-nothing.
    ///
    /// Either every `(recipient, amount)` entry is credited or none are and
    /// an error comes back.
    fn push_batch(
        &mut self,
        asset: Asset,
        outgoing: &[(AccountId, u128)],
    ) -> Result<(), TransferError>;

    /// Pay a single recipient from custody.
    fn push(&mut self, asset: Asset, to: AccountId, amount: u128) -> Result<(), TransferError> {
        self.push_batch(asset, &[(to, amount)])
    }
}

// ---------------------------------------------------------------------------
// BalanceBook
// ---------------------------------------------------------------------------

/// In-memory balances, allowances, and a custodian account.
///
/// The reference [`AssetTransfer`] implementation, and the ledger the test
/// suites audit when they check conservation. Deposit rails (how external
/// value first lands in a holder's balance) are out of scope; tests and
/// embedders seed balances directly with [`mint`](Self::mint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceBook {
    /// The engine's own account. Pulls credit it, pushes debit it.
    custodian: AccountId,
    /// (holder, asset) -> balance.
    balances: HashMap<(AccountId, Asset), u128>,
    /// (owner, asset) -> amount the custodian may still pull. Tokens only.
    allowances: HashMap<(AccountId, Asset), u128>,
}

impl BalanceBook {
    /// Creates an empty book with the given custodian account.
    pub fn new(custodian: AccountId) -> Self {
        Self {
            custodian,
            balances: HashMap::new(),
            allowances: HashMap::new(),
        }
    }

    /// The custodian account pulls land on.
    pub fn custodian(&self) -> AccountId {
        self.custodian
    }

    /// Seeds a holder's balance out of thin air. Test/bootstrap rail only —
    /// the engine itself never mints.
    ///
    /// # Panics
    ///
    /// Panics if the credit would overflow the holder's balance.
    pub fn mint(&mut self, holder: AccountId, asset: Asset, amount: u128) {
        let entry = self.balances.entry((holder, asset)).or_insert(0);
        *entry = entry.checked_add(amount).expect("mint overflows balance");
    }

    /// Authorizes the custodian to pull up to `amount` of `asset` from
    /// `owner`. Replaces any prior allowance for that (owner, asset).
    pub fn approve(&mut self, owner: AccountId, asset: Asset, amount: u128) {
        self.allowances.insert((owner, asset), amount);
    }

    /// The remaining allowance for `(owner, asset)`.
    pub fn allowance(&self, owner: &AccountId, asset: Asset) -> u128 {
        self.allowances.get(&(*owner, asset)).copied().unwrap_or(0)
    }

    /// A holder's balance of `asset`.
    pub fn balance(&self, holder: &AccountId, asset: Asset) -> u128 {
        self.balances.get(&(*holder, asset)).copied().unwrap_or(0)
    }

    fn debit(&mut self, holder: AccountId, asset: Asset, amount: u128) -> Result<(), TransferError> {
        let entry = self.balances.entry((holder, asset)).or_insert(0);
        if *entry < amount {
            return Err(TransferError::InsufficientBalance {
                asset,
                available: *entry,
                requested: amount,
            });
        }
        *entry -= amount;
        Ok(())
    }

    fn credit(&mut self, holder: AccountId, asset: Asset, amount: u128) -> Result<(), TransferError> {
        let entry = self.balances.entry((holder, asset)).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(TransferError::Overflow { asset, amount })?;
        Ok(())
    }
}

impl AssetTransfer for BalanceBook {
    fn pull(&mut self, asset: Asset, from: AccountId, amount: u128) -> Result<(), TransferError> {
        if !asset.is_native() {
            let approved = self.allowance(&from, asset);
            if approved < amount {
                return Err(TransferError::InsufficientAllowance {
                    asset,
                    approved,
                    requested: amount,
                });
            }
        }

        // Check everything that can fail before mutating anything, so a
        // failed pull leaves balance and allowance both untouched.
        let available = self.balance(&from, asset);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                asset,
                available,
                requested: amount,
            });
        }
        if self
            .balance(&self.custodian, asset)
            .checked_add(amount)
            .is_none()
        {
            return Err(TransferError::Overflow { asset, amount });
        }

        if !asset.is_native() {
            if let Some(a) = self.allowances.get_mut(&(from, asset)) {
                *a -= amount;
            }
        }
        self.debit(from, asset, amount)
            .expect("payer balance was just checked");
        self.credit(self.custodian, asset, amount)
            .expect("custodian headroom was just checked");
        Ok(())
    }

    fn push_batch(
        &mut self,
        asset: Asset,
        outgoing: &[(AccountId, u128)],
    ) -> Result<(), TransferError> {
        // Validate the whole batch before touching a single balance.
        let mut total: u128 = 0;
        for (recipient, amount) in outgoing {
            total = total
                .checked_add(*amount)
                .ok_or(TransferError::Overflow {
                    asset,
                    amount: *amount,
                })?;
            let current = self.balance(recipient, asset);
            if current.checked_add(*amount).is_none() {
                return Err(TransferError::Overflow {
                    asset,
                    amount: *amount,
                });
            }
        }

        let custody = self.balance(&self.custodian, asset);
        if custody < total {
            return Err(TransferError::InsufficientBalance {
                asset,
                available: custody,
                requested: total,
            });
        }

        // Past this point nothing can fail.
        let custodian = self.custodian;
        self.debit(custodian, asset, total)
            .expect("custody balance was just checked");
        for (recipient, amount) in outgoing {
            let entry = self.balances.entry((*recipient, asset)).or_insert(0);
            *entry += amount;
        }
        Ok(())
    }
}
