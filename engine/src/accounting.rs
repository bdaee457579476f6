//! # Accounting Guard
//!
//! Tracks, per asset, the total value the engine currently custodies on
//! behalf of open obligations. Every funding event increments it, every
//! terminal release decrements it, and nothing else touches it.
//!
//! The invariant it exists to defend:
//!
//! ```text
//! ∀ asset: custodied(asset) == Σ amount over all non-terminal deals and
//!                              grants holding that asset
//! ```
//!
//! A release that would drive a counter below zero means some code path
//! released value it never custodied. That is not a recoverable condition
//! to paper over — the operation that tripped it must abort.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_protocol::asset::Asset;

/// Errors from custody accounting.
#[derive(Debug, Error)]
pub enum AccountingError {
    /// A custody increment overflowed the per-asset counter.
    #[error("custody overflow: {asset} counter at {current}, adding {amount}")]
    CustodyOverflow {
        asset: Asset,
        current: u128,
        amount: u128,
    },

    /// A release exceeded the tracked custody total. Invariant breach.
    #[error("custody underflow: {asset} counter at {current}, releasing {amount}")]
    CustodyUnderflow {
        asset: Asset,
        current: u128,
        amount: u128,
    },
}

/// Per-asset running totals of custodied value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountingGuard {
    custodied: HashMap<Asset, u128>,
}

impl AccountingGuard {
    /// Creates a guard tracking nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a funding event: `amount` of `asset` entered custody.
    pub fn custody(&mut self, asset: Asset, amount: u128) -> Result<(), AccountingError> {
        let entry = self.custodied.entry(asset).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(AccountingError::CustodyOverflow {
                asset,
                current: *entry,
                amount,
            })?;
        Ok(())
    }

    /// Records a terminal release: `amount` of `asset` left custody.
    pub fn release(&mut self, asset: Asset, amount: u128) -> Result<(), AccountingError> {
        let entry = self.custodied.entry(asset).or_insert(0);
        *entry = entry
            .checked_sub(amount)
            .ok_or(AccountingError::CustodyUnderflow {
                asset,
                current: *entry,
                amount,
            })?;
        Ok(())
    }

    /// The total currently custodied for `asset`.
    pub fn custodied(&self, asset: Asset) -> u128 {
        self.custodied.get(&asset).copied().unwrap_or(0)
    }

    /// Audit helper: does the tracked total match an externally computed
    /// expectation (e.g. the sum over non-terminal entities)?
    pub fn verify(&self, asset: Asset, expected: u128) -> bool {
        self.custodied(asset) == expected
    }
}
