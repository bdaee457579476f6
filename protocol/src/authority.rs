//! # Authorization & Circuit-Breaker Collaborators
//!
//! The engine never stores who-may-do-what. Role and permission state lives
//! in an external identity directory, consumed here as a pure boolean
//! predicate: `has_capability(account, capability)`. Likewise the emergency
//! pause switch is an external collaborator consulted at the top of every
//! mutating operation.
//!
//! Keeping both behind traits keeps the deal ledger, grant vault, and payout
//! engine decoupled and independently testable against a fake authority.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// The four privileged roles the engine recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Full control: fee and policy changes, tie-breaking dispute resolution.
    Administrator,
    /// Dispute resolution.
    Arbitrator,
    /// Grant attestation — oracle-style confirmation of off-engine facts.
    Attester,
    /// Split definition and relayed payout authorization.
    Operator,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Administrator => write!(f, "administrator"),
            Capability::Arbitrator => write!(f, "arbitrator"),
            Capability::Attester => write!(f, "attester"),
            Capability::Operator => write!(f, "operator"),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// The external identity/role directory, reduced to the one question the
/// engine ever asks.
pub trait Authority {
    /// Does `account` currently hold `capability`?
    fn has_capability(&self, account: &AccountId, capability: Capability) -> bool;
}

/// The external pause switch, consulted before any funds-moving or
/// state-advancing operation.
pub trait CircuitBreaker {
    /// When `true`, every mutating entry point aborts with a paused error.
    fn is_paused(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Reference implementations
// ---------------------------------------------------------------------------

/// In-memory capability table. The reference `Authority` for embedders that
/// manage roles locally, and the fake of choice in tests.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    grants: HashSet<(AccountId, Capability)>,
}

impl StaticAuthority {
    /// Creates an authority that grants nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `capability` to `account`.
    pub fn grant(&mut self, account: AccountId, capability: Capability) {
        self.grants.insert((account, capability));
    }

    /// Revokes `capability` from `account`. Revoking something that was
    /// never granted is a no-op.
    pub fn revoke(&mut self, account: &AccountId, capability: Capability) {
        self.grants.remove(&(*account, capability));
    }
}

impl Authority for StaticAuthority {
    fn has_capability(&self, account: &AccountId, capability: Capability) -> bool {
        self.grants.contains(&(*account, capability))
    }
}

/// A settable pause flag. Flipping it is the responsibility of whoever
/// embeds the engine; the engine only ever reads it.
#[derive(Debug, Default)]
pub struct Switch {
    paused: AtomicBool,
}

impl Switch {
    /// Creates a switch in the running (not paused) position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the paused state.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl CircuitBreaker for Switch {
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
