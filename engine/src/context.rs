//! # Operation Context
//!
//! Every entry point in the engine runs against an [`OpCtx`]: the clock
//! reading taken at the start of the operation plus mutable handles to the
//! collaborators the operation is allowed to touch. Bundling them keeps the
//! entry-point signatures honest — a component can only reach the
//! collaborators the context carries, and the single `now` field guarantees
//! one clock reading per operation.

use chrono::{DateTime, Utc};

use accord_protocol::authority::{Authority, CircuitBreaker};

use crate::accounting::AccountingGuard;
use crate::events::EventLog;
use crate::transfer::AssetTransfer;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for deadline and unlock comparisons.
///
/// Expiry in this engine is passive: nothing fires when a deadline passes,
/// the passage only becomes observable when the next operation reads the
/// clock. Readings must be monotonically non-decreasing.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A hand-driven clock for tests and simulations. Only moves when told to,
/// and only forward.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: std::sync::Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut current = self.current.lock();
        *current += duration;
    }

    /// Jumps the clock to `to`. Panics if that would move time backwards.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut current = self.current.lock();
        assert!(to >= *current, "clock may not move backwards");
        *current = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

// ---------------------------------------------------------------------------
// OpCtx
// ---------------------------------------------------------------------------

/// The per-operation collaborator bundle.
///
/// Constructed fresh for each entry-point invocation; the `now` field is
/// the operation's single clock reading.
pub struct OpCtx<'a> {
    /// Clock reading taken when the operation started.
    pub now: DateTime<Utc>,
    /// External identity/role directory.
    pub authority: &'a dyn Authority,
    /// External pause switch.
    pub breaker: &'a dyn CircuitBreaker,
    /// The value-moving sink.
    pub transfer: &'a mut dyn AssetTransfer,
    /// Custodied-total bookkeeping.
    pub accounting: &'a mut AccountingGuard,
    /// Append-only audit journal.
    pub events: &'a mut EventLog,
}
