//! # Audit Event Journal
//!
//! One append-only record per successful state-changing operation. The
//! journal and the entity tables are the only durable traces the engine
//! produces; an external indexer tails the journal to build its own
//! projections, and the engine itself never reads a record back.
//!
//! Records are appended strictly after an operation has fully succeeded —
//! a failed operation leaves no trace here, same as everywhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use accord_protocol::asset::Asset;
use accord_protocol::crypto::Digest;
use accord_protocol::identity::AccountId;

use crate::deal::DealId;
use crate::grant::GrantId;
use crate::payout::{PayoutId, SplitId};

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Everything that can happen to custodied value, one variant per
/// state-changing entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    DealCreated {
        deal_id: DealId,
        sponsor: AccountId,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
        deadline: DateTime<Utc>,
        terms_digest: Digest,
    },
    DealDelivered {
        deal_id: DealId,
        evidence_digest: Digest,
        delivered_at: DateTime<Utc>,
    },
    DealDisputed {
        deal_id: DealId,
        raised_by: AccountId,
        reason_code: u32,
        evidence_digest: Digest,
    },
    DealSettled {
        deal_id: DealId,
        beneficiary: AccountId,
        asset: Asset,
        gross: u128,
        fee: u128,
        net: u128,
    },
    DealRefunded {
        deal_id: DealId,
        sponsor: AccountId,
        asset: Asset,
        amount: u128,
    },
    FeePolicyUpdated {
        fee_bps: u16,
        fee_recipient: Option<AccountId>,
    },
    GrantCreated {
        grant_id: GrantId,
        sponsor: AccountId,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
        unlock_time: DateTime<Utc>,
        terms_digest: Digest,
    },
    GrantAttested {
        grant_id: GrantId,
        attester: AccountId,
        attestation_digest: Digest,
    },
    GrantWithdrawn {
        grant_id: GrantId,
        beneficiary: AccountId,
        asset: Asset,
        amount: u128,
    },
    GrantRefunded {
        grant_id: GrantId,
        sponsor: AccountId,
        asset: Asset,
        amount: u128,
    },
    SplitDefined {
        split_id: SplitId,
        defined_by: AccountId,
        content_hash: Digest,
        recipients: u32,
    },
    PayoutExecuted {
        payout_id: PayoutId,
        reference: Digest,
        asset: Asset,
        amount: u128,
        split_id: SplitId,
        payer: AccountId,
        authorizer: Option<AccountId>,
    },
}

// ---------------------------------------------------------------------------
// EventRecord / EventLog
// ---------------------------------------------------------------------------

/// A journal entry: the event plus correlation id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Random correlation id for the external indexer's dedup keying.
    pub id: Uuid,
    /// The operation's clock reading.
    pub at: DateTime<Utc>,
    /// What happened.
    pub event: EngineEvent,
}

/// Append-only journal of [`EventRecord`]s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record stamped with the operation clock reading.
    pub fn append(&mut self, at: DateTime<Utc>, event: EngineEvent) {
        self.records.push(EventRecord {
            id: Uuid::new_v4(),
            at,
            event,
        });
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` if nothing has happened yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializes the journal as JSON lines, one record per line — the
    /// export format the external indexer consumes.
    pub fn export_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}
