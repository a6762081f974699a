use crate::*;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    VoteCast,
    VoteReplaced,
    VoteRejected,
    VoteFailed,
}

impl AuditAction {
    pub fn name(&self) -> &'static str {
        match self {
            AuditAction::VoteCast => "vote_cast",
            AuditAction::VoteReplaced => "vote_replaced",
            AuditAction::VoteRejected => "vote_rejected",
            AuditAction::VoteFailed => "vote_failed",
        }
    }
}

impl Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One append-only audit record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub actor: VoterId,
    pub action: AuditAction,

    /// The poll the action was taken against
    pub resource: PollId,

    /// Row id of the ballot written, when one was
    pub ballot_id: Option<i64>,

    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Write-only destination for audit records.
///
/// The ballot box never reads entries back. A failed append is logged by the
/// caller and otherwise ignored.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        (**self).append(entry)
    }
}

/// Emits audit entries as structured log events on the `ballotbox::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: "ballotbox::audit",
            actor = entry.actor,
            action = %entry.action,
            poll_id = entry.resource,
            ballot_id = ?entry.ballot_id,
            timestamp = %entry.timestamp,
            "{}",
            entry.detail
        );
        Ok(())
    }
}

/// Keeps audit entries in memory
#[derive(Debug, Default)]
pub struct MemAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemAuditSink {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemAuditSink {
    fn append(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}
