use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("ballotbox: cast rejected: {0}")]
    Rejected(RejectReason),

    #[error("ballotbox: receipt not found")]
    ReceiptNotFound,

    #[error("ballotbox: poll {0} not found")]
    PollNotFound(PollId),

    #[error("ballotbox: could not allocate a unique receipt id after {0} attempts")]
    ReceiptCollision(usize),

    // Display stays generic, the cause is only reachable through `source()`
    #[error("ballotbox: ballot encryption failed")]
    Cipher(#[from] CipherError),

    #[error("ballotbox: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// The client-correctable rejection behind this error, if any
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Error::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Why a cast was refused.
///
/// Every variant has a stable code so that callers can render a specific
/// message without parsing free text.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("poll not found or not active")]
    PollNotFoundOrInactive,

    #[error("poll is outside its voting window")]
    OutsideVotingWindow,

    #[error("no options selected")]
    NoOptionsSelected,

    #[error("invalid option selected")]
    InvalidOption,

    #[error("this poll allows only one selection")]
    TooManySelections,

    #[error("already voted in this poll")]
    AlreadyVoted,

    #[error("a concurrent ballot for this poll was recorded first")]
    DuplicateActiveBallot,
}

impl RejectReason {
    pub const ALL: [RejectReason; 7] = [
        RejectReason::PollNotFoundOrInactive,
        RejectReason::OutsideVotingWindow,
        RejectReason::NoOptionsSelected,
        RejectReason::InvalidOption,
        RejectReason::TooManySelections,
        RejectReason::AlreadyVoted,
        RejectReason::DuplicateActiveBallot,
    ];

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::PollNotFoundOrInactive => "poll_not_found_or_inactive",
            RejectReason::OutsideVotingWindow => "outside_voting_window",
            RejectReason::NoOptionsSelected => "no_options_selected",
            RejectReason::InvalidOption => "invalid_option",
            RejectReason::TooManySelections => "too_many_selections",
            RejectReason::AlreadyVoted => "already_voted",
            RejectReason::DuplicateActiveBallot => "duplicate_active_ballot",
        }
    }
}

/// Ballot cipher errors
///
/// None of these carry key material or plaintext.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("ballotbox cipher: encryption key is missing or malformed")]
    InvalidKey,

    #[error("ballotbox cipher: authentication failed")]
    AuthenticationFailed,

    #[error("ballotbox cipher: malformed input: {0}")]
    Malformed(&'static str),

    #[error("ballotbox cipher: ballot payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ballot store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ballotbox store: an active ballot already exists for this poll and voter")]
    DuplicateActiveBallot,

    #[error("ballotbox store: receipt id already in use")]
    ReceiptCollision,

    #[error("ballotbox store: corrupt row: {0}")]
    Corrupt(String),

    #[error("ballotbox store: database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ballotbox store: migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ballotbox config: {0} environment variable must be set")]
    Missing(&'static str),

    #[error("ballotbox config: invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    #[error("ballotbox config: {0}")]
    Cipher(#[from] CipherError),
}

/// An audit sink could not record an entry
#[derive(Debug, Error)]
#[error("ballotbox audit: {0}")]
pub struct AuditError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_match_serde_names() {
        for reason in RejectReason::ALL.iter() {
            let json = serde_json::to_string(reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.code()));
        }
    }

    #[test]
    fn cipher_failure_is_not_leaked_through_display() {
        let err: Error = CipherError::Malformed("nonce length").into();
        assert_eq!(err.to_string(), "ballotbox: ballot encryption failed");
        assert!(err.reason().is_none());
    }
}
