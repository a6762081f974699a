use crate::*;
use chrono::{DateTime, Utc};

/// The plaintext sealed inside a ballot's ciphertext
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BallotPayload {
    pub poll_id: PollId,
    pub voter_id: VoterId,

    /// Ascending, without duplicates
    pub selected_options: Vec<OptionId>,
    pub timestamp: DateTime<Utc>,
}

impl BallotPayload {
    pub fn new(
        poll_id: PollId,
        voter_id: VoterId,
        selected: &[OptionId],
        timestamp: DateTime<Utc>,
    ) -> Self {
        BallotPayload {
            poll_id,
            voter_id,
            selected_options: canonical_options(selected),
            timestamp,
        }
    }

    pub fn integrity_hash(&self) -> String {
        integrity_hash(
            self.poll_id,
            self.voter_id,
            &self.selected_options,
            &self.timestamp,
        )
    }
}

/// A ballot ready to be written, before the store has assigned it a row id
#[derive(Debug, Clone)]
pub struct NewBallot {
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub bundle: CipherBundle,
    pub integrity_hash: String,
    pub receipt_id: String,
    pub created_at: DateTime<Utc>,
}

impl NewBallot {
    pub(crate) fn into_ballot(self, id: i64) -> Ballot {
        Ballot {
            id,
            poll_id: self.poll_id,
            voter_id: self.voter_id,
            bundle: self.bundle,
            integrity_hash: self.integrity_hash,
            receipt_id: self.receipt_id,
            created_at: self.created_at,
        }
    }
}

/// A stored ballot.
///
/// The selection only exists inside `bundle`. `receipt_id` is independent of the
/// row id so it can be handed to the voter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub id: i64,
    pub poll_id: PollId,
    pub voter_id: VoterId,
    pub bundle: CipherBundle,
    pub integrity_hash: String,
    pub receipt_id: String,
    pub created_at: DateTime<Utc>,
}

impl Ballot {
    /// Check a claimed selection against this ballot's integrity hash.
    ///
    /// Needs no key: the hash covers only the public fields plus the selection.
    pub fn matches_claim(&self, selected: &[OptionId]) -> bool {
        integrity_hash(self.poll_id, self.voter_id, selected, &self.created_at)
            == self.integrity_hash
    }
}

/// Returned to the voter by a successful cast
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CastReceipt {
    pub receipt_id: String,
    pub integrity_hash: String,
    pub timestamp: DateTime<Utc>,

    /// True when this cast retired an earlier ballot
    pub replaced: bool,
}

/// A voter's view of one of their ballots, looked up by receipt id
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub receipt_id: String,
    pub poll_title: String,
    pub integrity_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Whether a voter currently has a ballot recorded in a poll
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verified: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<Option<Ballot>> for Verification {
    fn from(ballot: Option<Ballot>) -> Self {
        match ballot {
            Some(ballot) => Verification {
                verified: true,
                receipt_id: Some(ballot.receipt_id),
                integrity_hash: Some(ballot.integrity_hash),
                timestamp: Some(ballot.created_at),
            },
            None => Verification {
                verified: false,
                receipt_id: None,
                integrity_hash: None,
                timestamp: None,
            },
        }
    }
}
