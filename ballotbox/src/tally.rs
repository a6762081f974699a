use crate::*;
use indexmap::IndexMap;
use std::fmt::Display;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OptionCount {
    pub option_id: OptionId,
    pub option_text: String,
    pub vote_count: usize,
}

/// Per-option results reconstructed from the encrypted ballot store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub poll_id: PollId,

    /// One entry per poll option, in display order
    pub results: Vec<OptionCount>,

    /// Ballots that were decrypted and counted
    pub total_accepted_ballots: usize,

    /// Ballots that could not be counted. Non-zero means the store has integrity problems.
    pub skipped_count: usize,
}

/// Why a stored ballot was left out of a tally
#[derive(Debug)]
pub enum SkipReason {
    Undecryptable(CipherError),
    WrongOwner,
    HashMismatch,
    UnknownOption(OptionId),
    BadSelectionCount(usize),
    NonCanonical,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SkipReason::Undecryptable(e) => write!(f, "{}", e),
            SkipReason::WrongOwner => write!(f, "payload belongs to another poll or voter"),
            SkipReason::HashMismatch => write!(f, "integrity hash mismatch"),
            SkipReason::UnknownOption(id) => write!(f, "option {} is not part of the poll", id),
            SkipReason::BadSelectionCount(n) => write!(f, "{} selections not allowed", n),
            SkipReason::NonCanonical => write!(f, "selection is not sorted or has duplicates"),
        }
    }
}

/// Decrypt one ballot and return the options it selects, if it can be counted
pub fn read_ballot(
    poll: &Poll,
    ballot: &Ballot,
    cipher: &BallotCipher,
) -> Result<Vec<OptionId>, SkipReason> {
    let payload = cipher
        .open(&ballot.bundle)
        .map_err(SkipReason::Undecryptable)?;

    if payload.poll_id != ballot.poll_id
        || payload.voter_id != ballot.voter_id
        || payload.poll_id != poll.id
    {
        return Err(SkipReason::WrongOwner);
    }

    if payload.integrity_hash() != ballot.integrity_hash {
        return Err(SkipReason::HashMismatch);
    }

    let selected = payload.selected_options;
    if canonical_options(&selected) != selected {
        return Err(SkipReason::NonCanonical);
    }
    if selected.is_empty() || selected.len() > poll.max_selections() {
        return Err(SkipReason::BadSelectionCount(selected.len()));
    }
    if let Some(unknown) = selected.iter().find(|id| poll.get_option(**id).is_none()) {
        return Err(SkipReason::UnknownOption(*unknown));
    }

    Ok(selected)
}

/// Count `ballots` against `poll`'s current options.
///
/// A ballot that cannot be read is skipped and counted in `skipped_count`,
/// it never aborts the tally.
pub fn tally_ballots(poll: &Poll, ballots: &[Ballot], cipher: &BallotCipher) -> Tally {
    let mut counts: IndexMap<OptionId, usize> =
        poll.options.iter().map(|opt| (opt.id, 0)).collect();
    let mut accepted = 0;
    let mut skipped = 0;

    for ballot in ballots {
        match read_ballot(poll, ballot, cipher) {
            Ok(selected) => {
                for option_id in selected {
                    if let Some(count) = counts.get_mut(&option_id) {
                        *count += 1;
                    }
                }
                accepted += 1;
            }
            Err(reason) => {
                tracing::warn!(
                    poll_id = poll.id,
                    ballot_id = ballot.id,
                    %reason,
                    "skipping ballot in tally"
                );
                skipped += 1;
            }
        }
    }

    let results = poll
        .options
        .iter()
        .map(|opt| OptionCount {
            option_id: opt.id,
            option_text: opt.option_text.clone(),
            vote_count: counts.get(&opt.id).copied().unwrap_or_default(),
        })
        .collect();

    Tally {
        poll_id: poll.id,
        results,
        total_accepted_ballots: accepted,
        skipped_count: skipped,
    }
}

impl Tally {
    /// Votes for one option, zero if the option is unknown
    pub fn count_for(&self, option_id: OptionId) -> usize {
        self.results
            .iter()
            .find(|r| r.option_id == option_id)
            .map(|r| r.vote_count)
            .unwrap_or_default()
    }

    pub fn total_votes(&self) -> usize {
        self.results.iter().map(|r| r.vote_count).sum()
    }
}
