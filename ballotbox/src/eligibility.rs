use crate::*;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Outcome of an eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First ballot for this poll and voter
    New,

    /// A re-vote that retires the ballot with this row id
    Replace { retired: i64 },

    Reject(RejectReason),
}

/// Decide whether `voter_id` may cast `selected` in `poll` at `now`.
///
/// `existing` is the voter's active ballot in the poll, if any. Rules are
/// evaluated in order and the first failure wins. No side effects.
pub fn check_eligibility(
    poll: Option<&Poll>,
    voter_id: VoterId,
    selected: &[OptionId],
    existing: Option<&Ballot>,
    now: DateTime<Utc>,
) -> Verdict {
    let poll = match poll {
        Some(poll) if poll.is_active() => poll,
        _ => return Verdict::Reject(RejectReason::PollNotFoundOrInactive),
    };

    if !poll.window_contains(now) {
        return Verdict::Reject(RejectReason::OutsideVotingWindow);
    }

    if selected.is_empty() {
        return Verdict::Reject(RejectReason::NoOptionsSelected);
    }

    // Every id must name a distinct option of this poll
    let mut seen = HashSet::with_capacity(selected.len());
    for option_id in selected {
        if poll.get_option(*option_id).is_none() || !seen.insert(*option_id) {
            return Verdict::Reject(RejectReason::InvalidOption);
        }
    }

    if poll.poll_type == PollType::Single && selected.len() != 1 {
        return Verdict::Reject(RejectReason::TooManySelections);
    }

    let existing = existing.filter(|b| b.poll_id == poll.id && b.voter_id == voter_id);
    match existing {
        None => Verdict::New,
        Some(ballot) if poll.allow_revote => Verdict::Replace { retired: ballot.id },
        Some(_) => Verdict::Reject(RejectReason::AlreadyVoted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll(poll_type: PollType) -> Poll {
        Poll {
            id: 1,
            title: "Board election".to_owned(),
            poll_type,
            allow_revote: false,
            start_date: None,
            end_date: None,
            status: PollStatus::Active,
            options: (10..13)
                .map(|id| PollOption {
                    id,
                    poll_id: 1,
                    option_text: format!("Candidate {}", id),
                    display_order: id,
                })
                .collect(),
        }
    }

    fn ballot(id: i64, poll_id: PollId, voter_id: VoterId) -> Ballot {
        let cipher = BallotCipher::new(&[1u8; 32]).unwrap();
        Ballot {
            id,
            poll_id,
            voter_id,
            bundle: cipher.encrypt(b"{}").unwrap(),
            integrity_hash: String::new(),
            receipt_id: generate_receipt_id(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_new_ballot() {
        let poll = poll(PollType::Single);
        let verdict = check_eligibility(Some(&poll), 7, &[11], None, Utc::now());
        assert_eq!(verdict, Verdict::New);

        let poll = self::poll(PollType::Multiple);
        let verdict = check_eligibility(Some(&poll), 7, &[10, 12], None, Utc::now());
        assert_eq!(verdict, Verdict::New);
    }

    #[test]
    fn missing_or_inactive_poll() {
        let now = Utc::now();
        assert_eq!(
            check_eligibility(None, 7, &[10], None, now),
            Verdict::Reject(RejectReason::PollNotFoundOrInactive)
        );

        for status in [PollStatus::Draft, PollStatus::Closed] {
            let mut poll = poll(PollType::Single);
            poll.status = status;
            assert_eq!(
                check_eligibility(Some(&poll), 7, &[10], None, now),
                Verdict::Reject(RejectReason::PollNotFoundOrInactive)
            );
        }
    }

    #[test]
    fn outside_window() {
        let now = Utc::now();
        let mut poll = poll(PollType::Single);
        poll.end_date = Some(now - Duration::minutes(1));
        assert_eq!(
            check_eligibility(Some(&poll), 7, &[10], None, now),
            Verdict::Reject(RejectReason::OutsideVotingWindow)
        );

        poll.end_date = None;
        poll.start_date = Some(now + Duration::minutes(1));
        assert_eq!(
            check_eligibility(Some(&poll), 7, &[10], None, now),
            Verdict::Reject(RejectReason::OutsideVotingWindow)
        );
    }

    #[test]
    fn bad_selections() {
        let now = Utc::now();
        let single = poll(PollType::Single);
        let multiple = poll(PollType::Multiple);

        assert_eq!(
            check_eligibility(Some(&multiple), 7, &[], None, now),
            Verdict::Reject(RejectReason::NoOptionsSelected)
        );
        assert_eq!(
            check_eligibility(Some(&multiple), 7, &[10, 99], None, now),
            Verdict::Reject(RejectReason::InvalidOption)
        );
        assert_eq!(
            check_eligibility(Some(&multiple), 7, &[10, 10], None, now),
            Verdict::Reject(RejectReason::InvalidOption)
        );
        assert_eq!(
            check_eligibility(Some(&single), 7, &[10, 11], None, now),
            Verdict::Reject(RejectReason::TooManySelections)
        );

        // An unknown option is reported before the selection count
        assert_eq!(
            check_eligibility(Some(&single), 7, &[10, 99], None, now),
            Verdict::Reject(RejectReason::InvalidOption)
        );
    }

    #[test]
    fn revotes() {
        let now = Utc::now();
        let mut poll = poll(PollType::Single);
        let previous = ballot(42, 1, 7);

        assert_eq!(
            check_eligibility(Some(&poll), 7, &[10], Some(&previous), now),
            Verdict::Reject(RejectReason::AlreadyVoted)
        );

        poll.allow_revote = true;
        assert_eq!(
            check_eligibility(Some(&poll), 7, &[10], Some(&previous), now),
            Verdict::Replace { retired: 42 }
        );

        // Somebody else's ballot does not count
        let other = ballot(43, 1, 8);
        assert_eq!(
            check_eligibility(Some(&poll), 7, &[10], Some(&other), now),
            Verdict::New
        );
    }
}
