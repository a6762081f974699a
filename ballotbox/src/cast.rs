use crate::*;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info, warn};

/// A ballot that made it into the store
struct Committed {
    ballot: Ballot,
    retired: Option<i64>,
}

/// The ballot box: casting, receipts, verification and tallying over one store.
///
/// Holds no locks of its own. Concurrent casts for the same poll and voter are
/// serialized by the store's uniqueness rule.
pub struct BallotBox<S, A> {
    store: S,
    cipher: BallotCipher,
    audit: A,
    receipt_retries: usize,
}

impl<S: Store, A: AuditSink> BallotBox<S, A> {
    pub fn new(store: S, cipher: BallotCipher, audit: A) -> Self {
        BallotBox {
            store,
            cipher,
            audit,
            receipt_retries: DEFAULT_RECEIPT_RETRIES,
        }
    }

    /// Build from loaded configuration
    pub fn from_config(store: S, config: &Config, audit: A) -> Self {
        Self::new(store, config.cipher.clone(), audit).with_receipt_retries(config.receipt_retries)
    }

    /// Cap on fresh receipt ids tried per cast, at least 1
    pub fn with_receipt_retries(mut self, retries: usize) -> Self {
        self.receipt_retries = retries.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// Cast a ballot now
    pub async fn cast(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selected: &[OptionId],
    ) -> Result<CastReceipt, Error> {
        self.cast_at(poll_id, voter_id, selected, Utc::now()).await
    }

    /// Cast a ballot as of `now`.
    ///
    /// Once the store write succeeds the ballot is committed, even if the caller
    /// never sees the receipt. Exactly one audit entry is appended per call.
    pub async fn cast_at(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selected: &[OptionId],
        now: DateTime<Utc>,
    ) -> Result<CastReceipt, Error> {
        // Millisecond precision so the hash can be recomputed from the stored timestamp
        let now = now.trunc_subsecs(3);

        let outcome = self.try_cast(poll_id, voter_id, selected, now).await;
        self.record(poll_id, voter_id, &outcome, now);

        let committed = outcome?;
        Ok(CastReceipt {
            receipt_id: committed.ballot.receipt_id,
            integrity_hash: committed.ballot.integrity_hash,
            timestamp: committed.ballot.created_at,
            replaced: committed.retired.is_some(),
        })
    }

    async fn try_cast(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selected: &[OptionId],
        now: DateTime<Utc>,
    ) -> Result<Committed, Error> {
        let poll = self.store.get_poll(poll_id).await?;
        let mut raced = false;

        loop {
            let existing = match &poll {
                Some(_) => self.store.find_active(poll_id, voter_id).await?,
                None => None,
            };

            let verdict =
                check_eligibility(poll.as_ref(), voter_id, selected, existing.as_ref(), now);
            let replace = match verdict {
                Verdict::Reject(reason) => return Err(Error::Rejected(reason)),
                Verdict::New => false,
                Verdict::Replace { .. } => true,
            };

            match self.commit(poll_id, voter_id, selected, now, replace).await {
                // Lost a race against another cast for the same voter. Look again:
                // the winner's ballot now either blocks us or gets replaced.
                Err(Error::Store(StoreError::DuplicateActiveBallot)) if !raced => {
                    debug!(poll_id, voter_id, "concurrent cast detected, re-checking");
                    raced = true;
                }
                Err(Error::Store(StoreError::DuplicateActiveBallot)) => {
                    return Err(Error::Rejected(RejectReason::DuplicateActiveBallot))
                }
                other => return other,
            }
        }
    }

    /// Encrypt, hash and write a ballot, retrying on receipt collisions
    async fn commit(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        selected: &[OptionId],
        now: DateTime<Utc>,
        replace: bool,
    ) -> Result<Committed, Error> {
        let payload = BallotPayload::new(poll_id, voter_id, selected, now);
        let bundle = self.cipher.seal(&payload)?;
        let integrity_hash = payload.integrity_hash();

        for attempt in 1..=self.receipt_retries {
            let ballot = NewBallot {
                poll_id,
                voter_id,
                bundle: bundle.clone(),
                integrity_hash: integrity_hash.clone(),
                receipt_id: generate_receipt_id(),
                created_at: now,
            };

            let written = if replace {
                self.store
                    .replace(ballot)
                    .await
                    .map(|r| Committed {
                        ballot: r.ballot,
                        retired: r.retired,
                    })
            } else {
                self.store.insert(ballot).await.map(|ballot| Committed {
                    ballot,
                    retired: None,
                })
            };

            match written {
                Err(StoreError::ReceiptCollision) => {
                    warn!(poll_id, attempt, "receipt id collision, regenerating");
                }
                other => return Ok(other?),
            }
        }

        Err(Error::ReceiptCollision(self.receipt_retries))
    }

    fn record(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
        outcome: &Result<Committed, Error>,
        now: DateTime<Utc>,
    ) {
        let (action, ballot_id, detail) = match outcome {
            Ok(Committed {
                ballot,
                retired: Some(retired),
            }) => {
                info!(poll_id, voter_id, ballot_id = ballot.id, retired, "vote replaced");
                (
                    AuditAction::VoteReplaced,
                    Some(ballot.id),
                    format!("replaced ballot {} in poll {}", retired, poll_id),
                )
            }
            Ok(Committed { ballot, .. }) => {
                info!(poll_id, voter_id, ballot_id = ballot.id, "vote cast");
                (
                    AuditAction::VoteCast,
                    Some(ballot.id),
                    format!("voted in poll {}", poll_id),
                )
            }
            Err(Error::Rejected(reason)) => {
                debug!(poll_id, voter_id, reason = reason.code(), "vote rejected");
                (AuditAction::VoteRejected, None, reason.code().to_owned())
            }
            Err(e) => {
                warn!(poll_id, voter_id, error = %e, "vote failed");
                (AuditAction::VoteFailed, None, e.to_string())
            }
        };

        let entry = AuditEntry {
            actor: voter_id,
            action,
            resource: poll_id,
            ballot_id,
            detail,
            timestamp: now,
        };

        if let Err(e) = self.audit.append(entry) {
            warn!(poll_id, voter_id, error = %e, "failed to append audit entry");
        }
    }

    /// Look up one of the voter's ballots by receipt id
    pub async fn get_receipt(&self, receipt_id: &str, voter_id: VoterId) -> Result<Receipt, Error> {
        let ballot = self
            .store
            .find_by_receipt(receipt_id, voter_id)
            .await?
            .ok_or(Error::ReceiptNotFound)?;

        let poll = self
            .store
            .get_poll(ballot.poll_id)
            .await?
            .ok_or(Error::ReceiptNotFound)?;

        Ok(Receipt {
            receipt_id: ballot.receipt_id,
            poll_title: poll.title,
            integrity_hash: ballot.integrity_hash,
            timestamp: ballot.created_at,
        })
    }

    /// Whether the voter has an active ballot in the poll
    pub async fn verify(&self, poll_id: PollId, voter_id: VoterId) -> Result<Verification, Error> {
        Ok(self.store.find_active(poll_id, voter_id).await?.into())
    }

    /// Recount a poll by decrypting every stored ballot
    pub async fn tally(&self, poll_id: PollId) -> Result<Tally, Error> {
        let (poll, ballots) = self
            .store
            .poll_with_ballots(poll_id)
            .await?
            .ok_or(Error::PollNotFound(poll_id))?;

        let tally = tally_ballots(&poll, &ballots, &self.cipher);
        if tally.skipped_count > 0 {
            warn!(
                poll_id,
                skipped = tally.skipped_count,
                "tally skipped unreadable ballots"
            );
        }
        Ok(tally)
    }

    /// Number of active ballots in the poll, without decrypting anything
    pub async fn ballot_count(&self, poll_id: PollId) -> Result<usize, Error> {
        Ok(self.store.count_for_poll(poll_id).await?)
    }
}
