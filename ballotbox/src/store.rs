use crate::*;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of a `replace`
#[derive(Debug, Clone)]
pub struct Replaced {
    pub ballot: Ballot,

    /// Row id of the ballot that was retired, `None` if there was none
    pub retired: Option<i64>,
}

/// A ballot store.
///
/// Every operation is atomic with respect to the one-active-ballot-per-voter
/// rule. Implementations must reject a second `insert` for the same poll and
/// voter with `StoreError::DuplicateActiveBallot`, and a reused receipt id with
/// `StoreError::ReceiptCollision`.
pub trait Store: Send + Sync {
    /// Get a poll and its options, in display order
    fn get_poll(
        &self,
        poll_id: PollId,
    ) -> impl Future<Output = Result<Option<Poll>, StoreError>> + Send;

    /// Get the voter's active ballot in a poll
    fn find_active(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
    ) -> impl Future<Output = Result<Option<Ballot>, StoreError>> + Send;

    /// Store a first ballot
    fn insert(&self, ballot: NewBallot)
        -> impl Future<Output = Result<Ballot, StoreError>> + Send;

    /// Retire the voter's current ballot, if any, and store the new one as a single unit
    fn replace(
        &self,
        ballot: NewBallot,
    ) -> impl Future<Output = Result<Replaced, StoreError>> + Send;

    /// All ballots in a poll, in no particular order
    fn list_for_poll(
        &self,
        poll_id: PollId,
    ) -> impl Future<Output = Result<Vec<Ballot>, StoreError>> + Send;

    /// Look up a ballot by receipt. Only the voter who cast it can find it.
    fn find_by_receipt(
        &self,
        receipt_id: &str,
        voter_id: VoterId,
    ) -> impl Future<Output = Result<Option<Ballot>, StoreError>> + Send;

    /// A poll together with all of its ballots, read as one consistent view
    fn poll_with_ballots(
        &self,
        poll_id: PollId,
    ) -> impl Future<Output = Result<Option<(Poll, Vec<Ballot>)>, StoreError>> + Send {
        async move {
            match self.get_poll(poll_id).await? {
                Some(poll) => Ok(Some((poll, self.list_for_poll(poll_id).await?))),
                None => Ok(None),
            }
        }
    }

    /// Number of active ballots in a poll
    fn count_for_poll(
        &self,
        poll_id: PollId,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send {
        async move { Ok(self.list_for_poll(poll_id).await?.len()) }
    }
}

/// A simple store that keeps everything in memory behind one mutex
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    polls: BTreeMap<PollId, Poll>,
    ballots: BTreeMap<i64, Ballot>,
    active: HashMap<(PollId, VoterId), i64>,
    receipts: HashMap<String, i64>,
    next_poll_id: PollId,
    next_option_id: OptionId,
    next_ballot_id: i64,
}

impl MemInner {
    fn write(&mut self, ballot: NewBallot) -> Ballot {
        self.next_ballot_id += 1;
        let ballot = ballot.into_ballot(self.next_ballot_id);
        self.active
            .insert((ballot.poll_id, ballot.voter_id), ballot.id);
        self.receipts.insert(ballot.receipt_id.clone(), ballot.id);
        self.ballots.insert(ballot.id, ballot.clone());
        ballot
    }

    fn remove(&mut self, id: i64) {
        if let Some(ballot) = self.ballots.remove(&id) {
            self.active.remove(&(ballot.poll_id, ballot.voter_id));
            self.receipts.remove(&ballot.receipt_id);
        }
    }
}

impl MemStore {
    fn lock(&self) -> MutexGuard<'_, MemInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a poll, assigning poll and option ids
    pub fn add_poll(&self, new_poll: NewPoll) -> Poll {
        let mut inner = self.lock();
        inner.next_poll_id += 1;
        let poll_id = inner.next_poll_id;

        let mut options = Vec::with_capacity(new_poll.options.len());
        for (order, text) in new_poll.options.into_iter().enumerate() {
            inner.next_option_id += 1;
            options.push(PollOption {
                id: inner.next_option_id,
                poll_id,
                option_text: text,
                display_order: order as i64,
            });
        }

        let poll = Poll {
            id: poll_id,
            title: new_poll.title,
            poll_type: new_poll.poll_type,
            allow_revote: new_poll.allow_revote,
            start_date: new_poll.start_date,
            end_date: new_poll.end_date,
            status: new_poll.status,
            options,
        };
        inner.polls.insert(poll_id, poll.clone());
        poll
    }

    /// Overwrite a poll record, keeping its ballots
    pub fn update_poll(&self, poll: Poll) {
        self.lock().polls.insert(poll.id, poll);
    }
}

impl Store for MemStore {
    async fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>, StoreError> {
        Ok(self.lock().polls.get(&poll_id).cloned())
    }

    async fn find_active(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
    ) -> Result<Option<Ballot>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .active
            .get(&(poll_id, voter_id))
            .and_then(|id| inner.ballots.get(id))
            .cloned())
    }

    async fn insert(&self, ballot: NewBallot) -> Result<Ballot, StoreError> {
        let mut inner = self.lock();
        if inner
            .active
            .contains_key(&(ballot.poll_id, ballot.voter_id))
        {
            return Err(StoreError::DuplicateActiveBallot);
        }
        if inner.receipts.contains_key(&ballot.receipt_id) {
            return Err(StoreError::ReceiptCollision);
        }
        Ok(inner.write(ballot))
    }

    async fn replace(&self, ballot: NewBallot) -> Result<Replaced, StoreError> {
        let mut inner = self.lock();
        if inner.receipts.contains_key(&ballot.receipt_id) {
            return Err(StoreError::ReceiptCollision);
        }

        let retired = inner
            .active
            .get(&(ballot.poll_id, ballot.voter_id))
            .copied();
        if let Some(id) = retired {
            inner.remove(id);
        }

        Ok(Replaced {
            ballot: inner.write(ballot),
            retired,
        })
    }

    async fn list_for_poll(&self, poll_id: PollId) -> Result<Vec<Ballot>, StoreError> {
        Ok(self
            .lock()
            .ballots
            .values()
            .filter(|b| b.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn poll_with_ballots(
        &self,
        poll_id: PollId,
    ) -> Result<Option<(Poll, Vec<Ballot>)>, StoreError> {
        let inner = self.lock();
        Ok(inner.polls.get(&poll_id).map(|poll| {
            let ballots = inner
                .ballots
                .values()
                .filter(|b| b.poll_id == poll_id)
                .cloned()
                .collect();
            (poll.clone(), ballots)
        }))
    }

    async fn find_by_receipt(
        &self,
        receipt_id: &str,
        voter_id: VoterId,
    ) -> Result<Option<Ballot>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .receipts
            .get(receipt_id)
            .and_then(|id| inner.ballots.get(id))
            .filter(|b| b.voter_id == voter_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn new_ballot(poll_id: PollId, voter_id: VoterId) -> NewBallot {
        let cipher = BallotCipher::new(&[9u8; 32]).unwrap();
        let payload = BallotPayload::new(poll_id, voter_id, &[1], Utc::now());
        NewBallot {
            poll_id,
            voter_id,
            bundle: cipher.seal(&payload).unwrap(),
            integrity_hash: payload.integrity_hash(),
            receipt_id: generate_receipt_id(),
            created_at: payload.timestamp,
        }
    }

    #[tokio::test]
    async fn one_active_ballot_per_voter() {
        let store = MemStore::default();
        let first = store.insert(new_ballot(1, 7)).await.unwrap();

        assert!(matches!(
            store.insert(new_ballot(1, 7)).await,
            Err(StoreError::DuplicateActiveBallot)
        ));
        assert_eq!(store.find_active(1, 7).await.unwrap(), Some(first));

        // Other polls and voters are independent
        store.insert(new_ballot(1, 8)).await.unwrap();
        store.insert(new_ballot(2, 7)).await.unwrap();
        assert_eq!(store.count_for_poll(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn receipt_collisions_are_not_overwritten() {
        let store = MemStore::default();
        let first = store.insert(new_ballot(1, 7)).await.unwrap();

        let mut clash = new_ballot(1, 8);
        clash.receipt_id = first.receipt_id.clone();
        assert!(matches!(
            store.insert(clash.clone()).await,
            Err(StoreError::ReceiptCollision)
        ));
        assert!(matches!(
            store.replace(clash).await,
            Err(StoreError::ReceiptCollision)
        ));
        assert_eq!(store.count_for_poll(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_retires_previous_ballot() {
        let store = MemStore::default();

        // Degenerates to an insert
        let first = store.replace(new_ballot(1, 7)).await.unwrap();
        assert!(first.retired.is_none());

        let second = store.replace(new_ballot(1, 7)).await.unwrap();
        assert_eq!(second.retired, Some(first.ballot.id));

        assert_eq!(store.list_for_poll(1).await.unwrap(), vec![second.ballot.clone()]);
        assert!(store
            .find_by_receipt(&first.ballot.receipt_id, 7)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.find_by_receipt(&second.ballot.receipt_id, 7).await.unwrap(),
            Some(second.ballot)
        );
    }

    #[tokio::test]
    async fn poll_with_ballots_reads_both() {
        let store = MemStore::default();
        let poll = store.add_poll(NewPoll::new("Color", PollType::Single, &["Red"]));
        assert!(store.poll_with_ballots(poll.id + 1).await.unwrap().is_none());

        let ballot = store.insert(new_ballot(poll.id, 7)).await.unwrap();
        store.insert(new_ballot(poll.id + 1, 7)).await.unwrap();

        let (read, ballots) = store.poll_with_ballots(poll.id).await.unwrap().unwrap();
        assert_eq!(read, poll);
        assert_eq!(ballots, vec![ballot]);
    }

    #[tokio::test]
    async fn receipts_are_scoped_to_voter() {
        let store = MemStore::default();
        let ballot = store.insert(new_ballot(1, 7)).await.unwrap();

        assert!(store
            .find_by_receipt(&ballot.receipt_id, 8)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_receipt(&ballot.receipt_id, 7)
            .await
            .unwrap()
            .is_some());
    }
}
