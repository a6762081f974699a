use crate::*;
use chrono::{DateTime, Utc};
use sqlx::error::DatabaseError;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode,
    SqlitePool, SqlitePoolOptions,
};
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits for another connection's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const BALLOT_COLUMNS: &str =
    "id, poll_id, voter_id, nonce, ciphertext, tag, integrity_hash, receipt_id, created_at";

const INSERT_BALLOT: &str = "INSERT INTO ballots \
     (poll_id, voter_id, nonce, ciphertext, tag, integrity_hash, receipt_id, created_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

/// Ballot store backed by SQLite.
///
/// The `(poll_id, voter_id)` and `receipt_id` uniqueness constraints live in the
/// schema; a replace runs its delete and insert inside one transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PollRow {
    id: i64,
    title: String,
    poll_type: String,
    allow_revote: bool,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    status: String,
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: i64,
    poll_id: i64,
    option_text: String,
    display_order: i64,
}

#[derive(sqlx::FromRow)]
struct BallotRow {
    id: i64,
    poll_id: i64,
    voter_id: i64,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
    integrity_hash: String,
    receipt_id: String,
    created_at: DateTime<Utc>,
}

impl From<BallotRow> for Ballot {
    fn from(row: BallotRow) -> Self {
        Ballot {
            id: row.id,
            poll_id: row.poll_id,
            voter_id: row.voter_id,
            bundle: CipherBundle {
                nonce: row.nonce,
                ciphertext: row.ciphertext,
                tag: row.tag,
            },
            integrity_hash: row.integrity_hash,
            receipt_id: row.receipt_id,
            created_at: row.created_at,
        }
    }
}

impl OptionRow {
    fn into_option(self) -> PollOption {
        PollOption {
            id: self.id,
            poll_id: self.poll_id,
            option_text: self.option_text,
            display_order: self.display_order,
        }
    }
}

impl PollRow {
    fn into_poll(self, options: Vec<PollOption>) -> Result<Poll, StoreError> {
        Ok(Poll {
            id: self.id,
            title: self.title,
            poll_type: self.poll_type.parse().map_err(StoreError::Corrupt)?,
            allow_revote: self.allow_revote,
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            options,
        })
    }
}

fn bind_ballot(ballot: &NewBallot) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(INSERT_BALLOT)
        .bind(ballot.poll_id)
        .bind(ballot.voter_id)
        .bind(ballot.bundle.nonce.as_slice())
        .bind(ballot.bundle.ciphertext.as_slice())
        .bind(ballot.bundle.tag.as_slice())
        .bind(ballot.integrity_hash.as_str())
        .bind(ballot.receipt_id.as_str())
        .bind(ballot.created_at)
}

/// Map uniqueness violations on the ballots table to their store errors.
///
/// Lock contention with another writer is reported as `DuplicateActiveBallot`,
/// so the caller re-reads the voter's ballot before trying again.
fn write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if db_err.message().contains("receipt_id") {
                return StoreError::ReceiptCollision;
            }
            return StoreError::DuplicateActiveBallot;
        }
        if is_busy(&**db_err) {
            return StoreError::DuplicateActiveBallot;
        }
    }
    StoreError::Database(err)
}

/// SQLITE_BUSY or SQLITE_LOCKED, including their extended codes
fn is_busy(db_err: &dyn DatabaseError) -> bool {
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map_or(false, |code| matches!(code & 0xff, 5 | 6))
}

async fn fetch_poll(
    conn: &mut SqliteConnection,
    poll_id: PollId,
) -> Result<Option<Poll>, StoreError> {
    let row: Option<PollRow> = sqlx::query_as(
        "SELECT id, title, poll_type, allow_revote, start_date, end_date, status \
         FROM polls WHERE id = ?",
    )
    .bind(poll_id)
    .fetch_optional(&mut *conn)
    .await?;

    let row = match row {
        None => return Ok(None),
        Some(row) => row,
    };

    let options: Vec<OptionRow> = sqlx::query_as(
        "SELECT id, poll_id, option_text, display_order FROM poll_options \
         WHERE poll_id = ? ORDER BY display_order, id",
    )
    .bind(poll_id)
    .fetch_all(&mut *conn)
    .await?;

    let options = options.into_iter().map(OptionRow::into_option).collect();
    Ok(Some(row.into_poll(options)?))
}

async fn fetch_ballots(
    conn: &mut SqliteConnection,
    poll_id: PollId,
) -> Result<Vec<Ballot>, StoreError> {
    let sql = format!("SELECT {} FROM ballots WHERE poll_id = ?", BALLOT_COLUMNS);
    let rows: Vec<BallotRow> = sqlx::query_as(&sql)
        .bind(poll_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(Ballot::from).collect())
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and run migrations
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Self::from_pool(pool).await
    }

    /// A private in-memory database.
    ///
    /// Pinned to a single connection that is never recycled, otherwise the
    /// database would vanish along with it.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(SqliteStore { pool })
    }

    /// Create a poll and its options
    pub async fn add_poll(&self, new_poll: NewPoll) -> Result<Poll, StoreError> {
        let mut tx = self.pool.begin().await?;

        let poll_id = sqlx::query(
            "INSERT INTO polls (title, poll_type, allow_revote, start_date, end_date, status) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_poll.title.as_str())
        .bind(new_poll.poll_type.name())
        .bind(new_poll.allow_revote)
        .bind(new_poll.start_date)
        .bind(new_poll.end_date)
        .bind(new_poll.status.name())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (order, text) in new_poll.options.iter().enumerate() {
            sqlx::query(
                "INSERT INTO poll_options (poll_id, option_text, display_order) VALUES (?, ?, ?)",
            )
            .bind(poll_id)
            .bind(text.as_str())
            .bind(order as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_poll(poll_id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("poll {} vanished after insert", poll_id)))
    }

    /// Change a poll's status, returns false if there is no such poll
    pub async fn set_poll_status(
        &self,
        poll_id: PollId,
        status: PollStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE polls SET status = ? WHERE id = ?")
            .bind(status.name())
            .bind(poll_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl Store for SqliteStore {
    async fn get_poll(&self, poll_id: PollId) -> Result<Option<Poll>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_poll(&mut conn, poll_id).await
    }

    async fn find_active(
        &self,
        poll_id: PollId,
        voter_id: VoterId,
    ) -> Result<Option<Ballot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ballots WHERE poll_id = ? AND voter_id = ?",
            BALLOT_COLUMNS
        );
        let row: Option<BallotRow> = sqlx::query_as(&sql)
            .bind(poll_id)
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Ballot::from))
    }

    async fn insert(&self, ballot: NewBallot) -> Result<Ballot, StoreError> {
        let id = bind_ballot(&ballot)
            .execute(&self.pool)
            .await
            .map_err(write_error)?
            .last_insert_rowid();

        Ok(ballot.into_ballot(id))
    }

    async fn replace(&self, ballot: NewBallot) -> Result<Replaced, StoreError> {
        // Writing first takes the write lock up front, so concurrent replaces
        // queue on the busy timeout instead of failing a lock upgrade.
        // Dropping `tx` before commit rolls everything back.
        let mut tx = self.pool.begin().await?;

        let retired: Vec<(i64,)> =
            sqlx::query_as("DELETE FROM ballots WHERE poll_id = ? AND voter_id = ? RETURNING id")
                .bind(ballot.poll_id)
                .bind(ballot.voter_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(write_error)?;
        let retired = retired.first().map(|(id,)| *id);

        let id = bind_ballot(&ballot)
            .execute(&mut *tx)
            .await
            .map_err(write_error)?
            .last_insert_rowid();

        tx.commit().await.map_err(write_error)?;

        Ok(Replaced {
            ballot: ballot.into_ballot(id),
            retired,
        })
    }

    async fn list_for_poll(&self, poll_id: PollId) -> Result<Vec<Ballot>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_ballots(&mut conn, poll_id).await
    }

    async fn poll_with_ballots(
        &self,
        poll_id: PollId,
    ) -> Result<Option<(Poll, Vec<Ballot>)>, StoreError> {
        // One read transaction, so the poll and its ballots come from the same snapshot
        let mut tx = self.pool.begin().await?;

        let poll = match fetch_poll(&mut tx, poll_id).await? {
            Some(poll) => poll,
            None => return Ok(None),
        };
        let ballots = fetch_ballots(&mut tx, poll_id).await?;

        tx.commit().await?;
        Ok(Some((poll, ballots)))
    }

    async fn find_by_receipt(
        &self,
        receipt_id: &str,
        voter_id: VoterId,
    ) -> Result<Option<Ballot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ballots WHERE receipt_id = ? AND voter_id = ?",
            BALLOT_COLUMNS
        );
        let row: Option<BallotRow> = sqlx::query_as(&sql)
            .bind(receipt_id)
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Ballot::from))
    }

    async fn count_for_poll(&self, poll_id: PollId) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ballots WHERE poll_id = ?")
            .bind(poll_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ballot(cipher: &BallotCipher, poll_id: PollId, voter_id: VoterId) -> NewBallot {
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
    async fn polls_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut new_poll = NewPoll::new("Mascot", PollType::Multiple, &["Owl", "Fox", "Elk"]);
        new_poll.allow_revote = true;
        new_poll.end_date = Some(Utc::now());

        let poll = store.add_poll(new_poll).await.unwrap();
        assert_eq!(poll.title, "Mascot");
        assert_eq!(poll.poll_type, PollType::Multiple);
        assert!(poll.allow_revote);
        assert!(poll.end_date.is_some());
        let texts: Vec<&str> = poll.options.iter().map(|o| o.option_text.as_str()).collect();
        assert_eq!(texts, vec!["Owl", "Fox", "Elk"]);

        assert!(store.set_poll_status(poll.id, PollStatus::Closed).await.unwrap());
        let poll = store.get_poll(poll.id).await.unwrap().unwrap();
        assert_eq!(poll.status, PollStatus::Closed);
        assert!(store.get_poll(poll.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn constraints_map_to_store_errors() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cipher = BallotCipher::new(&BallotCipher::generate_key()).unwrap();
        let poll = store
            .add_poll(NewPoll::new("Lunch", PollType::Single, &["Soup"]))
            .await
            .unwrap();

        let first = store.insert(new_ballot(&cipher, poll.id, 7)).await.unwrap();
        assert_eq!(store.find_active(poll.id, 7).await.unwrap(), Some(first.clone()));
        assert_eq!(
            cipher.open(&first.bundle).unwrap().selected_options,
            vec![1]
        );

        assert!(matches!(
            store.insert(new_ballot(&cipher, poll.id, 7)).await,
            Err(StoreError::DuplicateActiveBallot)
        ));

        let mut clash = new_ballot(&cipher, poll.id, 8);
        clash.receipt_id = first.receipt_id.clone();
        assert!(matches!(
            store.insert(clash.clone()).await,
            Err(StoreError::ReceiptCollision)
        ));

        // A failed replace leaves the previous ballot in place
        clash.voter_id = 7;
        assert!(matches!(
            store.replace(clash).await,
            Err(StoreError::ReceiptCollision)
        ));
        assert_eq!(store.find_active(poll.id, 7).await.unwrap(), Some(first));
        assert_eq!(store.count_for_poll(poll.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_and_receipts() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cipher = BallotCipher::new(&BallotCipher::generate_key()).unwrap();
        let poll = store
            .add_poll(NewPoll::new("Lunch", PollType::Single, &["Soup"]))
            .await
            .unwrap();

        let first = store.replace(new_ballot(&cipher, poll.id, 7)).await.unwrap();
        assert!(first.retired.is_none());
        let second = store.replace(new_ballot(&cipher, poll.id, 7)).await.unwrap();
        assert_eq!(second.retired, Some(first.ballot.id));

        let all = store.list_for_poll(poll.id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].receipt_id, second.ballot.receipt_id);
        assert_eq!(all[0].created_at, second.ballot.created_at);

        let receipt = &second.ballot.receipt_id;
        assert!(store.find_by_receipt(receipt, 7).await.unwrap().is_some());
        assert!(store.find_by_receipt(receipt, 8).await.unwrap().is_none());
        assert!(store
            .find_by_receipt(&first.ballot.receipt_id, 7)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn poll_with_ballots_reads_one_snapshot() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cipher = BallotCipher::new(&BallotCipher::generate_key()).unwrap();
        let poll = store
            .add_poll(NewPoll::new("Dessert", PollType::Single, &["Pie", "Cake"]))
            .await
            .unwrap();
        assert!(store.poll_with_ballots(poll.id + 1).await.unwrap().is_none());

        let first = store.insert(new_ballot(&cipher, poll.id, 7)).await.unwrap();
        let second = store.insert(new_ballot(&cipher, poll.id, 8)).await.unwrap();

        let (read, mut ballots) = store.poll_with_ballots(poll.id).await.unwrap().unwrap();
        ballots.sort_by_key(|b| b.id);
        assert_eq!(read, poll);
        assert_eq!(ballots, vec![first, second]);

        // The single pooled connection is free again
        assert_eq!(store.count_for_poll(poll.id).await.unwrap(), 2);
    }
}
