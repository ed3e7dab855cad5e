/*!
 * Session/transaction manager (distilled spec §4.9): a client-side state
 * machine over a server-issued logical session id, plus the causal-
 * consistency and transaction-command bookkeeping that rides along with it.
 *
 * Grounded in the teacher's `transactions.rs::TransactionManager`
 * (`Arc<RwLock<HashMap<Uuid, TransactionState>>>`, `Uuid::new_v4`, a
 * `TransactionStatus` enum) generalized from a Postgres transaction executor
 * to this driver's causal-consistency/retry state machine — the server here
 * tracks transaction state, not a held `deadpool_postgres::Transaction`, so
 * `Session` only carries the bookkeeping needed to annotate commands.
 */

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::auth::CommandTransport;
use crate::bson::{Binary, BinarySubtype, Bson, Document, Timestamp};
use crate::connection::options::WriteConcern;
use crate::document;
use crate::error::{Error, ErrorKind, Result};
use crate::topology::OperationType;

/// Idle sessions older than this are no longer reused; the pool reaps them
/// lazily on the next `start_session` call instead of eagerly expiring them.
const SESSION_MAX_IDLE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoTransaction,
    TransactionStarted,
    InTransaction,
    TransactionCommitted,
    TransactionAborted,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    pub read_concern: Option<String>,
    pub write_concern: Option<WriteConcern>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub causal_consistency: bool,
    pub retry_writes: bool,
    pub default_transaction_options: Option<TransactionOptions>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions { causal_consistency: true, retry_writes: true, default_transaction_options: None }
    }
}

/// One logical session. Not `Clone`, not `Send`-shared: a session is
/// single-owner per the distilled spec's resource model, used by one task
/// at a time.
#[derive(Debug)]
pub struct Session {
    id: Bson,
    started_at: DateTime<Utc>,
    txn_number: i64,
    causal_consistency: bool,
    retry_writes: bool,
    operation_time: Option<Timestamp>,
    state: SessionState,
    transaction_options: Option<TransactionOptions>,
    default_transaction_options: Option<TransactionOptions>,
}

impl Session {
    fn new(id: Bson, opts: SessionOptions) -> Self {
        Session {
            id,
            started_at: Utc::now(),
            txn_number: 0,
            causal_consistency: opts.causal_consistency,
            retry_writes: opts.retry_writes,
            operation_time: None,
            state: SessionState::NoTransaction,
            transaction_options: None,
            default_transaction_options: opts.default_transaction_options,
        }
    }

    pub fn id(&self) -> &Bson {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn retry_writes(&self) -> bool {
        self.retry_writes
    }

    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    /// Begins a new transaction. Legal only from a settled state; `txn_number`
    /// is strictly increasing across the session's lifetime.
    pub fn start_transaction(&mut self, opts: Option<TransactionOptions>) -> Result<()> {
        if !matches!(self.state, SessionState::NoTransaction | SessionState::TransactionCommitted | SessionState::TransactionAborted) {
            return Err(Error::new(ErrorKind::InvalidArgument("a transaction is already in progress on this session".into())));
        }
        self.txn_number += 1;
        self.transaction_options = opts.or_else(|| self.default_transaction_options.clone());
        self.state = SessionState::TransactionStarted;
        Ok(())
    }

    /// Annotates `command` with this session's id and, inside a transaction,
    /// the transaction fields. Returns an error if a non-primary read
    /// preference is used for a read while a transaction is in progress.
    pub fn add_session(&mut self, command: &mut Document, op: OperationType, is_primary_read_preference: bool) -> Result<()> {
        if matches!(self.state, SessionState::TransactionStarted | SessionState::InTransaction) {
            if op == OperationType::Read && !is_primary_read_preference {
                return Err(Error::new(ErrorKind::InvalidArgument(
                    "only a primary read preference may be used inside a transaction".into(),
                )));
            }

            command.insert("lsid", document! { "id" => self.id.clone() });
            command.insert("txnNumber", self.txn_number);
            command.insert("autocommit", false);

            if self.state == SessionState::TransactionStarted {
                command.insert("startTransaction", true);
                if let Some(opts) = &self.transaction_options {
                    if let Some(wc) = &opts.write_concern {
                        command.insert("writeConcern", write_concern_document(wc));
                    }
                    if let Some(level) = &opts.read_concern {
                        command.insert("readConcern", document! { "level" => level.clone() });
                    }
                }
                self.state = SessionState::InTransaction;
            }
        } else {
            command.insert("lsid", document! { "id" => self.id.clone() });
            if self.causal_consistency && op == OperationType::Read {
                if let Some(ts) = self.operation_time {
                    command.insert("readConcern", document! { "afterClusterTime" => Bson::Timestamp(ts) });
                }
            }
        }
        Ok(())
    }

    /// Advances `operation_time` from a command reply's `operationTime`
    /// field. Only a strictly greater timestamp advances the clock.
    pub fn advance_operation_time(&mut self, reply: &Document) {
        let Some(Bson::Timestamp(ts)) = reply.get("operationTime") else { return };
        match self.operation_time {
            Some(current) if !timestamp_greater(*ts, current) => {}
            _ => self.operation_time = Some(*ts),
        }
    }

    pub async fn commit_transaction(&mut self, transport: &mut dyn CommandTransport) -> Result<()> {
        self.run_transaction_command(transport, "commitTransaction", SessionState::TransactionCommitted).await
    }

    pub async fn abort_transaction(&mut self, transport: &mut dyn CommandTransport) -> Result<()> {
        self.run_transaction_command(transport, "abortTransaction", SessionState::TransactionAborted).await
    }

    async fn run_transaction_command(&mut self, transport: &mut dyn CommandTransport, command_name: &str, settled: SessionState) -> Result<()> {
        if !matches!(self.state, SessionState::InTransaction | SessionState::TransactionStarted) {
            return Err(Error::new(ErrorKind::InvalidArgument(format!("no transaction in progress to {command_name}"))));
        }

        let mut cmd = document! {
            command_name => 1i32,
            "lsid" => document! { "id" => self.id.clone() },
            "txnNumber" => self.txn_number,
            "autocommit" => false,
        };
        if let Some(wc) = self.transaction_options.as_ref().and_then(|o| o.write_concern.as_ref()) {
            cmd.insert("writeConcern", write_concern_document(wc));
        }

        let mut result = transport.run_command("admin", cmd.clone()).await;
        if let Err(e) = &result {
            if e.is_retryable() {
                cmd.insert("writeConcern", write_concern_document(&majority_retry_write_concern()));
                result = transport.run_command("admin", cmd).await;
            }
        }

        self.state = settled;
        self.transaction_options = None;
        result.map(|_| ())
    }
}

fn timestamp_greater(a: Timestamp, b: Timestamp) -> bool {
    (a.time, a.increment) > (b.time, b.increment)
}

fn majority_retry_write_concern() -> WriteConcern {
    WriteConcern::Acknowledged { w: Bson::from("majority"), j: false, wtimeout_ms: Some(10_000) }
}

fn write_concern_document(wc: &WriteConcern) -> Document {
    match wc {
        WriteConcern::Unacknowledged => document! { "w" => 0i32 },
        WriteConcern::Acknowledged { w, j, wtimeout_ms } => {
            let mut doc = document! { "w" => w.clone() };
            if *j {
                doc.insert("j", true);
            }
            if let Some(ms) = wtimeout_ms {
                doc.insert("wtimeout", *ms);
            }
            doc
        }
    }
}

fn new_session_id() -> Bson {
    let uuid = Uuid::new_v4();
    Bson::Binary(Binary { subtype: BinarySubtype::Uuid, bytes: uuid.as_bytes().to_vec() })
}

struct IdleSession {
    id: Bson,
    released_at: Instant,
}

/// FIFO of recently released session ids, reused to avoid server-side churn
/// from repeatedly starting and ending sessions. Entries older than
/// `SESSION_MAX_IDLE` are dropped (not reused) the next time the pool is
/// drained for an id; `reap_expired` lets a caller batch an explicit
/// `endSessions` for ones that aged out while idle.
pub struct SessionPool {
    idle: Mutex<VecDeque<IdleSession>>,
}

impl SessionPool {
    pub fn new() -> Self {
        SessionPool { idle: Mutex::new(VecDeque::new()) }
    }

    pub fn start_session(&self, opts: SessionOptions) -> Session {
        Session::new(self.checkout_id(), opts)
    }

    fn checkout_id(&self) -> Bson {
        let mut idle = self.idle.lock();
        while let Some(entry) = idle.pop_front() {
            if entry.released_at.elapsed() <= SESSION_MAX_IDLE {
                return entry.id;
            }
        }
        new_session_id()
    }

    /// Returns a session's id to the pool for reuse.
    pub fn end_session(&self, session: Session) {
        self.idle.lock().push_back(IdleSession { id: session.id, released_at: Instant::now() });
    }

    /// Drains ids that aged out while idle, for the caller to fold into one
    /// `endSessions` admin command.
    pub fn reap_expired(&self) -> Vec<Bson> {
        let mut idle = self.idle.lock();
        let (expired, fresh): (VecDeque<IdleSession>, VecDeque<IdleSession>) =
            idle.drain(..).partition(|entry| entry.released_at.elapsed() > SESSION_MAX_IDLE);
        *idle = fresh;
        expired.into_iter().map(|entry| entry.id).collect()
    }
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque as StdVecDeque;

    struct FakeTransport {
        replies: StdVecDeque<Result<Document>>,
    }

    impl CommandTransport for FakeTransport {
        fn run_command<'a>(
            &'a mut self,
            _db: &'a str,
            _cmd: Document,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Document>> + Send + 'a>> {
            Box::pin(async move { self.replies.pop_front().expect("no more fake replies") })
        }
    }

    #[test]
    fn start_transaction_increments_txn_number() {
        let pool = SessionPool::new();
        let mut session = pool.start_session(SessionOptions::default());
        session.start_transaction(None).unwrap();
        assert_eq!(session.txn_number, 1);
        assert_eq!(session.state, SessionState::TransactionStarted);

        // Cannot start a second transaction while one is in progress.
        assert!(session.start_transaction(None).is_err());
    }

    #[test]
    fn add_session_marks_first_command_and_transitions_state() {
        let pool = SessionPool::new();
        let mut session = pool.start_session(SessionOptions::default());
        session.start_transaction(None).unwrap();

        let mut cmd = document! { "insert" => "things" };
        session.add_session(&mut cmd, OperationType::Write, true).unwrap();
        assert_eq!(cmd.get_bool("startTransaction"), Some(true));
        assert_eq!(cmd.get_bool("autocommit"), Some(false));
        assert_eq!(session.state, SessionState::InTransaction);

        let mut cmd2 = document! { "insert" => "things" };
        session.add_session(&mut cmd2, OperationType::Write, true).unwrap();
        assert!(!cmd2.contains_key("startTransaction"));
    }

    #[test]
    fn non_primary_read_inside_transaction_is_rejected() {
        let pool = SessionPool::new();
        let mut session = pool.start_session(SessionOptions::default());
        session.start_transaction(None).unwrap();
        let mut cmd = document! { "find" => "things" };
        assert!(session.add_session(&mut cmd, OperationType::Read, false).is_err());
    }

    #[test]
    fn causal_consistency_attaches_after_cluster_time() {
        let pool = SessionPool::new();
        let mut session = pool.start_session(SessionOptions::default());
        session.advance_operation_time(&document! {
            "operationTime" => Bson::Timestamp(Timestamp { time: 100, increment: 1 }),
        });

        let mut cmd = document! { "find" => "things" };
        session.add_session(&mut cmd, OperationType::Read, true).unwrap();
        let read_concern = cmd.get_document("readConcern").unwrap();
        assert_eq!(read_concern.get("afterClusterTime"), Some(&Bson::Timestamp(Timestamp { time: 100, increment: 1 })));
    }

    #[test]
    fn operation_time_only_advances_on_strictly_greater_timestamp() {
        let pool = SessionPool::new();
        let mut session = pool.start_session(SessionOptions::default());
        session.advance_operation_time(&document! { "operationTime" => Bson::Timestamp(Timestamp { time: 100, increment: 5 }) });
        session.advance_operation_time(&document! { "operationTime" => Bson::Timestamp(Timestamp { time: 100, increment: 1 }) });
        assert_eq!(session.operation_time(), Some(Timestamp { time: 100, increment: 5 }));

        session.advance_operation_time(&document! { "operationTime" => Bson::Timestamp(Timestamp { time: 200, increment: 0 }) });
        assert_eq!(session.operation_time(), Some(Timestamp { time: 200, increment: 0 }));
    }

    #[tokio::test]
    async fn commit_retries_once_with_majority_write_concern_on_retryable_error() {
        let pool = SessionPool::new();
        let mut session = pool.start_session(SessionOptions::default());
        session.start_transaction(None).unwrap();
        let mut cmd = document! { "insert" => "things" };
        session.add_session(&mut cmd, OperationType::Write, true).unwrap();

        let mut transport = FakeTransport {
            replies: StdVecDeque::from(vec![
                Err(Error::new(ErrorKind::NetworkTimeout)),
                Ok(document! { "ok" => 1i32 }),
            ]),
        };
        session.commit_transaction(&mut transport).await.unwrap();
        assert_eq!(session.state, SessionState::TransactionCommitted);
        assert!(transport.replies.is_empty());
    }

    #[test]
    fn session_pool_reuses_recently_released_ids() {
        let pool = SessionPool::new();
        let session = pool.start_session(SessionOptions::default());
        let id = session.id().clone();
        pool.end_session(session);

        let reused = pool.start_session(SessionOptions::default());
        assert_eq!(reused.id(), &id);
        assert!(pool.reap_expired().is_empty());
    }
}
