/*!
 * Connection Pool adapter (distilled spec §4.7): an opaque, 1:1-with-address
 * pool of `Connection`s with checkout/checkin/drain semantics.
 *
 * Grounded in the teacher's `connection_pool.rs` (`PoolStats`,
 * `PoolStatsSnapshot`, `metrics::{counter,histogram,gauge}` instrumentation)
 * but rebuilt over driver `Connection`s instead of `deadpool_postgres::Object`
 * — `deadpool-postgres` has no remaining use once the backend is a raw wire
 * connection rather than a Postgres client.
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::auth::Authenticator;
use crate::connection::Connection;
use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_size: u32,
    pub auth_source: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions { max_size: 10, auth_source: "admin".to_string() }
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    checked_out: std::sync::atomic::AtomicU64,
    created: std::sync::atomic::AtomicU64,
    errors: std::sync::atomic::AtomicU64,
}

/// One pool per server address. Idle connections sit in `idle`; `permits`
/// bounds total outstanding connections (idle + checked out) to `max_size`.
pub struct ConnectionPool {
    address: String,
    authenticator: Authenticator,
    options: PoolOptions,
    idle: Mutex<VecDeque<Connection>>,
    permits: Semaphore,
    stats: Arc<PoolStats>,
    draining: std::sync::atomic::AtomicBool,
}

impl ConnectionPool {
    pub fn new(address: impl Into<String>, authenticator: Authenticator, options: PoolOptions) -> Self {
        let max_size = options.max_size;
        ConnectionPool {
            address: address.into(),
            authenticator,
            options,
            idle: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(max_size as usize),
            stats: Arc::new(PoolStats::default()),
            draining: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Checks out a Connection, opening a fresh one if none are idle.
    /// Waits for a free permit until `deadline`.
    pub async fn checkout(&self, deadline: Instant) -> Result<PooledConnection<'_>> {
        if self.draining.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::new(ErrorKind::InvalidArgument("pool is draining".to_string())));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let permit = tokio::time::timeout(remaining, self.permits.acquire())
            .await
            .map_err(|_| Error::new(ErrorKind::NetworkTimeout))?
            .expect("semaphore is never closed while the pool lives");
        permit.forget();

        let existing = self.idle.lock().pop_front();
        let conn = match existing {
            Some(conn) => conn,
            None => {
                let start = Instant::now();
                match Connection::connect(&self.address, &self.authenticator, &self.options.auth_source).await {
                    Ok(conn) => {
                        self.stats.created.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        counter!("mongo_driver_pool_connections_created_total").increment(1);
                        histogram!("mongo_driver_pool_connect_seconds").record(start.elapsed().as_secs_f64());
                        conn
                    }
                    Err(e) => {
                        self.stats.errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        counter!("mongo_driver_pool_connection_errors_total").increment(1);
                        self.permits.add_permits(1);
                        return Err(e);
                    }
                }
            }
        };

        let checked_out = self.stats.checked_out.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        gauge!("mongo_driver_pool_checked_out").set(checked_out as f64);

        Ok(PooledConnection { pool: self, conn: Some(conn) })
    }

    /// Returns a connection to the idle queue; called only by
    /// `PooledConnection::drop`. A connection that closed itself on error
    /// must not be checked back in (the caller simply drops the
    /// `PooledConnection` without calling this, via `discard`).
    fn checkin(&self, conn: Connection) {
        self.idle.lock().push_back(conn);
        self.permits.add_permits(1);
        let checked_out = self.stats.checked_out.fetch_sub(1, std::sync::atomic::Ordering::Relaxed) - 1;
        gauge!("mongo_driver_pool_checked_out").set(checked_out as f64);
    }

    fn discard(&self) {
        self.permits.add_permits(1);
        let checked_out = self.stats.checked_out.fetch_sub(1, std::sync::atomic::Ordering::Relaxed) - 1;
        gauge!("mongo_driver_pool_checked_out").set(checked_out as f64);
    }

    /// Stops accepting new checkouts and drops all idle connections. In
    /// flight checkouts are unaffected; they simply fail to check back in
    /// once drained (discarded instead).
    pub fn drain(&self) {
        self.draining.store(true, std::sync::atomic::Ordering::Release);
        self.idle.lock().clear();
    }

    pub fn stats_snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            checked_out: self.stats.checked_out.load(std::sync::atomic::Ordering::Relaxed),
            created: self.stats.created.load(std::sync::atomic::Ordering::Relaxed),
            errors: self.stats.errors.load(std::sync::atomic::Ordering::Relaxed),
            idle: self.idle.lock().len() as u64,
        }
    }
}

/// An exclusively-owned checked-out connection. Returns to the pool's idle
/// queue on drop unless `into_broken` marked it unfit for reuse.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl<'a> std::ops::Deref for PooledConnection<'a> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken only on drop")
    }
}

impl<'a> std::ops::DerefMut for PooledConnection<'a> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken only on drop")
    }
}

impl<'a> PooledConnection<'a> {
    /// Marks this connection as broken (socket error observed by the
    /// caller); it will not be returned to the idle queue.
    pub fn into_broken(mut self) {
        self.conn.take();
        self.pool.discard();
    }
}

impl<'a> Drop for PooledConnection<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolStatsSnapshot {
    pub checked_out: u64,
    pub created: u64,
    pub errors: u64,
    pub idle: u64,
}

impl std::fmt::Display for PoolStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "checked_out={} idle={} created={} errors={}", self.checked_out, self.idle, self.created, self.errors)
    }
}
