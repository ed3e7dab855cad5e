/*!
 * Cursor engine (distilled spec §4.8): three shapes — query, aggregation,
 * and singly ("result") cursors — sharing one state machine: fetch a first
 * batch, `getMore` for more, enforce `limit` client-side, and best-effort
 * `kill_cursors` when the caller abandons a cursor that the server still
 * thinks is open.
 *
 * Grounded in the teacher's `connection_pool.rs::PooledConnection` Drop
 * bookkeeping (decrementing a counter on scope exit), generalized here to a
 * detached best-effort task since `Drop` cannot `.await` a `kill_cursors`
 * round trip.
 */

use std::sync::Arc;

use crate::bson::Document;
use crate::connection::options::FindOptions;
use crate::error::{Error, ErrorKind, Result};
use crate::pool::ConnectionPool;

const MAX_FIRST_BATCH: i32 = 1000;

enum Source {
    /// `find`-style: `getMore` is issued against the same namespace.
    Query { namespace: String },
    /// Aggregation pipeline cursor: `getMore` is issued against the
    /// namespace named in the initial `{cursor: {ns, ...}}` reply.
    Aggregation { namespace: String },
}

/// A finite, non-restartable lazy sequence of documents over one server
/// cursor. Not `Clone`; consuming it (via `next`) is the only way to
/// advance it, matching the "finite, non-restartable" invariant.
pub struct Cursor {
    /// `None` only for `from_result_array` cursors, which are always
    /// terminal after construction and never issue a `getMore`.
    pool: Option<Arc<ConnectionPool>>,
    source: Source,
    buffered: std::collections::VecDeque<Document>,
    cursor_id: i64,
    limit: Option<i64>,
    delivered: i64,
    batch_size: i32,
    exhausted: bool,
}

impl Cursor {
    /// Runs the initial `find` and returns a cursor over its results.
    pub async fn find(pool: Arc<ConnectionPool>, namespace: &str, query: Document, opts: FindOptions, limit: Option<i64>, deadline: std::time::Instant) -> Result<Self> {
        let first_batch_size = first_batch_size(opts.batch_size, limit);
        let mut opts = opts;
        opts.batch_size = first_batch_size;

        let mut conn = pool.checkout(deadline).await?;
        let (documents, cursor_id) = conn.find(namespace, query, &opts).await?;

        Ok(Cursor {
            pool: Some(pool),
            source: Source::Query { namespace: namespace.to_string() },
            buffered: documents.into(),
            cursor_id,
            limit,
            delivered: 0,
            batch_size: opts.batch_size,
            exhausted: cursor_id == 0,
        })
    }

    /// Wraps an aggregation command's `{cursor: {id, firstBatch, ns}}` reply.
    pub fn from_aggregate_reply(pool: Arc<ConnectionPool>, reply: &Document, batch_size: i32, limit: Option<i64>) -> Result<Self> {
        let cursor_doc = reply
            .get_document("cursor")
            .ok_or_else(|| Error::new(ErrorKind::MalformedWireMessage("aggregate reply missing cursor field".into())))?;
        let cursor_id = cursor_doc.get_i64("id").unwrap_or(0);
        let namespace = cursor_doc.get_str("ns").unwrap_or_default().to_string();
        let first_batch = cursor_doc
            .get_array("firstBatch")
            .map(|arr| arr.iter().filter_map(|v| v.as_document().cloned()).collect::<Vec<_>>())
            .unwrap_or_default();

        Ok(Cursor {
            pool: Some(pool),
            source: Source::Aggregation { namespace },
            buffered: first_batch.into(),
            cursor_id,
            limit,
            delivered: 0,
            batch_size,
            exhausted: cursor_id == 0,
        })
    }

    /// Wraps a legacy command's single `"result"` array; always terminal
    /// after the first batch (no `getMore`).
    pub fn from_result_array(reply: &Document) -> Result<Self> {
        let documents = reply
            .get_array("result")
            .map(|arr| arr.iter().filter_map(|v| v.as_document().cloned()).collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(Cursor {
            pool: None,
            source: Source::Query { namespace: String::new() },
            buffered: documents.into(),
            cursor_id: 0,
            limit: None,
            delivered: 0,
            batch_size: 0,
            exhausted: true,
        })
    }

    /// Pulls the next document, fetching another batch via `getMore` if the
    /// buffer is empty and the server cursor is still open.
    pub async fn next(&mut self, deadline: std::time::Instant) -> Result<Option<Document>> {
        if let Some(limit) = self.limit {
            if self.delivered >= limit {
                self.finish(deadline).await;
                return Ok(None);
            }
        }

        if self.buffered.is_empty() && !self.exhausted {
            self.fetch_more(deadline).await?;
        }

        match self.buffered.pop_front() {
            Some(doc) => {
                self.delivered += 1;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    async fn fetch_more(&mut self, deadline: std::time::Instant) -> Result<()> {
        let namespace = match &self.source {
            Source::Query { namespace } | Source::Aggregation { namespace } => namespace.clone(),
        };
        let pool = self.pool.as_ref().expect("fetch_more is only reached when exhausted is false, which from_result_array never sets");
        let mut conn = pool.checkout(deadline).await?;
        match conn.get_more(&namespace, self.cursor_id, self.batch_size).await {
            Ok((documents, cursor_id)) => {
                self.buffered.extend(documents);
                self.cursor_id = cursor_id;
                self.exhausted = cursor_id == 0;
                Ok(())
            }
            Err(e) => {
                self.exhausted = true;
                self.cursor_id = 0;
                Err(e)
            }
        }
    }

    /// Issues `kill_cursors` if the server cursor is still open; failure is
    /// non-fatal per the distilled spec's best-effort contract.
    async fn finish(&mut self, deadline: std::time::Instant) {
        if self.cursor_id == 0 {
            return;
        }
        let cursor_id = self.cursor_id;
        self.cursor_id = 0;
        let Some(pool) = &self.pool else { return };
        if let Ok(mut conn) = pool.checkout(deadline).await {
            let _ = conn.kill_cursors(vec![cursor_id]).await;
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if self.cursor_id == 0 {
            return;
        }
        let Some(pool) = self.pool.clone() else { return };
        let cursor_id = self.cursor_id;
        // `Drop` cannot `.await`; spawn a detached, best-effort cleanup task.
        tokio::spawn(async move {
            let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
            if let Ok(mut conn) = pool.checkout(deadline).await {
                let _ = conn.kill_cursors(vec![cursor_id]).await;
            }
        });
    }
}

fn first_batch_size(requested: i32, limit: Option<i64>) -> i32 {
    let mut size = if requested == 0 { MAX_FIRST_BATCH } else { requested.abs() };
    if let Some(limit) = limit {
        if limit > 0 {
            size = size.min(limit as i32);
        }
    }
    size.min(MAX_FIRST_BATCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;

    #[test]
    fn first_batch_clamps_to_limit_and_cap() {
        assert_eq!(first_batch_size(0, None), MAX_FIRST_BATCH);
        assert_eq!(first_batch_size(0, Some(3)), 3);
        assert_eq!(first_batch_size(5000, None), MAX_FIRST_BATCH);
        assert_eq!(first_batch_size(50, Some(10)), 10);
    }

    #[test]
    fn singly_cursor_reads_result_array() {
        let reply = document! { "ok" => 1i32, "result" => vec![document! { "a" => 1i32 }] };
        let cursor = Cursor::from_result_array(&reply).unwrap();
        assert_eq!(cursor.buffered.len(), 1);
        assert!(cursor.exhausted);
        assert_eq!(cursor.cursor_id, 0);
    }

    #[test]
    fn aggregate_cursor_reads_first_batch_and_ns() {
        let reply = document! {
            "ok" => 1i32,
            "cursor" => document! {
                "id" => 42i64,
                "ns" => "db.coll",
                "firstBatch" => vec![document! { "a" => 1i32 }, document! { "a" => 2i32 }],
            },
        };
        let pool = Arc::new(ConnectionPool::new(
            "unused:0",
            crate::auth::Authenticator::None,
            crate::pool::PoolOptions { max_size: 0, auth_source: "admin".to_string() },
        ));
        let cursor = Cursor::from_aggregate_reply(pool, &reply, 100, None).unwrap();
        assert_eq!(cursor.buffered.len(), 2);
        assert_eq!(cursor.cursor_id, 42);
        assert!(!cursor.exhausted);
    }
}
