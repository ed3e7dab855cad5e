/*!
 * Connection (distilled spec §4.3): one byte-stream to one server, with
 * operations half-duplex from the caller's point of view.
 *
 * Grounded in the TCP accept/read/write loop the teacher runs the other way
 * around in `server.rs`: here the driver dials out (`TcpStream::connect`)
 * instead of accepting, and every call blocks on its own matching reply
 * instead of dispatching to a shared command processor.
 */

pub mod options;

use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::auth::{authenticate, Authenticator, CommandTransport};
use crate::bson::Document;
use crate::document;
use crate::error::{Error, ErrorKind, Result};
use crate::wire::{
    self, DeleteMessage, GetMoreMessage, InsertMessage, KillCursorsMessage, QueryFlags,
    QueryMessage, ReplyMessage, RequestIdAllocator, UpdateMessage,
};

pub use options::{FindOptions, ReadFlags, WriteConcern, WriteFlags};

/// Transport abstraction: a plain `TcpStream` today, a TLS stream once the
/// driver grows one (explicitly out of scope per the distilled spec's
/// Non-goals, but the seam is here).
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub struct Connection {
    stream: Box<dyn AsyncReadWrite>,
    address: String,
    request_ids: RequestIdAllocator,
}

impl Connection {
    /// Opens the TCP stream and, if an authenticator is given, completes
    /// its handshake before returning — a Connection is never observable
    /// to a pool in a pre-authentication state.
    pub async fn connect(address: &str, authenticator: &Authenticator, auth_source: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true).ok();
        let mut conn = Connection {
            stream: Box::new(stream),
            address: address.to_string(),
            request_ids: RequestIdAllocator::new(),
        };
        authenticate(authenticator, &mut conn, auth_source).await?;
        Ok(conn)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await.map_err(Error::from)
    }

    /// Reads exactly one on-wire message (header + body) off the socket.
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; wire::HEADER_LEN];
        self.stream.read_exact(&mut header).await.map_err(Error::from)?;
        let total_len = wire::peek_message_length(&header[0..4].try_into().unwrap())?;
        let mut rest = vec![0u8; total_len - wire::HEADER_LEN];
        self.stream.read_exact(&mut rest).await.map_err(Error::from)?;

        let mut full = header.to_vec();
        full.extend_from_slice(&rest);
        Ok(full)
    }

    /// Writes a request, then blocks for the reply whose `response_to`
    /// matches; malformed or mismatched replies are fatal to the Connection,
    /// per the distilled spec's failure semantics.
    async fn transceive(&mut self, request_id: i32, request_bytes: &[u8]) -> Result<ReplyMessage> {
        self.write_all(request_bytes).await?;
        let bytes = self.read_message().await?;
        let reply = ReplyMessage::decode(&bytes)?;
        if reply.response_to != request_id {
            return Err(Error::new(ErrorKind::MalformedWireMessage(format!(
                "reply response_to {} does not match request id {}",
                reply.response_to, request_id
            ))));
        }
        if reply.query_failure() {
            let doc = reply.documents.first().cloned().unwrap_or_default();
            return Err(command_error(&doc));
        }
        Ok(reply)
    }

    /// Runs a single-document command against `db.$cmd` and returns its
    /// reply document regardless of `ok`; callers that want `ok: 0` turned
    /// into a `CommandError` should use [`Self::command`] instead. Monitor
    /// probes use this directly since an `ok != 1` `isMaster` reply is a
    /// meaningful, non-error `ServerDescription::Unknown` classification.
    pub async fn command_raw(&mut self, db: &str, cmd: Document) -> Result<Document> {
        let request_id = self.request_ids.next();
        let namespace = format!("{db}.$cmd");
        let message = QueryMessage {
            request_id,
            flags: QueryFlags::none(),
            full_collection_name: namespace,
            number_to_skip: 0,
            number_to_return: -1,
            query: cmd,
            return_field_selector: None,
        };
        let bytes = message.encode()?;
        let reply = self.transceive(request_id, &bytes).await?;
        reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::MalformedWireMessage("command reply had no document".into())))
    }

    pub async fn command(&mut self, db: &str, cmd: Document) -> Result<Document> {
        let doc = self.command_raw(db, cmd).await?;
        if !is_ok(&doc) {
            return Err(command_error(&doc));
        }
        Ok(doc)
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.command("admin", document! { "ping" => 1i32 }).await?;
        Ok(())
    }

    /// `find`. `opts.batch_size` maps to the wire's `num_return`: 0 for
    /// server default, negative for "return at most N and close".
    pub async fn find(&mut self, namespace: &str, query: Document, opts: &FindOptions) -> Result<(Vec<Document>, i64)> {
        let request_id = self.request_ids.next();
        let message = QueryMessage {
            request_id,
            flags: opts.flags.to_wire(),
            full_collection_name: namespace.to_string(),
            number_to_skip: opts.skip,
            number_to_return: opts.batch_size,
            query,
            return_field_selector: opts.projection.clone(),
        };
        let bytes = message.encode()?;
        let reply = self.transceive(request_id, &bytes).await?;
        if reply.cursor_not_found() {
            return Err(Error::new(ErrorKind::CursorLost));
        }
        Ok((reply.documents, reply.cursor_id))
    }

    pub async fn get_more(&mut self, namespace: &str, cursor_id: i64, batch_size: i32) -> Result<(Vec<Document>, i64)> {
        let request_id = self.request_ids.next();
        let message = GetMoreMessage {
            request_id,
            full_collection_name: namespace.to_string(),
            number_to_return: batch_size,
            cursor_id,
        };
        let bytes = message.encode()?;
        let reply = self.transceive(request_id, &bytes).await?;
        if reply.cursor_not_found() {
            return Err(Error::new(ErrorKind::CursorLost));
        }
        Ok((reply.documents, reply.cursor_id))
    }

    /// Fire-and-forget: `OP_KILL_CURSORS` has no reply.
    pub async fn kill_cursors(&mut self, cursor_ids: Vec<i64>) -> Result<()> {
        let request_id = self.request_ids.next();
        let message = KillCursorsMessage { request_id, cursor_ids };
        let bytes = message.encode()?;
        self.write_all(&bytes).await
    }

    pub async fn insert(&mut self, namespace: &str, docs: Vec<Document>, flags: WriteFlags, write_concern: &WriteConcern) -> Result<()> {
        let request_id = self.request_ids.next();
        let message = InsertMessage {
            request_id,
            flags: flags.insert_bits(),
            full_collection_name: namespace.to_string(),
            documents: docs,
        };
        self.write_and_confirm(request_id, message.encode()?, namespace, write_concern).await
    }

    pub async fn update(&mut self, namespace: &str, selector: Document, update: Document, flags: WriteFlags, write_concern: &WriteConcern) -> Result<()> {
        let request_id = self.request_ids.next();
        let message = UpdateMessage {
            request_id,
            flags: flags.update_bits(),
            full_collection_name: namespace.to_string(),
            selector,
            update,
        };
        self.write_and_confirm(request_id, message.encode()?, namespace, write_concern).await
    }

    pub async fn delete(&mut self, namespace: &str, selector: Document, flags: WriteFlags, write_concern: &WriteConcern) -> Result<()> {
        let request_id = self.request_ids.next();
        let message = DeleteMessage {
            request_id,
            flags: flags.delete_bits(),
            full_collection_name: namespace.to_string(),
            selector,
        };
        self.write_and_confirm(request_id, message.encode()?, namespace, write_concern).await
    }

    /// For `{w: 0}` this just writes the op and returns. For an acknowledged
    /// write concern the op and a `getLastError` command are concatenated
    /// into a single `write_all` call — sending them as two separate writes
    /// measurably costs an extra round trip on Linux when Nagle's algorithm
    /// and delayed ACKs interact.
    async fn write_and_confirm(&mut self, _write_request_id: i32, mut write_bytes: Vec<u8>, db_namespace: &str, write_concern: &WriteConcern) -> Result<()> {
        match write_concern {
            WriteConcern::Unacknowledged => self.write_all(&write_bytes).await,
            WriteConcern::Acknowledged { w, j, wtimeout_ms } => {
                let db = db_namespace.split('.').next().unwrap_or("admin");
                let gle_request_id = self.request_ids.next();
                let mut gle_cmd = document! { "getLastError" => 1i32, "w" => w.clone() };
                if *j {
                    gle_cmd.insert("j", true);
                }
                if let Some(ms) = wtimeout_ms {
                    gle_cmd.insert("wtimeout", *ms);
                }
                let gle_message = QueryMessage {
                    request_id: gle_request_id,
                    flags: QueryFlags::none(),
                    full_collection_name: format!("{db}.$cmd"),
                    number_to_skip: 0,
                    number_to_return: -1,
                    query: gle_cmd,
                    return_field_selector: None,
                };
                write_bytes.extend_from_slice(&gle_message.encode()?);
                self.write_all(&write_bytes).await?;

                let bytes = self.read_message().await?;
                let reply = ReplyMessage::decode(&bytes)?;
                if reply.response_to != gle_request_id {
                    return Err(Error::new(ErrorKind::MalformedWireMessage(
                        "getLastError reply response_to mismatch".into(),
                    )));
                }
                let doc = reply.documents.into_iter().next().unwrap_or_default();
                if !is_ok(&doc) {
                    return Err(command_error(&doc));
                }
                if let Some(err) = doc.get_str("err") {
                    return Err(Error::new(ErrorKind::Write(crate::error::WriteError {
                        index: 0,
                        code: doc.get_i32("code").unwrap_or(0),
                        message: err.to_string(),
                    })));
                }
                Ok(())
            }
        }
    }
}

fn is_ok(doc: &Document) -> bool {
    matches!(doc.get_i32("ok"), Some(1)) || doc.get("ok").and_then(|b| b.as_bool()) == Some(true)
}

fn command_error(doc: &Document) -> Error {
    let code = doc.get_i32("code").unwrap_or(0);
    let message = doc.get_str("errmsg").unwrap_or("command failed").to_string();
    Error::new(ErrorKind::Command(crate::error::CommandError { code, message }))
}

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

impl CommandTransport for Connection {
    fn run_command<'a>(&'a mut self, db: &'a str, cmd: Document) -> BoxFuture<'a, Result<Document>> {
        Box::pin(async move { self.command(db, cmd).await })
    }
}
