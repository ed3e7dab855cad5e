/*!
 * Message framing: 16-byte header plus op-specific body (distilled spec §4.2).
 */

use crate::bson::Document;
use crate::error::{Error, ErrorKind, Result};

use super::op_code::OpCode;

pub const HEADER_LEN: usize = 16;

/// OP_QUERY flag bits, combined with `|` the way the teacher's wire code
/// builds header flags directly out of raw constants.
pub mod query_flags {
    pub const TAILABLE_CURSOR: u32 = 1 << 1;
    pub const SLAVE_OK: u32 = 1 << 2;
    pub const OPLOG_REPLAY: u32 = 1 << 3;
    pub const NO_CURSOR_TIMEOUT: u32 = 1 << 4;
    pub const AWAIT_DATA: u32 = 1 << 5;
    pub const EXHAUST: u32 = 1 << 6;
    pub const PARTIAL: u32 = 1 << 7;
}

/// OP_REPLY flag bits.
pub mod reply_flags {
    pub const CURSOR_NOT_FOUND: u32 = 1 << 0;
    pub const QUERY_FAILURE: u32 = 1 << 1;
    pub const SHARD_CONFIG_STALE: u32 = 1 << 2;
    pub const AWAIT_CAPABLE: u32 = 1 << 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryFlags(pub u32);

impl QueryFlags {
    pub fn none() -> Self {
        QueryFlags(0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn with(self, flag: u32) -> Self {
        QueryFlags(self.0 | flag)
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyFlags(pub u32);

impl ReplyFlags {
    pub fn from_bits_truncate(bits: u32) -> Self {
        ReplyFlags(bits)
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl Header {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.message_length.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.response_to.to_le_bytes());
        out.extend_from_slice(&self.op_code.to_le_bytes());
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::new(ErrorKind::MalformedWireMessage(
                "header shorter than 16 bytes".into(),
            )));
        }
        Ok(Header {
            message_length: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            request_id: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            response_to: i32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            op_code: i32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        })
    }
}

/// An outbound OP_QUERY: find, command, getLastError, isMaster, etc. are all
/// modeled as a query against a namespace with an optional selector and an
/// optional field-projection document.
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub request_id: i32,
    pub flags: QueryFlags,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    pub return_field_selector: Option<Document>,
}

impl QueryMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_cstring(&self.full_collection_name, &mut body)?;
        body.extend_from_slice(&self.number_to_skip.to_le_bytes());
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        body.extend_from_slice(&self.query.to_vec()?);
        if let Some(selector) = &self.return_field_selector {
            body.extend_from_slice(&selector.to_vec()?);
        }

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::Query.as_i32(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// OP_INSERT flag bits.
pub mod insert_flags {
    pub const CONTINUE_ON_ERROR: u32 = 1 << 0;
}

/// OP_UPDATE flag bits.
pub mod update_flags {
    pub const UPSERT: u32 = 1 << 0;
    pub const MULTI_UPDATE: u32 = 1 << 1;
}

/// OP_DELETE flag bits.
pub mod delete_flags {
    pub const SINGLE_REMOVE: u32 = 1 << 0;
}

/// An outbound OP_INSERT. Never gets a direct reply; an ack'd write concern
/// is obtained by concatenating a `getLastError` OP_QUERY onto the same
/// socket write (see `Connection::insert`).
#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub request_id: i32,
    pub flags: u32,
    pub full_collection_name: String,
    pub documents: Vec<Document>,
}

impl InsertMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.to_le_bytes());
        write_cstring(&self.full_collection_name, &mut body)?;
        for doc in &self.documents {
            body.extend_from_slice(&doc.to_vec()?);
        }

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::Insert.as_i32(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// An outbound OP_UPDATE.
#[derive(Debug, Clone)]
pub struct UpdateMessage {
    pub request_id: i32,
    pub flags: u32,
    pub full_collection_name: String,
    pub selector: Document,
    pub update: Document,
}

impl UpdateMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes()); // reserved
        write_cstring(&self.full_collection_name, &mut body)?;
        body.extend_from_slice(&self.flags.to_le_bytes());
        body.extend_from_slice(&self.selector.to_vec()?);
        body.extend_from_slice(&self.update.to_vec()?);

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::Update.as_i32(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// An outbound OP_DELETE.
#[derive(Debug, Clone)]
pub struct DeleteMessage {
    pub request_id: i32,
    pub flags: u32,
    pub full_collection_name: String,
    pub selector: Document,
}

impl DeleteMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes()); // reserved
        write_cstring(&self.full_collection_name, &mut body)?;
        body.extend_from_slice(&self.flags.to_le_bytes());
        body.extend_from_slice(&self.selector.to_vec()?);

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::Delete.as_i32(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// An outbound OP_GET_MORE.
#[derive(Debug, Clone)]
pub struct GetMoreMessage {
    pub request_id: i32,
    pub full_collection_name: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

impl GetMoreMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes()); // reserved
        write_cstring(&self.full_collection_name, &mut body)?;
        body.extend_from_slice(&self.number_to_return.to_le_bytes());
        body.extend_from_slice(&self.cursor_id.to_le_bytes());

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::GetMore.as_i32(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// An outbound OP_KILL_CURSORS. Fire-and-forget: no reply is expected.
#[derive(Debug, Clone)]
pub struct KillCursorsMessage {
    pub request_id: i32,
    pub cursor_ids: Vec<i64>,
}

impl KillCursorsMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&0i32.to_le_bytes()); // reserved
        body.extend_from_slice(&(self.cursor_ids.len() as i32).to_le_bytes());
        for id in &self.cursor_ids {
            body.extend_from_slice(&id.to_le_bytes());
        }

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: self.request_id,
            response_to: 0,
            op_code: OpCode::KillCursors.as_i32(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        header.write(&mut out);
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// A decoded OP_REPLY.
#[derive(Debug, Clone)]
pub struct ReplyMessage {
    pub response_to: i32,
    pub flags: ReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl ReplyMessage {
    pub fn cursor_not_found(&self) -> bool {
        self.flags.contains(reply_flags::CURSOR_NOT_FOUND)
    }

    pub fn query_failure(&self) -> bool {
        self.flags.contains(reply_flags::QUERY_FAILURE)
    }

    /// Decodes a full on-wire message (header + OP_REPLY trailer) that has
    /// already been read in its entirety by the Connection's recv loop.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Header::parse(bytes)?;
        if header.message_length as usize != bytes.len() {
            return Err(Error::new(ErrorKind::MalformedWireMessage(format!(
                "declared message length {} does not match received {} bytes",
                header.message_length,
                bytes.len()
            ))));
        }
        if header.op_code != OpCode::Reply.as_i32() {
            return Err(Error::new(ErrorKind::MalformedWireMessage(format!(
                "expected OP_REPLY (1), got op_code {}",
                header.op_code
            ))));
        }

        let body = &bytes[HEADER_LEN..];
        if body.len() < 20 {
            return Err(Error::new(ErrorKind::MalformedWireMessage(
                "OP_REPLY trailer shorter than 20 bytes".into(),
            )));
        }
        let flags = ReplyFlags::from_bits_truncate(u32::from_le_bytes(body[0..4].try_into().unwrap()));
        let cursor_id = i64::from_le_bytes(body[4..12].try_into().unwrap());
        let starting_from = i32::from_le_bytes(body[12..16].try_into().unwrap());
        let number_returned = i32::from_le_bytes(body[16..20].try_into().unwrap());

        let mut documents = Vec::with_capacity(number_returned.max(0) as usize);
        let mut cursor = &body[20..];
        for _ in 0..number_returned {
            let doc = Document::from_reader(&mut cursor)?;
            documents.push(doc);
        }

        Ok(ReplyMessage {
            response_to: header.response_to,
            flags,
            cursor_id,
            starting_from,
            documents,
        })
    }
}

fn write_cstring(s: &str, out: &mut Vec<u8>) -> Result<()> {
    if s.as_bytes().contains(&0u8) {
        return Err(Error::new(ErrorKind::InvalidArgument(
            "collection name cannot contain an embedded NUL byte".into(),
        )));
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0x00);
    Ok(())
}

/// Reads the 4-byte length prefix off the front of a buffer without
/// consuming it, so the recv loop knows how many more bytes to read.
pub fn peek_message_length(header_bytes: &[u8; 4]) -> Result<usize> {
    let len = i32::from_le_bytes(*header_bytes);
    if len < HEADER_LEN as i32 {
        return Err(Error::new(ErrorKind::MalformedWireMessage(format!(
            "message length {len} is smaller than the header itself"
        ))));
    }
    Ok(len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;

    #[test]
    fn query_message_round_trip_header() {
        let msg = QueryMessage {
            request_id: 7,
            flags: QueryFlags::none().with(query_flags::SLAVE_OK),
            full_collection_name: "test.coll".into(),
            number_to_skip: 0,
            number_to_return: 0,
            query: document! { "ping" => 1i32 },
            return_field_selector: None,
        };
        let bytes = msg.encode().unwrap();
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.op_code, OpCode::Query.as_i32());
        assert_eq!(header.request_id, 7);
        assert_eq!(header.message_length as usize, bytes.len());
    }

    #[test]
    fn reply_message_decodes_single_document() {
        let doc = document! { "ok" => 1.0f64 };
        let doc_bytes = doc.to_vec().unwrap();

        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes()); // flags
        body.extend_from_slice(&0i64.to_le_bytes()); // cursor_id
        body.extend_from_slice(&0i32.to_le_bytes()); // starting_from
        body.extend_from_slice(&1i32.to_le_bytes()); // number_returned
        body.extend_from_slice(&doc_bytes);

        let header = Header {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: 42,
            response_to: 7,
            op_code: OpCode::Reply.as_i32(),
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        bytes.extend_from_slice(&body);

        let reply = ReplyMessage::decode(&bytes).unwrap();
        assert_eq!(reply.response_to, 7);
        assert_eq!(reply.documents.len(), 1);
        assert!(reply.documents[0].contains_key("ok"));
        assert!(!reply.cursor_not_found());
    }

    #[test]
    fn rejects_wrong_op_code() {
        let header = Header {
            message_length: HEADER_LEN as i32 + 20,
            request_id: 1,
            response_to: 1,
            op_code: OpCode::Query.as_i32(),
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        bytes.extend_from_slice(&[0u8; 20]);
        assert!(ReplyMessage::decode(&bytes).is_err());
    }
}
