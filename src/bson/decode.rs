/*!
 * BSON decoder: bytes -> ordered `Document`.
 */

use crate::error::{Error, ErrorKind, Result};

use super::decimal128::Decimal128;
use super::document::Document;
use super::oid::ObjectId;
use super::value::{Binary, BinarySubtype, Bson, Regex, Timestamp};

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(malformed("unexpected end of buffer"));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn take_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn take_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.take(8)?.try_into().unwrap())))
    }

    fn take_cstring(&mut self) -> Result<String> {
        let start = self.pos;
        let nul = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed("cstring missing NUL terminator"))?;
        let s = std::str::from_utf8(&self.buf[start..start + nul])
            .map_err(|e| malformed(format!("cstring is not valid UTF-8: {e}")))?
            .to_string();
        self.pos = start + nul + 1;
        Ok(s)
    }

    fn take_string(&mut self) -> Result<String> {
        let len = self.take_i32()?;
        if len < 1 {
            return Err(malformed("string length must be at least 1"));
        }
        let bytes = self.take(len as usize)?;
        if bytes[bytes.len() - 1] != 0 {
            return Err(malformed("string is not NUL-terminated"));
        }
        std::str::from_utf8(&bytes[..bytes.len() - 1])
            .map(|s| s.to_string())
            .map_err(|e| malformed(format!("string is not valid UTF-8: {e}")))
    }
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedBson(msg.into()))
}

pub fn decode_document(bytes: &[u8]) -> Result<Document> {
    let mut cursor = Cursor::new(bytes);
    let doc = read_document(&mut cursor)?;
    Ok(doc)
}

fn read_length_prefixed_body<'a>(cursor: &mut Cursor<'a>) -> Result<Cursor<'a>> {
    let total_len = cursor.take_i32()?;
    if total_len < 5 {
        return Err(malformed(format!("document length {total_len} is too small")));
    }
    let body_len = total_len as usize - 4;
    if cursor.remaining() < body_len {
        return Err(malformed("document length exceeds available bytes"));
    }
    let body = &cursor.buf[cursor.pos..cursor.pos + body_len];
    cursor.pos += body_len;
    Ok(Cursor::new(body))
}

fn read_document(cursor: &mut Cursor<'_>) -> Result<Document> {
    let mut body = read_length_prefixed_body(cursor)?;
    let mut doc = Document::new();

    loop {
        let tag = body.take_u8()?;
        if tag == 0x00 {
            if body.remaining() != 0 {
                return Err(malformed("trailing bytes after document terminator"));
            }
            break;
        }
        let key = body.take_cstring()?;
        let value = read_value(tag, &mut body)?;
        doc.insert(key, value);
    }

    Ok(doc)
}

fn read_array(cursor: &mut Cursor<'_>) -> Result<Vec<Bson>> {
    let mut body = read_length_prefixed_body(cursor)?;
    let mut items = Vec::new();
    let mut expected_index = 0usize;

    loop {
        let tag = body.take_u8()?;
        if tag == 0x00 {
            if body.remaining() != 0 {
                return Err(malformed("trailing bytes after array terminator"));
            }
            break;
        }
        let key = body.take_cstring()?;
        if key != expected_index.to_string() {
            return Err(malformed(format!(
                "array key out of order: expected {expected_index}, got {key}"
            )));
        }
        expected_index += 1;
        let value = read_value(tag, &mut body)?;
        items.push(value);
    }

    Ok(items)
}

fn read_value(tag: u8, body: &mut Cursor<'_>) -> Result<Bson> {
    match tag {
        0x01 => Ok(Bson::Double(body.take_f64()?)),
        0x02 => Ok(Bson::String(body.take_string()?)),
        0x03 => {
            let doc = read_document(body)?;
            Ok(Bson::Document(doc))
        }
        0x04 => {
            let items = read_array(body)?;
            Ok(Bson::Array(items))
        }
        0x05 => {
            let len = body.take_i32()?;
            if len < 0 {
                return Err(malformed("binary length cannot be negative"));
            }
            let subtype = BinarySubtype::from_byte(body.take_u8()?);
            let bytes = body.take(len as usize)?.to_vec();
            Ok(Bson::Binary(Binary { subtype, bytes }))
        }
        0x07 => {
            let raw = body.take(12)?;
            let mut arr = [0u8; 12];
            arr.copy_from_slice(raw);
            Ok(Bson::ObjectId(ObjectId::from_bytes(arr)))
        }
        0x08 => {
            let b = body.take_u8()?;
            Ok(Bson::Boolean(b != 0))
        }
        0x09 => Ok(Bson::DateTime(body.take_i64()?)),
        0x0A => Ok(Bson::Null),
        0x0B => {
            let pattern = body.take_cstring()?;
            let options = body.take_cstring()?;
            Ok(Bson::RegularExpression(Regex { pattern, options }))
        }
        0x0D => Ok(Bson::JavaScriptCode(body.take_string()?)),
        0x0E => {
            // Deprecated symbol type: decoder accepts it and coerces to String.
            Ok(Bson::String(body.take_string()?))
        }
        0x0F => {
            let total_len = body.take_i32()?;
            if total_len < 0 {
                return Err(malformed("javascript-with-scope length cannot be negative"));
            }
            let code = body.take_string()?;
            let scope = read_document(body)?;
            let _ = total_len; // validated implicitly by consuming exactly code+scope
            Ok(Bson::JavaScriptCodeWithScope(code, scope))
        }
        0x10 => Ok(Bson::Int32(body.take_i32()?)),
        0x11 => {
            let increment = body.take_u32()?;
            let time = body.take_u32()?;
            Ok(Bson::Timestamp(Timestamp { increment, time }))
        }
        0x12 => Ok(Bson::Int64(body.take_i64()?)),
        0x13 => {
            let raw = body.take(16)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(raw);
            Ok(Bson::Decimal128(Decimal128::from_bytes(arr)))
        }
        0xFF => Ok(Bson::MinKey),
        0x7F => Ok(Bson::MaxKey),
        other => Err(malformed(format!("unrecognized BSON type tag 0x{other:02X}"))),
    }
}
