/*!
 * BSON encoder: ordered `Document` -> bytes.
 */

use crate::error::{Error, ErrorKind, Result};

use super::document::Document;
use super::value::{Bson, Timestamp};

const CANONICAL_QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;

pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    write_document(doc, &mut buf)?;
    Ok(buf)
}

/// Same as [`encode_document`] but rejects documents whose encoded form
/// exceeds the 16 MB command-document limit (§6); batch splitting happens
/// one layer up, over already-encoded documents, by measured size.
pub fn encode_document_checked(doc: &Document) -> Result<Vec<u8>> {
    let bytes = encode_document(doc)?;
    if bytes.len() > 16 * 1024 * 1024 {
        return Err(Error::new(ErrorKind::InvalidArgument(format!(
            "document of {} bytes exceeds the 16MB limit",
            bytes.len()
        ))));
    }
    Ok(bytes)
}

fn write_document(doc: &Document, out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    out.extend_from_slice(&[0u8; 4]); // length placeholder

    for (key, value) in doc.iter() {
        write_element(key, value, out)?;
    }
    out.push(0x00);

    let len = (out.len() - start) as i32;
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_array(items: &[Bson], out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    out.extend_from_slice(&[0u8; 4]);

    for (i, value) in items.iter().enumerate() {
        write_element(&i.to_string(), value, out)?;
    }
    out.push(0x00);

    let len = (out.len() - start) as i32;
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_cstring(s: &str, out: &mut Vec<u8>) -> Result<()> {
    if s.as_bytes().contains(&0u8) {
        return Err(Error::new(ErrorKind::InvalidArgument(format!(
            "BSON key or cstring value cannot contain an embedded NUL byte: {:?}",
            s
        ))));
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0x00);
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    let len = (bytes.len() + 1) as i32;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    out.push(0x00);
}

fn write_element(key: &str, value: &Bson, out: &mut Vec<u8>) -> Result<()> {
    out.push(value.type_tag());
    write_cstring(key, out)?;

    match value {
        Bson::Double(d) => {
            let bits = if d.is_nan() { CANONICAL_QUIET_NAN } else { d.to_bits() };
            out.extend_from_slice(&bits.to_le_bytes());
        }
        Bson::String(s) | Bson::Symbol(s) => write_string(s, out),
        Bson::Document(doc) => write_document(doc, out)?,
        Bson::Array(items) => write_array(items, out)?,
        Bson::Binary(bin) => {
            let len = bin.bytes.len() as i32;
            out.extend_from_slice(&len.to_le_bytes());
            out.push(bin.subtype.to_byte());
            out.extend_from_slice(&bin.bytes);
        }
        Bson::ObjectId(oid) => out.extend_from_slice(&oid.bytes()),
        Bson::Boolean(b) => out.push(if *b { 1 } else { 0 }),
        Bson::DateTime(ms) => out.extend_from_slice(&ms.to_le_bytes()),
        Bson::Null => {}
        Bson::RegularExpression(re) => {
            write_cstring(&re.pattern, out)?;
            write_cstring(&re.options, out)?;
        }
        Bson::JavaScriptCode(code) => write_string(code, out),
        Bson::JavaScriptCodeWithScope(code, scope) => {
            let start = out.len();
            out.extend_from_slice(&[0u8; 4]);
            write_string(code, out);
            write_document(scope, out)?;
            let len = (out.len() - start) as i32;
            out[start..start + 4].copy_from_slice(&len.to_le_bytes());
        }
        Bson::Int32(i) => out.extend_from_slice(&i.to_le_bytes()),
        Bson::Timestamp(Timestamp { increment, time }) => {
            out.extend_from_slice(&increment.to_le_bytes());
            out.extend_from_slice(&time.to_le_bytes());
        }
        Bson::Int64(i) => out.extend_from_slice(&i.to_le_bytes()),
        Bson::Decimal128(d) => out.extend_from_slice(&d.bytes()),
        Bson::MinKey | Bson::MaxKey => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Document;

    #[test]
    fn empty_document_is_five_bytes() {
        let doc = Document::new();
        let bytes = encode_document(&doc).unwrap();
        assert_eq!(bytes, vec![0x05, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn hello_world_literal() {
        let doc = Document::new().append("hello", "world");
        let bytes = encode_document(&doc).unwrap();
        let expected: Vec<u8> = vec![
            0x16, 0x00, 0x00, 0x00, // total length = 22
            0x02, b'h', b'e', b'l', b'l', b'o', 0x00, // type + key
            0x06, 0x00, 0x00, 0x00, // string length = 6
            b'w', b'o', b'r', b'l', b'd', 0x00, // "world\0"
            0x00, // doc terminator
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn rejects_embedded_nul_key() {
        let doc = Document::new().append("ba\0d", 1i32);
        assert!(encode_document(&doc).is_err());
    }
}
