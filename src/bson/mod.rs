/*!
 * BSON value domain and binary codec (distilled spec §3/§4.1).
 */

pub mod decimal128;
pub mod decode;
pub mod document;
pub mod encode;
pub mod oid;
pub mod value;

pub use decimal128::{Decimal128, Decimal128Value};
pub use document::Document;
pub use oid::ObjectId;
pub use value::{Binary, BinarySubtype, Bson, Regex, Timestamp};

use crate::error::Result;
use std::io::{Read, Write};

impl Document {
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        encode::encode_document(self)
    }

    pub fn to_vec_checked(&self) -> Result<Vec<u8>> {
        encode::encode_document_checked(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Document> {
        decode::decode_document(bytes)
    }

    pub fn to_writer<W: Write>(&self, mut writer: W) -> Result<()> {
        let bytes = self.to_vec()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Reads exactly one BSON document from `reader`, sized by its own
    /// leading length prefix; does not consume anything beyond it.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Document> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = i32::from_le_bytes(len_buf);
        if len < 5 {
            return Err(crate::error::Error::new(crate::error::ErrorKind::MalformedBson(format!(
                "document length {len} is too small"
            ))));
        }
        let mut rest = vec![0u8; len as usize - 4];
        reader.read_exact(&mut rest)?;
        let mut full = len_buf.to_vec();
        full.extend_from_slice(&rest);
        decode::decode_document(&full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_nested_literal() {
        // distilled spec §8: {"BSON": ["awesome", 5.05, 1986]}
        let doc = Document::new().append(
            "BSON",
            vec![Bson::from("awesome"), Bson::Double(5.05), Bson::Int32(1986)],
        );
        let bytes = doc.to_vec().unwrap();
        assert_eq!(bytes.len(), 49);

        // the int32 element for index "2" must encode as tag 0x10 followed
        // by the little-endian bytes of 1986.
        let tail = &bytes[bytes.len() - 1 - 4 - 1 - 2..];
        assert!(tail.windows(4).any(|w| w == 1986i32.to_le_bytes()));

        let decoded = Document::from_slice(&bytes).unwrap();
        let arr = decoded.get_array("BSON").unwrap();
        assert_eq!(arr[0].as_str(), Some("awesome"));
        assert_eq!(arr[2].as_i32(), Some(1986));

        assert_eq!(Document::from_reader(bytes.as_slice()).unwrap(), decoded);
    }
}
