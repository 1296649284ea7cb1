//! Modification reports and their wire codec.
//!
//! Every successful primary-tree mutation produces a [`ModReport`]
//! describing the before/after documents at one primary key. The report is
//! what drives secondary-index maintenance and what replicas replay.
//!
//! # Wire Format
//!
//! ```text
//! [pk_len: u16 LE][pk]
//! [deleted_tag: u8][doc_len: u32 LE][doc]?   (doc only when tag = HAS_VALUE)
//! [added_tag: u8][doc_len: u32 LE][doc]?
//! ```
//!
//! Documents are canonical JSON (object keys sorted), so encoding is
//! deterministic and encode → decode → encode is bit-identical. Unknown
//! tags and trailing garbage fail decoding with a corruption error.

use rook_store::Key;
use serde_json::Value;

use crate::error::TableError;

/// Wire tag: a document follows.
const HAS_VALUE: u8 = 0;
/// Wire tag: no document.
const HAS_NO_VALUE: u8 = 1;

/// A description of one row change: what was deleted and what was added.
///
/// Both halves absent means the operation was a no-op (skipped or
/// unchanged); both present describe a replacement at the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct ModReport {
    /// The row's primary key. Never empty by the time the report leaves
    /// its producer.
    pub primary_key: Key,
    /// The document removed by the change, if any.
    pub deleted: Option<Value>,
    /// The document installed by the change, if any.
    pub added: Option<Value>,
}

impl ModReport {
    pub fn new(primary_key: Key) -> Self {
        Self {
            primary_key,
            deleted: None,
            added: None,
        }
    }

    /// True when the change carries nothing for downstream consumers.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_none() && self.added.is_none()
    }

    /// Encodes the report to its wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.primary_key.len() + 2);

        buf.extend_from_slice(&(self.primary_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.primary_key.as_bytes());

        encode_optional_doc(&mut buf, self.deleted.as_ref());
        encode_optional_doc(&mut buf, self.added.as_ref());

        buf
    }

    /// Decodes a report from its wire format, consuming the whole buffer.
    pub fn decode(data: &[u8]) -> Result<Self, TableError> {
        let (pk_len, rest) = split_u16(data)?;
        if rest.len() < pk_len {
            return Err(corrupt("primary key truncated"));
        }
        let primary_key = Key::from(&rest[..pk_len]);
        let rest = &rest[pk_len..];

        let (deleted, rest) = decode_optional_doc(rest)?;
        let (added, rest) = decode_optional_doc(rest)?;

        if !rest.is_empty() {
            return Err(corrupt("trailing bytes after modification report"));
        }

        Ok(Self {
            primary_key,
            deleted,
            added,
        })
    }
}

fn encode_optional_doc(buf: &mut Vec<u8>, doc: Option<&Value>) {
    match doc {
        None => buf.push(HAS_NO_VALUE),
        Some(doc) => {
            buf.push(HAS_VALUE);
            let payload =
                serde_json::to_vec(doc).expect("JSON values always serialize");
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&payload);
        }
    }
}

fn decode_optional_doc(data: &[u8]) -> Result<(Option<Value>, &[u8]), TableError> {
    let (&tag, rest) = data
        .split_first()
        .ok_or_else(|| corrupt("missing presence tag"))?;
    match tag {
        HAS_NO_VALUE => Ok((None, rest)),
        HAS_VALUE => {
            if rest.len() < 4 {
                return Err(corrupt("document length truncated"));
            }
            let len = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
            let rest = &rest[4..];
            if rest.len() < len {
                return Err(corrupt("document payload truncated"));
            }
            let doc = serde_json::from_slice(&rest[..len])
                .map_err(|e| corrupt(format!("undecodable document in report: {e}")))?;
            Ok((Some(doc), &rest[len..]))
        }
        other => Err(corrupt(format!("unknown presence tag {other:#04x}"))),
    }
}

fn split_u16(data: &[u8]) -> Result<(usize, &[u8]), TableError> {
    if data.len() < 2 {
        return Err(corrupt("length prefix truncated"));
    }
    let len = u16::from_le_bytes(data[0..2].try_into().unwrap()) as usize;
    Ok((len, &data[2..]))
}

fn corrupt(msg: impl Into<String>) -> TableError {
    TableError::Corruption(msg.into())
}
