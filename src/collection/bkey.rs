//! B-tree element keys.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error as ThisError;

/// Maximum length of a byte-array bkey or element flag.
pub const MAX_BKEY_BYTES: usize = 31;

/// Hex text that could not be decoded.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error(transparent)]
    Decode(#[from] hex::FromHexError),
}

/// Render bytes as `0x` followed by upper-case hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode_upper(bytes))
}

/// Parse `0x`-prefixed hex, either case.
pub fn from_hex(text: &str) -> std::result::Result<Vec<u8>, HexError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or(HexError::MissingPrefix)?;
    Ok(hex::decode(digits)?)
}

/// Key of a B-tree element.
///
/// Integer and byte-array keys live in separate key spaces; they are never
/// compared with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BKey {
    /// Unsigned 64-bit key.
    Long(u64),
    /// 1 to 31 bytes, ordered lexicographically.
    Bytes(Vec<u8>),
}

impl BKey {
    /// Integer bkey.
    pub fn long(value: u64) -> Self {
        BKey::Long(value)
    }

    /// Integer bkey from a signed value; negatives need the byte-array form.
    pub fn from_i64(value: i64) -> Result<Self> {
        u64::try_from(value).map(BKey::Long).map_err(|_| {
            Error::InvalidBKey(format!(
                "negative bkey {}; use a byte-array bkey instead",
                value
            ))
        })
    }

    /// Byte-array bkey.
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let key = BKey::Bytes(bytes.into());
        key.validate()?;
        Ok(key)
    }

    /// Byte-array bkey from `0x`-prefixed hex.
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = from_hex(text).map_err(|e| Error::InvalidBKey(format!("{}: {}", text, e)))?;
        Self::bytes(bytes)
    }

    /// Parse the wire form: decimal for integers, `0x` hex for byte arrays.
    pub fn parse(text: &str) -> Result<Self> {
        if text.starts_with("0x") || text.starts_with("0X") {
            return Self::from_hex(text);
        }
        text.parse::<u64>()
            .map(BKey::Long)
            .map_err(|_| Error::InvalidBKey(format!("not a bkey: {:?}", text)))
    }

    /// Check the shape constraints.
    pub fn validate(&self) -> Result<()> {
        match self {
            BKey::Long(_) => Ok(()),
            BKey::Bytes(bytes) if bytes.is_empty() || bytes.len() > MAX_BKEY_BYTES => {
                Err(Error::InvalidBKey(format!(
                    "byte-array bkey must be 1..={} bytes, got {}",
                    MAX_BKEY_BYTES,
                    bytes.len()
                )))
            }
            BKey::Bytes(_) => Ok(()),
        }
    }

    /// Check if this is an integer bkey.
    pub fn is_long(&self) -> bool {
        matches!(self, BKey::Long(_))
    }

    /// Check if both keys are in the same key space.
    pub fn same_kind(&self, other: &BKey) -> bool {
        self.is_long() == other.is_long()
    }

    /// Order two bkeys of the same kind.
    pub fn compare(&self, other: &BKey) -> Result<Ordering> {
        match (self, other) {
            (BKey::Long(a), BKey::Long(b)) => Ok(a.cmp(b)),
            // slice ordering: unsigned bytes, shorter prefix first
            (BKey::Bytes(a), BKey::Bytes(b)) => Ok(a.as_slice().cmp(b.as_slice())),
            _ => Err(Error::BKeyMismatch),
        }
    }
}

impl fmt::Display for BKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BKey::Long(value) => write!(f, "{}", value),
            BKey::Bytes(bytes) => f.write_str(&to_hex(bytes)),
        }
    }
}

/// Inclusive bkey range; `from > to` scans in descending order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BKeyRange {
    from: BKey,
    to: BKey,
}

impl BKeyRange {
    /// Create a range. Both ends must be the same kind.
    pub fn new(from: BKey, to: BKey) -> Result<Self> {
        from.validate()?;
        to.validate()?;
        if !from.same_kind(&to) {
            return Err(Error::BKeyMismatch);
        }
        Ok(Self { from, to })
    }

    /// A range matching one bkey.
    pub fn single(bkey: BKey) -> Result<Self> {
        Self::new(bkey.clone(), bkey)
    }

    /// Get the range start.
    pub fn start(&self) -> &BKey {
        &self.from
    }

    /// Get the range end, inclusive.
    pub fn end(&self) -> &BKey {
        &self.to
    }

    /// Check if the range scans from larger to smaller keys.
    pub fn is_descending(&self) -> bool {
        matches!(self.from.compare(&self.to), Ok(Ordering::Greater))
    }
}

impl fmt::Display for BKeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}..{}", self.from, self.to)
        }
    }
}
