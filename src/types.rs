//! Collection-level value types shared by commands and builders.

use crate::collection::bkey::{from_hex, to_hex, MAX_BKEY_BYTES};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-side collection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionType {
    /// Ordered list (`lop`).
    List,
    /// Unordered set (`sop`).
    Set,
    /// Field-to-value map (`mop`).
    Map,
    /// B-tree keyed by [`BKey`](crate::collection::BKey) (`bop`).
    BTree,
}

impl CollectionType {
    /// Command prefix used on the wire.
    pub fn prefix(&self) -> &'static str {
        match self {
            CollectionType::List => "lop",
            CollectionType::Set => "sop",
            CollectionType::Map => "mop",
            CollectionType::BTree => "bop",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// What the server does when a collection reaches `max_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowAction {
    /// Reject the insert.
    Error,
    /// Evict from the head.
    HeadTrim,
    /// Evict from the tail.
    TailTrim,
    /// Evict the smallest bkey.
    SmallestTrim,
    /// Evict the largest bkey.
    LargestTrim,
}

impl OverflowAction {
    /// Wire token for the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowAction::Error => "error",
            OverflowAction::HeadTrim => "head_trim",
            OverflowAction::TailTrim => "tail_trim",
            OverflowAction::SmallestTrim => "smallest_trim",
            OverflowAction::LargestTrim => "largest_trim",
        }
    }
}

/// Attributes used when an insert auto-creates its collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionAttributes {
    /// Item flags; `None` uses the transcoder flags.
    pub flags: Option<u32>,
    /// Expire time in seconds, 0 for never.
    pub expire_time: i64,
    /// Maximum element count, `None` for the server default.
    pub max_count: Option<u64>,
    /// Overflow policy.
    pub overflow_action: Option<OverflowAction>,
}

impl Default for CollectionAttributes {
    fn default() -> Self {
        Self {
            flags: None,
            expire_time: 0,
            max_count: None,
            overflow_action: None,
        }
    }
}

impl CollectionAttributes {
    /// Create attributes with server defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set item flags.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Set the expire time.
    pub fn with_expire_time(mut self, seconds: i64) -> Self {
        self.expire_time = seconds;
        self
    }

    /// Set the maximum element count.
    pub fn with_max_count(mut self, max_count: u64) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Set the overflow action.
    pub fn with_overflow_action(mut self, action: OverflowAction) -> Self {
        self.overflow_action = Some(action);
        self
    }

    /// Render the `create` clause.
    pub(crate) fn create_clause(&self, default_flags: u32) -> String {
        // maxcount 0 asks the server for its default
        let mut clause = format!(
            "create {} {} {}",
            self.flags.unwrap_or(default_flags),
            self.expire_time,
            self.max_count.unwrap_or(0)
        );
        if let Some(action) = self.overflow_action {
            clause.push(' ');
            clause.push_str(action.as_str());
        }
        clause
    }
}

/// Element flag attached to B-tree elements (1 to 31 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementFlag(Vec<u8>);

impl ElementFlag {
    /// Create an element flag from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_BKEY_BYTES {
            return Err(Error::Config(format!(
                "element flag must be 1..={} bytes, got {}",
                MAX_BKEY_BYTES,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse a `0x`-prefixed hex string.
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = from_hex(text).map_err(|e| Error::Config(format!("element flag: {}", e)))?;
        Self::new(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ElementFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(&self.0))
    }
}
