//! Conversion between element values and wire bytes.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Largest element the server accepts by default.
pub const DEFAULT_MAX_ELEMENT_BYTES: usize = 16 * 1024;

/// Item flags written by [`StringTranscoder`].
pub const FLAG_STRING: u32 = 0;
/// Item flags written by [`BytesTranscoder`].
pub const FLAG_BYTES: u32 = 8 << 8;
/// Item flags written by [`SerdeTranscoder`].
pub const FLAG_SERIALIZED: u32 = 1;

/// Encoded element plus the flags describing its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedData {
    /// Encoding flags stored with the element.
    pub flags: u32,
    /// Encoded value.
    pub data: Bytes,
}

impl CachedData {
    /// Wrap encoded bytes with their flags.
    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }

    /// Encoded length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the encoded value is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encodes and decodes collection element values.
pub trait Transcoder<T>: Send + Sync + fmt::Debug {
    /// Encode a value.
    fn encode(&self, value: &T) -> Result<CachedData>;

    /// Decode a value.
    fn decode(&self, data: &CachedData) -> Result<T>;

    /// Largest encoding this transcoder produces.
    fn max_size(&self) -> usize;
}

fn check_size(data: CachedData, max: usize) -> Result<CachedData> {
    if data.len() > max {
        return Err(Error::ElementTooLarge {
            size: data.len(),
            max,
        });
    }
    Ok(data)
}

fn check_flags(data: &CachedData, expected: u32) -> Result<()> {
    if data.flags != expected {
        return Err(Error::Transcode(format!(
            "unexpected flags {:#x}, expected {:#x}",
            data.flags, expected
        )));
    }
    Ok(())
}

/// UTF-8 strings.
#[derive(Debug, Clone)]
pub struct StringTranscoder {
    max_size: usize,
}

impl StringTranscoder {
    /// Create a transcoder with the default element size limit.
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_ELEMENT_BYTES,
        }
    }

    /// Set the size limit.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Default for StringTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder<String> for StringTranscoder {
    fn encode(&self, value: &String) -> Result<CachedData> {
        check_size(
            CachedData::new(FLAG_STRING, Bytes::copy_from_slice(value.as_bytes())),
            self.max_size,
        )
    }

    fn decode(&self, data: &CachedData) -> Result<String> {
        check_flags(data, FLAG_STRING)?;
        Ok(String::from_utf8(data.data.to_vec())?)
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Raw bytes, passed through unchanged.
#[derive(Debug, Clone)]
pub struct BytesTranscoder {
    max_size: usize,
}

impl BytesTranscoder {
    /// Create a transcoder with the default element size limit.
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_ELEMENT_BYTES,
        }
    }

    /// Set the size limit.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

impl Default for BytesTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcoder<Bytes> for BytesTranscoder {
    fn encode(&self, value: &Bytes) -> Result<CachedData> {
        check_size(CachedData::new(FLAG_BYTES, value.clone()), self.max_size)
    }

    fn decode(&self, data: &CachedData) -> Result<Bytes> {
        check_flags(data, FLAG_BYTES)?;
        Ok(data.data.clone())
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

/// Any serde type, encoded with bincode.
pub struct SerdeTranscoder<T> {
    max_size: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeTranscoder<T> {
    /// Create a transcoder with the default element size limit.
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_ELEMENT_BYTES,
            _marker: PhantomData,
        }
    }

    /// Set the size limit.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

impl<T> Default for SerdeTranscoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeTranscoder<T> {
    fn clone(&self) -> Self {
        Self {
            max_size: self.max_size,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SerdeTranscoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeTranscoder")
            .field("type", &std::any::type_name::<T>())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl<T> Transcoder<T> for SerdeTranscoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<CachedData> {
        let encoded = bincode::serialize(value)?;
        check_size(CachedData::new(FLAG_SERIALIZED, encoded), self.max_size)
    }

    fn decode(&self, data: &CachedData) -> Result<T> {
        check_flags(data, FLAG_SERIALIZED)?;
        Ok(bincode::deserialize(&data.data)?)
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}
