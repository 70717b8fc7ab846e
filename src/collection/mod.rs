//! Collection commands and batch assembly.
//!
//! - [`BKey`] / [`BKeyRange`]: B-tree element keys
//! - [`Transcoder`]: element value encoding
//! - [`CollectionCommand`]: one sub-command and its wire encoding
//! - [`PipelineBuilder`]: assembles up to 500 keyed commands into a [`PipelineBatch`]

pub(crate) mod bkey;
mod command;
mod key;
mod pipe;
mod transcoder;

pub use bkey::{from_hex, to_hex, BKey, BKeyRange, HexError, MAX_BKEY_BYTES};
pub use command::{CollectionCommand, MutateOp};
pub use key::{validate_field, validate_key, MAX_KEY_LENGTH};
pub use pipe::{KeyedCommand, PipelineBatch, PipelineBuilder, MAX_PIPED_ITEM_COUNT};
pub use transcoder::{
    BytesTranscoder, CachedData, SerdeTranscoder, StringTranscoder, Transcoder,
    DEFAULT_MAX_ELEMENT_BYTES, FLAG_BYTES, FLAG_SERIALIZED, FLAG_STRING,
};
