//! Batch assembly for piped collection commands.
//!
//! [`PipelineBuilder`] performs no I/O. Every call validates its arguments and
//! appends one command; a rejected call leaves the batch untouched.

use super::bkey::{BKey, BKeyRange};
use super::command::{CollectionCommand, MutateOp};
use super::key::{validate_field, validate_key};
use super::transcoder::Transcoder;
use crate::error::{Error, Result};
use crate::types::{CollectionAttributes, ElementFlag};
use std::collections::HashSet;
use std::sync::Arc;

/// Most commands one batch may carry.
pub const MAX_PIPED_ITEM_COUNT: usize = 500;

/// A command and the item key it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedCommand {
    /// Key the command targets.
    pub key: String,
    /// The command itself.
    pub command: CollectionCommand,
}

/// An ordered batch of keyed commands.
#[derive(Debug, Clone, Default)]
pub struct PipelineBatch {
    commands: Vec<KeyedCommand>,
    keys: HashSet<String>,
}

impl PipelineBatch {
    /// Build a batch from already-validated commands.
    pub(crate) fn from_commands(commands: Vec<KeyedCommand>) -> Result<Self> {
        if commands.len() > MAX_PIPED_ITEM_COUNT {
            return Err(Error::PipelineFull {
                max: MAX_PIPED_ITEM_COUNT,
            });
        }
        let keys = commands.iter().map(|c| c.key.clone()).collect();
        Ok(Self { commands, keys })
    }

    /// Commands in submission order.
    pub fn commands(&self) -> &[KeyedCommand] {
        &self.commands
    }

    /// Distinct keys referenced by the batch.
    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    /// Number of commands in the batch.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the batch has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Consume the batch, returning its commands in order.
    pub fn into_commands(self) -> Vec<KeyedCommand> {
        self.commands
    }
}

/// Fluent builder for a [`PipelineBatch`].
///
/// ```rust,ignore
/// let mut pipe = PipelineBuilder::new(Arc::new(StringTranscoder::new()));
/// pipe.lop_insert("recent", -1, &"a".to_string(), None)?
///     .bop_insert("scores", BKey::long(10), None, &"ten".to_string(), None)?;
/// let batch = pipe.build();
/// ```
#[derive(Debug)]
pub struct PipelineBuilder<T> {
    transcoder: Arc<dyn Transcoder<T>>,
    batch: PipelineBatch,
}

impl<T> PipelineBuilder<T> {
    /// Create an empty builder encoding values with `transcoder`.
    pub fn new(transcoder: Arc<dyn Transcoder<T>>) -> Self {
        Self {
            transcoder,
            batch: PipelineBatch::default(),
        }
    }

    /// Number of commands so far.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// Check if no commands were added yet.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Finish the batch.
    pub fn build(self) -> PipelineBatch {
        self.batch
    }

    fn push(&mut self, key: &str, command: CollectionCommand) -> Result<&mut Self> {
        self.batch.keys.insert(key.to_string());
        self.batch.commands.push(KeyedCommand {
            key: key.to_string(),
            command,
        });
        Ok(self)
    }

    fn check_capacity(&self) -> Result<()> {
        if self.batch.len() >= MAX_PIPED_ITEM_COUNT {
            return Err(Error::PipelineFull {
                max: MAX_PIPED_ITEM_COUNT,
            });
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<()> {
        self.check_capacity()?;
        validate_key(key)
    }

    // ---- list ----------------------------------------------------------

    /// Insert at `index`; negative indices count from the tail.
    pub fn lop_insert(
        &mut self,
        key: &str,
        index: i32,
        value: &T,
        attributes: Option<CollectionAttributes>,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        let value = self.transcoder.encode(value)?;
        self.push(
            key,
            CollectionCommand::ListInsert {
                index,
                value,
                attributes,
            },
        )
    }

    /// Delete elements `from..=to`.
    pub fn lop_delete(
        &mut self,
        key: &str,
        from: i32,
        to: i32,
        drop_if_empty: bool,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        self.push(
            key,
            CollectionCommand::ListDelete {
                from,
                to,
                drop_if_empty,
            },
        )
    }

    // ---- set -----------------------------------------------------------

    /// Add a value to a set.
    pub fn sop_insert(
        &mut self,
        key: &str,
        value: &T,
        attributes: Option<CollectionAttributes>,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        let value = self.transcoder.encode(value)?;
        self.push(key, CollectionCommand::SetInsert { value, attributes })
    }

    /// Remove a value from a set.
    pub fn sop_delete(&mut self, key: &str, value: &T, drop_if_empty: bool) -> Result<&mut Self> {
        self.check_key(key)?;
        let value = self.transcoder.encode(value)?;
        self.push(
            key,
            CollectionCommand::SetDelete {
                value,
                drop_if_empty,
            },
        )
    }

    // ---- map -----------------------------------------------------------

    /// Insert a field into a map.
    pub fn mop_insert(
        &mut self,
        key: &str,
        field: &str,
        value: &T,
        attributes: Option<CollectionAttributes>,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        validate_field(field)?;
        let value = self.transcoder.encode(value)?;
        self.push(
            key,
            CollectionCommand::MapInsert {
                field: field.to_string(),
                value,
                attributes,
            },
        )
    }

    /// Delete the given fields, or every field when `fields` is empty.
    pub fn mop_delete(
        &mut self,
        key: &str,
        fields: &[&str],
        drop_if_empty: bool,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        for field in fields {
            validate_field(field)?;
        }
        self.push(
            key,
            CollectionCommand::MapDelete {
                fields: fields.iter().map(|f| f.to_string()).collect(),
                drop_if_empty,
            },
        )
    }

    /// Replace the value of an existing map field.
    pub fn mop_update(&mut self, key: &str, field: &str, value: &T) -> Result<&mut Self> {
        self.check_key(key)?;
        validate_field(field)?;
        let value = self.transcoder.encode(value)?;
        self.push(
            key,
            CollectionCommand::MapUpdate {
                field: field.to_string(),
                value,
            },
        )
    }

    // ---- b+tree --------------------------------------------------------

    /// Insert an element, failing if the bkey already exists.
    pub fn bop_insert(
        &mut self,
        key: &str,
        bkey: BKey,
        eflag: Option<ElementFlag>,
        value: &T,
        attributes: Option<CollectionAttributes>,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        bkey.validate()?;
        let value = self.transcoder.encode(value)?;
        self.push(
            key,
            CollectionCommand::BTreeInsert {
                bkey,
                eflag,
                value,
                attributes,
            },
        )
    }

    /// Insert, replacing an element with the same bkey.
    pub fn bop_upsert(
        &mut self,
        key: &str,
        bkey: BKey,
        eflag: Option<ElementFlag>,
        value: &T,
        attributes: Option<CollectionAttributes>,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        bkey.validate()?;
        let value = self.transcoder.encode(value)?;
        self.push(
            key,
            CollectionCommand::BTreeUpsert {
                bkey,
                eflag,
                value,
                attributes,
            },
        )
    }

    /// Delete up to `count` elements in `range` (all when `None`).
    pub fn bop_delete(
        &mut self,
        key: &str,
        range: BKeyRange,
        count: Option<u32>,
        drop_if_empty: bool,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        self.push(
            key,
            CollectionCommand::BTreeDelete {
                range,
                count,
                drop_if_empty,
            },
        )
    }

    /// Replace the value of the element at `bkey`.
    pub fn bop_update(&mut self, key: &str, bkey: BKey, value: &T) -> Result<&mut Self> {
        self.check_key(key)?;
        bkey.validate()?;
        let value = self.transcoder.encode(value)?;
        self.push(key, CollectionCommand::BTreeUpdate { bkey, value })
    }

    /// Add `delta` to a numeric element; `initial` creates it when missing.
    pub fn bop_incr(
        &mut self,
        key: &str,
        bkey: BKey,
        delta: u64,
        initial: Option<u64>,
    ) -> Result<&mut Self> {
        self.bop_mutate(key, MutateOp::Incr, bkey, delta, initial)
    }

    /// Subtract `delta` from a numeric element; `initial` creates it when missing.
    pub fn bop_decr(
        &mut self,
        key: &str,
        bkey: BKey,
        delta: u64,
        initial: Option<u64>,
    ) -> Result<&mut Self> {
        self.bop_mutate(key, MutateOp::Decr, bkey, delta, initial)
    }

    fn bop_mutate(
        &mut self,
        key: &str,
        op: MutateOp,
        bkey: BKey,
        delta: u64,
        initial: Option<u64>,
    ) -> Result<&mut Self> {
        self.check_key(key)?;
        bkey.validate()?;
        self.push(
            key,
            CollectionCommand::BTreeMutate {
                op,
                bkey,
                delta,
                initial,
            },
        )
    }
}
