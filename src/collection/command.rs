//! Collection sub-commands and their ASCII encoding.

use super::bkey::{BKey, BKeyRange};
use super::transcoder::CachedData;
use crate::types::{CollectionAttributes, CollectionType, ElementFlag};
use bytes::{BufMut, BytesMut};
use std::fmt::Write;

/// Direction of a B-tree element mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateOp {
    Incr,
    Decr,
}

impl MutateOp {
    fn verb(&self) -> &'static str {
        match self {
            MutateOp::Incr => "incr",
            MutateOp::Decr => "decr",
        }
    }
}

/// One keyed collection command, minus the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionCommand {
    ListInsert {
        index: i32,
        value: CachedData,
        attributes: Option<CollectionAttributes>,
    },
    SetInsert {
        value: CachedData,
        attributes: Option<CollectionAttributes>,
    },
    MapInsert {
        field: String,
        value: CachedData,
        attributes: Option<CollectionAttributes>,
    },
    BTreeInsert {
        bkey: BKey,
        eflag: Option<ElementFlag>,
        value: CachedData,
        attributes: Option<CollectionAttributes>,
    },
    /// Insert, or replace an existing element with the same bkey.
    BTreeUpsert {
        bkey: BKey,
        eflag: Option<ElementFlag>,
        value: CachedData,
        attributes: Option<CollectionAttributes>,
    },
    /// Delete list elements `from..=to`; a single index when equal.
    ListDelete {
        from: i32,
        to: i32,
        drop_if_empty: bool,
    },
    SetDelete {
        value: CachedData,
        drop_if_empty: bool,
    },
    /// Delete map fields; no fields deletes every field.
    MapDelete {
        fields: Vec<String>,
        drop_if_empty: bool,
    },
    BTreeDelete {
        range: BKeyRange,
        count: Option<u32>,
        drop_if_empty: bool,
    },
    MapUpdate {
        field: String,
        value: CachedData,
    },
    BTreeUpdate {
        bkey: BKey,
        value: CachedData,
    },
    /// Increment or decrement a numeric element, creating it with `initial`
    /// if given and missing.
    BTreeMutate {
        op: MutateOp,
        bkey: BKey,
        delta: u64,
        initial: Option<u64>,
    },
}

impl CollectionCommand {
    /// Collection kind the command targets.
    pub fn collection_type(&self) -> CollectionType {
        match self {
            CollectionCommand::ListInsert { .. } | CollectionCommand::ListDelete { .. } => {
                CollectionType::List
            }
            CollectionCommand::SetInsert { .. } | CollectionCommand::SetDelete { .. } => {
                CollectionType::Set
            }
            CollectionCommand::MapInsert { .. }
            | CollectionCommand::MapDelete { .. }
            | CollectionCommand::MapUpdate { .. } => CollectionType::Map,
            CollectionCommand::BTreeInsert { .. }
            | CollectionCommand::BTreeUpsert { .. }
            | CollectionCommand::BTreeDelete { .. }
            | CollectionCommand::BTreeUpdate { .. }
            | CollectionCommand::BTreeMutate { .. } => CollectionType::BTree,
        }
    }

    /// Command verb.
    pub fn verb(&self) -> &'static str {
        match self {
            CollectionCommand::ListInsert { .. }
            | CollectionCommand::SetInsert { .. }
            | CollectionCommand::MapInsert { .. }
            | CollectionCommand::BTreeInsert { .. } => "insert",
            CollectionCommand::BTreeUpsert { .. } => "upsert",
            CollectionCommand::ListDelete { .. }
            | CollectionCommand::SetDelete { .. }
            | CollectionCommand::MapDelete { .. }
            | CollectionCommand::BTreeDelete { .. } => "delete",
            CollectionCommand::MapUpdate { .. } | CollectionCommand::BTreeUpdate { .. } => {
                "update"
            }
            CollectionCommand::BTreeMutate { op, .. } => op.verb(),
        }
    }

    /// Append the encoded command for `key` to `buf`.
    pub fn write_to(&self, key: &str, buf: &mut BytesMut) {
        let mut line = format!("{} {} {}", self.collection_type().prefix(), self.verb(), key);
        let mut data: Option<&[u8]> = None;

        // write! into a String cannot fail
        match self {
            CollectionCommand::ListInsert {
                index,
                value,
                attributes,
            } => {
                let _ = write!(line, " {} {}", index, value.len());
                push_create(&mut line, attributes.as_ref(), value.flags);
                data = Some(&value.data[..]);
            }
            CollectionCommand::SetInsert { value, attributes } => {
                let _ = write!(line, " {}", value.len());
                push_create(&mut line, attributes.as_ref(), value.flags);
                data = Some(&value.data[..]);
            }
            CollectionCommand::MapInsert {
                field,
                value,
                attributes,
            } => {
                let _ = write!(line, " {} {}", field, value.len());
                push_create(&mut line, attributes.as_ref(), value.flags);
                data = Some(&value.data[..]);
            }
            CollectionCommand::BTreeInsert {
                bkey,
                eflag,
                value,
                attributes,
            }
            | CollectionCommand::BTreeUpsert {
                bkey,
                eflag,
                value,
                attributes,
            } => {
                let _ = write!(line, " {}", bkey);
                if let Some(eflag) = eflag {
                    let _ = write!(line, " {}", eflag);
                }
                let _ = write!(line, " {}", value.len());
                push_create(&mut line, attributes.as_ref(), value.flags);
                data = Some(&value.data[..]);
            }
            CollectionCommand::ListDelete {
                from,
                to,
                drop_if_empty,
            } => {
                if from == to {
                    let _ = write!(line, " {}", from);
                } else {
                    let _ = write!(line, " {}..{}", from, to);
                }
                push_drop(&mut line, *drop_if_empty);
            }
            CollectionCommand::SetDelete {
                value,
                drop_if_empty,
            } => {
                let _ = write!(line, " {}", value.len());
                push_drop(&mut line, *drop_if_empty);
                data = Some(&value.data[..]);
            }
            CollectionCommand::MapDelete {
                fields,
                drop_if_empty,
            } => {
                let joined = fields.join(" ");
                let _ = write!(line, " {} {}", joined.len(), fields.len());
                push_drop(&mut line, *drop_if_empty);
                put_line(buf, &line);
                if !fields.is_empty() {
                    put_line(buf, &joined);
                }
                return;
            }
            CollectionCommand::BTreeDelete {
                range,
                count,
                drop_if_empty,
            } => {
                let _ = write!(line, " {}", range);
                if let Some(count) = count {
                    let _ = write!(line, " {}", count);
                }
                push_drop(&mut line, *drop_if_empty);
            }
            CollectionCommand::MapUpdate { field, value } => {
                let _ = write!(line, " {} {}", field, value.len());
                data = Some(&value.data[..]);
            }
            CollectionCommand::BTreeUpdate { bkey, value } => {
                let _ = write!(line, " {} {}", bkey, value.len());
                data = Some(&value.data[..]);
            }
            CollectionCommand::BTreeMutate {
                bkey,
                delta,
                initial,
                ..
            } => {
                let _ = write!(line, " {} {}", bkey, delta);
                if let Some(initial) = initial {
                    let _ = write!(line, " {}", initial);
                }
            }
        }

        put_line(buf, &line);
        if let Some(data) = data {
            buf.put_slice(data);
            buf.put_slice(b"\r\n");
        }
    }
}

fn push_create(line: &mut String, attributes: Option<&CollectionAttributes>, flags: u32) {
    if let Some(attributes) = attributes {
        line.push(' ');
        line.push_str(&attributes.create_clause(flags));
    }
}

fn push_drop(line: &mut String, drop_if_empty: bool) {
    if drop_if_empty {
        line.push_str(" drop");
    }
}

fn put_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OverflowAction;

    fn encode(key: &str, command: CollectionCommand) -> String {
        let mut buf = BytesMut::new();
        command.write_to(key, &mut buf);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    fn value(text: &str) -> CachedData {
        CachedData::new(0, text.as_bytes().to_vec())
    }

    #[test]
    fn test_insert_encodings() {
        assert_eq!(
            encode(
                "l",
                CollectionCommand::ListInsert {
                    index: -1,
                    value: value("abc"),
                    attributes: None
                }
            ),
            "lop insert l -1 3\r\nabc\r\n"
        );

        let attrs = CollectionAttributes::new()
            .with_max_count(100)
            .with_overflow_action(OverflowAction::Error);
        assert_eq!(
            encode(
                "s",
                CollectionCommand::SetInsert {
                    value: value("v"),
                    attributes: Some(attrs)
                }
            ),
            "sop insert s 1 create 0 0 100 error\r\nv\r\n"
        );

        assert_eq!(
            encode(
                "m",
                CollectionCommand::MapInsert {
                    field: "f1".to_string(),
                    value: value("xy"),
                    attributes: None
                }
            ),
            "mop insert m f1 2\r\nxy\r\n"
        );
    }

    #[test]
    fn test_btree_encodings() {
        let eflag = ElementFlag::new(vec![0x0f]).unwrap();
        assert_eq!(
            encode(
                "b",
                CollectionCommand::BTreeInsert {
                    bkey: BKey::long(10),
                    eflag: Some(eflag),
                    value: value("v"),
                    attributes: None
                }
            ),
            "bop insert b 10 0x0F 1\r\nv\r\n"
        );
        assert_eq!(
            encode(
                "b",
                CollectionCommand::BTreeUpsert {
                    bkey: BKey::bytes(vec![0xab]).unwrap(),
                    eflag: None,
                    value: value("v"),
                    attributes: None
                }
            ),
            "bop upsert b 0xAB 1\r\nv\r\n"
        );
        assert_eq!(
            encode(
                "b",
                CollectionCommand::BTreeDelete {
                    range: BKeyRange::new(BKey::long(1), BKey::long(9)).unwrap(),
                    count: Some(5),
                    drop_if_empty: true
                }
            ),
            "bop delete b 1..9 5 drop\r\n"
        );
        assert_eq!(
            encode(
                "b",
                CollectionCommand::BTreeMutate {
                    op: MutateOp::Decr,
                    bkey: BKey::long(3),
                    delta: 2,
                    initial: Some(100)
                }
            ),
            "bop decr b 3 2 100\r\n"
        );
    }

    #[test]
    fn test_delete_encodings() {
        assert_eq!(
            encode(
                "l",
                CollectionCommand::ListDelete {
                    from: 0,
                    to: 0,
                    drop_if_empty: false
                }
            ),
            "lop delete l 0\r\n"
        );
        assert_eq!(
            encode(
                "l",
                CollectionCommand::ListDelete {
                    from: 0,
                    to: -1,
                    drop_if_empty: true
                }
            ),
            "lop delete l 0..-1 drop\r\n"
        );
        assert_eq!(
            encode(
                "s",
                CollectionCommand::SetDelete {
                    value: value("v"),
                    drop_if_empty: false
                }
            ),
            "sop delete s 1\r\nv\r\n"
        );
        assert_eq!(
            encode(
                "m",
                CollectionCommand::MapDelete {
                    fields: vec!["a".to_string(), "bc".to_string()],
                    drop_if_empty: false
                }
            ),
            "mop delete m 4 2\r\na bc\r\n"
        );
        assert_eq!(
            encode(
                "m",
                CollectionCommand::MapDelete {
                    fields: vec![],
                    drop_if_empty: true
                }
            ),
            "mop delete m 0 0 drop\r\n"
        );
    }

    #[test]
    fn test_update_encodings() {
        assert_eq!(
            encode(
                "m",
                CollectionCommand::MapUpdate {
                    field: "f".to_string(),
                    value: value("new")
                }
            ),
            "mop update m f 3\r\nnew\r\n"
        );
        assert_eq!(
            encode(
                "b",
                CollectionCommand::BTreeUpdate {
                    bkey: BKey::long(5),
                    value: value("n")
                }
            ),
            "bop update b 5 1\r\nn\r\n"
        );
    }
}
