//! Logical-replication message decoder (spec §4.1, C1).
//!
//! Parses opaque byte frames delivered by the source's logical replication
//! stream into typed `Frame` events. Not responsible for slot creation,
//! feedback messages or durability — those live in `source_db::replication`
//! (C6) and `engine::cdc_ingest` (C8).

mod error;
mod frame;
mod relation;
mod tuple;

pub use error::DecodeError;
pub use frame::{Begin, Commit, Frame, RowChange, UpdateChange};
pub use relation::{Column, Relation, RelationCache};
pub use tuple::{RawRow, RawValue};

use bytes::Bytes;

use frame::read_i32;

/// Known-ignored tags: recognized pgoutput message kinds this engine has no
/// use for (origin, message, type, truncate). They decode to `Frame::Unknown`
/// rather than an error; anything else is a genuine unknown tag.
const KNOWN_IGNORED: &[char] = &['O', 'Y', 'M', 'T'];

/// Stateful decoder: owns the relation cache a stream of frames must be fed
/// through in order (a `Relation` frame mutates decoder state that later
/// `Insert`/`Update`/`Delete` frames depend on).
#[derive(Debug, Default)]
pub struct Decoder {
    relations: RelationCache,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one frame. `bytes` is the raw pgoutput message payload (the
    /// `XLogData` body), not including any outer replication-stream framing.
    pub fn decode(&mut self, mut bytes: Bytes) -> Result<Frame, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let tag = bytes[0] as char;
        bytes = bytes.slice(1..);

        match tag {
            'B' => Ok(Frame::Begin(Begin::decode(bytes)?)),
            'C' => Ok(Frame::Commit(Commit::decode(bytes)?)),
            'R' => {
                let relation = Relation::decode(bytes)?;
                let id = relation.id;
                let schema = relation.namespace.clone();
                let table = relation.name.clone();
                self.relations.insert(relation);
                Ok(Frame::Relation { id, schema, table })
            }
            'I' => self.decode_insert(bytes),
            'U' => self.decode_update(bytes),
            'D' => self.decode_delete(bytes),
            other if KNOWN_IGNORED.contains(&other) => Ok(Frame::Unknown(other)),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    fn relation(&self, id: i32) -> Result<&Relation, DecodeError> {
        self.relations.get(id).ok_or(DecodeError::UnknownRelation(id))
    }

    fn decode_insert(&mut self, mut bytes: Bytes) -> Result<Frame, DecodeError> {
        let rel_id = read_i32(&mut bytes)?;
        let relation = self.relation(rel_id)?;
        expect_tag(&mut bytes, 'N')?;
        let row = tuple::decode_tuple(&mut bytes, relation)?;
        Ok(Frame::Insert(frame::RowChange {
            schema: relation.namespace.clone(),
            table: relation.name.clone(),
            row,
        }))
    }

    fn decode_update(&mut self, mut bytes: Bytes) -> Result<Frame, DecodeError> {
        let rel_id = read_i32(&mut bytes)?;
        let relation = self.relation(rel_id)?;

        if bytes.is_empty() {
            return Err(DecodeError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let mut sub_type = bytes[0] as char;

        let mut key = None;
        let mut old = None;
        if sub_type == 'K' || sub_type == 'O' {
            bytes = bytes.slice(1..);
            let decoded = tuple::decode_tuple(&mut bytes, relation)?;
            if sub_type == 'K' {
                key = Some(decoded);
            } else {
                old = Some(decoded);
            }
            if bytes.is_empty() {
                return Err(DecodeError::Truncated {
                    expected: 1,
                    got: 0,
                });
            }
            sub_type = bytes[0] as char;
        }

        if sub_type != 'N' {
            return Err(DecodeError::UnknownTag(sub_type));
        }
        bytes = bytes.slice(1..);
        let row = tuple::decode_tuple(&mut bytes, relation)?;

        Ok(Frame::Update(frame::UpdateChange {
            schema: relation.namespace.clone(),
            table: relation.name.clone(),
            key,
            old,
            row,
        }))
    }

    fn decode_delete(&mut self, mut bytes: Bytes) -> Result<Frame, DecodeError> {
        let rel_id = read_i32(&mut bytes)?;
        let relation = self.relation(rel_id)?;
        if bytes.is_empty() {
            return Err(DecodeError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let sub_type = bytes[0] as char;
        if sub_type != 'K' && sub_type != 'O' {
            return Err(DecodeError::UnknownTag(sub_type));
        }
        bytes = bytes.slice(1..);
        let row = tuple::decode_tuple(&mut bytes, relation)?;

        Ok(Frame::Delete(frame::RowChange {
            schema: relation.namespace.clone(),
            table: relation.name.clone(),
            row,
        }))
    }
}

fn expect_tag(bytes: &mut Bytes, expected: char) -> Result<(), DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Truncated {
            expected: 1,
            got: 0,
        });
    }
    let tag = bytes[0] as char;
    if tag != expected {
        return Err(DecodeError::UnknownTag(tag));
    }
    *bytes = bytes.slice(1..);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn relation_frame(id: i32, schema: &str, table: &str, columns: &[(&str, i8)]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'R');
        buf.put_i32(id);
        buf.put_slice(schema.as_bytes());
        buf.put_u8(0);
        buf.put_slice(table.as_bytes());
        buf.put_u8(0);
        buf.put_i8(b'd' as i8); // replica identity: default
        buf.put_i16(columns.len() as i16);
        for (name, flag) in columns {
            buf.put_i8(*flag);
            buf.put_slice(name.as_bytes());
            buf.put_u8(0);
            buf.put_i32(25); // text oid
            buf.put_i32(-1);
        }
        buf.freeze()
    }

    fn insert_frame(rel_id: i32, values: &[Option<&str>]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'I');
        buf.put_i32(rel_id);
        buf.put_u8(b'N');
        buf.put_i16(values.len() as i16);
        for v in values {
            match v {
                None => buf.put_u8(b'n'),
                Some(s) => {
                    buf.put_u8(b't');
                    buf.put_i32(s.len() as i32);
                    buf.put_slice(s.as_bytes());
                }
            }
        }
        buf.freeze()
    }

    #[test]
    fn decodes_relation_then_insert() {
        let mut decoder = Decoder::new();
        let rel = relation_frame(1, "public", "products", &[("id", 1), ("name", 0)]);
        match decoder.decode(rel).unwrap() {
            Frame::Relation { id, schema, table } => {
                assert_eq!(id, 1);
                assert_eq!(schema, "public");
                assert_eq!(table, "products");
            }
            other => panic!("expected Relation, got {other:?}"),
        }

        let insert = insert_frame(1, &[Some("1"), Some("Widget")]);
        match decoder.decode(insert).unwrap() {
            Frame::Insert(change) => {
                assert_eq!(change.schema, "public");
                assert_eq!(change.table, "products");
                assert_eq!(change.row.get("id"), Some(&RawValue::Text("1".into())));
                assert_eq!(
                    change.row.get("name"),
                    Some(&RawValue::Text("Widget".into()))
                );
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn insert_without_relation_fails() {
        let mut decoder = Decoder::new();
        let insert = insert_frame(99, &[Some("1")]);
        let err = decoder.decode(insert).unwrap_err();
        assert_eq!(err, DecodeError::UnknownRelation(99));
    }

    #[test]
    fn truncated_frame_errors_instead_of_panicking() {
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();
        buf.put_u8(b'R');
        buf.put_i16(1); // way too short for an i32 relation id
        let err = decoder.decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn unknown_ignored_tag_is_not_an_error() {
        let mut decoder = Decoder::new();
        let frame = decoder.decode(Bytes::from_static(b"T")).unwrap();
        assert!(matches!(frame, Frame::Unknown('T')));
    }

    #[test]
    fn genuinely_unknown_tag_errors() {
        let mut decoder = Decoder::new();
        let err = decoder.decode(Bytes::from_static(b"?")).unwrap_err();
        assert_eq!(err, DecodeError::UnknownTag('?'));
    }

    #[test]
    fn delete_with_key_tuple() {
        let mut decoder = Decoder::new();
        let rel = relation_frame(2, "public", "products", &[("id", 1)]);
        decoder.decode(rel).unwrap();

        let mut buf = BytesMut::new();
        buf.put_u8(b'D');
        buf.put_i32(2);
        buf.put_u8(b'K');
        buf.put_i16(1);
        buf.put_u8(b't');
        buf.put_i32(1);
        buf.put_slice(b"7");

        match decoder.decode(buf.freeze()).unwrap() {
            Frame::Delete(change) => {
                assert_eq!(change.row.get("id"), Some(&RawValue::Text("7".into())));
            }
            other => panic!("expected Delete, got {other:?}"),
        }
    }
}
