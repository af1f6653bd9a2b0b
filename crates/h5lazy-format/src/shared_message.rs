//! Shared object header messages.
//!
//! A shared message's body is a reference to the real message, stored
//! either in another object header ("committed") or in the fractal heap of
//! a shared-message index. The index table (`SMTB`) is reached through the
//! superblock extension; small indexes keep their records in a list
//! (`SMLI`), large ones in a B-tree v2 with type 7 records.

use tracing::trace;

use crate::cursor::{Address, Cursor, FieldWidths};
use crate::error::{Error, Result};
use crate::message_type::MessageType;
use crate::source::ByteSource;

pub const TABLE_SIGNATURE: [u8; 4] = *b"SMTB";
pub const LIST_SIGNATURE: [u8; 4] = *b"SMLI";

/// Length of the fractal heap IDs used by shared-message heaps.
pub const HEAP_ID_LEN: usize = 8;

/// Where a shared message body really lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharedMessage {
    /// In the object header at this address.
    Committed(Address),
    /// In the fractal heap of the shared-message index for this type.
    Heap([u8; HEAP_ID_LEN]),
    /// Marked shared but stored in place; never valid as a reference.
    Here,
}

impl SharedMessage {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<SharedMessage> {
        let version = c.read_version("shared message", &[1, 2, 3])?;
        let kind = c.read_u8()?;
        match version {
            1 => {
                c.skip(6);
                // Legacy encoding embeds a symbol table entry: its name
                // offset comes first and is meaningless here.
                c.read_length()?;
                Ok(SharedMessage::Committed(c.read_address()?))
            }
            2 => Ok(SharedMessage::Committed(c.read_address()?)),
            _ => match kind {
                1 => Ok(SharedMessage::Heap(c.read_array::<HEAP_ID_LEN>()?)),
                2 => Ok(SharedMessage::Committed(c.read_address()?)),
                3 => Ok(SharedMessage::Here),
                other => Err(Error::malformed(
                    "shared message",
                    format!("unknown sharing type {other}"),
                )),
            },
        }
    }
}

/// The shared-message table message (0x000F) of the superblock extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMessageTableMessage {
    pub table: Address,
    pub index_count: u8,
}

impl SharedMessageTableMessage {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<SharedMessageTableMessage> {
        c.ensure_version("shared message table message", 0)?;
        Ok(SharedMessageTableMessage {
            table: c.read_address()?,
            index_count: c.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    List,
    BTree,
}

/// One shared-message index of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMessageIndex {
    pub kind: IndexKind,
    /// Bit set of message types stored in this index.
    pub type_flags: u16,
    pub min_message_size: u32,
    pub list_cutoff: u16,
    pub btree_cutoff: u16,
    pub message_count: u16,
    /// The `SMLI` list or the B-tree v2 header.
    pub index_address: Address,
    pub heap_address: Address,
}

impl SharedMessageIndex {
    /// Whether messages of `ty` are shared through this index.
    pub fn holds(&self, ty: MessageType) -> bool {
        ty.shared_index_bit()
            .is_some_and(|bit| self.type_flags & bit != 0)
    }
}

/// Parsed `SMTB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedMessageTable {
    pub address: Address,
    pub indexes: Vec<SharedMessageIndex>,
}

impl SharedMessageTable {
    /// Parse a table with `index_count` indexes, as announced by the
    /// superblock extension.
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>, index_count: u8) -> Result<SharedMessageTable> {
        let start = c.position();
        c.ensure_signature(&TABLE_SIGNATURE)?;
        let mut indexes = Vec::with_capacity(usize::from(index_count));
        for _ in 0..index_count {
            c.ensure_version("shared message index", 0)?;
            let kind = match c.read_u8()? {
                0 => IndexKind::List,
                1 => IndexKind::BTree,
                other => {
                    return Err(Error::malformed(
                        "shared message table",
                        format!("unknown index type {other}"),
                    ))
                }
            };
            indexes.push(SharedMessageIndex {
                kind,
                type_flags: c.read_u16()?,
                min_message_size: c.read_u32()?,
                list_cutoff: c.read_u16()?,
                btree_cutoff: c.read_u16()?,
                message_count: c.read_u16()?,
                index_address: c.read_address()?,
                heap_address: c.read_address()?,
            });
        }
        c.verify_checksum("shared message table", start)?;
        trace!(address = start, indexes = indexes.len(), "shared message table");
        Ok(SharedMessageTable {
            address: Address::new(start.saturating_sub(c.base())),
            indexes,
        })
    }

    /// The index that stores messages of type `ty`.
    pub fn index_for(&self, ty: MessageType) -> Option<&SharedMessageIndex> {
        self.indexes.iter().find(|index| index.holds(ty))
    }
}

/// One entry of a shared-message index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedMessageRecord {
    /// Message body stored in the index's fractal heap.
    Heap {
        hash: u32,
        reference_count: u32,
        heap_id: [u8; HEAP_ID_LEN],
    },
    /// Message body left in an object header.
    Header {
        hash: u32,
        message_type: MessageType,
        creation_index: u16,
        header: Address,
    },
}

impl SharedMessageRecord {
    /// Encoded size of one record slot.
    pub fn encoded_len(widths: FieldWidths) -> u64 {
        let heap = 4 + HEAP_ID_LEN as u64;
        let header = 1 + 1 + 2 + u64::from(widths.offsets);
        1 + 4 + heap.max(header)
    }

    pub fn hash(&self) -> u32 {
        match self {
            SharedMessageRecord::Heap { hash, .. } | SharedMessageRecord::Header { hash, .. } => {
                *hash
            }
        }
    }

    /// Parse one record; the cursor is left at the start of the next slot.
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<SharedMessageRecord> {
        let start = c.position();
        let slot = Self::encoded_len(c.widths()?);
        let location = c.read_u8()?;
        let hash = c.read_u32()?;
        let record = match location {
            0 => SharedMessageRecord::Heap {
                hash,
                reference_count: c.read_u32()?,
                heap_id: c.read_array::<HEAP_ID_LEN>()?,
            },
            1 => {
                c.skip(1);
                SharedMessageRecord::Header {
                    hash,
                    message_type: MessageType::from_u16(u16::from(c.read_u8()?)),
                    creation_index: c.read_u16()?,
                    header: c.read_address()?,
                }
            }
            other => {
                return Err(Error::malformed(
                    "shared message record",
                    format!("unknown location {other}"),
                ))
            }
        };
        c.seek(start + slot);
        Ok(record)
    }
}

/// Parse an `SMLI` list holding `count` records.
pub fn parse_record_list<S: ByteSource>(
    c: &mut Cursor<S>,
    count: u16,
) -> Result<Vec<SharedMessageRecord>> {
    let start = c.position();
    c.ensure_signature(&LIST_SIGNATURE)?;
    let records = (0..count)
        .map(|_| SharedMessageRecord::parse(c))
        .collect::<Result<Vec<_>>>()?;
    c.verify_checksum("shared message list", start)?;
    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::lookup3;

    fn widths() -> FieldWidths {
        FieldWidths::new(8, 8).unwrap()
    }

    /// An `SMTB` with one index per `(type_flags, kind, count, index, heap)`.
    pub(crate) fn build_table(indexes: &[(u16, u8, u16, u64, u64)]) -> Vec<u8> {
        let mut buf = TABLE_SIGNATURE.to_vec();
        for &(flags, kind, count, index, heap) in indexes {
            buf.extend_from_slice(&[0, kind]);
            buf.extend_from_slice(&flags.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&50u16.to_le_bytes());
            buf.extend_from_slice(&40u16.to_le_bytes());
            buf.extend_from_slice(&count.to_le_bytes());
            buf.extend_from_slice(&index.to_le_bytes());
            buf.extend_from_slice(&heap.to_le_bytes());
        }
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    /// A heap-located record, padded to its slot.
    pub(crate) fn heap_record(hash: u32, heap_id: [u8; 8]) -> Vec<u8> {
        let mut buf = vec![0];
        buf.extend_from_slice(&hash.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&heap_id);
        buf.resize(SharedMessageRecord::encoded_len(widths()) as usize, 0);
        buf
    }

    pub(crate) fn build_list(records: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = LIST_SIGNATURE.to_vec();
        for r in records {
            buf.extend_from_slice(r);
        }
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    fn cursor(buf: &[u8]) -> Cursor<&[u8]> {
        Cursor::with_widths(buf, widths())
    }

    #[test]
    fn reference_encodings() {
        let mut v1 = vec![1, 0, 0, 0, 0, 0, 0, 0];
        v1.extend_from_slice(&0u64.to_le_bytes());
        v1.extend_from_slice(&0x500u64.to_le_bytes());
        let mut v2 = vec![2, 0];
        v2.extend_from_slice(&0x500u64.to_le_bytes());
        let mut v3 = vec![3, 2];
        v3.extend_from_slice(&0x500u64.to_le_bytes());
        for buf in [v1, v2, v3] {
            let mut c = cursor(&buf);
            assert_eq!(
                SharedMessage::parse(&mut c).unwrap(),
                SharedMessage::Committed(Address::new(0x500))
            );
            assert_eq!(c.position(), buf.len() as u64);
        }

        let heap = [3, 1, 1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(
            SharedMessage::parse(&mut cursor(&heap)).unwrap(),
            SharedMessage::Heap([1, 2, 3, 4, 5, 6, 7, 8])
        );
        assert_eq!(
            SharedMessage::parse(&mut cursor(&[3, 3])).unwrap(),
            SharedMessage::Here
        );
        assert!(SharedMessage::parse(&mut cursor(&[3, 9])).is_err());
        assert!(SharedMessage::parse(&mut cursor(&[4, 2])).is_err());
    }

    #[test]
    fn table_finds_index_by_type() {
        let buf = build_table(&[(0x02, 0, 3, 0x100, 0x200), (0x10, 1, 60, 0x300, 0x400)]);
        let table = SharedMessageTable::parse(&mut cursor(&buf), 2).unwrap();
        assert_eq!(table.indexes.len(), 2);
        let dt = table.index_for(MessageType::Datatype).unwrap();
        assert_eq!(dt.kind, IndexKind::List);
        assert_eq!(dt.heap_address, Address::new(0x200));
        let attr = table.index_for(MessageType::Attribute).unwrap();
        assert_eq!(attr.kind, IndexKind::BTree);
        assert!(table.index_for(MessageType::Dataspace).is_none());
    }

    #[test]
    fn record_list() {
        let mut header = vec![1, 9, 0, 0, 0, 0, 3];
        header.extend_from_slice(&2u16.to_le_bytes());
        header.extend_from_slice(&0x700u64.to_le_bytes());
        header.resize(17, 0);
        let buf = build_list(&[heap_record(5, [9; 8]), header]);
        let mut c = cursor(&buf);
        let records = parse_record_list(&mut c, 2).unwrap();
        assert_eq!(c.position(), buf.len() as u64);
        assert_eq!(
            records[0],
            SharedMessageRecord::Heap {
                hash: 5,
                reference_count: 1,
                heap_id: [9; 8]
            }
        );
        assert_eq!(
            records[1],
            SharedMessageRecord::Header {
                hash: 9,
                message_type: MessageType::Datatype,
                creation_index: 2,
                header: Address::new(0x700)
            }
        );
    }

    #[test]
    fn record_slot_size() {
        assert_eq!(SharedMessageRecord::encoded_len(widths()), 17);
        let narrow = FieldWidths::new(4, 4).unwrap();
        assert_eq!(SharedMessageRecord::encoded_len(narrow), 17);
    }
}
