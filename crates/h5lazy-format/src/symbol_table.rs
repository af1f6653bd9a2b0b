//! Symbol table entries and symbol table nodes (`SNOD`) of legacy groups.

use tracing::trace;

use crate::btree_v1::GroupK;
use crate::cursor::{Address, Cursor, FieldWidths};
use crate::error::{Error, Result};
use crate::source::ByteSource;

pub const NODE_SIGNATURE: [u8; 4] = *b"SNOD";

/// Size of the scratch pad that closes every entry.
const SCRATCH_LEN: u64 = 16;

/// What an entry's scratch pad caches about its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCache {
    /// Nothing cached; the target header must be opened.
    None,
    /// The target is a group; its B-tree and local heap addresses.
    Group { btree: Address, local_heap: Address },
    /// The entry is a soft link; offset of its value in the owning local heap.
    SoftLink { value_offset: u32 },
}

/// One named link of a legacy group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableEntry {
    /// Offset of the link name in the owning group's local heap.
    pub name_offset: u64,
    /// Address of the target object header.
    pub header: Address,
    pub cache: EntryCache,
}

impl SymbolTableEntry {
    /// Encoded size of one entry for the given widths.
    pub fn encoded_len(widths: FieldWidths) -> u64 {
        u64::from(widths.lengths) + u64::from(widths.offsets) + 8 + SCRATCH_LEN
    }

    pub fn parse<S: ByteSource>(cursor: &mut Cursor<S>) -> Result<SymbolTableEntry> {
        let name_offset = cursor.read_length()?;
        let header = cursor.read_address()?;
        let cache_type = cursor.read_u32()?;
        cursor.skip(4);
        let scratch_start = cursor.position();
        let cache = match cache_type {
            0 => EntryCache::None,
            1 => EntryCache::Group {
                btree: cursor.read_address()?,
                local_heap: cursor.read_address()?,
            },
            2 => EntryCache::SoftLink {
                value_offset: cursor.read_u32()?,
            },
            other => {
                return Err(Error::malformed(
                    "symbol table entry",
                    format!("unknown cache type {other}"),
                ))
            }
        };
        cursor.seek(scratch_start + SCRATCH_LEN);
        Ok(SymbolTableEntry {
            name_offset,
            header,
            cache,
        })
    }
}

/// A symbol table node: the leaf payload of a group B-tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableNode {
    pub address: Address,
    /// Only the valid leading entries; unused slots are never read.
    pub entries: Vec<SymbolTableEntry>,
}

impl SymbolTableNode {
    /// Parse a node whose capacity is `2 * group_k.leaf` entries.
    pub fn parse<S: ByteSource>(cursor: &mut Cursor<S>, group_k: GroupK) -> Result<SymbolTableNode> {
        let start = cursor.position();
        cursor.ensure_signature(&NODE_SIGNATURE)?;
        cursor.ensure_version("symbol table node", 1)?;
        cursor.skip(1);
        let count = cursor.read_u16()?;
        if u32::from(count) > group_k.symbol_capacity() {
            return Err(Error::malformed(
                "symbol table node",
                format!(
                    "node at {start} declares {count} entries, capacity is {}",
                    group_k.symbol_capacity()
                ),
            ));
        }
        trace!(address = start, count, "symbol table node");
        let entries = (0..count)
            .map(|_| SymbolTableEntry::parse(cursor))
            .collect::<Result<Vec<_>>>()?;
        Ok(SymbolTableNode {
            address: Address::new(start.saturating_sub(cursor.base())),
            entries,
        })
    }
}
