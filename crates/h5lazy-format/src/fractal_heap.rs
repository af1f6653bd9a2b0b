//! Fractal heaps: header (`FRHP`), direct blocks (`FHDB`) and indirect
//! blocks (`FHIB`).
//!
//! Objects are addressed by opaque heap IDs. Managed objects live in direct
//! blocks found through the doubling table, tiny objects live inside the ID
//! itself, and huge objects sit outside the heap, either addressed directly
//! by the ID or through the heap's huge-object B-tree.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::btree_v2::{self, enc_size, BTreeV2Header, Record};
use crate::checksum::lookup3;
use crate::cursor::{Address, Cursor};
use crate::error::{Error, Result};
use crate::filter_pipeline::FilterPipeline;
use crate::source::ByteSource;

pub const HEADER_SIGNATURE: [u8; 4] = *b"FRHP";
pub const DIRECT_SIGNATURE: [u8; 4] = *b"FHDB";
pub const INDIRECT_SIGNATURE: [u8; 4] = *b"FHIB";

const FLAG_HUGE_IDS_WRAPPED: u8 = 0x01;
const FLAG_DIRECT_CHECKSUMS: u8 = 0x02;

/// Row layout shared by every indirect block of one heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoublingTable {
    pub width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// Log2 of the maximum heap size; also the bit width of heap offsets.
    pub max_heap_bits: u16,
    pub starting_root_rows: u16,
    /// Root block address; a direct block when `current_root_rows` is 0.
    pub root: Address,
    pub current_root_rows: u16,
}

impl DoublingTable {
    /// Size of each block in `row`: rows 0 and 1 use the starting size,
    /// later rows double.
    pub fn row_block_size(&self, row: u16) -> u64 {
        if row <= 1 {
            self.starting_block_size
        } else {
            self.starting_block_size
                .checked_shl(u32::from(row) - 1)
                .unwrap_or(u64::MAX)
        }
    }

    /// Rows whose entries are direct blocks.
    pub fn max_direct_rows(&self) -> u16 {
        let rows = self.max_direct_block_size.trailing_zeros() as u16
            - self.starting_block_size.trailing_zeros() as u16;
        rows + 2
    }

    /// Rows of an indirect block sitting in `row` of its parent.
    pub fn child_rows(&self, row: u16) -> u16 {
        let first_row_bits =
            self.starting_block_size.trailing_zeros() + u32::from(self.width).trailing_zeros();
        (self.row_block_size(row).trailing_zeros() + 1).saturating_sub(first_row_bits) as u16
    }

    /// Row, column and start offset of the entry holding `relative` within a
    /// block of `rows` rows.
    fn entry_for(&self, relative: u64, rows: u16) -> Option<(u16, u16, u64)> {
        let width = u64::from(self.width);
        let mut row_start = 0u64;
        for row in 0..rows {
            let size = self.row_block_size(row);
            let span = size.saturating_mul(width);
            if relative < row_start.saturating_add(span) {
                let column = (relative - row_start) / size;
                return Some((row, column as u16, row_start + column * size));
            }
            row_start = row_start.saturating_add(span);
        }
        None
    }
}

/// Filter parameters of a heap whose blocks are filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredRoot {
    pub size: u64,
    pub filter_mask: u32,
    pub pipeline: FilterPipeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalHeapHeader {
    pub address: Address,
    pub heap_id_length: u16,
    pub filter_length: u16,
    pub flags: u8,
    pub max_managed_object_size: u32,
    pub next_huge_id: u64,
    pub huge_btree: Address,
    pub managed_free_space: u64,
    pub free_space_manager: Address,
    pub managed_space: u64,
    pub allocated_managed_space: u64,
    pub iterator_offset: u64,
    pub managed_objects: u64,
    pub huge_size: u64,
    pub huge_objects: u64,
    pub tiny_size: u64,
    pub tiny_objects: u64,
    pub table: DoublingTable,
    pub filtered_root: Option<FilteredRoot>,
}

/// A decoded heap ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapId {
    Managed { offset: u64, length: u64 },
    Tiny(Vec<u8>),
    HugeDirect { address: Address, length: u64 },
    HugeIndirect { id: u64 },
}

fn power_of_two(value: u64, what: &str) -> Result<()> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::malformed(
            "fractal heap header",
            format!("{what} {value} is not a power of two"),
        ))
    }
}

impl FractalHeapHeader {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<FractalHeapHeader> {
        let start = c.position();
        c.ensure_signature(&HEADER_SIGNATURE)?;
        c.ensure_version("fractal heap header", 0)?;
        let heap_id_length = c.read_u16()?;
        let filter_length = c.read_u16()?;
        let flags = c.read_u8()?;
        let max_managed_object_size = c.read_u32()?;
        let next_huge_id = c.read_length()?;
        let huge_btree = c.read_address()?;
        let managed_free_space = c.read_length()?;
        let free_space_manager = c.read_address()?;
        let managed_space = c.read_length()?;
        let allocated_managed_space = c.read_length()?;
        let iterator_offset = c.read_length()?;
        let managed_objects = c.read_length()?;
        let huge_size = c.read_length()?;
        let huge_objects = c.read_length()?;
        let tiny_size = c.read_length()?;
        let tiny_objects = c.read_length()?;
        let table = DoublingTable {
            width: c.read_u16()?,
            starting_block_size: c.read_length()?,
            max_direct_block_size: c.read_length()?,
            max_heap_bits: c.read_u16()?,
            starting_root_rows: c.read_u16()?,
            root: c.read_address()?,
            current_root_rows: c.read_u16()?,
        };
        let filtered_root = if filter_length > 0 {
            let size = c.read_length()?;
            let filter_mask = c.read_u32()?;
            let encoded = c.read_bytes(usize::from(filter_length))?;
            let mut sub = Cursor::with_widths(&encoded[..], c.widths()?);
            Some(FilteredRoot {
                size,
                filter_mask,
                pipeline: FilterPipeline::parse(&mut sub)?,
            })
        } else {
            None
        };
        c.verify_checksum("fractal heap header", start)?;

        power_of_two(u64::from(table.width), "table width")?;
        power_of_two(table.starting_block_size, "starting block size")?;
        power_of_two(table.max_direct_block_size, "maximum direct block size")?;
        if table.max_direct_block_size < table.starting_block_size {
            return Err(Error::malformed(
                "fractal heap header",
                "maximum direct block size is below the starting size",
            ));
        }
        if table.max_heap_bits == 0 || table.max_heap_bits > 64 {
            return Err(Error::malformed(
                "fractal heap header",
                format!("maximum heap size of 2^{} bytes", table.max_heap_bits),
            ));
        }

        debug!(
            address = start,
            managed_objects,
            root_rows = table.current_root_rows,
            "parsed fractal heap header"
        );
        Ok(FractalHeapHeader {
            address: Address::new(start.saturating_sub(c.base())),
            heap_id_length,
            filter_length,
            flags,
            max_managed_object_size,
            next_huge_id,
            huge_btree,
            managed_free_space,
            free_space_manager,
            managed_space,
            allocated_managed_space,
            iterator_offset,
            managed_objects,
            huge_size,
            huge_objects,
            tiny_size,
            tiny_objects,
            table,
            filtered_root,
        })
    }

    pub fn huge_ids_wrapped(&self) -> bool {
        self.flags & FLAG_HUGE_IDS_WRAPPED != 0
    }

    pub fn checksums_direct_blocks(&self) -> bool {
        self.flags & FLAG_DIRECT_CHECKSUMS != 0
    }

    /// Bytes of a heap offset, in IDs and block headers.
    pub fn offset_size(&self) -> u8 {
        self.table.max_heap_bits.div_ceil(8) as u8
    }

    /// Bytes of a managed object's length in its ID.
    pub fn length_size(&self) -> u8 {
        let direct_bits = self.table.max_direct_block_size.trailing_zeros();
        let by_block = direct_bits.div_ceil(8) as u8;
        by_block.min(enc_size(u64::from(self.max_managed_object_size)))
    }

    pub fn decode_id(&self, id: &[u8], offsets: u8, lengths: u8) -> Result<HeapId> {
        let Some((&first, rest)) = id.split_first() else {
            return Err(Error::malformed("heap ID", "empty"));
        };
        let version = first >> 6;
        if version != 0 {
            return Err(Error::UnsupportedVersion {
                structure: "heap ID",
                version,
            });
        }
        let mut c = Cursor::new(rest);
        match (first >> 4) & 0x03 {
            0 => Ok(HeapId::Managed {
                offset: c.read_uint(self.offset_size())?,
                length: c.read_uint(self.length_size())?,
            }),
            1 => {
                if self.filtered_root.is_some() {
                    return Err(Error::Unsupported("filtered huge heap objects"));
                }
                let direct = usize::from(self.heap_id_length)
                    >= 1 + usize::from(offsets) + usize::from(lengths);
                if direct {
                    Ok(HeapId::HugeDirect {
                        address: Address::from_raw(c.read_uint(offsets)?, offsets),
                        length: c.read_uint(lengths)?,
                    })
                } else {
                    let width = (self.heap_id_length.saturating_sub(1) as u8).min(lengths);
                    Ok(HeapId::HugeIndirect {
                        id: c.read_uint(width)?,
                    })
                }
            }
            2 => {
                // Long IDs spend a second byte on the length.
                let extended = self.heap_id_length > 18;
                let length = if extended {
                    let high = usize::from(first & 0x0f) << 8;
                    high + usize::from(c.read_u8()?) + 1
                } else {
                    usize::from(first & 0x0f) + 1
                };
                Ok(HeapId::Tiny(c.read_bytes(length)?))
            }
            other => Err(Error::malformed(
                "heap ID",
                format!("unknown ID type {other}"),
            )),
        }
    }

    /// The bytes of the object behind `id`.
    pub fn read_object<S: ByteSource>(&self, c: &mut Cursor<S>, id: &[u8]) -> Result<Vec<u8>> {
        let widths = c.widths()?;
        match self.decode_id(id, widths.offsets, widths.lengths)? {
            HeapId::Tiny(data) => Ok(data),
            HeapId::Managed { offset, length } => self.read_managed(c, offset, length),
            HeapId::HugeDirect { address, length } => read_huge(c, address, length),
            HeapId::HugeIndirect { id } => {
                let (address, length) = self.find_huge(c, id)?;
                read_huge(c, address, length)
            }
        }
    }

    fn read_managed<S: ByteSource>(
        &self,
        c: &mut Cursor<S>,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        if self.filtered_root.is_some() {
            return Err(Error::Unsupported("filtered managed heap objects"));
        }
        let (block, block_offset, block_size) = self.locate(c, offset)?;
        trace!(offset, length, block = %block, "reading managed heap object");
        let start = c.absolute(block, "fractal heap direct block")?;
        let prefix = self.read_direct_prefix(c, block, block_offset, block_size)?;
        let within = offset - block_offset;
        if within < prefix || within.saturating_add(length) > block_size {
            return Err(Error::OutOfBounds {
                context: "fractal heap object",
                offset: within,
                len: length,
                limit: block_size,
            });
        }
        let length = usize::try_from(length)
            .map_err(|_| Error::malformed("heap ID", "object length too large"))?;
        c.read_span(start + within, length)
    }

    /// Direct block holding heap offset `offset`, with its heap offset and size.
    pub fn locate<S: ByteSource>(
        &self,
        c: &mut Cursor<S>,
        offset: u64,
    ) -> Result<(Address, u64, u64)> {
        let table = &self.table;
        let root = table.root;
        if root.is_undefined() {
            return Err(Error::UndefinedAddress("fractal heap root block"));
        }
        if table.current_root_rows == 0 {
            return Ok((root, 0, table.starting_block_size));
        }

        let max_direct_rows = table.max_direct_rows();
        let (mut block, mut rows, mut block_offset) = (root, table.current_root_rows, 0u64);
        // Child blocks have strictly fewer rows than their parent, so this
        // descent ends.
        loop {
            let iblock = IndirectBlock::parse_at(c, self, block, rows)?;
            if iblock.block_offset != block_offset {
                return Err(Error::malformed(
                    "fractal heap indirect block",
                    format!(
                        "block offset {} where {block_offset} was expected",
                        iblock.block_offset
                    ),
                ));
            }
            let (row, column, start) = table
                .entry_for(offset - block_offset, rows)
                .ok_or(Error::OutOfBounds {
                    context: "fractal heap offset",
                    offset,
                    len: 0,
                    limit: self.managed_space,
                })?;
            let child = iblock.entry(row, column);
            if child.is_undefined() {
                return Err(Error::malformed(
                    "fractal heap",
                    format!("offset {offset} falls in an unallocated block"),
                ));
            }
            if row < max_direct_rows {
                return Ok((child, block_offset + start, table.row_block_size(row)));
            }
            block = child;
            rows = table.child_rows(row);
            block_offset += start;
        }
    }

    /// Validate a direct block's header and return its prefix length.
    fn read_direct_prefix<S: ByteSource>(
        &self,
        c: &mut Cursor<S>,
        block: Address,
        block_offset: u64,
        block_size: u64,
    ) -> Result<u64> {
        c.seek_address(block, "fractal heap direct block")?;
        let start = c.position();
        c.ensure_signature(&DIRECT_SIGNATURE)?;
        c.ensure_version("fractal heap direct block", 0)?;
        let heap = c.read_address()?;
        if heap != self.address {
            return Err(Error::malformed(
                "fractal heap direct block",
                format!("belongs to heap {heap}, not {}", self.address),
            ));
        }
        let stored_offset = c.read_uint(self.offset_size())?;
        if stored_offset != block_offset {
            return Err(Error::malformed(
                "fractal heap direct block",
                format!("block offset {stored_offset} where {block_offset} was expected"),
            ));
        }
        if self.checksums_direct_blocks() {
            let field = c.position() - start;
            let stored = c.read_u32()?;
            let size = usize::try_from(block_size)
                .map_err(|_| Error::malformed("fractal heap direct block", "block too large"))?;
            let mut image = c.read_span(start, size)?;
            let field = field as usize;
            image
                .get_mut(field..field + 4)
                .ok_or_else(|| {
                    Error::malformed("fractal heap direct block", "block smaller than its header")
                })?
                .fill(0);
            c.check_checksum("fractal heap direct block", start, stored, lookup3(&image))?;
        }
        Ok(c.position() - start)
    }

    /// Address and length of huge object `id` from the huge-object B-tree.
    fn find_huge<S: ByteSource>(&self, c: &mut Cursor<S>, id: u64) -> Result<(Address, u64)> {
        c.seek_address(self.huge_btree, "huge object B-tree")?;
        let tree = BTreeV2Header::parse(c)?;
        let record = btree_v2::find(
            &tree,
            |record| match record {
                Record::HugeIndirect { id: found, .. } => Ok(id.cmp(found)),
                other => Err(Error::malformed(
                    "huge object B-tree",
                    format!("unexpected record {other:?}"),
                )),
            },
            |node| tree.read_node(c, node).map(Arc::new),
        )?;
        match record {
            Some(Record::HugeIndirect {
                address, length, ..
            }) => Ok((address, length)),
            _ => Err(Error::malformed(
                "fractal heap",
                format!("huge object {id} is not in the huge object B-tree"),
            )),
        }
    }
}

fn read_huge<S: ByteSource>(c: &mut Cursor<S>, address: Address, length: u64) -> Result<Vec<u8>> {
    c.seek_address(address, "huge heap object")?;
    let length = usize::try_from(length)
        .map_err(|_| Error::malformed("huge heap object", "length too large"))?;
    c.read_bytes(length)
}

/// One direct-block entry of an indirect block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectEntry {
    pub address: Address,
    /// Filtered size and filter mask, for heaps with filters.
    pub filtered: Option<(u64, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectBlock {
    pub address: Address,
    pub block_offset: u64,
    pub rows: u16,
    pub direct: Vec<DirectEntry>,
    pub indirect: Vec<Address>,
    width: u16,
}

impl IndirectBlock {
    pub fn parse_at<S: ByteSource>(
        c: &mut Cursor<S>,
        heap: &FractalHeapHeader,
        address: Address,
        rows: u16,
    ) -> Result<IndirectBlock> {
        c.seek_address(address, "fractal heap indirect block")?;
        let start = c.position();
        c.ensure_signature(&INDIRECT_SIGNATURE)?;
        c.ensure_version("fractal heap indirect block", 0)?;
        let owner = c.read_address()?;
        if owner != heap.address {
            return Err(Error::malformed(
                "fractal heap indirect block",
                format!("belongs to heap {owner}, not {}", heap.address),
            ));
        }
        let block_offset = c.read_uint(heap.offset_size())?;

        let width = heap.table.width;
        let max_direct_rows = heap.table.max_direct_rows();
        let direct_count = usize::from(rows.min(max_direct_rows)) * usize::from(width);
        let indirect_count =
            usize::from(rows.saturating_sub(max_direct_rows)) * usize::from(width);
        let mut direct = Vec::with_capacity(direct_count.min(1024));
        for _ in 0..direct_count {
            let address = c.read_address()?;
            let filtered = if heap.filtered_root.is_some() {
                Some((c.read_length()?, c.read_u32()?))
            } else {
                None
            };
            direct.push(DirectEntry { address, filtered });
        }
        let indirect = (0..indirect_count)
            .map(|_| c.read_address())
            .collect::<Result<Vec<_>>>()?;
        c.verify_checksum("fractal heap indirect block", start)?;
        trace!(address = start, rows, block_offset, "fractal heap indirect block");

        Ok(IndirectBlock {
            address,
            block_offset,
            rows,
            direct,
            indirect,
            width,
        })
    }

    /// Child address at (`row`, `column`).
    pub fn entry(&self, row: u16, column: u16) -> Address {
        let index = usize::from(row) * usize::from(self.width) + usize::from(column);
        match self.direct.get(index) {
            Some(entry) => entry.address,
            None => self
                .indirect
                .get(index - self.direct.len())
                .copied()
                .unwrap_or(Address::UNDEFINED),
        }
    }
}
