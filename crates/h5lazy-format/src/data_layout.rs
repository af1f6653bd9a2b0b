//! Data layout message (type 0x0008), versions 1 through 4.
//!
//! Only the description of where raw data lives is decoded; the raw data
//! itself is never read.

use crate::cursor::{Address, Cursor};
use crate::error::{Error, Result};
use crate::source::ByteSource;

/// How a version 4 chunked layout indexes its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndex {
    /// Version 1 B-tree (all layouts before version 4).
    BTreeV1,
    SingleChunk {
        /// Present when the single chunk is filtered.
        filtered: Option<(u64, u32)>,
    },
    Implicit,
    FixedArray {
        page_bits: u8,
    },
    ExtensibleArray {
        max_bits: u8,
        index_elements: u8,
        min_pointers: u8,
        min_elements: u8,
        page_bits: u8,
    },
    BTreeV2 {
        node_size: u32,
        split_percent: u8,
        merge_percent: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    Compact {
        data: Vec<u8>,
    },
    Contiguous {
        address: Address,
        /// Not stored by versions 1 and 2.
        size: Option<u64>,
    },
    Chunked {
        version: u8,
        flags: u8,
        /// Chunk sizes per dimension; the last entry is the element size.
        dimensions: Vec<u64>,
        index: ChunkIndex,
        /// Address of the chunk index structure.
        address: Address,
    },
    Virtual {
        /// Global heap collection holding the mapping list.
        heap_address: Address,
        heap_index: u32,
    },
}

fn class_error(class: u8) -> Error {
    Error::malformed("data layout", format!("unknown layout class {class}"))
}

impl DataLayout {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<DataLayout> {
        let version = c.read_version("data layout", &[1, 2, 3, 4])?;
        if version < 3 {
            return Self::parse_legacy(c, version);
        }
        let class = c.read_u8()?;
        match class {
            0 => {
                let size = c.read_u16()?;
                Ok(DataLayout::Compact {
                    data: c.read_bytes(usize::from(size))?,
                })
            }
            1 => Ok(DataLayout::Contiguous {
                address: c.read_address()?,
                size: Some(c.read_length()?),
            }),
            2 if version == 3 => {
                let rank = c.read_u8()?;
                let address = c.read_address()?;
                let dimensions = (0..rank)
                    .map(|_| c.read_u32().map(u64::from))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataLayout::Chunked {
                    version,
                    flags: 0,
                    dimensions,
                    index: ChunkIndex::BTreeV1,
                    address,
                })
            }
            2 => Self::parse_chunked_v4(c),
            3 if version == 4 => Ok(DataLayout::Virtual {
                heap_address: c.read_address()?,
                heap_index: c.read_u32()?,
            }),
            other => Err(class_error(other)),
        }
    }

    fn parse_legacy<S: ByteSource>(c: &mut Cursor<S>, version: u8) -> Result<DataLayout> {
        let rank = c.read_u8()?;
        let class = c.read_u8()?;
        c.skip(5);
        let address = if class == 0 {
            Address::UNDEFINED
        } else {
            c.read_address()?
        };
        let mut dimensions = (0..rank)
            .map(|_| c.read_u32().map(u64::from))
            .collect::<Result<Vec<_>>>()?;
        match class {
            0 => {
                let size = c.read_u32()?;
                Ok(DataLayout::Compact {
                    data: c.read_bytes(size as usize)?,
                })
            }
            1 => Ok(DataLayout::Contiguous {
                address,
                size: None,
            }),
            2 => {
                dimensions.push(u64::from(c.read_u32()?));
                Ok(DataLayout::Chunked {
                    version,
                    flags: 0,
                    dimensions,
                    index: ChunkIndex::BTreeV1,
                    address,
                })
            }
            other => Err(class_error(other)),
        }
    }

    fn parse_chunked_v4<S: ByteSource>(c: &mut Cursor<S>) -> Result<DataLayout> {
        let flags = c.read_u8()?;
        let rank = c.read_u8()?;
        let width = c.read_u8()?;
        if !(1..=8).contains(&width) {
            return Err(Error::InvalidFieldWidth(width));
        }
        let dimensions = (0..rank)
            .map(|_| c.read_uint(width))
            .collect::<Result<Vec<_>>>()?;
        let index = match c.read_u8()? {
            1 => ChunkIndex::SingleChunk {
                filtered: if flags & 0x02 != 0 {
                    Some((c.read_length()?, c.read_u32()?))
                } else {
                    None
                },
            },
            2 => ChunkIndex::Implicit,
            3 => ChunkIndex::FixedArray {
                page_bits: c.read_u8()?,
            },
            4 => ChunkIndex::ExtensibleArray {
                max_bits: c.read_u8()?,
                index_elements: c.read_u8()?,
                min_pointers: c.read_u8()?,
                min_elements: c.read_u8()?,
                page_bits: c.read_u8()?,
            },
            5 => ChunkIndex::BTreeV2 {
                node_size: c.read_u32()?,
                split_percent: c.read_u8()?,
                merge_percent: c.read_u8()?,
            },
            other => {
                return Err(Error::malformed(
                    "data layout",
                    format!("unknown chunk index type {other}"),
                ))
            }
        };
        Ok(DataLayout::Chunked {
            version: 4,
            flags,
            dimensions,
            index,
            address: c.read_address()?,
        })
    }
}
