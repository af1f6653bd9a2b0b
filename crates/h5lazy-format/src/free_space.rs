//! Free-space manager header (`FSHD`) and its serialized section list
//! (`FSSE`).

use tracing::{debug, trace};

use crate::btree_v2::enc_size;
use crate::cursor::{Address, Cursor};
use crate::error::{Error, Result};
use crate::source::ByteSource;

pub const HEADER_SIGNATURE: [u8; 4] = *b"FSHD";
pub const SECTION_LIST_SIGNATURE: [u8; 4] = *b"FSSE";

/// Who hands out the tracked space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSpaceClient {
    FractalHeap,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceManager {
    pub address: Address,
    pub client: FreeSpaceClient,
    pub total_space: u64,
    pub total_sections: u64,
    pub serialized_sections: u64,
    pub unserialized_sections: u64,
    pub section_classes: u16,
    pub shrink_percent: u16,
    pub expand_percent: u16,
    /// Log2 of the address space the sections live in.
    pub address_space_bits: u16,
    pub max_section_size: u64,
    pub section_list: Address,
    pub section_list_used: u64,
    pub section_list_allocated: u64,
}

impl FreeSpaceManager {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<FreeSpaceManager> {
        let start = c.position();
        c.ensure_signature(&HEADER_SIGNATURE)?;
        c.ensure_version("free-space manager", 0)?;
        let client = match c.read_u8()? {
            0 => FreeSpaceClient::FractalHeap,
            1 => FreeSpaceClient::File,
            other => {
                return Err(Error::malformed(
                    "free-space manager",
                    format!("unknown client {other}"),
                ))
            }
        };
        let manager = FreeSpaceManager {
            address: Address::new(start.saturating_sub(c.base())),
            client,
            total_space: c.read_length()?,
            total_sections: c.read_length()?,
            serialized_sections: c.read_length()?,
            unserialized_sections: c.read_length()?,
            section_classes: c.read_u16()?,
            shrink_percent: c.read_u16()?,
            expand_percent: c.read_u16()?,
            address_space_bits: c.read_u16()?,
            max_section_size: c.read_length()?,
            section_list: c.read_address()?,
            section_list_used: c.read_length()?,
            section_list_allocated: c.read_length()?,
        };
        c.verify_checksum("free-space manager", start)?;
        if manager.total_sections.checked_sub(manager.unserialized_sections)
            != Some(manager.serialized_sections)
        {
            return Err(Error::malformed(
                "free-space manager",
                format!(
                    "{} serialized and {} unserialized sections do not make {}",
                    manager.serialized_sections,
                    manager.unserialized_sections,
                    manager.total_sections
                ),
            ));
        }
        debug!(
            address = start,
            client = ?manager.client,
            sections = manager.total_sections,
            "parsed free-space manager"
        );
        Ok(manager)
    }

    fn count_width(&self) -> u8 {
        enc_size(self.serialized_sections)
    }

    fn size_width(&self) -> u8 {
        enc_size(self.max_section_size)
    }

    fn offset_width(&self) -> u8 {
        self.address_space_bits.div_ceil(8) as u8
    }

    /// Sections the list must hold: the ones not kept only in memory.
    fn expected_sections(&self) -> u64 {
        self.total_sections.saturating_sub(self.unserialized_sections)
    }

    /// Check section-list totals against this header.
    ///
    /// Space is only comparable when every section was serialized.
    pub fn check_totals(&self, sections: &[Section]) -> Result<()> {
        let found = sections.len() as u64;
        if found != self.expected_sections() {
            return Err(Error::SectionCountMismatch {
                declared: self.expected_sections(),
                found,
            });
        }
        if self.unserialized_sections == 0 {
            let space = sections
                .iter()
                .fold(0u64, |sum, s| sum.saturating_add(s.size));
            if space != self.total_space {
                return Err(Error::SectionSpaceMismatch {
                    declared: self.total_space,
                    found: space,
                });
            }
        }
        Ok(())
    }
}

/// Indirect-block data carried by some fractal heap sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectSection {
    pub block_offset: u64,
    pub row: u16,
    pub column: u16,
    pub entries: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    FileSimple,
    FileSmall,
    FileLarge,
    HeapSingle,
    HeapFirstRow(IndirectSection),
    HeapNormalRow,
    HeapIndirect(IndirectSection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub offset: u64,
    pub size: u64,
    pub kind: SectionKind,
}

/// Read the section list of `manager`, checking it against the header.
///
/// A manager without a serialized list yields no sections.
pub fn read_sections<S: ByteSource>(
    c: &mut Cursor<S>,
    manager: &FreeSpaceManager,
) -> Result<Vec<Section>> {
    let sections = if manager.section_list.is_undefined() || manager.section_list_used == 0 {
        Vec::new()
    } else {
        c.seek_address(manager.section_list, "free-space section list")?;
        parse_section_list(c, manager)?
    };
    manager.check_totals(&sections)?;
    Ok(sections)
}

fn parse_section_list<S: ByteSource>(
    c: &mut Cursor<S>,
    manager: &FreeSpaceManager,
) -> Result<Vec<Section>> {
    let start = c.position();
    c.ensure_signature(&SECTION_LIST_SIGNATURE)?;
    c.ensure_version("free-space section list", 0)?;
    let owner = c.read_address()?;
    if owner != manager.address {
        return Err(Error::malformed(
            "free-space section list",
            format!("belongs to manager {owner}, not {}", manager.address),
        ));
    }
    let end = start
        .saturating_add(manager.section_list_used)
        .checked_sub(4)
        .ok_or_else(|| Error::malformed("free-space section list", "used size too small"))?;

    let mut sections = Vec::new();
    while c.position() < end {
        let count = c.read_uint(manager.count_width())?;
        let size = c.read_uint(manager.size_width())?;
        trace!(count, size, "free-space section group");
        for _ in 0..count {
            let offset = c.read_uint(manager.offset_width())?;
            let kind = parse_kind(c, manager)?;
            sections.push(Section { offset, size, kind });
            if c.position() > end {
                break;
            }
        }
    }
    if c.position() != end {
        return Err(Error::SizeOverrun {
            context: "free-space section list",
            declared: manager.section_list_used,
            consumed: c.position() - start + 4,
        });
    }
    c.verify_checksum("free-space section list", start)?;
    Ok(sections)
}

fn parse_kind<S: ByteSource>(c: &mut Cursor<S>, manager: &FreeSpaceManager) -> Result<SectionKind> {
    let ty = c.read_u8()?;
    if u16::from(ty) >= manager.section_classes {
        return Err(Error::malformed(
            "free-space section list",
            format!(
                "section type {ty} outside {} classes",
                manager.section_classes
            ),
        ));
    }
    let indirect = |c: &mut Cursor<S>| -> Result<IndirectSection> {
        Ok(IndirectSection {
            block_offset: c.read_uint(manager.offset_width())?,
            row: c.read_u16()?,
            column: c.read_u16()?,
            entries: c.read_u16()?,
        })
    };
    let kind = match (manager.client, ty) {
        (FreeSpaceClient::File, 0) => SectionKind::FileSimple,
        (FreeSpaceClient::File, 1) => SectionKind::FileSmall,
        (FreeSpaceClient::File, 2) => SectionKind::FileLarge,
        (FreeSpaceClient::FractalHeap, 0) => SectionKind::HeapSingle,
        (FreeSpaceClient::FractalHeap, 1) => SectionKind::HeapFirstRow(indirect(c)?),
        (FreeSpaceClient::FractalHeap, 2) => SectionKind::HeapNormalRow,
        (FreeSpaceClient::FractalHeap, 3) => SectionKind::HeapIndirect(indirect(c)?),
        (client, other) => {
            return Err(Error::malformed(
                "free-space section list",
                format!("section type {other} is unknown for {client:?} clients"),
            ))
        }
    };
    Ok(kind)
}
