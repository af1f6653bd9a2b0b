//! Superblock parsing for versions 0, 1, 2 and 3.

use tracing::debug;

use crate::cursor::{Address, Cursor, FieldWidths};
use crate::error::{Error, Result};
use crate::signature::CONTAINER_SIGNATURE;
use crate::source::ByteSource;
use crate::symbol_table::SymbolTableEntry;

/// Where the root group starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootEntry {
    /// Versions 0 and 1 embed the root group's symbol table entry.
    SymbolTable(SymbolTableEntry),
    /// Versions 2 and 3 point straight at the root object header.
    ObjectHeader(Address),
}

/// Fields only versions 0 and 1 carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyFields {
    pub free_space_version: u8,
    pub root_group_version: u8,
    pub shared_header_version: u8,
    pub group_leaf_k: u16,
    pub group_internal_k: u16,
    /// Version 1 only.
    pub indexed_storage_k: Option<u16>,
    pub free_space_address: Address,
    pub driver_info_address: Address,
}

/// Parsed superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    /// Source offset of the signature. File addresses are relative to it.
    pub location: u64,
    pub widths: FieldWidths,
    /// Base address as stored on disk.
    pub base_address: u64,
    pub consistency_flags: u32,
    pub eof_address: Address,
    /// Superblock extension header (versions 2 and 3).
    pub extension_address: Address,
    pub legacy: Option<LegacyFields>,
    pub root: RootEntry,
}

impl Superblock {
    /// Parse the superblock whose signature starts at the cursor.
    ///
    /// Establishes the cursor's field widths and base address.
    pub fn parse<S: ByteSource>(cursor: &mut Cursor<S>) -> Result<Superblock> {
        let location = cursor.position();
        let sig = cursor.read_array::<8>()?;
        if sig != CONTAINER_SIGNATURE {
            return Err(Error::NotAContainer {
                probed_up_to: location,
            });
        }
        let version = cursor.read_version("superblock", &[0, 1, 2, 3])?;
        let sb = match version {
            0 | 1 => Self::parse_legacy(cursor, location, version)?,
            _ => Self::parse_v2(cursor, location, version)?,
        };
        debug!(
            version,
            location,
            offsets = sb.widths.offsets,
            lengths = sb.widths.lengths,
            "parsed superblock"
        );
        Ok(sb)
    }

    fn parse_legacy<S: ByteSource>(
        cursor: &mut Cursor<S>,
        location: u64,
        version: u8,
    ) -> Result<Superblock> {
        let free_space_version = cursor.read_u8()?;
        let root_group_version = cursor.read_u8()?;
        cursor.skip(1);
        let shared_header_version = cursor.read_u8()?;
        let widths = FieldWidths::new(cursor.read_u8()?, cursor.read_u8()?)?;
        cursor.skip(1);
        let group_leaf_k = cursor.read_u16()?;
        let group_internal_k = cursor.read_u16()?;
        if group_leaf_k == 0 || group_internal_k == 0 {
            return Err(Error::malformed("superblock", "group B-tree K must be positive"));
        }
        let consistency_flags = cursor.read_u32()?;
        let indexed_storage_k = if version == 1 {
            let k = cursor.read_u16()?;
            cursor.skip(2);
            Some(k)
        } else {
            None
        };

        cursor.set_widths(widths, location);
        let base_address = cursor.read_uint(widths.offsets)?;
        let free_space_address = cursor.read_address()?;
        let eof_address = cursor.read_address()?;
        let driver_info_address = cursor.read_address()?;
        let root = SymbolTableEntry::parse(cursor)?;

        Ok(Superblock {
            version,
            location,
            widths,
            base_address,
            consistency_flags,
            eof_address,
            extension_address: Address::UNDEFINED,
            legacy: Some(LegacyFields {
                free_space_version,
                root_group_version,
                shared_header_version,
                group_leaf_k,
                group_internal_k,
                indexed_storage_k,
                free_space_address,
                driver_info_address,
            }),
            root: RootEntry::SymbolTable(root),
        })
    }

    fn parse_v2<S: ByteSource>(
        cursor: &mut Cursor<S>,
        location: u64,
        version: u8,
    ) -> Result<Superblock> {
        let widths = FieldWidths::new(cursor.read_u8()?, cursor.read_u8()?)?;
        let consistency_flags = u32::from(cursor.read_u8()?);
        cursor.set_widths(widths, location);
        let base_address = cursor.read_uint(widths.offsets)?;
        let extension_address = cursor.read_address()?;
        let eof_address = cursor.read_address()?;
        let root_address = cursor.read_address()?;
        cursor.verify_checksum("superblock", location)?;

        Ok(Superblock {
            version,
            location,
            widths,
            base_address,
            consistency_flags,
            eof_address,
            extension_address,
            legacy: None,
            root: RootEntry::ObjectHeader(root_address),
        })
    }

    /// Address of the driver information block, when the version has one.
    pub fn driver_info_address(&self) -> Address {
        self.legacy
            .map_or(Address::UNDEFINED, |l| l.driver_info_address)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::lookup3;
    use crate::symbol_table::tests::write_entry;
    use crate::symbol_table::EntryCache;

    pub(crate) fn build_v0(root_header: u64, btree: u64, heap: u64, driver: u64) -> Vec<u8> {
        let mut buf = CONTAINER_SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&4096u64.to_le_bytes());
        buf.extend_from_slice(&driver.to_le_bytes());
        write_entry(
            &mut buf,
            0,
            root_header,
            EntryCache::Group {
                btree: Address::new(btree),
                local_heap: Address::new(heap),
            },
        );
        buf
    }

    pub(crate) fn build_v2(version: u8, offsets: u8, root: u64, extension: u64) -> Vec<u8> {
        let mut buf = CONTAINER_SIGNATURE.to_vec();
        buf.extend_from_slice(&[version, offsets, 8, 0]);
        let w = usize::from(offsets);
        for value in [0u64, extension, 4096, root] {
            buf.extend_from_slice(&value.to_le_bytes()[..w]);
        }
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    fn parse(buf: &[u8], at: u64) -> Result<(Superblock, u64)> {
        let mut c = Cursor::new(buf);
        c.seek(at);
        let sb = Superblock::parse(&mut c)?;
        Ok((sb, c.position()))
    }

    #[test]
    fn v0_root_symbol_table_entry() {
        let buf = build_v0(0x60, 0x88, 0x2a8, u64::MAX);
        let (sb, end) = parse(&buf, 0).unwrap();
        assert_eq!(end, buf.len() as u64);
        assert_eq!(sb.version, 0);
        assert_eq!(sb.widths, FieldWidths::new(8, 8).unwrap());
        let legacy = sb.legacy.unwrap();
        assert_eq!((legacy.group_leaf_k, legacy.group_internal_k), (4, 16));
        assert_eq!(legacy.indexed_storage_k, None);
        assert!(legacy.free_space_address.is_undefined());
        assert!(sb.driver_info_address().is_undefined());
        let RootEntry::SymbolTable(entry) = sb.root else {
            panic!("expected symbol table root");
        };
        assert_eq!(entry.header, Address::new(0x60));
        assert_eq!(
            entry.cache,
            EntryCache::Group {
                btree: Address::new(0x88),
                local_heap: Address::new(0x2a8)
            }
        );
    }

    #[test]
    fn v1_reads_indexed_storage_k_after_flags() {
        let mut buf = build_v0(0x60, 0x88, 0x2a8, 0x400);
        buf[8] = 1;
        // Consistency flags end at byte 24; insert istore K and padding there.
        buf.splice(24..24, [32u8, 0, 0, 0]);
        let (sb, end) = parse(&buf, 0).unwrap();
        assert_eq!(end, buf.len() as u64);
        let legacy = sb.legacy.unwrap();
        assert_eq!(legacy.indexed_storage_k, Some(32));
        assert_eq!(sb.driver_info_address(), Address::new(0x400));
    }

    #[test]
    fn v2_and_v3_with_checksum() {
        for version in [2, 3] {
            let buf = build_v2(version, 8, 0x30, u64::MAX);
            let (sb, end) = parse(&buf, 0).unwrap();
            assert_eq!(end, 48);
            assert_eq!(sb.root, RootEntry::ObjectHeader(Address::new(0x30)));
            assert!(sb.extension_address.is_undefined());
            assert!(sb.legacy.is_none());
        }
    }

    #[test]
    fn v2_narrow_offsets() {
        let buf = build_v2(2, 4, 0x30, 0x80);
        let (sb, _) = parse(&buf, 0).unwrap();
        assert_eq!(sb.widths.offsets, 4);
        assert_eq!(sb.extension_address, Address::new(0x80));
        assert_eq!(sb.eof_address, Address::new(4096));
    }

    #[test]
    fn checksum_mismatch_is_strict_only() {
        let mut buf = build_v2(2, 8, 0x30, u64::MAX);
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(parse(&buf, 0).is_ok());

        let mut c = Cursor::new(&buf[..]);
        c.set_strict_checksums(true);
        let err = Superblock::parse(&mut c).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Integrity);
    }

    #[test]
    fn unknown_version_is_fatal() {
        let mut buf = build_v2(2, 8, 0x30, u64::MAX);
        buf[8] = 4;
        assert!(matches!(
            parse(&buf, 0),
            Err(Error::UnsupportedVersion { version: 4, .. })
        ));
    }

    #[test]
    fn invalid_width_rejected() {
        let mut buf = build_v2(2, 8, 0x30, u64::MAX);
        buf[9] = 3;
        assert!(matches!(parse(&buf, 0), Err(Error::InvalidFieldWidth(3))));
    }

    #[test]
    fn truncated_v0_is_bounds_error() {
        let buf = build_v0(0x60, 0x88, 0x2a8, u64::MAX);
        let err = parse(&buf[..50], 0).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Bounds);
    }

    #[test]
    fn base_is_signature_location() {
        let mut buf = vec![0u8; 512];
        buf.extend_from_slice(&build_v2(2, 8, 0x30, u64::MAX));
        let mut c = Cursor::new(&buf[..]);
        c.seek(512);
        let sb = Superblock::parse(&mut c).unwrap();
        assert_eq!(sb.location, 512);
        assert_eq!(c.base(), 512);
    }
}
