//! Link-related messages of header-based groups: link (0x0006),
//! link info (0x0002) and group info (0x000A).

use crate::cursor::{Address, Cursor};
use crate::datatype::CharacterSet;
use crate::error::{Error, Result};
use crate::source::ByteSource;

/// What a link points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// An object header in this container.
    Hard(Address),
    /// A path resolved at access time.
    Soft(String),
    /// An object in another container.
    External { file: String, path: String },
    /// A user-defined link kind, kept raw.
    UserDefined { link_type: u8, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    pub target: LinkTarget,
    pub creation_order: Option<u64>,
    pub charset: CharacterSet,
}

fn split_nul(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|&b| b == 0) {
        Some(i) => (&bytes[..i], &bytes[i + 1..]),
        None => (bytes, &[]),
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::malformed("link", format!("{what} is not UTF-8")))
}

impl LinkMessage {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<LinkMessage> {
        c.ensure_version("link", 1)?;
        let flags = c.read_u8()?;
        let link_type = if flags & 0x08 != 0 { c.read_u8()? } else { 0 };
        let creation_order = if flags & 0x04 != 0 {
            Some(c.read_u64()?)
        } else {
            None
        };
        let charset = if flags & 0x10 != 0 {
            match c.read_u8()? {
                0 => CharacterSet::Ascii,
                1 => CharacterSet::Utf8,
                other => {
                    return Err(Error::malformed(
                        "link",
                        format!("unknown name character set {other}"),
                    ))
                }
            }
        } else {
            CharacterSet::Ascii
        };
        let name_len = c.read_uint(1 << (flags & 0x03))?;
        let name = utf8(&c.read_bytes(name_len as usize)?, "name")?;

        let target = match link_type {
            0 => LinkTarget::Hard(c.read_address()?),
            1 => {
                let len = c.read_u16()?;
                LinkTarget::Soft(utf8(&c.read_bytes(usize::from(len))?, "soft link value")?)
            }
            64 => {
                let len = c.read_u16()?;
                let data = c.read_bytes(usize::from(len))?;
                // First byte is a version/flags field.
                let rest = data.get(1..).unwrap_or_default();
                let (file, rest) = split_nul(rest);
                let (path, _) = split_nul(rest);
                LinkTarget::External {
                    file: utf8(file, "external file name")?,
                    path: utf8(path, "external object path")?,
                }
            }
            other if other >= 65 => {
                let len = c.read_u16()?;
                LinkTarget::UserDefined {
                    link_type: other,
                    data: c.read_bytes(usize::from(len))?,
                }
            }
            other => {
                return Err(Error::malformed(
                    "link",
                    format!("reserved link type {other}"),
                ))
            }
        };

        Ok(LinkMessage {
            name,
            target,
            creation_order,
            charset,
        })
    }
}

/// Where a header-based group keeps its links once they no longer fit
/// in the header itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub max_creation_order: Option<u64>,
    /// Fractal heap of dense link storage; undefined for compact groups.
    pub fractal_heap: Address,
    /// Name index (B-tree v2, type 5 records).
    pub name_index: Address,
    /// Creation order index (B-tree v2, type 6 records), if indexed.
    pub creation_order_index: Option<Address>,
}

impl LinkInfo {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<LinkInfo> {
        c.ensure_version("link info", 0)?;
        let flags = c.read_u8()?;
        let max_creation_order = if flags & 0x01 != 0 {
            Some(c.read_u64()?)
        } else {
            None
        };
        let fractal_heap = c.read_address()?;
        let name_index = c.read_address()?;
        let creation_order_index = if flags & 0x02 != 0 {
            Some(c.read_address()?)
        } else {
            None
        };
        Ok(LinkInfo {
            max_creation_order,
            fractal_heap,
            name_index,
            creation_order_index,
        })
    }

    /// Whether links live in dense storage rather than in the header.
    pub fn is_dense(&self) -> bool {
        !self.fractal_heap.is_undefined()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupInfo {
    /// (max compact, min dense) link counts.
    pub link_phase_change: Option<(u16, u16)>,
    /// (estimated entries, estimated name length).
    pub estimates: Option<(u16, u16)>,
}

impl GroupInfo {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<GroupInfo> {
        c.ensure_version("group info", 0)?;
        let flags = c.read_u8()?;
        let link_phase_change = if flags & 0x01 != 0 {
            Some((c.read_u16()?, c.read_u16()?))
        } else {
            None
        };
        let estimates = if flags & 0x02 != 0 {
            Some((c.read_u16()?, c.read_u16()?))
        } else {
            None
        };
        Ok(GroupInfo {
            link_phase_change,
            estimates,
        })
    }
}
