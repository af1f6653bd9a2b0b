//! Attribute (0x000C) and attribute info (0x0015) messages.

use crate::cursor::{Address, Cursor, FieldWidths};
use crate::dataspace::Dataspace;
use crate::datatype::{CharacterSet, Datatype};
use crate::error::{Error, Result};
use crate::shared_message::SharedMessage;
use crate::source::ByteSource;

/// A datatype or dataspace embedded in an attribute, which may itself be
/// shared. The container resolves shared ones before handing attributes out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Embedded<T> {
    Inline(T),
    Shared(SharedMessage),
}

impl<T> Embedded<T> {
    pub fn inline(&self) -> Option<&T> {
        match self {
            Embedded::Inline(value) => Some(value),
            Embedded::Shared(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub charset: CharacterSet,
    pub datatype: Embedded<Datatype>,
    pub dataspace: Embedded<Dataspace>,
    /// Raw value bytes. Trimmed to element count times element size when
    /// both are known, otherwise everything up to the end of the message.
    pub data: Vec<u8>,
}

const fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

fn field<T, S: ByteSource>(
    c: &mut Cursor<S>,
    len: usize,
    padded: bool,
    shared: bool,
    widths: FieldWidths,
    parse: impl FnOnce(&mut Cursor<&[u8]>) -> Result<T>,
) -> Result<Embedded<T>> {
    let bytes = c.read_bytes(len)?;
    if padded {
        c.skip((pad8(len) - len) as u64);
    }
    let mut sub = Cursor::with_widths(&bytes[..], widths);
    if shared {
        Ok(Embedded::Shared(SharedMessage::parse(&mut sub)?))
    } else {
        Ok(Embedded::Inline(parse(&mut sub)?))
    }
}

impl Attribute {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<Attribute> {
        let widths = c.widths()?;
        let version = c.read_version("attribute", &[1, 2, 3])?;
        let flags = c.read_u8()?;
        let name_len = usize::from(c.read_u16()?);
        let datatype_len = usize::from(c.read_u16()?);
        let dataspace_len = usize::from(c.read_u16()?);
        let charset = if version == 3 {
            match c.read_u8()? {
                0 => CharacterSet::Ascii,
                1 => CharacterSet::Utf8,
                other => {
                    return Err(Error::malformed(
                        "attribute",
                        format!("unknown name character set {other}"),
                    ))
                }
            }
        } else {
            CharacterSet::Ascii
        };
        // Version 1 pads every field to eight bytes and cannot share.
        let padded = version == 1;
        let (type_shared, space_shared) = if version == 1 {
            (false, false)
        } else {
            (flags & 0x01 != 0, flags & 0x02 != 0)
        };

        let raw_name = c.read_bytes(name_len)?;
        if padded {
            c.skip((pad8(name_len) - name_len) as u64);
        }
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8(raw_name[..end].to_vec())
            .map_err(|_| Error::malformed("attribute", "name is not UTF-8"))?;

        let datatype = field(c, datatype_len, padded, type_shared, widths, |s| {
            Datatype::parse(s)
        })?;
        let dataspace = field(c, dataspace_len, padded, space_shared, widths, |s| {
            Dataspace::parse(s)
        })?;

        let mut data = c.read_bytes(c.remaining() as usize)?;
        if let (Embedded::Inline(dt), Embedded::Inline(ds)) = (&datatype, &dataspace) {
            let expected = ds.num_elements().saturating_mul(u64::from(dt.size()));
            if expected > data.len() as u64 {
                return Err(Error::OutOfBounds {
                    context: "attribute value",
                    offset: 0,
                    len: expected,
                    limit: data.len() as u64,
                });
            }
            data.truncate(expected as usize);
        }

        Ok(Attribute {
            name,
            charset,
            datatype,
            dataspace,
            data,
        })
    }
}

/// Where an object keeps attributes that no longer fit in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    pub max_creation_index: Option<u16>,
    pub fractal_heap: Address,
    /// Name index (B-tree v2, type 8 records).
    pub name_index: Address,
    /// Creation order index (B-tree v2, type 9 records).
    pub creation_order_index: Option<Address>,
}

impl AttributeInfo {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<AttributeInfo> {
        c.ensure_version("attribute info", 0)?;
        let flags = c.read_u8()?;
        let max_creation_index = if flags & 0x01 != 0 {
            Some(c.read_u16()?)
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
        Ok(AttributeInfo {
            max_creation_index,
            fractal_heap,
            name_index,
            creation_order_index,
        })
    }
}
