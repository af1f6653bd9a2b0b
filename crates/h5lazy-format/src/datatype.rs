//! Datatype message (type 0x0003).
//!
//! All eleven type classes are decoded, recursing through compound,
//! enumeration, variable-length and array base types.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::source::ByteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
    Vax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    Object,
    DatasetRegion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundMember {
    pub name: String,
    pub byte_offset: u64,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    /// Raw value bytes, as wide as the base type.
    pub value: Vec<u8>,
}

/// A decoded datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        byte_order: ByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    FloatingPoint {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    Time {
        size: u32,
        bit_precision: u16,
    },
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    BitField {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
    },
    Opaque {
        size: u32,
        tag: String,
    },
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    Reference {
        size: u32,
        ref_type: ReferenceType,
    },
    Enumeration {
        size: u32,
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    VariableLength {
        size: u32,
        /// `Some` for variable-length strings.
        string: Option<(StringPadding, CharacterSet)>,
        base: Box<Datatype>,
    },
    Array {
        size: u32,
        dimensions: Vec<u32>,
        base: Box<Datatype>,
    },
}

fn padding(val: u8) -> Result<StringPadding> {
    match val {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(Error::malformed("datatype", format!("string padding {val}"))),
    }
}

fn charset(val: u8) -> Result<CharacterSet> {
    match val {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(Error::malformed("datatype", format!("character set {val}"))),
    }
}

fn byte_order(bits: u8) -> ByteOrder {
    if bits & 0x01 == 0 {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    }
}

/// Read a null-terminated name, then skip to an 8-byte boundary relative
/// to `origin` when `aligned`.
fn read_name<S: ByteSource>(c: &mut Cursor<S>, origin: u64, aligned: bool) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        match c.read_u8()? {
            0 => break,
            b => bytes.push(b),
        }
    }
    if aligned {
        let used = c.position() - origin;
        c.skip((8 - used % 8) % 8);
    }
    String::from_utf8(bytes).map_err(|_| Error::malformed("datatype", "member name is not UTF-8"))
}

/// Width of a compound member offset in version 3, sized from the compound size.
fn member_offset_width(size: u32) -> u8 {
    match size {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

impl Datatype {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<Datatype> {
        let class_and_version = c.read_u8()?;
        let class = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        if !(1..=4).contains(&version) {
            return Err(Error::UnsupportedVersion {
                structure: "datatype",
                version,
            });
        }
        let [bf0, bf1, _bf2] = c.read_array::<3>()?;
        let size = c.read_u32()?;

        let dt = match class {
            0 => Datatype::FixedPoint {
                size,
                byte_order: byte_order(bf0),
                signed: bf0 & 0x08 != 0,
                bit_offset: c.read_u16()?,
                bit_precision: c.read_u16()?,
            },
            1 => {
                let byte_order = match (bf0 & 0x40 != 0, bf0 & 0x01 != 0) {
                    (false, false) => ByteOrder::LittleEndian,
                    (false, true) => ByteOrder::BigEndian,
                    (true, _) => ByteOrder::Vax,
                };
                Datatype::FloatingPoint {
                    size,
                    byte_order,
                    bit_offset: c.read_u16()?,
                    bit_precision: c.read_u16()?,
                    exponent_location: c.read_u8()?,
                    exponent_size: c.read_u8()?,
                    mantissa_location: c.read_u8()?,
                    mantissa_size: c.read_u8()?,
                    exponent_bias: c.read_u32()?,
                }
            }
            2 => Datatype::Time {
                size,
                bit_precision: c.read_u16()?,
            },
            3 => Datatype::String {
                size,
                padding: padding(bf0 & 0x0F)?,
                charset: charset(bf0 >> 4)?,
            },
            4 => Datatype::BitField {
                size,
                byte_order: byte_order(bf0),
                bit_offset: c.read_u16()?,
                bit_precision: c.read_u16()?,
            },
            5 => {
                let tag = c.read_bytes(usize::from(bf0))?;
                let end = tag.iter().position(|&b| b == 0).unwrap_or(tag.len());
                Datatype::Opaque {
                    size,
                    tag: String::from_utf8_lossy(&tag[..end]).into_owned(),
                }
            }
            6 => Self::parse_compound(c, version, size, u16::from_le_bytes([bf0, bf1]))?,
            7 => Datatype::Reference {
                size,
                ref_type: match bf0 & 0x0F {
                    0 => ReferenceType::Object,
                    1 => ReferenceType::DatasetRegion,
                    other => {
                        return Err(Error::malformed(
                            "datatype",
                            format!("reference type {other}"),
                        ))
                    }
                },
            },
            8 => {
                let count = u16::from_le_bytes([bf0, bf1]);
                let base = Datatype::parse(c)?;
                let width = base.size() as usize;
                let names = (0..count)
                    .map(|_| {
                        let origin = c.position();
                        read_name(c, origin, version < 3)
                    })
                    .collect::<Result<Vec<_>>>()?;
                let members = names
                    .into_iter()
                    .map(|name| Ok(EnumMember { name, value: c.read_bytes(width)? }))
                    .collect::<Result<Vec<_>>>()?;
                Datatype::Enumeration {
                    size,
                    base: Box::new(base),
                    members,
                }
            }
            9 => {
                let string = match bf0 & 0x0F {
                    0 => None,
                    1 => Some((padding(bf0 >> 4)?, charset(bf1 & 0x0F)?)),
                    other => {
                        return Err(Error::malformed(
                            "datatype",
                            format!("variable-length kind {other}"),
                        ))
                    }
                };
                Datatype::VariableLength {
                    size,
                    string,
                    base: Box::new(Datatype::parse(c)?),
                }
            }
            10 => {
                let rank = usize::from(c.read_u8()?);
                if version < 3 {
                    c.skip(3);
                }
                let dimensions = (0..rank).map(|_| c.read_u32()).collect::<Result<Vec<_>>>()?;
                if version < 3 {
                    c.skip(4 * rank as u64);
                }
                Datatype::Array {
                    size,
                    dimensions,
                    base: Box::new(Datatype::parse(c)?),
                }
            }
            other => {
                return Err(Error::malformed(
                    "datatype",
                    format!("unknown class {other}"),
                ))
            }
        };
        Ok(dt)
    }

    fn parse_compound<S: ByteSource>(
        c: &mut Cursor<S>,
        version: u8,
        size: u32,
        count: u16,
    ) -> Result<Datatype> {
        let mut members = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let origin = c.position();
            let name = read_name(c, origin, version < 3)?;
            let byte_offset = if version >= 3 {
                c.read_uint(member_offset_width(size))?
            } else {
                u64::from(c.read_u32()?)
            };
            if version == 1 {
                // rank, reserved, permutation, reserved, four dimension sizes
                c.skip(1 + 3 + 4 + 4 + 16);
            }
            members.push(CompoundMember {
                name,
                byte_offset,
                datatype: Datatype::parse(c)?,
            });
        }
        Ok(Datatype::Compound { size, members })
    }

    /// Size in bytes of one element.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. }
            | Datatype::Array { size, .. } => *size,
        }
    }
}
