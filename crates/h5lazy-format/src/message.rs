//! Object header messages: framing flags and body decoding.

use tracing::{trace, warn};

use crate::attribute::{Attribute, AttributeInfo};
use crate::cursor::{Address, Cursor, FieldWidths};
use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::link::{GroupInfo, LinkInfo, LinkMessage};
use crate::message_type::MessageType;
use crate::shared_message::{SharedMessage, SharedMessageTableMessage};

/// The per-message flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(pub u8);

impl MessageFlags {
    pub fn constant(self) -> bool {
        self.0 & 0x01 != 0
    }

    /// The body is a [`SharedMessage`] reference.
    pub fn shared(self) -> bool {
        self.0 & 0x02 != 0
    }

    pub fn not_shareable(self) -> bool {
        self.0 & 0x04 != 0
    }

    /// Writers that do not understand the type must refuse to modify the object.
    pub fn fail_on_write_if_unknown(self) -> bool {
        self.0 & 0x08 != 0
    }

    pub fn shareable(self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Readers that do not understand the type must fail.
    pub fn fail_if_unknown(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub(crate) fn without_shared(self) -> MessageFlags {
        MessageFlags(self.0 & !0x02)
    }
}

/// One slot of an external file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalFile {
    /// Offset of the file name in the list's local heap.
    pub name_offset: u64,
    pub file_offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFileList {
    pub heap: Address,
    pub files: Vec<ExternalFile>,
}

/// Group B-tree and chunk B-tree fan-outs stored in the superblock extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeKValues {
    pub indexed_storage_internal_k: u16,
    pub group_internal_k: u16,
    pub group_leaf_k: u16,
}

/// Decoded message payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Nil,
    Dataspace(Dataspace),
    LinkInfo(LinkInfo),
    Datatype(Datatype),
    FillValueOld(Vec<u8>),
    FillValue(FillValue),
    Link(LinkMessage),
    ExternalFileList(ExternalFileList),
    DataLayout(DataLayout),
    GroupInfo(GroupInfo),
    FilterPipeline(FilterPipeline),
    Attribute(Attribute),
    Comment(String),
    /// Seconds since the Unix epoch, from either time message.
    ModificationTime(u64),
    SharedMessageTable(SharedMessageTableMessage),
    Continuation { address: Address, length: u64 },
    SymbolTable { btree: Address, local_heap: Address },
    BTreeKValues(BTreeKValues),
    DriverInfo { id: [u8; 8], data: Vec<u8> },
    AttributeInfo(AttributeInfo),
    ReferenceCount(u32),
    /// A reference the container replaces with the real body.
    Shared(SharedMessage),
    /// A type this decoder does not interpret, kept raw.
    Unknown(Vec<u8>),
}

/// One message of an object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub flags: MessageFlags,
    /// Present when the header tracks attribute creation order.
    pub creation_order: Option<u16>,
    /// Declared body size in bytes.
    pub size: u16,
    pub body: MessageBody,
}

/// Decode a message body from its declared bytes.
///
/// `header` is the owning object header, used for error reports.
pub fn decode_body(
    message_type: MessageType,
    flags: MessageFlags,
    bytes: &[u8],
    widths: FieldWidths,
    header: u64,
) -> Result<MessageBody> {
    let mut c = Cursor::with_widths(bytes, widths);
    let body = if flags.shared() && message_type != MessageType::Nil {
        SharedMessage::parse(&mut c).map(MessageBody::Shared)
    } else {
        decode_unshared(message_type, flags, &mut c, header)
    };
    body.map_err(|err| match err {
        Error::OutOfBounds {
            context: "read",
            offset,
            len,
            ..
        } => Error::SizeOverrun {
            context: "message body",
            declared: bytes.len() as u64,
            consumed: offset.saturating_add(len),
        },
        other => other,
    })
}

fn decode_unshared(
    message_type: MessageType,
    flags: MessageFlags,
    c: &mut Cursor<&[u8]>,
    header: u64,
) -> Result<MessageBody> {
    Ok(match message_type {
        MessageType::Nil => MessageBody::Nil,
        MessageType::Dataspace => MessageBody::Dataspace(Dataspace::parse(c)?),
        MessageType::LinkInfo => MessageBody::LinkInfo(LinkInfo::parse(c)?),
        MessageType::Datatype => MessageBody::Datatype(Datatype::parse(c)?),
        MessageType::FillValueOld => MessageBody::FillValueOld(FillValue::parse_old(c)?),
        MessageType::FillValue => MessageBody::FillValue(FillValue::parse(c)?),
        MessageType::Link => MessageBody::Link(LinkMessage::parse(c)?),
        MessageType::ExternalFileList => {
            c.ensure_version("external file list", 1)?;
            c.skip(3);
            let _allocated = c.read_u16()?;
            let used = c.read_u16()?;
            let heap = c.read_address()?;
            let files = (0..used)
                .map(|_| {
                    Ok(ExternalFile {
                        name_offset: c.read_length()?,
                        file_offset: c.read_length()?,
                        size: c.read_length()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            MessageBody::ExternalFileList(ExternalFileList { heap, files })
        }
        MessageType::DataLayout => MessageBody::DataLayout(DataLayout::parse(c)?),
        MessageType::GroupInfo => MessageBody::GroupInfo(GroupInfo::parse(c)?),
        MessageType::FilterPipeline => MessageBody::FilterPipeline(FilterPipeline::parse(c)?),
        MessageType::Attribute => MessageBody::Attribute(Attribute::parse(c)?),
        MessageType::Comment => {
            let raw = c.read_bytes(c.remaining() as usize)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            MessageBody::Comment(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
        MessageType::ModificationTimeOld => {
            let digits = c.read_array::<14>()?;
            MessageBody::ModificationTime(parse_old_time(&digits)?)
        }
        MessageType::SharedMessageTable => {
            MessageBody::SharedMessageTable(SharedMessageTableMessage::parse(c)?)
        }
        MessageType::Continuation => MessageBody::Continuation {
            address: c.read_address()?,
            length: c.read_length()?,
        },
        MessageType::SymbolTable => MessageBody::SymbolTable {
            btree: c.read_address()?,
            local_heap: c.read_address()?,
        },
        MessageType::ModificationTime => {
            c.ensure_version("modification time", 1)?;
            c.skip(3);
            MessageBody::ModificationTime(u64::from(c.read_u32()?))
        }
        MessageType::BTreeKValues => {
            c.ensure_version("B-tree K values", 0)?;
            MessageBody::BTreeKValues(BTreeKValues {
                indexed_storage_internal_k: c.read_u16()?,
                group_internal_k: c.read_u16()?,
                group_leaf_k: c.read_u16()?,
            })
        }
        MessageType::DriverInfo => {
            c.ensure_version("driver info message", 0)?;
            let id = c.read_array::<8>()?;
            let size = c.read_u16()?;
            MessageBody::DriverInfo {
                id,
                data: c.read_bytes(usize::from(size))?,
            }
        }
        MessageType::AttributeInfo => MessageBody::AttributeInfo(AttributeInfo::parse(c)?),
        MessageType::ReferenceCount => {
            c.ensure_version("reference count", 0)?;
            MessageBody::ReferenceCount(c.read_u32()?)
        }
        MessageType::Bogus | MessageType::Unknown(_) => {
            if flags.fail_if_unknown() {
                return Err(Error::UnsupportedMessage {
                    type_code: message_type.code(),
                    address: header,
                });
            }
            if flags.fail_on_write_if_unknown() {
                warn!(
                    type_code = message_type.code(),
                    header, "skipping unknown message that forbids modification"
                );
            } else {
                trace!(type_code = message_type.code(), header, "skipping unknown message");
            }
            MessageBody::Unknown(c.read_bytes(c.remaining() as usize)?)
        }
    })
}

/// Convert an ASCII `YYYYMMDDhhmmss` stamp to seconds since the Unix epoch.
fn parse_old_time(digits: &[u8; 14]) -> Result<u64> {
    let field = |range: std::ops::Range<usize>| -> Result<u64> {
        digits[range].iter().try_fold(0u64, |acc, &d| {
            if d.is_ascii_digit() {
                Ok(acc * 10 + u64::from(d - b'0'))
            } else {
                Err(Error::malformed(
                    "modification time",
                    "timestamp is not all digits",
                ))
            }
        })
    };
    let (year, month, day) = (field(0..4)?, field(4..6)?, field(6..8)?);
    let (hour, minute, second) = (field(8..10)?, field(10..12)?, field(12..14)?);
    if year < 1970 || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(Error::malformed(
            "modification time",
            format!("date {year}-{month}-{day} out of range"),
        ));
    }
    Ok(days_since_epoch(year, month, day) * 86_400 + hour * 3600 + minute * 60 + second)
}

/// Days from 1970-01-01 to a proleptic Gregorian date (year >= 1970).
fn days_since_epoch(year: u64, month: u64, day: u64) -> u64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y / 400;
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
