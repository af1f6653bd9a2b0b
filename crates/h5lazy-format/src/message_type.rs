//! Object header message type codes.

/// Header message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nil,
    Dataspace,
    LinkInfo,
    Datatype,
    FillValueOld,
    FillValue,
    Link,
    ExternalFileList,
    DataLayout,
    Bogus,
    GroupInfo,
    FilterPipeline,
    Attribute,
    Comment,
    ModificationTimeOld,
    SharedMessageTable,
    Continuation,
    SymbolTable,
    ModificationTime,
    BTreeKValues,
    DriverInfo,
    AttributeInfo,
    ReferenceCount,
    /// A code this decoder does not know.
    Unknown(u16),
}

impl MessageType {
    pub fn from_u16(code: u16) -> MessageType {
        match code {
            0x0000 => MessageType::Nil,
            0x0001 => MessageType::Dataspace,
            0x0002 => MessageType::LinkInfo,
            0x0003 => MessageType::Datatype,
            0x0004 => MessageType::FillValueOld,
            0x0005 => MessageType::FillValue,
            0x0006 => MessageType::Link,
            0x0007 => MessageType::ExternalFileList,
            0x0008 => MessageType::DataLayout,
            0x0009 => MessageType::Bogus,
            0x000A => MessageType::GroupInfo,
            0x000B => MessageType::FilterPipeline,
            0x000C => MessageType::Attribute,
            0x000D => MessageType::Comment,
            0x000E => MessageType::ModificationTimeOld,
            0x000F => MessageType::SharedMessageTable,
            0x0010 => MessageType::Continuation,
            0x0011 => MessageType::SymbolTable,
            0x0012 => MessageType::ModificationTime,
            0x0013 => MessageType::BTreeKValues,
            0x0014 => MessageType::DriverInfo,
            0x0015 => MessageType::AttributeInfo,
            0x0016 => MessageType::ReferenceCount,
            other => MessageType::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            MessageType::Nil => 0x0000,
            MessageType::Dataspace => 0x0001,
            MessageType::LinkInfo => 0x0002,
            MessageType::Datatype => 0x0003,
            MessageType::FillValueOld => 0x0004,
            MessageType::FillValue => 0x0005,
            MessageType::Link => 0x0006,
            MessageType::ExternalFileList => 0x0007,
            MessageType::DataLayout => 0x0008,
            MessageType::Bogus => 0x0009,
            MessageType::GroupInfo => 0x000A,
            MessageType::FilterPipeline => 0x000B,
            MessageType::Attribute => 0x000C,
            MessageType::Comment => 0x000D,
            MessageType::ModificationTimeOld => 0x000E,
            MessageType::SharedMessageTable => 0x000F,
            MessageType::Continuation => 0x0010,
            MessageType::SymbolTable => 0x0011,
            MessageType::ModificationTime => 0x0012,
            MessageType::BTreeKValues => 0x0013,
            MessageType::DriverInfo => 0x0014,
            MessageType::AttributeInfo => 0x0015,
            MessageType::ReferenceCount => 0x0016,
            MessageType::Unknown(code) => code,
        }
    }

    /// Bit for this type in a shared-message index's type flags.
    pub fn shared_index_bit(self) -> Option<u16> {
        match self {
            MessageType::Dataspace => Some(1 << 0),
            MessageType::Datatype => Some(1 << 1),
            MessageType::FillValue => Some(1 << 2),
            MessageType::FilterPipeline => Some(1 << 3),
            MessageType::Attribute => Some(1 << 4),
            _ => None,
        }
    }
}
