//! Object headers, versions 1 and 2.
//!
//! Version 1 headers are an unsigned prefix followed by 8-byte aligned
//! messages; the prefix declares how many messages exist in total across
//! all chunks. Version 2 headers (`OHDR`) are packed, carry optional
//! fields selected by a flag byte and end every chunk with a checksum.
//! Continuation chunks (`OCHK` in version 2) are followed depth-first with
//! an explicit stack, so message order matches the inline order.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::cursor::{Address, Cursor, FieldWidths};
use crate::error::{Error, Result};
use crate::message::{decode_body, Message, MessageBody, MessageFlags};
use crate::message_type::MessageType;
use crate::source::ByteSource;

pub const SIGNATURE: [u8; 4] = *b"OHDR";
pub const CONTINUATION_SIGNATURE: [u8; 4] = *b"OCHK";

/// Version 2 flag bits.
const FLAG_CREATION_ORDER_TRACKED: u8 = 0x04;
const FLAG_CREATION_ORDER_INDEXED: u8 = 0x08;
const FLAG_PHASE_CHANGE: u8 = 0x10;
const FLAG_TIMES: u8 = 0x20;

/// Timestamps stored in a version 2 header, in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderTimes {
    pub access: u32,
    pub modification: u32,
    pub change: u32,
    pub birth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    pub address: Address,
    pub version: u8,
    /// Version 1 stores a reference count in the prefix; version 2 uses a
    /// message and reports 1 when it is absent.
    pub reference_count: u32,
    /// Version 2 flag byte; zero for version 1.
    pub flags: u8,
    pub times: Option<HeaderTimes>,
    /// (max compact, min dense) attribute counts.
    pub attribute_phase_change: Option<(u16, u16)>,
    /// Every message except NIL, in inline order across chunks.
    pub messages: Vec<Message>,
    /// Number of chunks read, the first one included.
    pub chunk_count: usize,
}

/// A chunk loaded into memory: message bytes only, signature and checksum
/// already handled.
struct Chunk {
    bytes: Vec<u8>,
    pos: u64,
}

impl Chunk {
    fn remaining(&self) -> u64 {
        (self.bytes.len() as u64).saturating_sub(self.pos)
    }
}

impl ObjectHeader {
    /// Parse the header at the cursor, following at most
    /// `continuation_limit` continuation chunks.
    ///
    /// The cursor ends just past the first chunk.
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>, continuation_limit: usize) -> Result<ObjectHeader> {
        if c.peek_signature()? == SIGNATURE {
            Self::parse_v2(c, continuation_limit)
        } else {
            Self::parse_v1(c, continuation_limit)
        }
    }

    fn parse_v1<S: ByteSource>(c: &mut Cursor<S>, limit: usize) -> Result<ObjectHeader> {
        let start = c.position();
        c.ensure_version("object header", 1)?;
        c.skip(1);
        let declared = c.read_u16()?;
        let reference_count = c.read_u32()?;
        let size = c.read_u32()?;
        // The prefix is padded to an 8-byte boundary.
        c.skip(4);
        let bytes = c.read_bytes(size as usize)?;

        let mut walk = Walk::new(c.widths()?, 1, 0, start, limit);
        let messages = walk.run(c, Chunk { bytes, pos: 0 }, Some(declared))?;
        debug!(address = start, messages = messages.len(), "parsed v1 object header");
        Ok(ObjectHeader {
            address: Address::new(start.saturating_sub(c.base())),
            version: 1,
            reference_count,
            flags: 0,
            times: None,
            attribute_phase_change: None,
            messages,
            chunk_count: walk.chunks,
        })
    }

    fn parse_v2<S: ByteSource>(c: &mut Cursor<S>, limit: usize) -> Result<ObjectHeader> {
        let start = c.position();
        c.ensure_signature(&SIGNATURE)?;
        c.ensure_version("object header", 2)?;
        let flags = c.read_u8()?;
        let times = if flags & FLAG_TIMES != 0 {
            Some(HeaderTimes {
                access: c.read_u32()?,
                modification: c.read_u32()?,
                change: c.read_u32()?,
                birth: c.read_u32()?,
            })
        } else {
            None
        };
        let attribute_phase_change = if flags & FLAG_PHASE_CHANGE != 0 {
            Some((c.read_u16()?, c.read_u16()?))
        } else {
            None
        };
        let size = c.read_uint(1 << (flags & 0x03))?;
        let size = usize::try_from(size)
            .map_err(|_| Error::malformed("object header", "first chunk too large"))?;
        let bytes = c.read_bytes(size)?;
        c.verify_checksum("object header", start)?;
        let resume = c.position();

        let mut walk = Walk::new(c.widths()?, 2, flags, start, limit);
        let messages = walk.run(c, Chunk { bytes, pos: 0 }, None)?;
        c.seek(resume);

        let reference_count = messages
            .iter()
            .find_map(|m| match m.body {
                MessageBody::ReferenceCount(n) => Some(n),
                _ => None,
            })
            .unwrap_or(1);
        debug!(address = start, messages = messages.len(), "parsed v2 object header");
        Ok(ObjectHeader {
            address: Address::new(start.saturating_sub(c.base())),
            version: 2,
            reference_count,
            flags,
            times,
            attribute_phase_change,
            messages,
            chunk_count: walk.chunks,
        })
    }

    /// Whether attribute creation order is tracked (version 2 only).
    pub fn tracks_creation_order(&self) -> bool {
        self.flags & FLAG_CREATION_ORDER_TRACKED != 0
    }

    pub fn indexes_creation_order(&self) -> bool {
        self.flags & FLAG_CREATION_ORDER_INDEXED != 0
    }

    /// The first message of type `ty`.
    pub fn first(&self, ty: MessageType) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_type == ty)
    }

    /// All messages of type `ty`, in order.
    pub fn messages_of(&self, ty: MessageType) -> impl Iterator<Item = &Message> + '_ {
        self.messages.iter().filter(move |m| m.message_type == ty)
    }
}

/// State of one header's message walk across its chunks.
struct Walk {
    widths: FieldWidths,
    version: u8,
    creation_order: bool,
    /// Absolute offset of the header, for error reports.
    header: u64,
    limit: usize,
    visited: HashSet<Address>,
    chunks: usize,
}

impl Walk {
    fn new(widths: FieldWidths, version: u8, flags: u8, header: u64, limit: usize) -> Walk {
        Walk {
            widths,
            version,
            creation_order: version == 2 && flags & FLAG_CREATION_ORDER_TRACKED != 0,
            header,
            limit,
            visited: HashSet::new(),
            chunks: 1,
        }
    }

    fn message_header_len(&self) -> u64 {
        match (self.version, self.creation_order) {
            (1, _) => 8,
            (_, true) => 6,
            (_, false) => 4,
        }
    }

    /// Walk every chunk reachable from `first`. For version 1, `declared`
    /// is the total message count, NIL and continuation messages included.
    fn run<S: ByteSource>(
        &mut self,
        c: &mut Cursor<S>,
        first: Chunk,
        declared: Option<u16>,
    ) -> Result<Vec<Message>> {
        let header_len = self.message_header_len();
        let mut stack = vec![first];
        let mut messages = Vec::new();
        let mut seen: u16 = 0;

        while let Some(chunk) = stack.last_mut() {
            if declared.is_some_and(|n| seen >= n) {
                break;
            }
            if chunk.remaining() < header_len {
                if chunk.remaining() > 0 {
                    trace!(header = self.header, gap = chunk.remaining(), "chunk gap");
                }
                stack.pop();
                continue;
            }

            let mut fc = Cursor::with_widths(&chunk.bytes[..], self.widths);
            fc.seek(chunk.pos);
            let (type_code, size, flags) = if self.version == 1 {
                let ty = fc.read_u16()?;
                let size = fc.read_u16()?;
                let flags = fc.read_u8()?;
                fc.skip(3);
                (ty, size, flags)
            } else {
                (u16::from(fc.read_u8()?), fc.read_u16()?, fc.read_u8()?)
            };
            let creation_order = if self.creation_order {
                Some(fc.read_u16()?)
            } else {
                None
            };

            let data_start = fc.position();
            let data_end = data_start + u64::from(size);
            let chunk_len = chunk.bytes.len() as u64;
            if data_end > chunk_len {
                return Err(Error::SizeOverrun {
                    context: "object header chunk",
                    declared: chunk_len,
                    consumed: data_end,
                });
            }
            let message_type = MessageType::from_u16(type_code);
            let flags = MessageFlags(flags);
            let body = decode_body(
                message_type,
                flags,
                &chunk.bytes[data_start as usize..data_end as usize],
                self.widths,
                self.header,
            )?;
            chunk.pos = data_end;
            seen = seen.saturating_add(1);
            trace!(header = self.header, ?message_type, size, "header message");

            let continuation = match body {
                MessageBody::Continuation { address, length } => Some((address, length)),
                _ => None,
            };
            if message_type != MessageType::Nil {
                messages.push(Message {
                    message_type,
                    flags,
                    creation_order,
                    size,
                    body,
                });
            }
            if let Some((address, length)) = continuation {
                let next = self.load_continuation(c, address, length)?;
                stack.push(next);
            }
        }

        if let Some(n) = declared {
            if seen < n {
                return Err(Error::MissingMessages {
                    address: self.header,
                    declared: n,
                    found: seen,
                });
            }
        }
        Ok(messages)
    }

    fn load_continuation<S: ByteSource>(
        &mut self,
        c: &mut Cursor<S>,
        address: Address,
        length: u64,
    ) -> Result<Chunk> {
        if self.chunks > self.limit {
            return Err(Error::malformed(
                "object header",
                format!("more than {} continuation chunks", self.limit),
            ));
        }
        if !self.visited.insert(address) {
            return Err(Error::malformed(
                "object header",
                format!("continuation chunk {address} is referenced twice"),
            ));
        }
        self.chunks += 1;
        let origin = c.absolute(address, "object header continuation")?;
        let len = usize::try_from(length)
            .map_err(|_| Error::malformed("object header", "continuation chunk too large"))?;
        let mut bytes = c.read_span(origin, len)?;
        if self.version == 1 {
            return Ok(Chunk { bytes, pos: 0 });
        }

        c.restoring(|c| -> Result<()> {
            c.seek(origin);
            c.ensure_signature(&CONTINUATION_SIGNATURE)?;
            if len < 8 {
                return Err(Error::malformed(
                    "object header continuation",
                    "chunk shorter than its signature and checksum",
                ));
            }
            c.seek(origin + len as u64 - 4);
            c.verify_checksum("object header continuation", origin)
        })?;
        bytes.truncate(len - 4);
        Ok(Chunk { bytes, pos: 4 })
    }
}
