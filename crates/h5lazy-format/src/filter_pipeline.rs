//! Filter pipeline message (type 0x000B).
//!
//! Filters are described, never applied.

use crate::cursor::Cursor;
use crate::error::Result;
use crate::source::ByteSource;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;

/// One filter of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub filter_id: u16,
    pub name: Option<String>,
    /// Bit 0: the filter is optional.
    pub flags: u16,
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn is_optional(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    pub version: u8,
    pub filters: Vec<FilterDescription>,
}

fn name_from(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl FilterPipeline {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<FilterPipeline> {
        let version = c.read_version("filter pipeline", &[1, 2])?;
        let count = c.read_u8()?;
        if version == 1 {
            c.skip(6);
        }
        let filters = (0..count)
            .map(|_| Self::parse_filter(c, version))
            .collect::<Result<Vec<_>>>()?;
        Ok(FilterPipeline { version, filters })
    }

    fn parse_filter<S: ByteSource>(c: &mut Cursor<S>, version: u8) -> Result<FilterDescription> {
        let filter_id = c.read_u16()?;
        // Version 2 drops the name length for library-defined filters.
        let name_len = if version == 1 || filter_id >= 256 {
            c.read_u16()?
        } else {
            0
        };
        let flags = c.read_u16()?;
        let values = c.read_u16()?;
        let name = if name_len > 0 {
            let stored = if version == 1 {
                (usize::from(name_len) + 7) & !7
            } else {
                usize::from(name_len)
            };
            Some(name_from(&c.read_bytes(stored)?))
        } else {
            None
        };
        let client_data = (0..values)
            .map(|_| c.read_u32())
            .collect::<Result<Vec<_>>>()?;
        if version == 1 && values % 2 == 1 {
            c.skip(4);
        }
        Ok(FilterDescription {
            filter_id,
            name,
            flags,
            client_data,
        })
    }
}
