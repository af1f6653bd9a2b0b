//! Fill value messages: the old form (type 0x0004) and the current one
//! (type 0x0005, versions 1 to 3).

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::source::ByteSource;

/// When storage for a dataset is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTime {
    Early,
    Late,
    Incremental,
}

/// When the fill value is written into allocated storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillWriteTime {
    OnAllocation,
    Never,
    IfSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValue {
    pub version: u8,
    pub allocation_time: AllocationTime,
    pub write_time: FillWriteTime,
    /// Whether a value was set by the application.
    pub defined: bool,
    /// Raw fill bytes, when stored.
    pub value: Option<Vec<u8>>,
}

fn allocation_time(raw: u8) -> Result<AllocationTime> {
    match raw {
        1 => Ok(AllocationTime::Early),
        2 => Ok(AllocationTime::Late),
        3 => Ok(AllocationTime::Incremental),
        other => Err(Error::malformed(
            "fill value",
            format!("allocation time {other}"),
        )),
    }
}

fn write_time(raw: u8) -> Result<FillWriteTime> {
    match raw {
        0 => Ok(FillWriteTime::OnAllocation),
        1 => Ok(FillWriteTime::Never),
        2 => Ok(FillWriteTime::IfSet),
        other => Err(Error::malformed("fill value", format!("write time {other}"))),
    }
}

fn sized_value<S: ByteSource>(c: &mut Cursor<S>) -> Result<Vec<u8>> {
    let size = c.read_u32()?;
    c.read_bytes(size as usize)
}

impl FillValue {
    /// The old fill value message: just a size and the bytes.
    pub fn parse_old<S: ByteSource>(c: &mut Cursor<S>) -> Result<Vec<u8>> {
        sized_value(c)
    }

    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<FillValue> {
        let version = c.read_version("fill value", &[1, 2, 3])?;
        if version == 3 {
            let flags = c.read_u8()?;
            let undefined = flags & 0x10 != 0;
            let has_value = flags & 0x20 != 0;
            if undefined && has_value {
                return Err(Error::malformed(
                    "fill value",
                    "value both undefined and present",
                ));
            }
            return Ok(FillValue {
                version,
                allocation_time: allocation_time(flags & 0x03)?,
                write_time: write_time((flags >> 2) & 0x03)?,
                defined: !undefined,
                value: if has_value { Some(sized_value(c)?) } else { None },
            });
        }

        let allocation_time = allocation_time(c.read_u8()?)?;
        let write_time = write_time(c.read_u8()?)?;
        let defined = c.read_u8()? != 0;
        // Version 1 always stores the size field; version 2 only when defined.
        let value = if version == 1 || defined {
            let bytes = sized_value(c)?;
            (!bytes.is_empty()).then_some(bytes)
        } else {
            None
        };
        Ok(FillValue {
            version,
            allocation_time,
            write_time,
            defined,
            value,
        })
    }
}
