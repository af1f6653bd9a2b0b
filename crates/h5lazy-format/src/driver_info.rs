//! Driver information block: the optional trailer describing how a
//! logical file is split across member files.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::source::ByteSource;

/// Driver-specific payload of the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverInfo {
    /// `NCSAfami`: a family of equally sized member files.
    Family { member_size: u64 },
    /// `NCSAmult`: the multi-file driver's memory-type map.
    Multi(MultiDriverInfo),
    /// Any other driver, kept as raw bytes.
    Other { id: [u8; 8], data: Vec<u8> },
}

/// One member file of the multi driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiMember {
    /// Memory usage types mapped onto this member.
    pub usage_types: Vec<u8>,
    pub start_address: u64,
    pub end_of_allocation: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiDriverInfo {
    /// For each of the six usage types, the type whose member it shares.
    pub map: [u8; 6],
    pub members: Vec<MultiMember>,
}

impl DriverInfo {
    /// Parse the block at the cursor.
    pub fn parse<S: ByteSource>(cursor: &mut Cursor<S>) -> Result<DriverInfo> {
        cursor.ensure_version("driver information block", 0)?;
        cursor.skip(3);
        let size = cursor.read_u32()?;
        let id = cursor.read_array::<8>()?;
        let data = cursor.read_bytes(size as usize)?;
        match &id {
            b"NCSAfami" => {
                let mut body = Cursor::new(&data[..]);
                Ok(DriverInfo::Family {
                    member_size: body.read_u64()?,
                })
            }
            b"NCSAmult" => Ok(DriverInfo::Multi(MultiDriverInfo::parse(&data)?)),
            _ => Ok(DriverInfo::Other { id, data }),
        }
    }
}

impl MultiDriverInfo {
    fn parse(data: &[u8]) -> Result<MultiDriverInfo> {
        let mut body = Cursor::new(data);
        let map = body.read_array::<6>()?;
        body.skip(2);

        // Members are the distinct usage types mapped onto, in first-use order.
        // A zero entry maps a usage type onto itself.
        let mut resolved = [0u8; 6];
        let mut owners: Vec<u8> = Vec::new();
        for (index, &target) in map.iter().enumerate() {
            let usage = index as u8 + 1;
            let target = if target == 0 { usage } else { target };
            if target > 6 {
                return Err(Error::malformed(
                    "multi driver info",
                    format!("usage type {usage} maps to invalid type {target}"),
                ));
            }
            resolved[index] = target;
            if !owners.contains(&target) {
                owners.push(target);
            }
        }

        let mut ranges = Vec::with_capacity(owners.len());
        for _ in &owners {
            ranges.push((body.read_u64()?, body.read_u64()?));
        }

        let mut members = Vec::with_capacity(owners.len());
        for (owner, (start_address, end_of_allocation)) in owners.iter().zip(ranges) {
            let name_start = body.position();
            let rest = data.get(name_start as usize..).unwrap_or_default();
            let len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
                Error::malformed("multi driver info", "unterminated member name")
            })?;
            let name = String::from_utf8_lossy(&rest[..len]).into_owned();
            body.skip(((len as u64 + 1) + 7) & !7);
            let usage_types = resolved
                .iter()
                .enumerate()
                .filter(|&(_, t)| t == owner)
                .map(|(i, _)| i as u8 + 1)
                .collect();
            members.push(MultiMember {
                usage_types,
                start_address,
                end_of_allocation,
                name,
            });
        }
        Ok(MultiDriverInfo { map, members })
    }
}
