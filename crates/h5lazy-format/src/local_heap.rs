//! Local heap (`HEAP`): the name store of a legacy group.

use tracing::debug;

use crate::cursor::{Address, Cursor};
use crate::error::{Error, Result};
use crate::source::ByteSource;

pub const SIGNATURE: [u8; 4] = *b"HEAP";

/// Free-list sentinel meaning "no free blocks".
const FREE_LIST_EMPTY: u64 = 1;

/// Parsed local heap with its data segment loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeap {
    /// Address of the heap header.
    pub address: Address,
    /// Offset of the first free block inside the data segment.
    pub free_list_head: Option<u64>,
    /// Address of the data segment.
    pub data_address: Address,
    data: Vec<u8>,
}

impl LocalHeap {
    /// Parse the heap header at the cursor and load its data segment.
    pub fn parse<S: ByteSource>(cursor: &mut Cursor<S>) -> Result<LocalHeap> {
        let start = cursor.position();
        cursor.ensure_signature(&SIGNATURE)?;
        cursor.ensure_version("local heap", 0)?;
        cursor.skip(3);
        let data_size = cursor.read_length()?;
        let free_raw = cursor.read_length()?;
        let data_address = cursor.read_address()?;
        let lengths = cursor.widths()?.lengths;

        let size = usize::try_from(data_size)
            .map_err(|_| Error::malformed("local heap", "data segment too large"))?;
        let data = cursor.restoring(|c| {
            c.seek_address(data_address, "local heap data segment")?;
            c.read_bytes(size)
        })?;

        let free_list_head = (free_raw != FREE_LIST_EMPTY
            && !crate::cursor::is_undefined_address(free_raw, lengths))
        .then_some(free_raw);
        if let Some(head) = free_list_head {
            if head >= data_size {
                return Err(Error::OutOfBounds {
                    context: "local heap free list",
                    offset: head,
                    len: 0,
                    limit: data_size,
                });
            }
        }

        debug!(address = start, data_size, "parsed local heap");
        Ok(LocalHeap {
            address: Address::new(start.saturating_sub(cursor.base())),
            free_list_head,
            data_address,
            data,
        })
    }

    /// Size of the data segment in bytes.
    pub fn data_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The raw data segment.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The null-terminated byte string starting at `offset`.
    pub fn get_bytes(&self, offset: u64) -> Result<&[u8]> {
        let limit = self.data_size();
        let out_of_bounds = Error::OutOfBounds {
            context: "local heap string",
            offset,
            len: 1,
            limit,
        };
        let start = match usize::try_from(offset) {
            Ok(start) if offset < limit => start,
            _ => return Err(out_of_bounds),
        };
        let tail = &self.data[start..];
        let end = tail.iter().position(|&b| b == 0).ok_or(out_of_bounds)?;
        Ok(&tail[..end])
    }

    /// The string starting at `offset`.
    pub fn get_string(&self, offset: u64) -> Result<String> {
        let bytes = self.get_bytes(offset)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::malformed("local heap", format!("name at {offset} is not UTF-8")))
    }
}
