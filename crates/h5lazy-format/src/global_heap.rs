//! Global heap collections (`GCOL`).

use tracing::debug;

use crate::cursor::{Address, Cursor};
use crate::error::{Error, Result};
use crate::source::ByteSource;

pub const SIGNATURE: [u8; 4] = *b"GCOL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    pub address: Address,
    /// Size of the collection including its header.
    pub size: u64,
    pub objects: Vec<GlobalHeapObject>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    /// 1-based; index 0 marks the collection's free space.
    pub index: u16,
    pub reference_count: u16,
    pub data: Vec<u8>,
}

/// Reference to one global heap object, as stored in variable-length data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeapId {
    pub collection: Address,
    pub index: u32,
}

impl GlobalHeapId {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<GlobalHeapId> {
        Ok(GlobalHeapId {
            collection: c.read_address()?,
            index: c.read_u32()?,
        })
    }
}

const fn pad8(n: u64) -> u64 {
    (n + 7) & !7
}

impl GlobalHeapCollection {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<GlobalHeapCollection> {
        let start = c.position();
        c.ensure_signature(&SIGNATURE)?;
        c.ensure_version("global heap collection", 1)?;
        c.skip(3);
        let size = c.read_length()?;
        let end = start.saturating_add(size);
        let lengths = u64::from(c.widths()?.lengths);
        let object_header = 8 + lengths;

        let mut objects = Vec::new();
        // The free-space object (index 0) ends the list; a tail too short for
        // another object header is unused.
        while c.position().saturating_add(object_header) <= end {
            let index = c.read_u16()?;
            if index == 0 {
                break;
            }
            let reference_count = c.read_u16()?;
            c.skip(4);
            let len = c.read_length()?;
            let data_start = c.position();
            if data_start.saturating_add(len) > end {
                return Err(Error::OutOfBounds {
                    context: "global heap object",
                    offset: data_start - start,
                    len,
                    limit: size,
                });
            }
            let data = c.read_bytes(len as usize)?;
            c.seek(data_start + pad8(len));
            objects.push(GlobalHeapObject {
                index,
                reference_count,
                data,
            });
        }

        debug!(address = start, objects = objects.len(), "parsed global heap collection");
        Ok(GlobalHeapCollection {
            address: Address::new(start.saturating_sub(c.base())),
            size,
            objects,
        })
    }

    /// Linear scan for the object with `index`.
    pub fn object(&self, index: u16) -> Option<&GlobalHeapObject> {
        self.objects.iter().find(|o| o.index == index)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cursor::FieldWidths;

    /// A collection holding `(index, data)` objects, followed by free space.
    pub(crate) fn build_collection(objects: &[(u16, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (index, data) in objects {
            body.extend_from_slice(&index.to_le_bytes());
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&[0; 4]);
            body.extend_from_slice(&(data.len() as u64).to_le_bytes());
            body.extend_from_slice(data);
            body.resize(pad8(body.len() as u64) as usize, 0);
        }
        // free-space object
        body.extend_from_slice(&[0; 16]);
        let mut buf = SIGNATURE.to_vec();
        buf.extend_from_slice(&[1, 0, 0, 0]);
        buf.extend_from_slice(&(16 + body.len() as u64).to_le_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    fn parse(buf: &[u8]) -> Result<GlobalHeapCollection> {
        let mut c = Cursor::with_widths(buf, FieldWidths::new(8, 8).unwrap());
        GlobalHeapCollection::parse(&mut c)
    }

    #[test]
    fn objects_by_index() {
        let buf = build_collection(&[(1, &b"first"[..]), (3, &b"a somewhat longer third"[..])]);
        let heap = parse(&buf).unwrap();
        assert_eq!(heap.objects.len(), 2);
        assert_eq!(heap.object(3).unwrap().data, b"a somewhat longer third");
        assert_eq!(heap.object(1).unwrap().reference_count, 1);
        assert!(heap.object(2).is_none());
    }

    #[test]
    fn object_past_collection_end_is_bounds_error() {
        let mut buf = build_collection(&[(1, &b"data"[..])]);
        // claim a longer object than the collection holds
        buf[16 + 8..16 + 16].copy_from_slice(&100u64.to_le_bytes());
        assert_eq!(parse(&buf).unwrap_err().kind(), crate::ErrorKind::Bounds);
    }

    #[test]
    fn wrong_version() {
        let mut buf = build_collection(&[]);
        buf[4] = 2;
        assert!(matches!(
            parse(&buf),
            Err(Error::UnsupportedVersion { version: 2, .. })
        ));
    }

    #[test]
    fn heap_id() {
        let mut buf = 0x800u64.to_le_bytes().to_vec();
        buf.extend_from_slice(&4u32.to_le_bytes());
        let mut c = Cursor::with_widths(&buf[..], FieldWidths::new(8, 8).unwrap());
        assert_eq!(
            GlobalHeapId::parse(&mut c).unwrap(),
            GlobalHeapId {
                collection: Address::new(0x800),
                index: 4
            }
        );
    }
}
