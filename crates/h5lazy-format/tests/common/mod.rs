//! Fixture writer laying out complete containers with 8-byte offsets and
//! lengths. Every builder returns the encoded bytes of one structure; an
//! [`Image`] places them at 8-aligned addresses.

#![allow(dead_code)]

use h5lazy_format::checksum::lookup3;

/// Route the crate's tracing output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub const UNDEF: u64 = u64::MAX;
pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// Message type codes used by the fixtures.
pub mod ty {
    pub const DATASPACE: u8 = 0x01;
    pub const LINK_INFO: u8 = 0x02;
    pub const DATATYPE: u8 = 0x03;
    pub const LINK: u8 = 0x06;
    pub const GROUP_INFO: u8 = 0x0A;
    pub const ATTRIBUTE: u8 = 0x0C;
    pub const SHARED_TABLE: u8 = 0x0F;
    pub const CONTINUATION: u8 = 0x10;
    pub const SYMBOL_TABLE: u8 = 0x11;
    pub const BTREE_K: u8 = 0x13;
    pub const ATTRIBUTE_INFO: u8 = 0x15;
}

/// Header message flag marking a shared message.
pub const SHARED: u8 = 0x02;

fn sealed(mut buf: Vec<u8>) -> Vec<u8> {
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    buf
}

/// A container image with the superblock at `location`. Addresses handed
/// out are relative to the superblock.
pub struct Image {
    pub bytes: Vec<u8>,
    location: usize,
}

impl Image {
    /// Reserve `superblock_len` bytes for the superblock at `location`.
    pub fn new(location: usize, superblock_len: usize) -> Image {
        Image {
            bytes: vec![0; location + superblock_len],
            location,
        }
    }

    pub fn place(&mut self, part: &[u8]) -> u64 {
        self.bytes.resize(self.bytes.len().next_multiple_of(8), 0);
        let at = self.bytes.len();
        self.bytes.extend_from_slice(part);
        (at - self.location) as u64
    }

    /// Reserve room for a part whose contents depend on later addresses.
    pub fn reserve(&mut self, len: usize) -> u64 {
        self.place(&vec![0; len])
    }

    pub fn write(&mut self, address: u64, part: &[u8]) {
        let at = self.location + address as usize;
        self.bytes[at..at + part.len()].copy_from_slice(part);
    }

    pub fn superblock(&mut self, superblock: &[u8]) {
        let at = self.location;
        self.bytes[at..at + superblock.len()].copy_from_slice(superblock);
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub const SUPERBLOCK_V0_LEN: usize = 96;
pub const SUPERBLOCK_V2_LEN: usize = 48;

/// Version 0 superblock whose root entry caches a legacy group.
pub fn superblock_v0(root_header: u64, btree: u64, heap: u64, driver: u64) -> Vec<u8> {
    let mut buf = SIGNATURE.to_vec();
    buf.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
    buf.extend_from_slice(&4u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&(1u64 << 20).to_le_bytes());
    buf.extend_from_slice(&driver.to_le_bytes());
    symbol_entry(&mut buf, 0, root_header, Cache::Group { btree, heap });
    buf
}

pub fn superblock_v2(root: u64, extension: u64) -> Vec<u8> {
    let mut buf = SIGNATURE.to_vec();
    buf.extend_from_slice(&[2, 8, 8, 0]);
    for value in [0u64, extension, 1 << 20, root] {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    sealed(buf)
}

/// A driver information block.
pub fn driver_block(id: &[u8; 8], data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0, 0, 0, 0];
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(id);
    buf.extend_from_slice(data);
    buf
}

// Object headers.

pub fn message_v2(ty: u8, flags: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = vec![ty];
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.push(flags);
    buf.extend_from_slice(body);
    buf
}

/// Version 2 header with a two-byte first-chunk size.
pub fn header_v2(messages: &[Vec<u8>]) -> Vec<u8> {
    let body = messages.concat();
    let mut buf = b"OHDR".to_vec();
    buf.extend_from_slice(&[2, 0x01]);
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.extend_from_slice(&body);
    sealed(buf)
}

pub fn message_v1(ty: u16, body: &[u8]) -> Vec<u8> {
    let padded = body.len().next_multiple_of(8);
    let mut buf = ty.to_le_bytes().to_vec();
    buf.extend_from_slice(&(padded as u16).to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(body);
    buf.resize(8 + padded, 0);
    buf
}

/// Version 1 header declaring `declared` messages; `messages` fill the
/// first chunk.
pub fn header_v1(declared: u16, messages: &[Vec<u8>]) -> Vec<u8> {
    let body = messages.concat();
    let mut buf = vec![1, 0];
    buf.extend_from_slice(&declared.to_le_bytes());
    buf.extend_from_slice(&1u32.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(&body);
    buf
}

pub fn continuation(address: u64, length: u64) -> Vec<u8> {
    let mut buf = address.to_le_bytes().to_vec();
    buf.extend_from_slice(&length.to_le_bytes());
    buf
}

// Message bodies.

pub fn hard_link(name: &str, target: u64) -> Vec<u8> {
    let mut buf = vec![1, 0x00, name.len() as u8];
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&target.to_le_bytes());
    buf
}

pub fn soft_link(name: &str, path: &str) -> Vec<u8> {
    let mut buf = vec![1, 0x08, 1, name.len() as u8];
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
    buf.extend_from_slice(path.as_bytes());
    buf
}

/// Link info pointing at dense storage.
pub fn dense_link_info(heap: u64, name_index: u64) -> Vec<u8> {
    let mut buf = vec![0, 0];
    buf.extend_from_slice(&heap.to_le_bytes());
    buf.extend_from_slice(&name_index.to_le_bytes());
    buf
}

/// Attribute info pointing at dense storage.
pub fn dense_attribute_info(heap: u64, name_index: u64) -> Vec<u8> {
    dense_link_info(heap, name_index)
}

/// B-tree K values: chunk internal K 32, then the group fan-outs.
pub fn btree_k_values(group_leaf_k: u16, group_internal_k: u16) -> Vec<u8> {
    let mut buf = vec![0];
    buf.extend_from_slice(&32u16.to_le_bytes());
    buf.extend_from_slice(&group_internal_k.to_le_bytes());
    buf.extend_from_slice(&group_leaf_k.to_le_bytes());
    buf
}

/// Group info without phase-change values or estimates.
pub fn group_info() -> Vec<u8> {
    vec![0, 0]
}

pub fn symbol_table_message(btree: u64, heap: u64) -> Vec<u8> {
    let mut buf = btree.to_le_bytes().to_vec();
    buf.extend_from_slice(&heap.to_le_bytes());
    buf
}

/// Little-endian signed 32-bit integer datatype.
pub fn int32() -> Vec<u8> {
    let mut buf = vec![0x10, 0x08, 0, 0];
    buf.extend_from_slice(&4u32.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&32u16.to_le_bytes());
    buf
}

/// Version 2 scalar dataspace.
pub fn scalar() -> Vec<u8> {
    vec![2, 0, 0, 0]
}

/// Version 3 attribute; a shared datatype is passed as its reference body.
pub fn attribute_v3(name: &str, datatype: &[u8], datatype_shared: bool, value: &[u8]) -> Vec<u8> {
    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    let space = scalar();
    let mut buf = vec![3, u8::from(datatype_shared)];
    buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
    buf.extend_from_slice(&(space.len() as u16).to_le_bytes());
    buf.push(0);
    buf.extend_from_slice(&name_bytes);
    buf.extend_from_slice(datatype);
    buf.extend_from_slice(&space);
    buf.extend_from_slice(value);
    buf
}

pub fn shared_in_heap(id: [u8; 8]) -> Vec<u8> {
    let mut buf = vec![3, 1];
    buf.extend_from_slice(&id);
    buf
}

pub fn shared_committed(header: u64) -> Vec<u8> {
    let mut buf = vec![3, 2];
    buf.extend_from_slice(&header.to_le_bytes());
    buf
}

// Legacy groups.

#[derive(Debug, Clone, Copy)]
pub enum Cache {
    None,
    Group { btree: u64, heap: u64 },
    Soft { value: u32 },
}

pub fn symbol_entry(buf: &mut Vec<u8>, name_offset: u64, header: u64, cache: Cache) {
    buf.extend_from_slice(&name_offset.to_le_bytes());
    buf.extend_from_slice(&header.to_le_bytes());
    let mut scratch = [0u8; 16];
    let kind: u32 = match cache {
        Cache::None => 0,
        Cache::Group { btree, heap } => {
            scratch[..8].copy_from_slice(&btree.to_le_bytes());
            scratch[8..].copy_from_slice(&heap.to_le_bytes());
            1
        }
        Cache::Soft { value } => {
            scratch[..4].copy_from_slice(&value.to_le_bytes());
            2
        }
    };
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(&scratch);
}

/// Local heap data segment with an empty string at offset 0 followed by
/// `strings`, each 8-aligned. Returns the segment and each string's offset.
pub fn heap_segment(strings: &[&str]) -> (Vec<u8>, Vec<u64>) {
    let mut segment = vec![0u8; 8];
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(segment.len() as u64);
        segment.extend_from_slice(s.as_bytes());
        segment.push(0);
        segment.resize(segment.len().next_multiple_of(8), 0);
    }
    (segment, offsets)
}

pub const LOCAL_HEAP_LEN: usize = 32;

pub fn local_heap(data_address: u64, data_size: usize) -> Vec<u8> {
    let mut buf = b"HEAP".to_vec();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    buf.extend_from_slice(&(data_size as u64).to_le_bytes());
    buf.extend_from_slice(&1u64.to_le_bytes());
    buf.extend_from_slice(&data_address.to_le_bytes());
    buf
}

pub fn symbol_node(entries: &[(u64, u64, Cache)]) -> Vec<u8> {
    let mut buf = b"SNOD".to_vec();
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for &(name, header, cache) in entries {
        symbol_entry(&mut buf, name, header, cache);
    }
    buf
}

/// Group B-tree v1 node; `keys` has one more element than `children`.
pub fn btree_v1_node(level: u8, keys: &[u64], children: &[u64]) -> Vec<u8> {
    let mut buf = b"TREE".to_vec();
    buf.extend_from_slice(&[0, level]);
    buf.extend_from_slice(&(children.len() as u16).to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    for (key, child) in keys.iter().zip(children) {
        buf.extend_from_slice(&key.to_le_bytes());
        buf.extend_from_slice(&child.to_le_bytes());
    }
    buf.extend_from_slice(&keys[keys.len() - 1].to_le_bytes());
    buf
}

// Fractal heaps.

pub struct HeapParams {
    pub id_length: u16,
    pub flags: u8,
    pub max_managed: u32,
    pub width: u16,
    pub start: u64,
    pub max_direct: u64,
    pub heap_bits: u16,
    pub root: u64,
    pub root_rows: u16,
    pub free_space: u64,
}

impl Default for HeapParams {
    fn default() -> Self {
        HeapParams {
            id_length: 7,
            flags: 0,
            max_managed: 1024,
            width: 2,
            start: 64,
            max_direct: 128,
            heap_bits: 16,
            root: UNDEF,
            root_rows: 0,
            free_space: UNDEF,
        }
    }
}

pub fn fractal_heap(p: &HeapParams) -> Vec<u8> {
    let mut buf = b"FRHP".to_vec();
    buf.push(0);
    buf.extend_from_slice(&p.id_length.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.push(p.flags);
    buf.extend_from_slice(&p.max_managed.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&UNDEF.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&p.free_space.to_le_bytes());
    for _ in 0..8 {
        buf.extend_from_slice(&0u64.to_le_bytes());
    }
    buf.extend_from_slice(&p.width.to_le_bytes());
    buf.extend_from_slice(&p.start.to_le_bytes());
    buf.extend_from_slice(&p.max_direct.to_le_bytes());
    buf.extend_from_slice(&p.heap_bits.to_le_bytes());
    buf.extend_from_slice(&p.root_rows.to_le_bytes());
    buf.extend_from_slice(&p.root.to_le_bytes());
    buf.extend_from_slice(&p.root_rows.to_le_bytes());
    sealed(buf)
}

/// Bytes before the first object of a direct block without checksum, for
/// heaps with 16-bit offsets.
pub const DIRECT_PREFIX: usize = 15;

/// Direct block for a heap with 16-bit offsets; `objects` are placed at
/// block-relative positions.
pub fn direct_block(heap: u64, block_offset: u16, size: usize, objects: &[(usize, &[u8])]) -> Vec<u8> {
    let mut buf = b"FHDB".to_vec();
    buf.push(0);
    buf.extend_from_slice(&heap.to_le_bytes());
    buf.extend_from_slice(&block_offset.to_le_bytes());
    buf.resize(size, 0);
    for &(at, data) in objects {
        buf[at..at + data.len()].copy_from_slice(data);
    }
    buf
}

pub fn indirect_block(heap: u64, block_offset: u16, entries: &[u64]) -> Vec<u8> {
    let mut buf = b"FHIB".to_vec();
    buf.push(0);
    buf.extend_from_slice(&heap.to_le_bytes());
    buf.extend_from_slice(&block_offset.to_le_bytes());
    for entry in entries {
        buf.extend_from_slice(&entry.to_le_bytes());
    }
    sealed(buf)
}

/// Managed heap ID with two-byte offset and `length_bytes`-byte length,
/// padded to `id_length`.
pub fn managed_id(offset: u16, length: u16, length_bytes: usize, id_length: usize) -> Vec<u8> {
    let mut id = vec![0];
    id.extend_from_slice(&offset.to_le_bytes());
    id.extend_from_slice(&length.to_le_bytes()[..length_bytes]);
    id.resize(id_length, 0);
    id
}

/// Size of the single root direct block used by [`managed_heap`].
pub const MANAGED_BLOCK: usize = 512;

/// A fractal heap whose root is one direct block holding `objects`.
/// Returns the heap address and each object's ID.
pub fn managed_heap(image: &mut Image, id_length: u16, objects: &[Vec<u8>]) -> (u64, Vec<Vec<u8>>) {
    let mut p = HeapParams {
        id_length,
        start: MANAGED_BLOCK as u64,
        max_direct: MANAGED_BLOCK as u64,
        ..HeapParams::default()
    };
    let heap = image.reserve(fractal_heap(&p).len());
    let mut placed = Vec::new();
    let mut ids = Vec::new();
    let mut at = DIRECT_PREFIX;
    for object in objects {
        placed.push((at, object.as_slice()));
        // 512-byte blocks and 1024-byte objects: two-byte lengths.
        ids.push(managed_id(at as u16, object.len() as u16, 2, usize::from(id_length)));
        at += object.len();
    }
    assert!(at <= MANAGED_BLOCK, "objects overflow the direct block");
    p.root = image.place(&direct_block(heap, 0, MANAGED_BLOCK, &placed));
    image.write(heap, &fractal_heap(&p));
    (heap, ids)
}

// Version 2 B-trees.

pub fn btree_v2_header(
    tree_type: u8,
    node_size: u32,
    record_size: u16,
    root: u64,
    root_records: u16,
    total: u64,
) -> Vec<u8> {
    let mut buf = b"BTHD".to_vec();
    buf.extend_from_slice(&[0, tree_type]);
    buf.extend_from_slice(&node_size.to_le_bytes());
    buf.extend_from_slice(&record_size.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&[100, 40]);
    buf.extend_from_slice(&root.to_le_bytes());
    buf.extend_from_slice(&root_records.to_le_bytes());
    buf.extend_from_slice(&total.to_le_bytes());
    sealed(buf)
}

pub fn btree_v2_leaf(tree_type: u8, records: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = b"BTLF".to_vec();
    buf.extend_from_slice(&[0, tree_type]);
    for record in records {
        buf.extend_from_slice(record);
    }
    sealed(buf)
}

// Shared message storage.

/// `SMTB` with one index per `(type_flags, kind, count, index, heap)`.
pub fn shared_table(indexes: &[(u16, u8, u16, u64, u64)]) -> Vec<u8> {
    let mut buf = b"SMTB".to_vec();
    for &(flags, kind, count, index, heap) in indexes {
        buf.extend_from_slice(&[0, kind]);
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&50u16.to_le_bytes());
        buf.extend_from_slice(&40u16.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&heap.to_le_bytes());
    }
    sealed(buf)
}

pub fn shared_table_message(table: u64, indexes: u8) -> Vec<u8> {
    let mut buf = vec![0];
    buf.extend_from_slice(&table.to_le_bytes());
    buf.push(indexes);
    buf
}

/// `SMLI` of heap-located records, each filling its 17-byte slot.
pub fn shared_list(records: &[(u32, [u8; 8])]) -> Vec<u8> {
    let mut buf = b"SMLI".to_vec();
    for (hash, id) in records {
        buf.push(0);
        buf.extend_from_slice(&hash.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(id);
    }
    sealed(buf)
}

// Free space.

/// Manager with a 32-bit address space and 1000-byte max section size:
/// one-byte counts, two-byte sizes, four-byte offsets.
pub fn free_space_manager(
    client: u8,
    total_space: u64,
    total_sections: u64,
    classes: u16,
    list: u64,
    list_used: u64,
) -> Vec<u8> {
    let mut buf = b"FSHD".to_vec();
    buf.extend_from_slice(&[0, client]);
    buf.extend_from_slice(&total_space.to_le_bytes());
    buf.extend_from_slice(&total_sections.to_le_bytes());
    buf.extend_from_slice(&total_sections.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&classes.to_le_bytes());
    buf.extend_from_slice(&80u16.to_le_bytes());
    buf.extend_from_slice(&120u16.to_le_bytes());
    buf.extend_from_slice(&32u16.to_le_bytes());
    buf.extend_from_slice(&1000u64.to_le_bytes());
    buf.extend_from_slice(&list.to_le_bytes());
    buf.extend_from_slice(&list_used.to_le_bytes());
    buf.extend_from_slice(&list_used.to_le_bytes());
    sealed(buf)
}

/// Section list of `(size, offsets)` groups of type-0 sections.
pub fn section_list(manager: u64, groups: &[(u16, Vec<u32>)]) -> Vec<u8> {
    let mut buf = b"FSSE".to_vec();
    buf.push(0);
    buf.extend_from_slice(&manager.to_le_bytes());
    for (size, offsets) in groups {
        buf.push(offsets.len() as u8);
        buf.extend_from_slice(&size.to_le_bytes());
        for offset in offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.push(0);
        }
    }
    sealed(buf)
}
