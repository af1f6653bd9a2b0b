//! Version 2 B-trees: header (`BTHD`), internal nodes (`BTIN`) and leaves
//! (`BTLF`).
//!
//! Node capacities are not stored; they follow from the node size, record
//! size and depth exactly as the writer computed them, and they fix the
//! width of the variable-width child record counts in internal nodes.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cursor::{Address, Cursor, FieldWidths};
use crate::error::{Error, Result};
use crate::shared_message::SharedMessageRecord;
use crate::source::ByteSource;

pub const HEADER_SIGNATURE: [u8; 4] = *b"BTHD";
pub const INTERNAL_SIGNATURE: [u8; 4] = *b"BTIN";
pub const LEAF_SIGNATURE: [u8; 4] = *b"BTLF";

/// Signature, version, type and checksum of every node.
const NODE_PREFIX: u64 = 10;

/// Bytes needed to encode any count up to `n`.
pub(crate) fn enc_size(n: u64) -> u8 {
    if n == 0 {
        1
    } else {
        ((63 - n.leading_zeros()) / 8 + 1) as u8
    }
}

/// Per-depth node capacities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Maximum records in one node, by depth (index 0 = leaves).
    pub max_records: Vec<u64>,
    /// Maximum records in a whole subtree rooted at that depth.
    pub cumulative_max: Vec<u64>,
    /// Width of a child's record count (from the leaf capacity).
    pub count_width: u8,
}

impl Geometry {
    pub fn new(node_size: u32, record_size: u16, depth: u16, offsets: u8) -> Result<Geometry> {
        let node_size = u64::from(node_size);
        let record_size = u64::from(record_size);
        if record_size == 0 || node_size <= NODE_PREFIX + record_size {
            return Err(Error::malformed(
                "v2 B-tree header",
                format!("node size {node_size} cannot hold a {record_size}-byte record"),
            ));
        }
        let leaf = (node_size - NODE_PREFIX) / record_size;
        let count_width = enc_size(leaf);
        let mut max_records = vec![leaf];
        let mut cumulative_max = vec![leaf];
        for level in 1..=usize::from(depth) {
            let total_width = if level > 1 {
                u64::from(enc_size(cumulative_max[level - 1]))
            } else {
                0
            };
            let pointer = u64::from(offsets) + u64::from(count_width) + total_width;
            let max = node_size
                .checked_sub(NODE_PREFIX + pointer)
                .map(|room| room / (record_size + pointer))
                .unwrap_or(0);
            if max == 0 {
                return Err(Error::malformed(
                    "v2 B-tree header",
                    format!("internal nodes at depth {level} hold no records"),
                ));
            }
            let cumulative = max
                .saturating_add(1)
                .saturating_mul(cumulative_max[level - 1])
                .saturating_add(max);
            max_records.push(max);
            cumulative_max.push(cumulative);
        }
        Ok(Geometry {
            max_records,
            cumulative_max,
            count_width,
        })
    }

    /// Width of the subtree total stored with children of a node at `depth`.
    fn total_width(&self, depth: u16) -> u8 {
        if depth > 1 {
            enc_size(self.cumulative_max[usize::from(depth) - 1])
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Header {
    pub address: Address,
    pub tree_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    /// Depth of the root; 0 when the root is a leaf.
    pub depth: u16,
    pub split_percent: u8,
    pub merge_percent: u8,
    pub root: NodeRef,
    pub total_records: u64,
    pub geometry: Geometry,
}

/// A pointer to a node together with what its parent knows about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub address: Address,
    pub depth: u16,
    /// Records in the node itself.
    pub records: u16,
    /// Records in the node's whole subtree.
    pub total: u64,
}

impl BTreeV2Header {
    pub fn parse<S: ByteSource>(c: &mut Cursor<S>) -> Result<BTreeV2Header> {
        let start = c.position();
        c.ensure_signature(&HEADER_SIGNATURE)?;
        c.ensure_version("v2 B-tree header", 0)?;
        let tree_type = c.read_u8()?;
        let node_size = c.read_u32()?;
        let record_size = c.read_u16()?;
        let depth = c.read_u16()?;
        let split_percent = c.read_u8()?;
        let merge_percent = c.read_u8()?;
        let root_address = c.read_address()?;
        let root_records = c.read_u16()?;
        let total_records = c.read_length()?;
        c.verify_checksum("v2 B-tree header", start)?;
        let geometry = Geometry::new(node_size, record_size, depth, c.widths()?.offsets)?;

        debug!(address = start, tree_type, depth, total_records, "parsed v2 B-tree header");
        Ok(BTreeV2Header {
            address: Address::new(start.saturating_sub(c.base())),
            tree_type,
            node_size,
            record_size,
            depth,
            split_percent,
            merge_percent,
            root: NodeRef {
                address: root_address,
                depth,
                records: root_records,
                total: total_records,
            },
            total_records,
            geometry,
        })
    }

    /// Read the node behind `node`.
    pub fn read_node<S: ByteSource>(&self, c: &mut Cursor<S>, node: &NodeRef) -> Result<BTreeV2Node> {
        c.seek_address(node.address, "v2 B-tree node")?;
        BTreeV2Node::parse(c, self, node)
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0 || self.root.address.is_undefined()
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Type 1: huge object, indirectly addressed, unfiltered.
    HugeIndirect { address: Address, length: u64, id: u64 },
    /// Type 2: huge object, indirectly addressed, filtered.
    HugeIndirectFiltered {
        address: Address,
        length: u64,
        filter_mask: u32,
        memory_size: u64,
        id: u64,
    },
    /// Type 3: huge object, directly addressed, unfiltered.
    HugeDirect { address: Address, length: u64 },
    /// Type 4: huge object, directly addressed, filtered.
    HugeDirectFiltered {
        address: Address,
        length: u64,
        filter_mask: u32,
        memory_size: u64,
    },
    /// Type 5: link by name hash.
    LinkName { hash: u32, heap_id: Vec<u8> },
    /// Type 6: link by creation order.
    LinkCreationOrder { order: u64, heap_id: Vec<u8> },
    /// Type 7: shared message index entry.
    SharedMessage(SharedMessageRecord),
    /// Type 8: attribute by name hash.
    AttributeName {
        heap_id: Vec<u8>,
        flags: u8,
        creation_order: u32,
        hash: u32,
    },
    /// Type 9: attribute by creation order.
    AttributeCreationOrder {
        heap_id: Vec<u8>,
        flags: u8,
        creation_order: u32,
    },
    /// Types 10 and 11 (chunk indexes), kept raw.
    Raw(Vec<u8>),
}

impl Record {
    pub fn parse(bytes: &[u8], tree_type: u8, widths: FieldWidths) -> Result<Record> {
        let mut c = Cursor::with_widths(bytes, widths);
        let rest = |c: &mut Cursor<&[u8]>, keep: usize| -> Result<Vec<u8>> {
            let len = bytes
                .len()
                .checked_sub(c.position() as usize + keep)
                .ok_or_else(|| Error::malformed("v2 B-tree record", "record too small"))?;
            c.read_bytes(len)
        };
        let record = match tree_type {
            1 => Record::HugeIndirect {
                address: c.read_address()?,
                length: c.read_length()?,
                id: c.read_length()?,
            },
            2 => Record::HugeIndirectFiltered {
                address: c.read_address()?,
                length: c.read_length()?,
                filter_mask: c.read_u32()?,
                memory_size: c.read_length()?,
                id: c.read_length()?,
            },
            3 => Record::HugeDirect {
                address: c.read_address()?,
                length: c.read_length()?,
            },
            4 => Record::HugeDirectFiltered {
                address: c.read_address()?,
                length: c.read_length()?,
                filter_mask: c.read_u32()?,
                memory_size: c.read_length()?,
            },
            5 => Record::LinkName {
                hash: c.read_u32()?,
                heap_id: rest(&mut c, 0)?,
            },
            6 => Record::LinkCreationOrder {
                order: c.read_u64()?,
                heap_id: rest(&mut c, 0)?,
            },
            7 => Record::SharedMessage(SharedMessageRecord::parse(&mut c)?),
            8 => Record::AttributeName {
                heap_id: rest(&mut c, 9)?,
                flags: c.read_u8()?,
                creation_order: c.read_u32()?,
                hash: c.read_u32()?,
            },
            9 => Record::AttributeCreationOrder {
                heap_id: rest(&mut c, 5)?,
                flags: c.read_u8()?,
                creation_order: c.read_u32()?,
            },
            10 | 11 => Record::Raw(bytes.to_vec()),
            other => {
                return Err(Error::malformed(
                    "v2 B-tree",
                    format!("unknown record type {other}"),
                ))
            }
        };
        Ok(record)
    }

    /// The fractal heap ID this record points at, for the types that have one.
    pub fn heap_id(&self) -> Option<&[u8]> {
        match self {
            Record::LinkName { heap_id, .. }
            | Record::LinkCreationOrder { heap_id, .. }
            | Record::AttributeName { heap_id, .. }
            | Record::AttributeCreationOrder { heap_id, .. } => Some(heap_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Node {
    pub address: Address,
    pub depth: u16,
    pub records: Vec<Record>,
    /// `records.len() + 1` children for internal nodes, none for leaves.
    pub children: Vec<NodeRef>,
}

impl BTreeV2Node {
    pub fn parse<S: ByteSource>(
        c: &mut Cursor<S>,
        header: &BTreeV2Header,
        node: &NodeRef,
    ) -> Result<BTreeV2Node> {
        let start = c.position();
        let widths = c.widths()?;
        let leaf = node.depth == 0;
        c.ensure_signature(if leaf {
            &LEAF_SIGNATURE
        } else {
            &INTERNAL_SIGNATURE
        })?;
        c.ensure_version("v2 B-tree node", 0)?;
        let tree_type = c.read_u8()?;
        if tree_type != header.tree_type {
            return Err(Error::malformed(
                "v2 B-tree node",
                format!(
                    "node type {tree_type} differs from tree type {}",
                    header.tree_type
                ),
            ));
        }
        let capacity = header
            .geometry
            .max_records
            .get(usize::from(node.depth))
            .copied()
            .unwrap_or(0);
        if u64::from(node.records) > capacity {
            return Err(Error::malformed(
                "v2 B-tree node",
                format!("{} records exceed capacity {capacity}", node.records),
            ));
        }

        let record_size = usize::from(header.record_size);
        let mut records = Vec::with_capacity(usize::from(node.records));
        for _ in 0..node.records {
            let bytes = c.read_bytes(record_size)?;
            records.push(Record::parse(&bytes, tree_type, widths)?);
        }

        let mut children = Vec::new();
        if !leaf {
            let total_width = header.geometry.total_width(node.depth);
            children.reserve(usize::from(node.records) + 1);
            for _ in 0..=node.records {
                let address = c.read_address()?;
                let count = c.read_uint(header.geometry.count_width)?;
                let records = u16::try_from(count).map_err(|_| {
                    Error::malformed("v2 B-tree node", format!("child record count {count}"))
                })?;
                let total = if total_width > 0 {
                    c.read_uint(total_width)?
                } else {
                    count
                };
                children.push(NodeRef {
                    address,
                    depth: node.depth - 1,
                    records,
                    total,
                });
            }
        }
        c.verify_checksum("v2 B-tree node", start)?;
        trace!(address = start, depth = node.depth, records = records.len(), "v2 B-tree node");
        Ok(BTreeV2Node {
            address: Address::new(start.saturating_sub(c.base())),
            depth: node.depth,
            records,
            children,
        })
    }
}

enum Step {
    Node(NodeRef),
    Record(Record),
}

/// All records in key order.
///
/// Uses an explicit stack; termination is guaranteed because every child
/// sits one level below its parent.
pub fn records(
    header: &BTreeV2Header,
    mut load: impl FnMut(&NodeRef) -> Result<Arc<BTreeV2Node>>,
) -> Result<Vec<Record>> {
    if header.is_empty() {
        return Ok(Vec::new());
    }
    // The stored total is untrusted; cap the up-front allocation.
    let mut out = Vec::with_capacity(usize::try_from(header.total_records.min(4096)).unwrap_or(0));
    let mut stack = vec![Step::Node(header.root)];
    while let Some(step) = stack.pop() {
        let node_ref = match step {
            Step::Record(record) => {
                out.push(record);
                continue;
            }
            Step::Node(node_ref) => node_ref,
        };
        let node = load(&node_ref)?;
        if node.children.is_empty() {
            out.extend(node.records.iter().cloned());
            continue;
        }
        for (i, child) in node.children.iter().enumerate().rev() {
            stack.push(Step::Node(*child));
            if i > 0 {
                stack.push(Step::Record(node.records[i - 1].clone()));
            }
        }
        // The loop pushed child 0 last, ahead of record 0.
    }
    Ok(out)
}

/// Find the record for which `cmp` returns `Equal`.
///
/// `cmp` orders the sought key relative to a record: `Less` when the key
/// sorts before the record.
pub fn find(
    header: &BTreeV2Header,
    mut cmp: impl FnMut(&Record) -> Result<Ordering>,
    mut load: impl FnMut(&NodeRef) -> Result<Arc<BTreeV2Node>>,
) -> Result<Option<Record>> {
    if header.is_empty() {
        return Ok(None);
    }
    let mut node_ref = header.root;
    loop {
        let node = load(&node_ref)?;
        let (mut lo, mut hi) = (0usize, node.records.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match cmp(&node.records[mid])? {
                Ordering::Equal => return Ok(Some(node.records[mid].clone())),
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
            }
        }
        match node.children.get(lo) {
            Some(child) => node_ref = *child,
            None => return Ok(None),
        }
    }
}

/// The record at position `rank` in key order, using the per-child counts
/// instead of a full traversal.
pub fn record_at(
    header: &BTreeV2Header,
    mut rank: u64,
    mut load: impl FnMut(&NodeRef) -> Result<Arc<BTreeV2Node>>,
) -> Result<Option<Record>> {
    if header.is_empty() || rank >= header.total_records {
        return Ok(None);
    }
    let mut node_ref = header.root;
    'descend: loop {
        let node = load(&node_ref)?;
        if node.children.is_empty() {
            return Ok(usize::try_from(rank)
                .ok()
                .and_then(|i| node.records.get(i))
                .cloned());
        }
        for (i, child) in node.children.iter().enumerate() {
            if rank < child.total {
                node_ref = *child;
                continue 'descend;
            }
            rank -= child.total;
            if let Some(record) = node.records.get(i) {
                if rank == 0 {
                    return Ok(Some(record.clone()));
                }
                rank -= 1;
            }
        }
        return Ok(None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::lookup3;
    use proptest::prelude::*;
    use std::collections::HashMap;

    pub(crate) const ORDER_RECORD: u16 = 15;

    fn widths() -> FieldWidths {
        FieldWidths::new(8, 8).unwrap()
    }

    pub(crate) fn order_record(order: u64) -> Vec<u8> {
        let mut buf = order.to_le_bytes().to_vec();
        buf.extend_from_slice(&[0, 1, 2, 3, 4, 5, 6]);
        buf
    }

    pub(crate) fn build_header(
        tree_type: u8,
        node_size: u32,
        record_size: u16,
        depth: u16,
        root: u64,
        root_records: u16,
        total: u64,
    ) -> Vec<u8> {
        let mut buf = HEADER_SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, tree_type]);
        buf.extend_from_slice(&node_size.to_le_bytes());
        buf.extend_from_slice(&record_size.to_le_bytes());
        buf.extend_from_slice(&depth.to_le_bytes());
        buf.extend_from_slice(&[100, 40]);
        buf.extend_from_slice(&root.to_le_bytes());
        buf.extend_from_slice(&root_records.to_le_bytes());
        buf.extend_from_slice(&total.to_le_bytes());
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    pub(crate) fn build_leaf(tree_type: u8, records: &[Vec<u8>]) -> Vec<u8> {
        let mut buf = LEAF_SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, tree_type]);
        for r in records {
            buf.extend_from_slice(r);
        }
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    /// `children` are (address, records, subtree total).
    pub(crate) fn build_internal(
        tree_type: u8,
        geometry: &Geometry,
        depth: u16,
        records: &[Vec<u8>],
        children: &[(u64, u64, u64)],
    ) -> Vec<u8> {
        let mut buf = INTERNAL_SIGNATURE.to_vec();
        buf.extend_from_slice(&[0, tree_type]);
        for r in records {
            buf.extend_from_slice(r);
        }
        let count_width = usize::from(geometry.count_width);
        let total_width = usize::from(geometry.total_width(depth));
        for &(address, count, total) in children {
            buf.extend_from_slice(&address.to_le_bytes());
            buf.extend_from_slice(&count.to_le_bytes()[..count_width]);
            buf.extend_from_slice(&total.to_le_bytes()[..total_width]);
        }
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    /// An in-memory image and a loader over it.
    pub(crate) struct Image {
        pub(crate) bytes: Vec<u8>,
    }

    impl Image {
        pub(crate) fn place(&mut self, part: &[u8]) -> u64 {
            let at = self.bytes.len() as u64;
            self.bytes.extend_from_slice(part);
            self.bytes.resize(self.bytes.len().next_multiple_of(8), 0);
            at
        }

        fn header(&self, at: u64) -> BTreeV2Header {
            let mut c = Cursor::with_widths(&self.bytes[..], widths());
            c.set_strict_checksums(true);
            c.seek(at);
            BTreeV2Header::parse(&mut c).unwrap()
        }

        fn loader<'a>(
            &'a self,
            header: &'a BTreeV2Header,
        ) -> impl FnMut(&NodeRef) -> Result<Arc<BTreeV2Node>> + 'a {
            move |node| {
                let mut c = Cursor::with_widths(&self.bytes[..], widths());
                c.set_strict_checksums(true);
                header.read_node(&mut c, node).map(Arc::new)
            }
        }
    }

    fn order_of(record: &Record) -> u64 {
        match record {
            Record::LinkCreationOrder { order, .. } => *order,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn by_order(key: u64) -> impl FnMut(&Record) -> Result<Ordering> {
        move |record| Ok(key.cmp(&order_of(record)))
    }

    /// Lay out a tree over sorted `keys`: one leaf when they fit, otherwise
    /// leaves of ten records separated by single records in one root.
    fn build_tree(keys: &[u64], node_size: u32) -> (Image, u64) {
        let mut image = Image { bytes: vec![0; 8] };
        let geometry = Geometry::new(node_size, ORDER_RECORD, 1, 8).unwrap();
        let records: Vec<Vec<u8>> = keys.iter().map(|&k| order_record(k)).collect();
        if keys.len() as u64 <= geometry.max_records[0] {
            let leaf = image.place(&build_leaf(6, &records));
            let n = keys.len() as u64;
            let at = image.place(&build_header(6, node_size, ORDER_RECORD, 0, leaf, n as u16, n));
            return (image, at);
        }

        let mut leaves: Vec<Vec<Vec<u8>>> = Vec::new();
        let mut separators = Vec::new();
        for group in records.chunks(11) {
            if group.len() == 11 {
                leaves.push(group[..10].to_vec());
                separators.push(group[10].clone());
            } else {
                leaves.push(group.to_vec());
            }
        }
        if leaves.len() == separators.len() {
            let last = separators.pop().unwrap();
            leaves.push(vec![last]);
        }
        let children: Vec<(u64, u64, u64)> = leaves
            .iter()
            .map(|leaf| {
                let at = image.place(&build_leaf(6, leaf));
                (at, leaf.len() as u64, leaf.len() as u64)
            })
            .collect();
        let root = image.place(&build_internal(6, &geometry, 1, &separators, &children));
        let at = image.place(&build_header(
            6,
            node_size,
            ORDER_RECORD,
            1,
            root,
            separators.len() as u16,
            keys.len() as u64,
        ));
        (image, at)
    }

    #[test]
    fn geometry_matches_library_sizing() {
        let g = Geometry::new(70, ORDER_RECORD, 2, 8).unwrap();
        assert_eq!(g.max_records, vec![4, 2, 2]);
        assert_eq!(g.cumulative_max, vec![4, 14, 44]);
        assert_eq!(g.count_width, 1);
        assert_eq!(g.total_width(2), 1);
        assert_eq!(enc_size(255), 1);
        assert_eq!(enc_size(256), 2);
        assert!(Geometry::new(20, ORDER_RECORD, 0, 8).is_err());
    }

    #[test]
    fn empty_tree_has_no_records() {
        let mut image = Image { bytes: Vec::new() };
        let at = image.place(&build_header(6, 512, ORDER_RECORD, 0, u64::MAX, 0, 0));
        let header = image.header(at);
        assert!(records(&header, image.loader(&header)).unwrap().is_empty());
        assert_eq!(find(&header, by_order(1), image.loader(&header)).unwrap(), None);
    }

    #[test]
    fn depth_two_tree() {
        // leaves of records {0,1} {3} | {5} {7,8}; separators 2, 6 and root 4
        let g = Geometry::new(70, ORDER_RECORD, 2, 8).unwrap();
        let mut image = Image { bytes: vec![0; 8] };
        let leaf = |image: &mut Image, keys: &[u64]| {
            let recs: Vec<_> = keys.iter().map(|&k| order_record(k)).collect();
            (image.place(&build_leaf(6, &recs)), keys.len() as u64, keys.len() as u64)
        };
        let a = leaf(&mut image, &[0, 1]);
        let b = leaf(&mut image, &[3]);
        let c = leaf(&mut image, &[5]);
        let d = leaf(&mut image, &[7, 8]);
        let left = image.place(&build_internal(6, &g, 1, &[order_record(2)], &[a, b]));
        let right = image.place(&build_internal(6, &g, 1, &[order_record(6)], &[c, d]));
        let root = image.place(&build_internal(
            6,
            &g,
            2,
            &[order_record(4)],
            &[(left, 1, 4), (right, 1, 4)],
        ));
        let at = image.place(&build_header(6, 70, ORDER_RECORD, 2, root, 1, 9));
        let header = image.header(at);

        let all: Vec<u64> = records(&header, image.loader(&header))
            .unwrap()
            .iter()
            .map(order_of)
            .collect();
        assert_eq!(all, (0..9).collect::<Vec<_>>());
        for rank in 0..9 {
            let r = record_at(&header, rank, image.loader(&header)).unwrap().unwrap();
            assert_eq!(order_of(&r), rank);
        }
        assert_eq!(record_at(&header, 9, image.loader(&header)).unwrap(), None);
        let hit = find(&header, by_order(6), image.loader(&header)).unwrap();
        assert_eq!(hit.as_ref().map(order_of), Some(6));
    }

    #[test]
    fn node_checksum_and_signature_are_checked() {
        let (mut image, at) = build_tree(&[1, 2, 3], 512);
        let header = image.header(at);
        // corrupt the leaf's first record
        image.bytes[8 + 6] ^= 0xff;
        let err = records(&header, image.loader(&header)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Integrity);
        image.bytes[8] = b'X';
        let err = records(&header, image.loader(&header)).unwrap_err();
        assert!(matches!(err, Error::BadSignature { .. }));
    }

    #[test]
    fn parses_each_record_kind() {
        let w = widths();
        let mut huge = 0x100u64.to_le_bytes().to_vec();
        huge.extend_from_slice(&64u64.to_le_bytes());
        huge.extend_from_slice(&3u64.to_le_bytes());
        assert_eq!(
            Record::parse(&huge, 1, w).unwrap(),
            Record::HugeIndirect {
                address: Address::new(0x100),
                length: 64,
                id: 3
            }
        );

        let mut name = 0xABCDu32.to_le_bytes().to_vec();
        name.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(
            Record::parse(&name, 5, w).unwrap(),
            Record::LinkName {
                hash: 0xABCD,
                heap_id: vec![1, 2, 3, 4, 5, 6, 7]
            }
        );

        let mut attr = vec![9; 8];
        attr.push(0);
        attr.extend_from_slice(&2u32.to_le_bytes());
        attr.extend_from_slice(&77u32.to_le_bytes());
        assert_eq!(
            Record::parse(&attr, 8, w).unwrap(),
            Record::AttributeName {
                heap_id: vec![9; 8],
                flags: 0,
                creation_order: 2,
                hash: 77
            }
        );
        assert!(Record::parse(&attr[..4], 8, w).is_err());
        assert!(Record::parse(&attr, 12, w).is_err());
    }

    proptest! {
        #[test]
        fn traversal_is_sorted_and_every_key_is_found(
            keys in proptest::collection::btree_set(0u64..1_000_000, 1..200)
        ) {
            let keys: Vec<u64> = keys.into_iter().collect();
            let (image, at) = build_tree(&keys, 512);
            let header = image.header(at);

            let all: Vec<u64> = records(&header, image.loader(&header))
                .unwrap()
                .iter()
                .map(order_of)
                .collect();
            prop_assert!(all.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(&all, &keys);

            let mut cache = HashMap::new();
            let mut cached = |node: &NodeRef| -> Result<Arc<BTreeV2Node>> {
                if let Some(n) = cache.get(&node.address) {
                    return Ok(Arc::clone(n));
                }
                let n = image.loader(&header)(node)?;
                cache.insert(node.address, Arc::clone(&n));
                Ok(n)
            };
            for &k in &keys {
                let hit = find(&header, by_order(k), &mut cached).unwrap();
                prop_assert_eq!(hit.as_ref().map(order_of), Some(k));
            }
            let absent = find(&header, by_order(1_000_001), &mut cached).unwrap();
            prop_assert!(absent.is_none());
        }
    }
}
