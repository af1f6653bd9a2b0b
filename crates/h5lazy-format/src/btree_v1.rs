//! Version 1 B-trees (`TREE`).
//!
//! Group trees (type 0) index symbol table nodes by link name: child `i`
//! holds the names in `(key[i], key[i + 1]]`, where each key is an offset
//! into the group's local heap. Chunk trees (type 1) belong to dataset
//! storage and are decoded only as far as their header.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::cursor::{Address, Cursor};
use crate::error::{Error, Result};
use crate::local_heap::LocalHeap;
use crate::source::ByteSource;

pub const SIGNATURE: [u8; 4] = *b"TREE";

/// What a v1 B-tree indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Group nodes; leaves point at symbol table nodes.
    Group,
    /// Raw data chunks.
    Chunk,
}

/// Fan-out of legacy group storage: symbol table nodes hold at most
/// `2 * leaf` entries, group B-tree nodes at most `2 * internal` children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupK {
    pub leaf: u16,
    pub internal: u16,
}

impl GroupK {
    /// Values assumed when no superblock field or K-values message says otherwise.
    pub const DEFAULT: GroupK = GroupK {
        leaf: 4,
        internal: 16,
    };

    pub fn new(leaf: u16, internal: u16) -> Result<GroupK> {
        if leaf == 0 || internal == 0 {
            return Err(Error::malformed(
                "group K values",
                format!("leaf K {leaf} and internal K {internal} must be nonzero"),
            ));
        }
        Ok(GroupK { leaf, internal })
    }

    /// Most entries a symbol table node may declare.
    pub fn symbol_capacity(self) -> u32 {
        2 * u32::from(self.leaf)
    }

    /// Most children a group B-tree node may declare.
    pub fn node_capacity(self) -> u32 {
        2 * u32::from(self.internal)
    }
}

/// One parsed v1 B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Node {
    pub address: Address,
    pub node_type: NodeType,
    /// 0 for leaves.
    pub level: u8,
    pub entries_used: u16,
    pub left_sibling: Address,
    pub right_sibling: Address,
    /// Heap offsets of the `entries_used + 1` keys. Empty for chunk nodes.
    pub keys: Vec<u64>,
    /// Child addresses. Empty for chunk nodes.
    pub children: Vec<Address>,
}

impl BTreeV1Node {
    pub fn parse<S: ByteSource>(cursor: &mut Cursor<S>, group_k: GroupK) -> Result<BTreeV1Node> {
        let start = cursor.position();
        cursor.ensure_signature(&SIGNATURE)?;
        let node_type = match cursor.read_u8()? {
            0 => NodeType::Group,
            1 => NodeType::Chunk,
            other => {
                return Err(Error::malformed(
                    "v1 B-tree",
                    format!("unknown node type {other}"),
                ))
            }
        };
        let level = cursor.read_u8()?;
        let entries_used = cursor.read_u16()?;
        let left_sibling = cursor.read_address()?;
        let right_sibling = cursor.read_address()?;

        let mut keys = Vec::new();
        let mut children = Vec::new();
        if node_type == NodeType::Group {
            if u32::from(entries_used) > group_k.node_capacity() {
                return Err(Error::malformed(
                    "v1 B-tree",
                    format!(
                        "node at {start} declares {entries_used} children, capacity is {}",
                        group_k.node_capacity()
                    ),
                ));
            }
            keys.reserve(usize::from(entries_used) + 1);
            children.reserve(usize::from(entries_used));
            for _ in 0..entries_used {
                keys.push(cursor.read_length()?);
                children.push(cursor.read_address()?);
            }
            keys.push(cursor.read_length()?);
        }

        trace!(address = start, level, entries_used, "v1 B-tree node");
        Ok(BTreeV1Node {
            address: Address::new(start.saturating_sub(cursor.base())),
            node_type,
            level,
            entries_used,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }

    fn require_group(&self) -> Result<()> {
        if self.node_type != NodeType::Group {
            return Err(Error::malformed(
                "v1 B-tree",
                format!("node at {} is not a group node", self.address),
            ));
        }
        Ok(())
    }

    /// Index of the child whose key range holds `name`, if any.
    pub fn child_for(&self, name: &[u8], heap: &LocalHeap) -> Result<Option<usize>> {
        self.require_group()?;
        let (mut lo, mut hi) = (0usize, self.children.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if name <= heap.get_bytes(self.keys[mid])? {
                hi = mid;
            } else if name > heap.get_bytes(self.keys[mid + 1])? {
                lo = mid + 1;
            } else {
                return Ok(Some(mid));
            }
        }
        Ok(None)
    }
}

/// All leaf-level children (symbol table node addresses) in key order.
///
/// Walks with an explicit stack; `load` supplies (possibly cached) nodes.
pub fn leaf_children(
    root: Address,
    mut load: impl FnMut(Address) -> Result<Arc<BTreeV1Node>>,
) -> Result<Vec<Address>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![root];
    while let Some(address) = stack.pop() {
        if !visited.insert(address) {
            return Err(Error::malformed(
                "v1 B-tree",
                format!("node {address} is reachable twice"),
            ));
        }
        let node = load(address)?;
        node.require_group()?;
        if node.level == 0 {
            out.extend_from_slice(&node.children);
        } else {
            stack.extend(node.children.iter().rev().copied());
        }
    }
    Ok(out)
}

/// The leaf child (symbol table node address) that would hold `name`.
pub fn find_leaf_child(
    root: Address,
    name: &[u8],
    heap: &LocalHeap,
    mut load: impl FnMut(Address) -> Result<Arc<BTreeV1Node>>,
) -> Result<Option<Address>> {
    let mut address = root;
    let mut depth_left = u16::from(u8::MAX) + 1;
    loop {
        let node = load(address)?;
        let Some(index) = node.child_for(name, heap)? else {
            return Ok(None);
        };
        let child = node.children[index];
        if node.level == 0 {
            return Ok(Some(child));
        }
        depth_left = depth_left.checked_sub(1).ok_or_else(|| {
            Error::malformed("v1 B-tree", "descent deeper than any valid level")
        })?;
        address = child;
    }
}
