//! Signature dispatch over every signed structure.

use tracing::trace;

use crate::btree_v1::{self, BTreeV1Node, GroupK};
use crate::btree_v2::{self, BTreeV2Header};
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::fractal_heap::{self, FractalHeapHeader};
use crate::free_space::{self, FreeSpaceManager};
use crate::global_heap::{self, GlobalHeapCollection};
use crate::local_heap::{self, LocalHeap};
use crate::object_header::{self, ObjectHeader};
use crate::shared_message;
use crate::signature::CONTAINER_SIGNATURE;
use crate::source::ByteSource;
use crate::superblock::Superblock;
use crate::symbol_table::{self, SymbolTableNode};

/// Every structure kind that opens with a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    Superblock,
    ObjectHeader,
    ObjectHeaderContinuation,
    LocalHeap,
    GlobalHeap,
    BTreeV1,
    SymbolTableNode,
    BTreeV2Header,
    BTreeV2Internal,
    BTreeV2Leaf,
    FractalHeap,
    FractalHeapDirectBlock,
    FractalHeapIndirectBlock,
    FreeSpaceManager,
    FreeSpaceSectionList,
    SharedMessageTable,
    SharedMessageList,
}

const SUPERBLOCK_PREFIX: [u8; 4] = [
    CONTAINER_SIGNATURE[0],
    CONTAINER_SIGNATURE[1],
    CONTAINER_SIGNATURE[2],
    CONTAINER_SIGNATURE[3],
];

const TABLE: [([u8; 4], StructureKind); 17] = [
    (SUPERBLOCK_PREFIX, StructureKind::Superblock),
    (object_header::SIGNATURE, StructureKind::ObjectHeader),
    (object_header::CONTINUATION_SIGNATURE, StructureKind::ObjectHeaderContinuation),
    (local_heap::SIGNATURE, StructureKind::LocalHeap),
    (global_heap::SIGNATURE, StructureKind::GlobalHeap),
    (btree_v1::SIGNATURE, StructureKind::BTreeV1),
    (symbol_table::NODE_SIGNATURE, StructureKind::SymbolTableNode),
    (btree_v2::HEADER_SIGNATURE, StructureKind::BTreeV2Header),
    (btree_v2::INTERNAL_SIGNATURE, StructureKind::BTreeV2Internal),
    (btree_v2::LEAF_SIGNATURE, StructureKind::BTreeV2Leaf),
    (fractal_heap::HEADER_SIGNATURE, StructureKind::FractalHeap),
    (fractal_heap::DIRECT_SIGNATURE, StructureKind::FractalHeapDirectBlock),
    (fractal_heap::INDIRECT_SIGNATURE, StructureKind::FractalHeapIndirectBlock),
    (free_space::HEADER_SIGNATURE, StructureKind::FreeSpaceManager),
    (free_space::SECTION_LIST_SIGNATURE, StructureKind::FreeSpaceSectionList),
    (shared_message::TABLE_SIGNATURE, StructureKind::SharedMessageTable),
    (shared_message::LIST_SIGNATURE, StructureKind::SharedMessageList),
];

impl StructureKind {
    pub fn from_signature(signature: &[u8; 4]) -> Option<StructureKind> {
        TABLE
            .iter()
            .find(|(sig, _)| sig == signature)
            .map(|&(_, kind)| kind)
    }

    pub fn signature(self) -> [u8; 4] {
        TABLE
            .iter()
            .find(|&&(_, kind)| kind == self)
            .map_or([0; 4], |&(sig, _)| sig)
    }

    /// Whether parsing needs parameters only the owning structure knows
    /// (node depth, heap geometry, record counts).
    pub fn is_detached(self) -> bool {
        matches!(
            self,
            StructureKind::ObjectHeaderContinuation
                | StructureKind::BTreeV2Internal
                | StructureKind::BTreeV2Leaf
                | StructureKind::FractalHeapDirectBlock
                | StructureKind::FractalHeapIndirectBlock
                | StructureKind::FreeSpaceSectionList
                | StructureKind::SharedMessageTable
                | StructureKind::SharedMessageList
        )
    }
}

/// A structure parsed by [`identify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    Superblock(Superblock),
    ObjectHeader(ObjectHeader),
    LocalHeap(LocalHeap),
    GlobalHeap(GlobalHeapCollection),
    BTreeV1(BTreeV1Node),
    SymbolTableNode(SymbolTableNode),
    BTreeV2(BTreeV2Header),
    FractalHeap(FractalHeapHeader),
    FreeSpaceManager(FreeSpaceManager),
}

impl Structure {
    pub fn kind(&self) -> StructureKind {
        match self {
            Structure::Superblock(_) => StructureKind::Superblock,
            Structure::ObjectHeader(_) => StructureKind::ObjectHeader,
            Structure::LocalHeap(_) => StructureKind::LocalHeap,
            Structure::GlobalHeap(_) => StructureKind::GlobalHeap,
            Structure::BTreeV1(_) => StructureKind::BTreeV1,
            Structure::SymbolTableNode(_) => StructureKind::SymbolTableNode,
            Structure::BTreeV2(_) => StructureKind::BTreeV2Header,
            Structure::FractalHeap(_) => StructureKind::FractalHeap,
            Structure::FreeSpaceManager(_) => StructureKind::FreeSpaceManager,
        }
    }
}

/// Parse whatever signed structure starts at the cursor. Legacy group
/// nodes are bounded by `group_k`.
///
/// On success the cursor sits just past the structure. An unknown
/// signature leaves the cursor where it was.
pub fn identify<S: ByteSource>(
    c: &mut Cursor<S>,
    continuation_limit: usize,
    group_k: GroupK,
) -> Result<Structure> {
    let at = c.position();
    let signature = c.peek_signature()?;
    let kind = StructureKind::from_signature(&signature).ok_or(Error::UnknownStructure {
        signature,
        address: at,
    })?;
    trace!(address = at, ?kind, "dispatching structure");
    if kind.is_detached() {
        return Err(Error::DetachedStructure(kind));
    }

    let structure = match kind {
        StructureKind::Superblock => {
            // The superblock establishes widths, so it gets a cursor of its own.
            let (superblock, end) = {
                let mut fresh = Cursor::new(c.source());
                fresh.set_strict_checksums(c.strict_checksums());
                fresh.seek(at);
                (Superblock::parse(&mut fresh)?, fresh.position())
            };
            c.seek(end);
            Structure::Superblock(superblock)
        }
        StructureKind::ObjectHeader => {
            Structure::ObjectHeader(ObjectHeader::parse(c, continuation_limit)?)
        }
        StructureKind::LocalHeap => Structure::LocalHeap(LocalHeap::parse(c)?),
        StructureKind::GlobalHeap => Structure::GlobalHeap(GlobalHeapCollection::parse(c)?),
        StructureKind::BTreeV1 => Structure::BTreeV1(BTreeV1Node::parse(c, group_k)?),
        StructureKind::SymbolTableNode => {
            Structure::SymbolTableNode(SymbolTableNode::parse(c, group_k)?)
        }
        StructureKind::BTreeV2Header => Structure::BTreeV2(BTreeV2Header::parse(c)?),
        StructureKind::FractalHeap => Structure::FractalHeap(FractalHeapHeader::parse(c)?),
        StructureKind::FreeSpaceManager => {
            Structure::FreeSpaceManager(FreeSpaceManager::parse(c)?)
        }
        detached => return Err(Error::DetachedStructure(detached)),
    };
    Ok(structure)
}
