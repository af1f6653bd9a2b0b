//! A read session over one container.
//!
//! [`Container`] owns the cursor and an arena of parsed structures keyed by
//! address. Every public call takes the session lock once, parses whatever
//! is not cached yet, and hands back `Arc`-shared values. Failed parses are
//! not cached, so a later call reports the same error again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::attribute::{Attribute, Embedded};
use crate::btree_v1::{self, BTreeV1Node, GroupK};
use crate::btree_v2::{self, BTreeV2Header, BTreeV2Node, NodeRef, Record};
use crate::checksum::lookup3;
use crate::cursor::{Address, Cursor, FieldWidths};
use crate::driver_info::DriverInfo;
use crate::error::{Error, Result};
use crate::fractal_heap::FractalHeapHeader;
use crate::free_space::{self, FreeSpaceManager, Section};
use crate::global_heap::GlobalHeapCollection;
use crate::link::{LinkInfo, LinkMessage, LinkTarget};
use crate::local_heap::LocalHeap;
use crate::message::{decode_body, MessageBody, MessageFlags};
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::options::OpenOptions;
use crate::shared_message::{
    parse_record_list, IndexKind, SharedMessage, SharedMessageRecord, SharedMessageTable,
};
use crate::signature::find_signature;
use crate::source::ByteSource;
use crate::structure::{self, Structure};
use crate::superblock::{RootEntry, Superblock};
use crate::symbol_table::{EntryCache, SymbolTableEntry, SymbolTableNode};

/// How to enumerate a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupDescriptor {
    /// Legacy group: a v1 B-tree of symbol table nodes plus the local heap
    /// holding the link names.
    SymbolTable { btree: Address, local_heap: Address },
    /// Group described by the messages of this object header.
    Header(Address),
}

/// One named link of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub name: String,
    pub target: LinkTarget,
    /// Set when the link already tells how to enumerate its target, so
    /// descending does not need to open the target header.
    pub group_hint: Option<GroupDescriptor>,
}

/// Where a header-described group keeps its links.
enum LinkStorage {
    SymbolTable { btree: Address, local_heap: Address },
    Compact,
    Dense(LinkInfo),
}

fn link_storage(header: &ObjectHeader) -> Option<LinkStorage> {
    for message in &header.messages {
        match &message.body {
            MessageBody::SymbolTable { btree, local_heap } => {
                return Some(LinkStorage::SymbolTable {
                    btree: *btree,
                    local_heap: *local_heap,
                })
            }
            MessageBody::LinkInfo(info) if info.is_dense() => {
                return Some(LinkStorage::Dense(info.clone()))
            }
            _ => {}
        }
    }
    let compact = header.messages.iter().any(|m| {
        matches!(
            m.message_type,
            MessageType::Link | MessageType::LinkInfo | MessageType::GroupInfo
        )
    });
    compact.then_some(LinkStorage::Compact)
}

fn link_member(link: LinkMessage) -> GroupMember {
    GroupMember {
        name: link.name,
        target: link.target,
        group_hint: None,
    }
}

fn entry_member(entry: &SymbolTableEntry, heap: &LocalHeap) -> Result<GroupMember> {
    let name = heap.get_string(entry.name_offset)?;
    Ok(match entry.cache {
        EntryCache::SoftLink { value_offset } => GroupMember {
            name,
            target: LinkTarget::Soft(heap.get_string(u64::from(value_offset))?),
            group_hint: None,
        },
        EntryCache::Group { btree, local_heap } => GroupMember {
            name,
            target: LinkTarget::Hard(entry.header),
            group_hint: Some(GroupDescriptor::SymbolTable { btree, local_heap }),
        },
        EntryCache::None => GroupMember {
            name,
            target: LinkTarget::Hard(entry.header),
            group_hint: None,
        },
    })
}

/// Return the cached structure at `address` or parse and cache it.
fn memoized<T, S: ByteSource>(
    cache: &mut HashMap<Address, Arc<T>>,
    cursor: &mut Cursor<S>,
    address: Address,
    context: &'static str,
    parse: impl FnOnce(&mut Cursor<S>) -> Result<T>,
) -> Result<Arc<T>> {
    if let Some(hit) = cache.get(&address) {
        return Ok(Arc::clone(hit));
    }
    cursor.seek_address(address, context)?;
    let parsed = Arc::new(parse(cursor)?);
    debug!(%address, context, "cached");
    cache.insert(address, Arc::clone(&parsed));
    Ok(parsed)
}

fn load_v2_node<S: ByteSource>(
    cache: &mut HashMap<Address, Arc<BTreeV2Node>>,
    cursor: &mut Cursor<S>,
    header: &BTreeV2Header,
    node: &NodeRef,
) -> Result<Arc<BTreeV2Node>> {
    memoized(cache, cursor, node.address, "v2 B-tree node", |c| {
        BTreeV2Node::parse(c, header, node)
    })
}

#[derive(Default)]
struct Arena {
    /// Headers exactly as stored, shared references unresolved.
    raw_headers: HashMap<Address, Arc<ObjectHeader>>,
    headers: HashMap<Address, Arc<ObjectHeader>>,
    local_heaps: HashMap<Address, Arc<LocalHeap>>,
    btree_v1_nodes: HashMap<Address, Arc<BTreeV1Node>>,
    symbol_nodes: HashMap<Address, Arc<SymbolTableNode>>,
    btree_v2_headers: HashMap<Address, Arc<BTreeV2Header>>,
    btree_v2_nodes: HashMap<Address, Arc<BTreeV2Node>>,
    fractal_heaps: HashMap<Address, Arc<FractalHeapHeader>>,
    global_heaps: HashMap<Address, Arc<GlobalHeapCollection>>,
    free_space: HashMap<Address, Arc<FreeSpaceManager>>,
    shared_table: Option<Arc<SharedMessageTable>>,
}

struct Session<S> {
    cursor: Cursor<S>,
    continuation_limit: usize,
    extension: Address,
    /// Legacy group fan-out; known at open for superblocks 0 and 1.
    group_k: Option<GroupK>,
    arena: Arena,
}

/// An open container.
///
/// ```no_run
/// use h5lazy_format::Container;
///
/// let bytes = std::fs::read("example.h5")?;
/// let container = Container::open(bytes)?;
/// for member in container.group_entries(&container.root_group())? {
///     println!("{}", member.name);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Container<S> {
    session: Mutex<Session<S>>,
    superblock: Superblock,
    driver_info: Option<Arc<DriverInfo>>,
}

impl<S> std::fmt::Debug for Container<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("superblock", &self.superblock)
            .field("driver_info", &self.driver_info)
            .finish_non_exhaustive()
    }
}

impl<S: ByteSource> Container<S> {
    pub fn open(source: S) -> Result<Container<S>> {
        Container::open_with(source, OpenOptions::default())
    }

    pub fn open_with(source: S, options: OpenOptions) -> Result<Container<S>> {
        let location = find_signature(&source, options.probe_limit)?;
        let mut cursor = Cursor::new(source);
        cursor.set_strict_checksums(options.strict);
        cursor.seek(location);
        let superblock = Superblock::parse(&mut cursor)?;
        debug!(
            location,
            version = superblock.version,
            offsets = superblock.widths.offsets,
            lengths = superblock.widths.lengths,
            "opened container"
        );
        let driver_info = if options.driver_info {
            read_driver_info(&mut cursor, &superblock).map(Arc::new)
        } else {
            None
        };
        Ok(Container {
            session: Mutex::new(Session {
                cursor,
                continuation_limit: options.continuation_limit,
                group_k: superblock.legacy.and_then(|legacy| {
                    GroupK::new(legacy.group_leaf_k, legacy.group_internal_k).ok()
                }),
                extension: superblock.extension_address,
                arena: Arena::default(),
            }),
            superblock,
            driver_info,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn field_widths(&self) -> FieldWidths {
        self.superblock.widths
    }

    /// The root group. A legacy root whose entry caches its B-tree and heap
    /// is described without opening its header.
    pub fn root_group(&self) -> GroupDescriptor {
        match &self.superblock.root {
            RootEntry::SymbolTable(entry) => match entry.cache {
                EntryCache::Group { btree, local_heap } => {
                    GroupDescriptor::SymbolTable { btree, local_heap }
                }
                _ => GroupDescriptor::Header(entry.header),
            },
            RootEntry::ObjectHeader(address) => GroupDescriptor::Header(*address),
        }
    }

    /// The object header at `address`, with every shared message replaced
    /// by the message it refers to.
    pub fn object_header(&self, address: Address) -> Result<Arc<ObjectHeader>> {
        self.session.lock().object_header(address)
    }

    /// Every attribute of the object at `address`, compact and dense.
    pub fn attributes(&self, address: Address) -> Result<Vec<Attribute>> {
        self.session.lock().attributes(address)
    }

    /// The links of a group, ordered by name.
    pub fn group_entries(&self, group: &GroupDescriptor) -> Result<Vec<GroupMember>> {
        self.session.lock().group_entries(group)
    }

    /// The link called `name`, using the group's index where it has one.
    pub fn lookup_entry(&self, group: &GroupDescriptor, name: &str) -> Result<Option<GroupMember>> {
        self.session.lock().lookup_entry(group, name)
    }

    /// How to enumerate `member` if it is a group; `None` otherwise.
    pub fn group_of(&self, member: &GroupMember) -> Result<Option<GroupDescriptor>> {
        if let Some(hint) = member.group_hint {
            return Ok(Some(hint));
        }
        let LinkTarget::Hard(address) = member.target else {
            return Ok(None);
        };
        self.session.lock().group_of(address)
    }

    /// The object behind `heap_id` in the fractal heap at `heap_address`.
    pub fn heap_record(&self, heap_address: Address, heap_id: &[u8]) -> Result<Vec<u8>> {
        let mut session = self.session.lock();
        let heap = session.fractal_heap(heap_address)?;
        heap.read_object(&mut session.cursor, heap_id)
    }

    /// The data of object `index` in the global heap collection at `address`.
    pub fn global_heap_object(&self, address: Address, index: u32) -> Result<Vec<u8>> {
        let collection = self.session.lock().global_heap(address)?;
        u16::try_from(index)
            .ok()
            .and_then(|index| collection.object(index))
            .map(|object| object.data.clone())
            .ok_or_else(|| Error::OutOfBounds {
                context: "global heap object index",
                offset: u64::from(index),
                len: 1,
                limit: collection.objects.len() as u64,
            })
    }

    pub fn local_heap(&self, address: Address) -> Result<Arc<LocalHeap>> {
        self.session.lock().local_heap(address)
    }

    pub fn btree_v2(&self, address: Address) -> Result<Arc<BTreeV2Header>> {
        self.session.lock().btree_v2(address)
    }

    /// All records of the v2 B-tree at `address`, in key order.
    pub fn btree_v2_records(&self, address: Address) -> Result<Vec<Record>> {
        self.session.lock().btree_v2_records(address)
    }

    /// The record at position `rank` of the v2 B-tree at `address`.
    pub fn btree_v2_record_at(&self, address: Address, rank: u64) -> Result<Option<Record>> {
        let mut session = self.session.lock();
        let header = session.btree_v2(address)?;
        let Session { cursor, arena, .. } = &mut *session;
        btree_v2::record_at(&header, rank, |node| {
            load_v2_node(&mut arena.btree_v2_nodes, cursor, &header, node)
        })
    }

    pub fn fractal_heap(&self, address: Address) -> Result<Arc<FractalHeapHeader>> {
        self.session.lock().fractal_heap(address)
    }

    pub fn free_space_manager(&self, address: Address) -> Result<Arc<FreeSpaceManager>> {
        self.session.lock().free_space_manager(address)
    }

    /// The sections tracked by the free-space manager at `address`, checked
    /// against the manager's totals.
    pub fn free_space_sections(&self, address: Address) -> Result<Vec<Section>> {
        let mut session = self.session.lock();
        let manager = session.free_space_manager(address)?;
        free_space::read_sections(&mut session.cursor, &manager)
    }

    /// The shared message table, if the container has one.
    pub fn shared_message_table(&self) -> Result<Option<Arc<SharedMessageTable>>> {
        self.session.lock().shared_message_table()
    }

    /// Records of shared-message index `index`, from its list or its B-tree.
    pub fn shared_message_records(&self, index: usize) -> Result<Vec<SharedMessageRecord>> {
        self.session.lock().shared_message_records(index)
    }

    /// The driver information block, when present and readable.
    pub fn driver_info(&self) -> Option<Arc<DriverInfo>> {
        self.driver_info.clone()
    }

    /// The superblock extension header (superblock versions 2 and 3).
    pub fn superblock_extension(&self) -> Result<Option<Arc<ObjectHeader>>> {
        let extension = self.superblock.extension_address;
        if extension.is_undefined() {
            return Ok(None);
        }
        self.object_header(extension).map(Some)
    }

    /// Parse whatever signed structure starts at `address`. Not cached.
    pub fn identify(&self, address: Address) -> Result<Structure> {
        let mut session = self.session.lock();
        let limit = session.continuation_limit;
        let group_k = session.group_k()?;
        session.cursor.seek_address(address, "structure")?;
        structure::identify(&mut session.cursor, limit, group_k)
    }
}

fn read_driver_info<S: ByteSource>(
    cursor: &mut Cursor<S>,
    superblock: &Superblock,
) -> Option<DriverInfo> {
    let address = superblock.driver_info_address();
    if address.is_undefined() {
        return None;
    }
    let parsed = cursor
        .seek_address(address, "driver information block")
        .and_then(|()| DriverInfo::parse(cursor));
    match parsed {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(%address, error = %err, "ignoring unreadable driver information block");
            None
        }
    }
}

impl<S: ByteSource> Session<S> {
    /// Legacy group fan-out: from the superblock, else from a K-values
    /// message in the superblock extension, else the defaults.
    fn group_k(&mut self) -> Result<GroupK> {
        if let Some(k) = self.group_k {
            return Ok(k);
        }
        let mut k = GroupK::DEFAULT;
        if !self.extension.is_undefined() {
            let extension = self.raw_header(self.extension)?;
            let values = extension.messages.iter().find_map(|m| match &m.body {
                MessageBody::BTreeKValues(values) => Some(*values),
                _ => None,
            });
            if let Some(values) = values {
                k = GroupK::new(values.group_leaf_k, values.group_internal_k)?;
            }
        }
        self.group_k = Some(k);
        Ok(k)
    }

    fn raw_header(&mut self, address: Address) -> Result<Arc<ObjectHeader>> {
        let limit = self.continuation_limit;
        memoized(
            &mut self.arena.raw_headers,
            &mut self.cursor,
            address,
            "object header",
            |c| ObjectHeader::parse(c, limit),
        )
    }

    fn object_header(&mut self, address: Address) -> Result<Arc<ObjectHeader>> {
        if let Some(hit) = self.arena.headers.get(&address) {
            return Ok(Arc::clone(hit));
        }
        let raw = self.raw_header(address)?;
        let needs_resolution = raw.messages.iter().any(|m| match &m.body {
            MessageBody::Shared(_) => true,
            MessageBody::Attribute(attribute) => has_shared_parts(attribute),
            _ => false,
        });
        let resolved = if needs_resolution {
            let at = self.cursor.absolute(address, "object header")?;
            let mut header = (*raw).clone();
            for message in &mut header.messages {
                if let MessageBody::Shared(shared) = &message.body {
                    let shared = *shared;
                    message.body = self.resolve_shared(message.message_type, shared, at)?;
                    message.flags = message.flags.without_shared();
                }
                if let MessageBody::Attribute(attribute) = &mut message.body {
                    self.resolve_attribute(attribute, at)?;
                }
            }
            Arc::new(header)
        } else {
            raw
        };
        self.arena.headers.insert(address, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Follow a shared reference to the body it stands for.
    fn resolve_shared(
        &mut self,
        message_type: MessageType,
        shared: SharedMessage,
        header: u64,
    ) -> Result<MessageBody> {
        let mut current = shared;
        let mut visited = HashSet::new();
        loop {
            match current {
                SharedMessage::Committed(target) => {
                    if !visited.insert(target) {
                        return Err(Error::malformed(
                            "shared message",
                            format!("reference cycle through {target}"),
                        ));
                    }
                    let owner = self.raw_header(target)?;
                    let message = owner.first(message_type).ok_or_else(|| {
                        Error::malformed(
                            "shared message",
                            format!("header {target} holds no {message_type:?} message"),
                        )
                    })?;
                    match &message.body {
                        MessageBody::Shared(next) => current = *next,
                        body => {
                            trace!(%target, ?message_type, "resolved committed message");
                            return Ok(body.clone());
                        }
                    }
                }
                SharedMessage::Heap(id) => {
                    let bytes = self.shared_heap_object(message_type, &id)?;
                    let widths = self.cursor.widths()?;
                    trace!(?message_type, len = bytes.len(), "resolved heap-stored message");
                    return decode_body(
                        message_type,
                        MessageFlags::default(),
                        &bytes,
                        widths,
                        header,
                    );
                }
                SharedMessage::Here => {
                    return Err(Error::malformed(
                        "shared message",
                        "a stored-here reference cannot stand in for a message",
                    ))
                }
            }
        }
    }

    fn shared_heap_object(&mut self, message_type: MessageType, id: &[u8]) -> Result<Vec<u8>> {
        let table = self.shared_message_table()?.ok_or_else(|| {
            Error::malformed("shared message", "heap reference without a shared message table")
        })?;
        let index = table.index_for(message_type).copied().ok_or_else(|| {
            Error::malformed(
                "shared message",
                format!("no shared message index holds {message_type:?} messages"),
            )
        })?;
        let heap = self.fractal_heap(index.heap_address)?;
        heap.read_object(&mut self.cursor, id)
    }

    /// Replace shared datatype and dataspace parts with their bodies.
    fn resolve_attribute(&mut self, attribute: &mut Attribute, header: u64) -> Result<()> {
        if let Embedded::Shared(shared) = &attribute.datatype {
            let shared = *shared;
            match self.resolve_shared(MessageType::Datatype, shared, header)? {
                MessageBody::Datatype(datatype) => attribute.datatype = Embedded::Inline(datatype),
                other => return Err(mismatched_part("datatype", &other)),
            }
        }
        if let Embedded::Shared(shared) = &attribute.dataspace {
            let shared = *shared;
            match self.resolve_shared(MessageType::Dataspace, shared, header)? {
                MessageBody::Dataspace(space) => attribute.dataspace = Embedded::Inline(space),
                other => return Err(mismatched_part("dataspace", &other)),
            }
        }
        if let (Embedded::Inline(datatype), Embedded::Inline(space)) =
            (&attribute.datatype, &attribute.dataspace)
        {
            let expected = space.num_elements().saturating_mul(u64::from(datatype.size()));
            if expected > attribute.data.len() as u64 {
                return Err(Error::OutOfBounds {
                    context: "attribute value",
                    offset: 0,
                    len: expected,
                    limit: attribute.data.len() as u64,
                });
            }
            attribute.data.truncate(expected as usize);
        }
        Ok(())
    }

    fn attributes(&mut self, address: Address) -> Result<Vec<Attribute>> {
        let header = self.object_header(address)?;
        let mut out: Vec<Attribute> = header
            .messages
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::Attribute(attribute) => Some(attribute.clone()),
                _ => None,
            })
            .collect();
        let dense = header.messages.iter().find_map(|m| match &m.body {
            MessageBody::AttributeInfo(info) if !info.fractal_heap.is_undefined() => Some(*info),
            _ => None,
        });
        let Some(info) = dense else {
            return Ok(out);
        };

        let at = self.cursor.absolute(address, "object header")?;
        let heap = self.fractal_heap(info.fractal_heap)?;
        let widths = self.cursor.widths()?;
        for record in self.btree_v2_records(info.name_index)? {
            let Record::AttributeName { heap_id, .. } = &record else {
                return Err(Error::malformed(
                    "attribute name index",
                    format!("unexpected record {record:?}"),
                ));
            };
            let bytes = heap.read_object(&mut self.cursor, heap_id)?;
            let body = decode_body(
                MessageType::Attribute,
                MessageFlags::default(),
                &bytes,
                widths,
                at,
            )?;
            let MessageBody::Attribute(mut attribute) = body else {
                return Err(Error::malformed("attribute", "dense record is not an attribute"));
            };
            self.resolve_attribute(&mut attribute, at)?;
            out.push(attribute);
        }
        Ok(out)
    }

    fn local_heap(&mut self, address: Address) -> Result<Arc<LocalHeap>> {
        memoized(
            &mut self.arena.local_heaps,
            &mut self.cursor,
            address,
            "local heap",
            LocalHeap::parse,
        )
    }

    fn symbol_node(&mut self, address: Address) -> Result<Arc<SymbolTableNode>> {
        let group_k = self.group_k()?;
        memoized(
            &mut self.arena.symbol_nodes,
            &mut self.cursor,
            address,
            "symbol table node",
            |c| SymbolTableNode::parse(c, group_k),
        )
    }

    fn global_heap(&mut self, address: Address) -> Result<Arc<GlobalHeapCollection>> {
        memoized(
            &mut self.arena.global_heaps,
            &mut self.cursor,
            address,
            "global heap collection",
            GlobalHeapCollection::parse,
        )
    }

    fn btree_v2(&mut self, address: Address) -> Result<Arc<BTreeV2Header>> {
        memoized(
            &mut self.arena.btree_v2_headers,
            &mut self.cursor,
            address,
            "v2 B-tree header",
            BTreeV2Header::parse,
        )
    }

    fn btree_v2_records(&mut self, address: Address) -> Result<Vec<Record>> {
        let header = self.btree_v2(address)?;
        btree_v2::records(&header, |node| {
            load_v2_node(&mut self.arena.btree_v2_nodes, &mut self.cursor, &header, node)
        })
    }

    fn fractal_heap(&mut self, address: Address) -> Result<Arc<FractalHeapHeader>> {
        memoized(
            &mut self.arena.fractal_heaps,
            &mut self.cursor,
            address,
            "fractal heap header",
            FractalHeapHeader::parse,
        )
    }

    fn free_space_manager(&mut self, address: Address) -> Result<Arc<FreeSpaceManager>> {
        memoized(
            &mut self.arena.free_space,
            &mut self.cursor,
            address,
            "free-space manager",
            FreeSpaceManager::parse,
        )
    }

    fn shared_message_table(&mut self) -> Result<Option<Arc<SharedMessageTable>>> {
        if let Some(table) = &self.arena.shared_table {
            return Ok(Some(Arc::clone(table)));
        }
        if self.extension.is_undefined() {
            return Ok(None);
        }
        // The raw header: resolving the extension could need this table.
        let extension = self.raw_header(self.extension)?;
        let Some(message) = extension.first(MessageType::SharedMessageTable) else {
            return Ok(None);
        };
        let MessageBody::SharedMessageTable(pointer) = &message.body else {
            return Err(Error::malformed(
                "superblock extension",
                "shared message table message is itself shared",
            ));
        };
        let pointer = *pointer;
        self.cursor
            .seek_address(pointer.table, "shared message table")?;
        let table = Arc::new(SharedMessageTable::parse(
            &mut self.cursor,
            pointer.index_count,
        )?);
        debug!(address = %pointer.table, indexes = table.indexes.len(), "cached shared message table");
        self.arena.shared_table = Some(Arc::clone(&table));
        Ok(Some(table))
    }

    fn shared_message_records(&mut self, index: usize) -> Result<Vec<SharedMessageRecord>> {
        let table = self.shared_message_table()?.ok_or_else(|| {
            Error::malformed("shared message table", "container has no shared message table")
        })?;
        let entry = table.indexes.get(index).copied().ok_or(Error::OutOfBounds {
            context: "shared message index",
            offset: index as u64,
            len: 1,
            limit: table.indexes.len() as u64,
        })?;
        match entry.kind {
            IndexKind::List => {
                self.cursor
                    .seek_address(entry.index_address, "shared message list")?;
                parse_record_list(&mut self.cursor, entry.message_count)
            }
            IndexKind::BTree => self
                .btree_v2_records(entry.index_address)?
                .into_iter()
                .map(|record| match record {
                    Record::SharedMessage(record) => Ok(record),
                    other => Err(Error::malformed(
                        "shared message index",
                        format!("unexpected record {other:?}"),
                    )),
                })
                .collect(),
        }
    }

    fn group_entries(&mut self, group: &GroupDescriptor) -> Result<Vec<GroupMember>> {
        let address = match *group {
            GroupDescriptor::SymbolTable { btree, local_heap } => {
                return self.symbol_table_members(btree, local_heap)
            }
            GroupDescriptor::Header(address) => address,
        };
        let header = self.object_header(address)?;
        match link_storage(&header).ok_or_else(|| not_a_group(address))? {
            LinkStorage::SymbolTable { btree, local_heap } => {
                self.symbol_table_members(btree, local_heap)
            }
            LinkStorage::Compact => {
                let mut members: Vec<GroupMember> = header
                    .messages
                    .iter()
                    .filter_map(|m| match &m.body {
                        MessageBody::Link(link) => Some(link_member(link.clone())),
                        _ => None,
                    })
                    .collect();
                members.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(members)
            }
            LinkStorage::Dense(info) => self.dense_members(&info),
        }
    }

    fn symbol_table_members(
        &mut self,
        btree: Address,
        local_heap: Address,
    ) -> Result<Vec<GroupMember>> {
        let heap = self.local_heap(local_heap)?;
        let group_k = self.group_k()?;
        let leaves = {
            btree_v1::leaf_children(btree, |address| {
                memoized(
                    &mut self.arena.btree_v1_nodes,
                    &mut self.cursor,
                    address,
                    "v1 B-tree node",
                    |c| BTreeV1Node::parse(c, group_k),
                )
            })?
        };
        let mut members = Vec::new();
        for leaf in leaves {
            let node = self.symbol_node(leaf)?;
            for entry in &node.entries {
                members.push(entry_member(entry, &heap)?);
            }
        }
        Ok(members)
    }

    fn dense_members(&mut self, info: &LinkInfo) -> Result<Vec<GroupMember>> {
        let heap = self.fractal_heap(info.fractal_heap)?;
        let mut members = Vec::new();
        for record in self.btree_v2_records(info.name_index)? {
            let Record::LinkName { heap_id, .. } = &record else {
                return Err(Error::malformed(
                    "link name index",
                    format!("unexpected record {record:?}"),
                ));
            };
            members.push(self.dense_link(&heap, heap_id)?);
        }
        members.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(members)
    }

    fn dense_link(&mut self, heap: &FractalHeapHeader, heap_id: &[u8]) -> Result<GroupMember> {
        let bytes = heap.read_object(&mut self.cursor, heap_id)?;
        let mut c = Cursor::with_widths(&bytes[..], self.cursor.widths()?);
        Ok(link_member(LinkMessage::parse(&mut c)?))
    }

    fn lookup_entry(&mut self, group: &GroupDescriptor, name: &str) -> Result<Option<GroupMember>> {
        let address = match *group {
            GroupDescriptor::SymbolTable { btree, local_heap } => {
                return self.symbol_table_lookup(btree, local_heap, name)
            }
            GroupDescriptor::Header(address) => address,
        };
        let header = self.object_header(address)?;
        match link_storage(&header).ok_or_else(|| not_a_group(address))? {
            LinkStorage::SymbolTable { btree, local_heap } => {
                self.symbol_table_lookup(btree, local_heap, name)
            }
            LinkStorage::Compact => Ok(header.messages.iter().find_map(|m| match &m.body {
                MessageBody::Link(link) if link.name == name => Some(link_member(link.clone())),
                _ => None,
            })),
            LinkStorage::Dense(info) => self.dense_lookup(&info, name),
        }
    }

    fn symbol_table_lookup(
        &mut self,
        btree: Address,
        local_heap: Address,
        name: &str,
    ) -> Result<Option<GroupMember>> {
        let heap = self.local_heap(local_heap)?;
        let group_k = self.group_k()?;
        let leaf = {
            btree_v1::find_leaf_child(btree, name.as_bytes(), &heap, |address| {
                memoized(
                    &mut self.arena.btree_v1_nodes,
                    &mut self.cursor,
                    address,
                    "v1 B-tree node",
                    |c| BTreeV1Node::parse(c, group_k),
                )
            })?
        };
        let Some(leaf) = leaf else {
            return Ok(None);
        };
        let node = self.symbol_node(leaf)?;
        for entry in &node.entries {
            if heap.get_string(entry.name_offset)? == name {
                return entry_member(entry, &heap).map(Some);
            }
        }
        Ok(None)
    }

    fn dense_lookup(&mut self, info: &LinkInfo, name: &str) -> Result<Option<GroupMember>> {
        let heap = self.fractal_heap(info.fractal_heap)?;
        let index = self.btree_v2(info.name_index)?;
        let hash = lookup3(name.as_bytes());
        let found = btree_v2::find(
            &index,
            |record| match record {
                Record::LinkName { hash: other, .. } => Ok(hash.cmp(other)),
                other => Err(Error::malformed(
                    "link name index",
                    format!("unexpected record {other:?}"),
                )),
            },
            |node| load_v2_node(&mut self.arena.btree_v2_nodes, &mut self.cursor, &index, node),
        )?;
        let Some(Record::LinkName { heap_id, .. }) = found else {
            return Ok(None);
        };
        let member = self.dense_link(&heap, &heap_id)?;
        if member.name == name {
            return Ok(Some(member));
        }
        // Hash collision: the search landed on another name with this hash.
        for record in self.btree_v2_records(info.name_index)? {
            if let Record::LinkName {
                hash: other,
                heap_id,
            } = &record
            {
                if *other == hash {
                    let member = self.dense_link(&heap, heap_id)?;
                    if member.name == name {
                        return Ok(Some(member));
                    }
                }
            }
        }
        Ok(None)
    }

    fn group_of(&mut self, address: Address) -> Result<Option<GroupDescriptor>> {
        let header = self.object_header(address)?;
        Ok(link_storage(&header).map(|storage| match storage {
            LinkStorage::SymbolTable { btree, local_heap } => {
                GroupDescriptor::SymbolTable { btree, local_heap }
            }
            LinkStorage::Compact | LinkStorage::Dense(_) => GroupDescriptor::Header(address),
        }))
    }
}

fn has_shared_parts(attribute: &Attribute) -> bool {
    matches!(attribute.datatype, Embedded::Shared(_))
        || matches!(attribute.dataspace, Embedded::Shared(_))
}

fn mismatched_part(part: &str, body: &MessageBody) -> Error {
    Error::malformed(
        "attribute",
        format!("shared {part} resolved to {body:?}"),
    )
}

fn not_a_group(address: Address) -> Error {
    Error::malformed(
        "group",
        format!("object header {address} describes no links"),
    )
}
