//! Lazy, read-only decoding of HDF5 container metadata.
//!
//! Structures are parsed on first use and memoized per session by
//! [`Container`]. The modules below expose each on-disk structure on its
//! own, over any [`ByteSource`] positioned with a [`Cursor`].

pub mod attribute;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod container;
pub mod cursor;
pub mod data_layout;
pub mod dataspace;
pub mod datatype;
pub mod driver_info;
pub mod error;
pub mod fill_value;
pub mod filter_pipeline;
pub mod fractal_heap;
pub mod free_space;
pub mod global_heap;
pub mod link;
pub mod local_heap;
pub mod message;
pub mod message_type;
pub mod object_header;
pub mod options;
pub mod shared_message;
pub mod signature;
pub mod source;
pub mod structure;
pub mod superblock;
pub mod symbol_table;

pub use container::{Container, GroupDescriptor, GroupMember};
pub use cursor::{Address, Cursor, FieldWidths};
pub use error::{Error, ErrorKind, Result};
pub use link::LinkTarget;
pub use message::{Message, MessageBody};
pub use message_type::MessageType;
pub use object_header::ObjectHeader;
pub use options::OpenOptions;
pub use source::ByteSource;
pub use structure::{identify, Structure, StructureKind};
pub use superblock::Superblock;
