//! Byte sources for reading containers from disk.
//!
//! [`FileSource`] issues positional reads against an open file, so several
//! sessions can share one handle without a shared seek pointer.
//! [`MmapSource`] maps the file and copies out of the mapping.

mod file;
mod mmap;

pub use file::FileSource;
pub use h5lazy_format;
pub use mmap::MmapSource;

use std::path::Path;

use h5lazy_format::{Container, OpenOptions, Result};

/// Open the container at `path` through a memory mapping.
pub fn open_mapped<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Container<MmapSource>> {
    let source = MmapSource::open(path)?;
    Container::open_with(source, options)
}

/// Open the container at `path` with positional file reads.
pub fn open_file<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Container<FileSource>> {
    let source = FileSource::open(path)?;
    Container::open_with(source, options)
}
