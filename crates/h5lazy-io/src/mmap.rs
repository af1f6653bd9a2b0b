use std::fs::File;
use std::io;
use std::path::Path;

use h5lazy_format::ByteSource;
use memmap2::Mmap;
use tracing::debug;

/// A read-only memory mapping of a file.
pub struct MmapSource {
    _file: File,
    mmap: Mmap,
}

impl MmapSource {
    /// Map the file at `path`.
    ///
    /// The file must not be truncated or rewritten while the mapping lives.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the mapping is read-only, and containers are treated as
        // immutable for the lifetime of a session.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.as_ref().display(), len = mmap.len(), "mapped file source");
        Ok(Self { _file: file, mmap })
    }

    /// The whole mapping.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_bytes().read_at(offset, buf)
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}
