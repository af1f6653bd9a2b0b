//! Container signature (magic bytes) probing.

use tracing::trace;

use crate::error::{Error, Result};
use crate::source::ByteSource;

/// The 8-byte signature that opens every superblock.
pub const CONTAINER_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1A, b'\n'];

/// Offsets at which a superblock may start: 0, then 512 doubling.
pub fn probe_offsets(limit: u64) -> impl Iterator<Item = u64> {
    std::iter::once(0)
        .chain(std::iter::successors(Some(512u64), |o| o.checked_mul(2)))
        .take_while(move |&o| o <= limit)
}

/// Find the first probe offset holding the container signature.
///
/// `limit` caps the probed offsets in addition to the source length.
pub fn find_signature<S: ByteSource + ?Sized>(source: &S, limit: Option<u64>) -> Result<u64> {
    let len = source.len();
    let last_start = len.saturating_sub(CONTAINER_SIGNATURE.len() as u64);
    let limit = limit.map_or(last_start, |l| l.min(last_start));
    let mut buf = [0u8; 8];
    if len >= CONTAINER_SIGNATURE.len() as u64 {
        for offset in probe_offsets(limit) {
            source.read_at(offset, &mut buf)?;
            trace!(offset, "probing for container signature");
            if buf == CONTAINER_SIGNATURE {
                return Ok(offset);
            }
        }
    }
    Err(Error::NotAContainer {
        probed_up_to: limit,
    })
}
