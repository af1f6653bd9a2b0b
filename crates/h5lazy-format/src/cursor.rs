//! Positioned little-endian reader over a [`ByteSource`].
//!
//! Every structure parser in this crate reads through a [`Cursor`]. The
//! cursor owns the session's single read position, the file-wide address
//! and length widths (fixed once by the superblock) and the checksum policy.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::checksum::lookup3;
use crate::error::{Error, Result};
use crate::source::ByteSource;

/// A file address read with the configured offset width.
///
/// The all-ones bit pattern of that width is normalized to
/// [`Address::UNDEFINED`], which never compares equal to a real address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u64);

impl Address {
    /// The reserved "no such structure" address.
    pub const UNDEFINED: Address = Address(u64::MAX);

    pub const fn new(raw: u64) -> Self {
        Address(raw)
    }

    /// Interpret `raw` as read from a field `width` bytes wide.
    pub fn from_raw(raw: u64, width: u8) -> Self {
        if raw == all_ones(width) {
            Address::UNDEFINED
        } else {
            Address(raw)
        }
    }

    pub fn is_undefined(self) -> bool {
        self == Address::UNDEFINED
    }

    /// The raw value, or `None` when undefined.
    pub fn get(self) -> Option<u64> {
        (!self.is_undefined()).then_some(self.0)
    }

    /// The raw value, failing with a bounds error when undefined.
    pub fn require(self, context: &'static str) -> Result<u64> {
        self.get().ok_or(Error::UndefinedAddress(context))
    }

    /// Add a byte offset, keeping undefined addresses undefined.
    pub fn offset(self, by: u64) -> Address {
        match self.get() {
            Some(raw) => Address(raw.saturating_add(by)),
            None => self,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(raw) => write!(f, "Address({raw:#x})"),
            None => f.write_str("Address(UNDEFINED)"),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(raw) => write!(f, "{raw:#x}"),
            None => f.write_str("undefined"),
        }
    }
}

/// Returns true if `raw` is the reserved undefined pattern for `width` bytes.
pub fn is_undefined_address(raw: u64, width: u8) -> bool {
    raw == all_ones(width)
}

fn all_ones(width: u8) -> u64 {
    match width {
        0 => 0,
        8.. => u64::MAX,
        w => (1u64 << (u32::from(w) * 8)) - 1,
    }
}

/// File-wide integer widths established by the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldWidths {
    /// Width in bytes of every address field.
    pub offsets: u8,
    /// Width in bytes of every length field.
    pub lengths: u8,
}

impl FieldWidths {
    /// Validate a pair of widths read from disk.
    pub fn new(offsets: u8, lengths: u8) -> Result<Self> {
        for width in [offsets, lengths] {
            if !matches!(width, 2 | 4 | 8) {
                return Err(Error::InvalidFieldWidth(width));
            }
        }
        Ok(FieldWidths { offsets, lengths })
    }
}

/// Positioned reader with a single-slot mark.
pub struct Cursor<S> {
    source: S,
    pos: u64,
    widths: Option<FieldWidths>,
    base: u64,
    mark: Option<u64>,
    strict_checksums: bool,
}

impl<S: ByteSource> Cursor<S> {
    pub fn new(source: S) -> Self {
        Cursor {
            source,
            pos: 0,
            widths: None,
            base: 0,
            mark: None,
            strict_checksums: false,
        }
    }

    /// A cursor whose widths are already known, used for message payloads.
    pub fn with_widths(source: S, widths: FieldWidths) -> Self {
        let mut cursor = Cursor::new(source);
        cursor.widths = Some(widths);
        cursor
    }

    pub(crate) fn set_strict_checksums(&mut self, strict: bool) {
        self.strict_checksums = strict;
    }

    pub(crate) fn strict_checksums(&self) -> bool {
        self.strict_checksums
    }

    /// Fix the address and length widths and the base address.
    ///
    /// # Panics
    ///
    /// If widths were already set; only the superblock parser calls this.
    pub(crate) fn set_widths(&mut self, widths: FieldWidths, base: u64) {
        assert!(
            self.widths.is_none(),
            "field widths are set once per session"
        );
        self.widths = Some(widths);
        self.base = base;
    }

    pub fn widths(&self) -> Result<FieldWidths> {
        self.widths
            .ok_or_else(|| Error::malformed("cursor", "field widths are not established yet"))
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes left between the position and the end of the source.
    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.pos)
    }

    /// Move to an absolute source offset.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Move to a file address, relative to the superblock base.
    pub fn seek_address(&mut self, address: Address, context: &'static str) -> Result<()> {
        let raw = address.require(context)?;
        self.pos = self.base.checked_add(raw).ok_or(Error::OutOfBounds {
            context,
            offset: raw,
            len: 0,
            limit: self.len(),
        })?;
        Ok(())
    }

    /// Absolute source offset of a file address.
    pub fn absolute(&self, address: Address, context: &'static str) -> Result<u64> {
        Ok(self.base.saturating_add(address.require(context)?))
    }

    pub fn skip(&mut self, n: u64) {
        self.pos = self.pos.saturating_add(n);
    }

    /// Remember the position so that [`reset`](Cursor::reset) can return to it.
    ///
    /// # Panics
    ///
    /// If a mark is already outstanding. Nested marks are a programming
    /// error; use [`restoring`](Cursor::restoring) when scopes nest.
    pub fn mark(&mut self) {
        assert!(self.mark.is_none(), "cursor mark is already outstanding");
        self.mark = Some(self.pos);
    }

    /// Return to the marked position and clear the mark.
    ///
    /// # Panics
    ///
    /// If no mark is outstanding.
    pub fn reset(&mut self) {
        let Some(pos) = self.mark.take() else {
            panic!("cursor reset without a mark");
        };
        self.pos = pos;
    }

    /// Run `f` and put the position back afterwards, whatever `f` returns.
    pub fn restoring<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let saved = self.pos;
        let out = f(self);
        self.pos = saved;
        out
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        let limit = self.len();
        match self.pos.checked_add(len) {
            Some(end) if end <= limit => {}
            _ => {
                return Err(Error::OutOfBounds {
                    context: "read",
                    offset: self.pos,
                    len,
                    limit,
                })
            }
        }
        self.source.read_at(self.pos, buf)?;
        self.pos += len;
        Ok(())
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let limit = self.remaining();
        if n as u64 > limit {
            return Err(Error::OutOfBounds {
                context: "read",
                offset: self.pos,
                len: n as u64,
                limit: self.len(),
            });
        }
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Read `len` bytes at an absolute offset without moving.
    pub fn read_span(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.restoring(|c| {
            c.seek(offset);
            c.read_bytes(len)
        })
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.read_array::<2>()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.read_array::<4>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(&self.read_array::<8>()?))
    }

    /// Read an unsigned integer `width` bytes wide (1 to 8).
    pub fn read_uint(&mut self, width: u8) -> Result<u64> {
        match width {
            0 => Ok(0),
            1..=8 => {
                let mut buf = [0u8; 8];
                let slot = &mut buf[..usize::from(width)];
                self.read_into(slot)?;
                Ok(LittleEndian::read_uint(slot, usize::from(width)))
            }
            _ => Err(Error::InvalidFieldWidth(width)),
        }
    }

    /// Read one address field.
    pub fn read_address(&mut self) -> Result<Address> {
        let width = self.widths()?.offsets;
        Ok(Address::from_raw(self.read_uint(width)?, width))
    }

    /// Read one length field.
    pub fn read_length(&mut self) -> Result<u64> {
        let width = self.widths()?.lengths;
        self.read_uint(width)
    }

    /// Look at the next four bytes without consuming them.
    pub fn peek_signature(&mut self) -> Result<[u8; 4]> {
        self.restoring(|c| c.read_array::<4>())
    }

    /// Consume a four-byte signature, failing if it differs from `expected`.
    pub fn ensure_signature(&mut self, expected: &[u8; 4]) -> Result<()> {
        let address = self.pos;
        let found = self.read_array::<4>()?;
        if &found != expected {
            return Err(Error::BadSignature {
                expected: *expected,
                found,
                address,
            });
        }
        Ok(())
    }

    /// Consume a version byte that must equal `expected`.
    pub fn ensure_version(&mut self, structure: &'static str, expected: u8) -> Result<u8> {
        self.read_version(structure, &[expected])
    }

    /// Consume a version byte that must be one of `accepted`.
    pub fn read_version(&mut self, structure: &'static str, accepted: &[u8]) -> Result<u8> {
        let version = self.read_u8()?;
        if !accepted.contains(&version) {
            return Err(Error::UnsupportedVersion { structure, version });
        }
        Ok(version)
    }

    /// Read a stored checksum and compare it with the bytes `[start, position)`.
    ///
    /// A mismatch fails only in strict mode; otherwise it is logged.
    pub fn verify_checksum(&mut self, structure: &'static str, start: u64) -> Result<()> {
        let end = self.pos;
        let covered = usize::try_from(end.saturating_sub(start))
            .map_err(|_| Error::malformed(structure, "checksummed region too large"))?;
        let bytes = self.read_span(start, covered)?;
        let stored = self.read_u32()?;
        self.check_checksum(structure, start, stored, lookup3(&bytes))
    }

    /// Apply the checksum policy to an already computed checksum.
    pub(crate) fn check_checksum(
        &self,
        structure: &'static str,
        address: u64,
        stored: u32,
        computed: u32,
    ) -> Result<()> {
        if stored == computed {
            return Ok(());
        }
        let err = Error::ChecksumMismatch {
            structure,
            address,
            stored,
            computed,
        };
        if self.strict_checksums {
            return Err(err);
        }
        warn!(%err, "continuing past checksum mismatch");
        Ok(())
    }
}
