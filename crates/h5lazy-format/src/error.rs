//! Error types for container decoding.

use crate::structure::StructureKind;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No container signature within the probing range.
    NotAContainer,
    /// Version, signature or size violation in one structure.
    Format,
    /// Checksum mismatch.
    Integrity,
    /// A signature that no known structure carries.
    UnknownStructure,
    /// Offset or length outside the owning region, or an undefined address.
    Bounds,
    /// Failure of the underlying byte source.
    Io,
}

/// Errors produced while decoding a container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container signature not found (probed up to offset {probed_up_to})")]
    NotAContainer { probed_up_to: u64 },

    #[error("unsupported {structure} version {version}")]
    UnsupportedVersion { structure: &'static str, version: u8 },

    #[error(
        "expected signature {} at {address:#x}, found {}",
        show_signature(.expected),
        show_signature(.found)
    )]
    BadSignature {
        expected: [u8; 4],
        found: [u8; 4],
        address: u64,
    },

    #[error("invalid field width {0} (must be 2, 4 or 8)")]
    InvalidFieldWidth(u8),

    #[error("{context}: decoded {consumed} bytes but only {declared} were declared")]
    SizeOverrun {
        context: &'static str,
        declared: u64,
        consumed: u64,
    },

    #[error("object header at {address:#x} declares {declared} messages, found {found}")]
    MissingMessages {
        address: u64,
        declared: u16,
        found: u16,
    },

    #[error("message type {type_code:#06x} in object header at {address:#x} must be understood")]
    UnsupportedMessage { type_code: u16, address: u64 },

    #[error("{0} is not supported by this decoder")]
    Unsupported(&'static str),

    #[error("malformed {structure}: {reason}")]
    Malformed {
        structure: &'static str,
        reason: String,
    },

    #[error("{0:?} cannot be parsed without its owning structure")]
    DetachedStructure(StructureKind),

    #[error("free-space header declares {declared} sections, section list holds {found}")]
    SectionCountMismatch { declared: u64, found: u64 },

    #[error("free-space header tracks {declared} bytes, section list holds {found}")]
    SectionSpaceMismatch { declared: u64, found: u64 },

    #[error("{structure} at {address:#x}: stored checksum {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        structure: &'static str,
        address: u64,
        stored: u32,
        computed: u32,
    },

    #[error("unknown structure signature {} at {address:#x}", show_signature(.signature))]
    UnknownStructure { signature: [u8; 4], address: u64 },

    #[error("{context}: range {offset}+{len} exceeds limit {limit}")]
    OutOfBounds {
        context: &'static str,
        offset: u64,
        len: u64,
        limit: u64,
    },

    #[error("{0}: address is undefined")]
    UndefinedAddress(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::Malformed`].
    pub(crate) fn malformed(structure: &'static str, reason: impl Into<String>) -> Self {
        Error::Malformed {
            structure,
            reason: reason.into(),
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotAContainer { .. } => ErrorKind::NotAContainer,
            Error::UnsupportedVersion { .. }
            | Error::BadSignature { .. }
            | Error::InvalidFieldWidth(_)
            | Error::SizeOverrun { .. }
            | Error::MissingMessages { .. }
            | Error::UnsupportedMessage { .. }
            | Error::Unsupported(_)
            | Error::Malformed { .. }
            | Error::DetachedStructure(_)
            | Error::SectionCountMismatch { .. }
            | Error::SectionSpaceMismatch { .. } => ErrorKind::Format,
            Error::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Error::UnknownStructure { .. } => ErrorKind::UnknownStructure,
            Error::OutOfBounds { .. } | Error::UndefinedAddress(_) => ErrorKind::Bounds,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the session itself is unusable after this error.
    ///
    /// Everything else is fatal only for the structure being read, so the
    /// caller can report that object as unreadable and carry on.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotAContainer | ErrorKind::Io)
    }
}

fn show_signature(sig: &[u8; 4]) -> String {
    sig.escape_ascii().to_string()
}
