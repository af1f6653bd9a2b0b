//! Session configuration.

/// Options controlling how a container is opened and decoded.
///
/// ```
/// use h5lazy_format::OpenOptions;
///
/// let opts = OpenOptions::new().strict_checksums(true).max_probe_offset(4096);
/// assert!(opts.strict);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Treat checksum mismatches as errors instead of warnings.
    pub strict: bool,
    /// Highest offset probed for the container signature. `None` probes the whole source.
    pub probe_limit: Option<u64>,
    /// Upper bound on continuation chunks followed per object header.
    pub continuation_limit: usize,
    /// Decode the driver information block when the superblock points at one.
    pub driver_info: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            strict: false,
            probe_limit: None,
            continuation_limit: 1024,
            driver_info: true,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on checksum mismatches.
    pub fn strict_checksums(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Stop probing for the signature past `offset`.
    pub fn max_probe_offset(mut self, offset: u64) -> Self {
        self.probe_limit = Some(offset);
        self
    }

    /// Bound the continuation chunks followed per object header.
    pub fn max_continuation_chunks(mut self, limit: usize) -> Self {
        self.continuation_limit = limit;
        self
    }

    /// Skip or decode the driver information block.
    pub fn read_driver_info(mut self, enabled: bool) -> Self {
        self.driver_info = enabled;
        self
    }
}
