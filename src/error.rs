use thiserror::Error;

/// Failures that originate in the page-based arena allocator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocError {
    /// Mapping a fresh page (or page range) from the OS failed.
    #[error("failed to map {requested} bytes of anonymous memory")]
    Mmap {
        requested: usize,
        #[source]
        source: std::io::Error,
    },
    /// Growing an existing page-range allocation in place failed, and a
    /// move-and-copy fallback also failed.
    #[error("failed to grow allocation {index} from {old} to {new} bytes")]
    Remap {
        index: u32,
        old: usize,
        new: usize,
        #[source]
        source: std::io::Error,
    },
    /// `reallocate` was asked to grow a bump-allocated (non page-range)
    /// record; those can only shrink in place.
    #[error("allocation {0} is bump-allocated inside a shared page and cannot grow in place")]
    CannotGrowInPlace(u32),
    /// An `AllocationIndex` did not name a live record.
    #[error("allocation index {0} is out of range")]
    InvalidIndex(u32),
    /// A growing `resize`/`free` was attempted on a `Span` with `External`
    /// provenance; only `PoolManaged` spans are arena-owned.
    #[error("operation requires a pool-managed span, not an external one")]
    NotPoolManaged,
}

/// Failures surfaced by the stream codec and the ways encoder/decoder built on
/// top of it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The file's 16-byte header failed validation: either the magic bytes
    /// didn't match, or `crc ^ inv_crc != 0xFFFF_FFFF`.
    #[error("corrupt header: {0}")]
    CorruptHeader(&'static str),

    /// The running CRC32C computed while reading the file body didn't match
    /// the CRC stored in the header.
    #[error("CRC mismatch: header says 0x{expected:08x}, computed 0x{computed:08x}")]
    CrcMismatch { expected: u32, computed: u32 },

    /// A varint-encoded value didn't fit the short-uint/short-int range.
    #[error("value out of range for varint encoding")]
    EncodingOverflow,

    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Couldn't acquire an advisory lock on the backing file.
    #[error("failed to lock the backing file")]
    Lock(#[source] std::io::Error),

    /// A decoder assertion that the virtual cursor matches the next expected
    /// section offset failed, indicating the file is desynchronized.
    #[error("section desync: expected offset {expected}, found {actual}")]
    DesyncAssertion { expected: u32, actual: u32 },

    /// The arena could not satisfy an allocation needed to hold decoded data.
    #[error(transparent)]
    Allocation(#[from] AllocError),
}
