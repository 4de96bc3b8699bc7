//! Error type shared by every fallible operation in the crate
use thiserror::Error;

/// Errors reported by the volume driver.
///
/// End-of-file and end-of-enumeration are not errors; those are
/// reported as `Ok(None)` by the operations concerned.
#[derive(Debug, Error)]
pub enum FatError {
    /// The underlying device failed to transfer a whole sector
    #[error("device I/O failed at sector {sector}: {source}")]
    Io {
        /// Absolute sector number of the failed transfer
        sector: u32,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// A sector number beyond the end of the device was requested
    #[error("sector {0} is outside the device")]
    OutOfRange(u32),

    /// The 0x55AA boot signature was missing
    #[error("bad boot signature in sector {0}")]
    BadSignature(u32),

    /// The requested partition does not carry a FAT type code
    #[error("partition {index} has unsupported type code 0x{type_code:02X}")]
    UnsupportedPartition {
        /// Zero-based partition index in the MBR table
        index: u8,
        /// The on-disk partition type code
        type_code: u8,
    },

    /// A partition was requested on a device without a partition table
    #[error("device is not partitioned but partition {0} was requested")]
    NotPartitioned(u8),

    /// The MBR only holds four partition entries
    #[error("partition index {0} out of range")]
    BadPartitionIndex(u8),

    /// The sector cache assumes 512-byte sectors throughout
    #[error("bytes per sector is {0}, only 512 is supported")]
    BadSectorSize(u16),

    /// Sectors-per-cluster must be a power of two for shift/mask maths
    #[error("sectors per cluster {0} is not a power of two")]
    BadClusterSize(u8),

    /// The BPB fields contradict the derived FAT width
    #[error("FAT geometry is internally inconsistent")]
    InconsistentGeometry,

    /// A fixed slot pool (drives, folders or files) is exhausted
    #[error("no free {0} slot")]
    NoFreeSlot(&'static str),

    /// The drive letter has not been mounted
    #[error("no such drive '{0}'")]
    UnknownDrive(char),

    /// Cluster allocation found no free entry in the whole FAT
    #[error("volume is full")]
    DiskFull,

    /// Path navigation failed to locate a component
    #[error("path not found: {0}")]
    NotFound(String),

    /// The handle does not refer to a live pool slot
    #[error("handle is stale or closed")]
    BadHandle,

    /// A seek target fell outside the file
    #[error("seek out of range")]
    BadSeek,

    /// The open-mode string was not recognised
    #[error("unsupported open mode {0:?}")]
    BadMode(String),

    /// An on-disk structure could not be decoded
    #[error("malformed on-disk structure: {0}")]
    Corrupt(&'static str),
}
