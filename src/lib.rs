#![warn(missing_docs)]
#![warn(unsafe_code)]
//! FAT12/FAT16/FAT32 volume driver
//!
//! Mount a block device, browse its directories with VFAT long names
//! and read files sequentially. The [`volume::Volumes`] type is the
//! intended entry point; the engine modules underneath are public for
//! callers that want to work with a single drive directly.
use log::error;

/// Sector-level device access
pub mod device;

/// Error type shared across the crate
pub mod error;

/// SanityCheck trait
pub mod sanity_check;

/// Mounting and volume geometry
pub mod mount;

/// The File Allocation Table itself
pub mod fat;

/// Directory enumeration and path navigation
pub mod directory;

/// Sequential file access
pub mod file;

/// Slot pools and opaque handles, the public API surface
pub mod volume;

#[cfg(test)]
pub(crate) mod testutil;

/// Initialize the module.
/// This should be called before any parsing is performed.
/// Panics on failure or if there are any incompatibilities.
pub fn init() {
    // If we're on a system with a usize < 32 bits, fail
    // FAT32 sector arithmetic needs at least 32-bit indexing
    if usize::BITS < 32 {
        error!(
            "Architecture usize {} is too small for this library",
            usize::BITS
        );
        panic!(
            "Architecture usize {} is too small for this library",
            usize::BITS
        );
    }
}
