//! Sector-level device access
//!
//! The driver never touches storage except through [`BlockDevice`]:
//! synchronous transfers of one 512-byte sector at an absolute sector
//! number. Two implementations are provided, a disk-image file for
//! host-side use and a RAM-backed device for tests and embedders.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::error::FatError;

/// Fixed physical sector size assumed by every cache in the driver
pub const SECTOR_SIZE: usize = 512;

/// Synchronous whole-sector I/O on an opened device.
///
/// `buf` must be exactly [`SECTOR_SIZE`] bytes. A short transfer or any
/// underlying I/O error is fatal to the current call and is never
/// retried at this layer.
pub trait BlockDevice {
    /// Read the sector at absolute sector number `sector` into `buf`
    fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), FatError>;

    /// Write `buf` to the sector at absolute sector number `sector`
    fn write_sector(&mut self, sector: u32, buf: &[u8]) -> Result<(), FatError>;
}

/// A disk image stored as an ordinary file on the host
pub struct ImageFile {
    file: File,
}

impl ImageFile {
    /// Open a disk-image file for sector I/O
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FatError> {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .or_else(|_| File::open(path))
            .map_err(|source| FatError::Io { sector: 0, source })?;
        debug!("opened device image {}", path.display());
        Ok(ImageFile { file })
    }
}

impl BlockDevice for ImageFile {
    fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), FatError> {
        debug_assert_eq!(buf.len(), SECTOR_SIZE);
        self.file
            .seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|source| FatError::Io { sector, source })
    }

    fn write_sector(&mut self, sector: u32, buf: &[u8]) -> Result<(), FatError> {
        debug_assert_eq!(buf.len(), SECTOR_SIZE);
        self.file
            .seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .and_then(|_| self.file.write_all(buf))
            .map_err(|source| FatError::Io { sector, source })
    }
}

/// A memory-backed device, sized in whole sectors
pub struct RamDisk {
    data: Vec<u8>,
}

impl RamDisk {
    /// Create a zero-filled device holding `sectors` sectors
    pub fn new(sectors: usize) -> Self {
        RamDisk {
            data: vec![0; sectors * SECTOR_SIZE],
        }
    }

    /// Wrap an existing image. The length is rounded up to a whole
    /// number of sectors.
    pub fn from_vec(mut data: Vec<u8>) -> Self {
        let rem = data.len() % SECTOR_SIZE;
        if rem != 0 {
            data.resize(data.len() + SECTOR_SIZE - rem, 0);
        }
        RamDisk { data }
    }

    /// Borrow the raw image bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), FatError> {
        debug_assert_eq!(buf.len(), SECTOR_SIZE);
        let start = sector as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(FatError::OutOfRange(sector));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, buf: &[u8]) -> Result<(), FatError> {
        debug_assert_eq!(buf.len(), SECTOR_SIZE);
        let start = sector as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(FatError::OutOfRange(sector));
        }
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }
}
