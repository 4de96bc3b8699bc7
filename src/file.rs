//! Sequential file access
//!
//! A [`FileState`] tracks a byte position inside an open file and keeps
//! one data sector cached. Reads are byte granular; crossing a sector
//! boundary follows the cluster chain forward from the cached position,
//! so sequential reads touch each FAT entry once.
use std::io::SeekFrom;

use log::debug;

use crate::device::SECTOR_SIZE;
use crate::directory::DirItem;
use crate::error::FatError;
use crate::mount::Drive;

/// Open for reading
pub const MODE_READ: u8 = 0x01;
/// Open for writing
pub const MODE_WRITE: u8 = 0x02;
/// Fail if the file does not exist
pub const MODE_MUST_EXIST: u8 = 0x04;
/// Truncate on open
pub const MODE_CLEAN: u8 = 0x08;
/// Position at the end of the file on open
pub const MODE_APPEND: u8 = 0x10;
/// Keep existing contents on open
pub const MODE_OPEN: u8 = 0x20;

/// Decode an fopen-style mode string into mode bits
pub fn mode_from_str(mode: &str) -> Option<u8> {
    match mode {
        "r" => Some(MODE_READ | MODE_MUST_EXIST | MODE_OPEN),
        "w" => Some(MODE_WRITE | MODE_CLEAN),
        "a" => Some(MODE_WRITE | MODE_OPEN | MODE_APPEND),
        "r+" => Some(MODE_READ | MODE_WRITE | MODE_MUST_EXIST | MODE_OPEN),
        "w+" => Some(MODE_READ | MODE_WRITE | MODE_CLEAN),
        "a+" => Some(MODE_READ | MODE_WRITE | MODE_OPEN | MODE_APPEND),
        _ => None,
    }
}

/// An open file: its directory entry, a byte position and a one-sector
/// cache
pub struct FileState {
    /// The located directory entry
    pub item: DirItem,
    /// First data sector of the file, zero for an empty file
    pub first_sector: u32,
    /// Current byte position
    pub pointer: u32,
    /// Sector-sized read cache
    pub(crate) buffer: [u8; SECTOR_SIZE],
    /// Absolute sector currently cached, if any
    pub(crate) cached_sector: Option<u32>,
    /// File-relative sector index of the cached sector
    pub(crate) cached_file_sector: Option<u32>,
    /// Mode bits the file was opened with
    pub mode: u8,
}

impl FileState {
    /// Open a located directory entry with the given mode bits.
    ///
    /// Append modes start at the end of the file, everything else at
    /// byte zero.
    pub fn open(drive: &Drive, item: DirItem, mode: u8) -> FileState {
        let first_sector = if item.entry.first_cluster >= 2 {
            drive.cluster_to_sector(item.entry.first_cluster)
        } else {
            0
        };
        let pointer = if mode & MODE_APPEND != 0 {
            item.entry.file_size
        } else {
            0
        };

        debug!(
            "opening {} at byte {} (sector {})",
            item.path, pointer, first_sector
        );

        FileState {
            item,
            first_sector,
            pointer,
            buffer: [0u8; SECTOR_SIZE],
            cached_sector: None,
            cached_file_sector: None,
            mode,
        }
    }

    /// File size from the directory entry
    pub fn size(&self) -> u32 {
        self.item.entry.file_size
    }

    /// Make the cache hold file-relative sector `file_sector`.
    ///
    /// The chain is walked forward from the cached position when
    /// possible, otherwise from the start of the file.
    fn load_file_sector(&mut self, drive: &mut Drive, file_sector: u32) -> Result<(), FatError> {
        if self.cached_file_sector == Some(file_sector) {
            return Ok(());
        }

        let (mut at, mut sector) = match (self.cached_file_sector, self.cached_sector) {
            (Some(at), Some(sector)) if at < file_sector => (at, sector),
            _ => {
                if self.first_sector == 0 {
                    return Err(FatError::Corrupt("file has no data clusters"));
                }
                (0, self.first_sector)
            }
        };

        while at < file_sector {
            match drive.next_sector(sector)? {
                Some(next) => {
                    sector = next;
                    at += 1;
                }
                None => return Err(FatError::Corrupt("cluster chain shorter than file size")),
            }
        }

        drive.device.read_sector(sector, &mut self.buffer)?;
        self.cached_sector = Some(sector);
        self.cached_file_sector = Some(at);

        Ok(())
    }

    /// Read the byte at the current position and advance, or `Ok(None)`
    /// at end of file
    pub fn read_byte(&mut self, drive: &mut Drive) -> Result<Option<u8>, FatError> {
        if self.pointer >= self.size() {
            return Ok(None);
        }

        let file_sector = self.pointer / SECTOR_SIZE as u32;
        self.load_file_sector(drive, file_sector)?;

        let byte = self.buffer[self.pointer as usize % SECTOR_SIZE];
        self.pointer += 1;

        Ok(Some(byte))
    }

    /// Fill as much of `buf` as the file still holds, returning the
    /// number of bytes read
    pub fn read(&mut self, drive: &mut Drive, buf: &mut [u8]) -> Result<usize, FatError> {
        let mut read = 0;
        while read < buf.len() {
            match self.read_byte(drive)? {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }

    /// Read up to and excluding the next newline.
    ///
    /// Returns `Ok(None)` when the position is already at end of file.
    /// Bytes outside UTF-8 are replaced.
    pub fn read_line(&mut self, drive: &mut Drive) -> Result<Option<String>, FatError> {
        let mut line = Vec::new();
        let mut any = false;

        while let Some(byte) = self.read_byte(drive)? {
            any = true;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }

        if !any {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    /// Move the position, bounds checked against the file size
    pub fn seek(&mut self, target: SeekFrom) -> Result<u32, FatError> {
        let size = i64::from(self.size());
        let position = match target {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => i64::from(self.pointer) + offset,
            SeekFrom::End(offset) => size + offset,
        };

        if position < 0 || position > size {
            return Err(FatError::BadSeek);
        }

        self.pointer = position as u32;
        Ok(self.pointer)
    }

    /// The current byte position
    pub fn tell(&self) -> u32 {
        self.pointer
    }
}
