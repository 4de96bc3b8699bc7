//! The File Allocation Table itself
//!
//! Entry access goes through a small write-back cache on the [`Drive`].
//! For FAT16 and FAT32 the cache holds one FAT sector. For FAT12 it
//! holds a triad: three aligned sectors, 1536 bytes, exactly 1024 packed
//! 12-bit entries. Because a triad is loaded and flushed as a unit, the
//! two entries of every triad that straddle a sector boundary (entries
//! 341 and 682) are plain in-buffer arithmetic here.
use log::warn;

use crate::device::SECTOR_SIZE;
use crate::error::FatError;
use crate::mount::{Drive, FatWidth, FAT_CACHE_SECTORS};

impl Drive {
    /// Absolute sector of the first sector of a data cluster
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        self.cluster_begin_sector + ((cluster - 2) << self.cluster_shift)
    }

    /// Data cluster containing an absolute sector in the cluster region
    pub fn sector_to_cluster(&self, sector: u32) -> u32 {
        ((sector - self.cluster_begin_sector) >> self.cluster_shift) + 2
    }

    /// Write the cached FAT sectors back to every FAT copy
    pub fn flush_fat(&mut self) -> Result<(), FatError> {
        if !self.fat_dirty {
            return Ok(());
        }
        if let Some((first, sectors)) = self.fat_cached {
            for copy in 0..u32::from(self.number_of_fats) {
                let base = self.fat_begin_sector + copy * self.fat_size + first;
                for s in 0..u32::from(sectors) {
                    let offset = s as usize * SECTOR_SIZE;
                    self.device
                        .write_sector(base + s, &self.fat_buf[offset..offset + SECTOR_SIZE])?;
                }
            }
        }
        self.fat_dirty = false;
        Ok(())
    }

    /// Make the cache hold the unit containing FAT-relative sector
    /// `rel_sector`, flushing the previous unit if it was dirty
    fn load_fat(&mut self, rel_sector: u32) -> Result<(), FatError> {
        let (first, sectors) = match self.width {
            FatWidth::Fat12 => {
                let first = rel_sector / FAT_CACHE_SECTORS as u32 * FAT_CACHE_SECTORS as u32;
                let sectors = (self.fat_size - first).min(FAT_CACHE_SECTORS as u32) as u8;
                (first, sectors)
            }
            FatWidth::Fat16 | FatWidth::Fat32 => (rel_sector, 1),
        };

        if self.fat_cached == Some((first, sectors)) {
            return Ok(());
        }

        self.flush_fat()?;

        for s in 0..u32::from(sectors) {
            let offset = s as usize * SECTOR_SIZE;
            self.device.read_sector(
                self.fat_begin_sector + first + s,
                &mut self.fat_buf[offset..offset + SECTOR_SIZE],
            )?;
        }
        self.fat_cached = Some((first, sectors));

        Ok(())
    }

    fn check_cluster(&self, cluster: u32) -> Result<(), FatError> {
        if cluster < 2 || cluster >= self.count_of_clusters + 2 {
            return Err(FatError::Corrupt("cluster number out of range"));
        }
        Ok(())
    }

    /// Read the FAT entry for a cluster.
    ///
    /// FAT32 entries are masked to their low 28 bits.
    pub fn cluster_entry(&mut self, cluster: u32) -> Result<u32, FatError> {
        self.check_cluster(cluster)?;

        match self.width {
            FatWidth::Fat12 => {
                // Two entries pack into three bytes
                let byte_offset = cluster as usize + cluster as usize / 2;
                self.load_fat(byte_offset as u32 / SECTOR_SIZE as u32)?;
                let idx = byte_offset
                    - self.fat_cached.map_or(0, |(first, _)| first as usize) * SECTOR_SIZE;
                let b0 = u32::from(self.fat_buf[idx]);
                let b1 = u32::from(self.fat_buf[idx + 1]);
                let value = if cluster % 2 == 0 {
                    b0 | ((b1 & 0x0F) << 8)
                } else {
                    ((b0 & 0xF0) >> 4) | (b1 << 4)
                };
                Ok(value)
            }
            FatWidth::Fat16 => {
                self.load_fat(cluster / 256)?;
                let idx = (cluster as usize % 256) * 2;
                Ok(u32::from(u16::from_le_bytes([
                    self.fat_buf[idx],
                    self.fat_buf[idx + 1],
                ])))
            }
            FatWidth::Fat32 => {
                self.load_fat(cluster / 128)?;
                let idx = (cluster as usize % 128) * 4;
                let raw = u32::from_le_bytes([
                    self.fat_buf[idx],
                    self.fat_buf[idx + 1],
                    self.fat_buf[idx + 2],
                    self.fat_buf[idx + 3],
                ]);
                Ok(raw & 0x0FFF_FFFF)
            }
        }
    }

    /// Write the FAT entry for a cluster into the cache.
    ///
    /// The write reaches the device on the next [`Drive::flush_fat`] or
    /// when the cache moves to another unit. FAT32 preserves the
    /// reserved top four bits of the entry.
    pub fn set_cluster_entry(&mut self, cluster: u32, value: u32) -> Result<(), FatError> {
        self.check_cluster(cluster)?;

        match self.width {
            FatWidth::Fat12 => {
                let byte_offset = cluster as usize + cluster as usize / 2;
                self.load_fat(byte_offset as u32 / SECTOR_SIZE as u32)?;
                let idx = byte_offset
                    - self.fat_cached.map_or(0, |(first, _)| first as usize) * SECTOR_SIZE;
                if cluster % 2 == 0 {
                    self.fat_buf[idx] = (value & 0xFF) as u8;
                    self.fat_buf[idx + 1] =
                        (self.fat_buf[idx + 1] & 0xF0) | ((value >> 8) & 0x0F) as u8;
                } else {
                    self.fat_buf[idx] =
                        (self.fat_buf[idx] & 0x0F) | ((value & 0x0F) << 4) as u8;
                    self.fat_buf[idx + 1] = ((value >> 4) & 0xFF) as u8;
                }
            }
            FatWidth::Fat16 => {
                self.load_fat(cluster / 256)?;
                let idx = (cluster as usize % 256) * 2;
                self.fat_buf[idx..idx + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            FatWidth::Fat32 => {
                self.load_fat(cluster / 128)?;
                let idx = (cluster as usize % 128) * 4;
                let old = u32::from_le_bytes([
                    self.fat_buf[idx],
                    self.fat_buf[idx + 1],
                    self.fat_buf[idx + 2],
                    self.fat_buf[idx + 3],
                ]);
                let merged = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
                self.fat_buf[idx..idx + 4].copy_from_slice(&merged.to_le_bytes());
            }
        }
        self.fat_dirty = true;

        Ok(())
    }

    /// Find a free cluster, mark it end-of-chain and return it.
    ///
    /// The scan resumes where the previous allocation stopped and wraps
    /// around once before reporting the volume full.
    pub fn allocate_cluster(&mut self) -> Result<u32, FatError> {
        let limit = self.count_of_clusters + 2;
        let start = self.free_cursor.max(2).min(limit);

        for cluster in (start..limit).chain(2..start) {
            if self.cluster_entry(cluster)? == 0 {
                self.set_cluster_entry(cluster, self.width.end_of_chain())?;
                self.free_cursor = cluster + 1;
                return Ok(cluster);
            }
        }

        Err(FatError::DiskFull)
    }

    /// The absolute sector that follows `sector` in its directory or
    /// file, or `Ok(None)` at the end.
    ///
    /// Sectors below the cluster region belong to a fixed FAT12/FAT16
    /// root directory and step linearly until the region ends. Inside
    /// the cluster region the FAT chain is followed across cluster
    /// boundaries.
    pub fn next_sector(&mut self, sector: u32) -> Result<Option<u32>, FatError> {
        if sector < self.cluster_begin_sector {
            let next = sector + 1;
            if next < self.cluster_begin_sector {
                return Ok(Some(next));
            }
            return Ok(None);
        }

        // Still inside the same cluster
        if (sector + 1 - self.cluster_begin_sector) & self.cluster_mask != 0 {
            return Ok(Some(sector + 1));
        }

        let cluster = self.sector_to_cluster(sector);
        let entry = self.cluster_entry(cluster)?;

        if self.width.is_end_of_chain(entry) {
            return Ok(None);
        }
        if entry < 2 || entry >= self.count_of_clusters + 2 {
            warn!(
                "cluster {} chains to invalid entry 0x{:X}, ending chain",
                cluster, entry
            );
            return Ok(None);
        }

        Ok(Some(self.cluster_to_sector(entry)))
    }
}
