//! Helpers for building in-memory drives in unit tests
use crate::device::{RamDisk, SECTOR_SIZE};
use crate::mount::{Drive, FatWidth, FAT_CACHE_SECTORS};

/// Build a mounted drive over a zeroed RAM disk without going through
/// the boot-sector parsers. One sector per cluster, two FAT copies, a
/// 32-entry fixed root directory for FAT12/FAT16.
pub(crate) fn test_drive(width: FatWidth, fat_size: u32, count_of_clusters: u32) -> Drive {
    let root_dir_entries: u16 = match width {
        FatWidth::Fat12 | FatWidth::Fat16 => 32,
        FatWidth::Fat32 => 0,
    };
    let root_dir_sectors = u32::from(root_dir_entries) * 32 / SECTOR_SIZE as u32;

    let fat_begin_sector = 1;
    let after_fats = fat_begin_sector + 2 * fat_size;
    let cluster_begin_sector = after_fats + root_dir_sectors;
    let total_sectors = cluster_begin_sector + count_of_clusters;

    let root_dir_first_sector = match width {
        FatWidth::Fat32 => cluster_begin_sector,
        _ => after_fats,
    };

    Drive {
        device: Box::new(RamDisk::new(total_sectors as usize)),
        letter: 'C',
        width,
        partition_begin_sector: 0,
        fat_size,
        number_of_fats: 2,
        cluster_shift: 0,
        cluster_mask: 0,
        fat_begin_sector,
        root_dir_first_sector,
        root_dir_entries,
        cluster_begin_sector,
        count_of_clusters,
        fat_buf: [0u8; FAT_CACHE_SECTORS * SECTOR_SIZE],
        fat_cached: None,
        fat_dirty: false,
        free_cursor: 2,
        cwd: String::from("C:/"),
    }
}

/// Write raw bytes into the drive's device starting at a sector
pub(crate) fn write_sectors(drive: &mut Drive, first_sector: u32, data: &[u8]) {
    let mut sector = [0u8; SECTOR_SIZE];
    for (n, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
        sector.fill(0);
        sector[..chunk.len()].copy_from_slice(chunk);
        drive
            .device
            .write_sector(first_sector + n as u32, &sector)
            .unwrap();
    }
}
