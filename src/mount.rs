//! Mounting a FAT volume from a block device
//!
//! A [`Drive`] is built by reading sector 0, deciding whether the device
//! carries a master boot record or is a raw (unpartitioned) volume,
//! decoding the BIOS Parameter Block of the chosen volume and deriving
//! the geometry every other module works from. The FAT width is never
//! trusted from the media label; it is classified from the data-cluster
//! count alone.
use std::fmt::{Display, Formatter, Result as FmtResult};

use log::{debug, warn};
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u24, le_u32, le_u8};
use nom::IResult;

use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::FatError;
use crate::sanity_check::SanityCheck;

/// Boot signature closing the MBR and the BPB sector
pub const BOOT_SIGNATURE: u16 = 0xAA55;

/// OEM label that marks a raw, unpartitioned DOS volume
pub const RAW_VOLUME_OEM: &[u8; 8] = b"MSDOS5.0";

/// MBR partition type codes this driver recognises as FAT
pub const FAT_PARTITION_TYPES: [u8; 5] = [0x01, 0x04, 0x06, 0x0B, 0x0C];

/// Size of the FAT sector cache in sectors.
///
/// Three sectors hold exactly 1024 packed 12-bit entries, so a FAT12
/// cache loaded at a multiple of three never splits an entry across
/// loads. FAT16 and FAT32 use one sector of it.
pub const FAT_CACHE_SECTORS: usize = 3;

/// The FAT entry width, classified from the data-cluster count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatWidth {
    /// 12-bit entries, three bytes per entry pair
    Fat12,
    /// 16-bit little-endian entries
    Fat16,
    /// 32-bit little-endian entries, top four bits reserved
    Fat32,
}

impl FatWidth {
    /// Classify the width from the count of data clusters.
    ///
    /// The thresholds are exclusive: a volume with 4085 data clusters is
    /// already FAT16, one with 65525 is FAT32.
    pub fn classify(count_of_clusters: u32) -> FatWidth {
        if count_of_clusters < 4085 {
            FatWidth::Fat12
        } else if count_of_clusters < 65525 {
            FatWidth::Fat16
        } else {
            FatWidth::Fat32
        }
    }

    /// The value written to terminate a cluster chain
    pub fn end_of_chain(&self) -> u32 {
        match self {
            FatWidth::Fat12 => 0xFFF,
            FatWidth::Fat16 => 0xFFFF,
            FatWidth::Fat32 => 0x0FFF_FFFF,
        }
    }

    /// True if a FAT entry value terminates its chain
    pub fn is_end_of_chain(&self, value: u32) -> bool {
        match self {
            FatWidth::Fat12 => value >= 0xFF8,
            FatWidth::Fat16 => value >= 0xFFF8,
            FatWidth::Fat32 => value >= 0x0FFF_FFF8,
        }
    }
}

impl Display for FatWidth {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FatWidth::Fat12 => write!(f, "FAT12"),
            FatWidth::Fat16 => write!(f, "FAT16"),
            FatWidth::Fat32 => write!(f, "FAT32"),
        }
    }
}

/// One 16-byte entry of the MBR partition table
#[derive(Debug, PartialEq)]
pub struct PartitionEntry {
    /// Boot indicator, 0x80 for the active partition
    pub status: u8,
    /// CHS address of the first sector, kept raw
    pub chs_first: u32,
    /// Partition type code
    pub type_code: u8,
    /// CHS address of the last sector, kept raw
    pub chs_last: u32,
    /// LBA of the partition's first sector
    pub lba_begin: u32,
    /// Number of sectors in the partition
    pub number_of_sectors: u32,
}

impl SanityCheck for PartitionEntry {
    fn check(&self) -> bool {
        (self.status == 0x00 || self.status == 0x80) && self.number_of_sectors > 0
    }
}

impl Display for PartitionEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "type_code: 0x{:02X}, ", self.type_code)?;
        write!(f, "lba_begin: {}, ", self.lba_begin)?;
        write!(f, "number_of_sectors: {}", self.number_of_sectors)
    }
}

/// Parse one MBR partition table entry
pub fn partition_entry_parser(i: &[u8]) -> IResult<&[u8], PartitionEntry> {
    let (i, status) = le_u8(i)?;
    let (i, chs_first) = le_u24(i)?;
    let (i, type_code) = le_u8(i)?;
    let (i, chs_last) = le_u24(i)?;
    let (i, lba_begin) = le_u32(i)?;
    let (i, number_of_sectors) = le_u32(i)?;

    let partition_entry = PartitionEntry {
        status,
        chs_first,
        type_code,
        chs_last,
        lba_begin,
        number_of_sectors,
    };

    Ok((i, partition_entry))
}

/// Fields present only on one side of the FAT16/FAT32 BPB split
#[derive(Debug, PartialEq)]
pub enum BpbTail {
    /// FAT12/FAT16 layout, FAT size taken from the 16-bit field
    Legacy,
    /// FAT32 layout
    Fat32 {
        /// Logical sectors per FAT, 32-bit field
        fat_size_32: u32,
        /// First cluster of the root directory
        root_cluster: u32,
    },
}

/// The BIOS Parameter Block, decoded from offset 11 of the volume's
/// first sector
#[derive(Debug, PartialEq)]
pub struct BiosParameterBlock {
    /// Number of bytes per logical sector, only 512 is supported
    pub bytes_per_sector: u16,
    /// Logical sectors per cluster, a power of two up to 128
    pub sectors_per_cluster: u8,
    /// Count of reserved logical sectors before the first FAT
    pub reserved_sectors: u16,
    /// Number of File Allocation Tables, usually two
    pub number_of_fats: u8,
    /// Maximum number of root directory entries, zero for FAT32
    pub root_directory_entries: u16,
    /// Total logical sectors if the volume fits in 16 bits, else zero
    pub total_sectors_16: u16,
    /// Media descriptor
    pub media_descriptor: u8,
    /// Logical sectors per FAT for FAT12/FAT16, zero for FAT32
    pub fat_size_16: u16,
    /// Total logical sectors when `total_sectors_16` is zero
    pub total_sectors_32: u32,
    /// The FAT32-only continuation, when `fat_size_16` is zero
    pub tail: BpbTail,
}

impl BiosParameterBlock {
    /// Total logical sectors, whichever field holds the real count
    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            u32::from(self.total_sectors_16)
        } else {
            self.total_sectors_32
        }
    }

    /// Logical sectors per FAT, whichever field holds the real count
    pub fn fat_size(&self) -> u32 {
        match self.tail {
            BpbTail::Legacy => u32::from(self.fat_size_16),
            BpbTail::Fat32 { fat_size_32, .. } => fat_size_32,
        }
    }
}

impl SanityCheck for BiosParameterBlock {
    fn check(&self) -> bool {
        if self.number_of_fats == 0 || self.number_of_fats > 2 {
            warn!("implausible number of FATs: {}", self.number_of_fats);
            return false;
        }
        if self.reserved_sectors == 0 {
            warn!("reserved sector count is zero");
            return false;
        }
        if self.fat_size() == 0 {
            warn!("FAT size is zero");
            return false;
        }
        if self.total_sectors() == 0 {
            warn!("total sector count is zero");
            return false;
        }
        true
    }
}

impl Display for BiosParameterBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "bytes_per_sector: {}, ", self.bytes_per_sector)?;
        write!(f, "sectors_per_cluster: {}, ", self.sectors_per_cluster)?;
        write!(f, "reserved_sectors: {}, ", self.reserved_sectors)?;
        write!(f, "number_of_fats: {}, ", self.number_of_fats)?;
        write!(
            f,
            "root_directory_entries: {}, ",
            self.root_directory_entries
        )?;
        write!(f, "media_descriptor: 0x{:X}, ", self.media_descriptor)?;
        write!(f, "fat_size: {}, ", self.fat_size())?;
        write!(f, "total_sectors: {}", self.total_sectors())
    }
}

/// Parse the BIOS Parameter Block.
///
/// The input starts at offset 11 of the volume's first sector, right
/// after the jump instruction and OEM name. The FAT32 continuation is
/// only decoded when the 16-bit FAT size field is zero.
pub fn bios_parameter_block_parser(i: &[u8]) -> IResult<&[u8], BiosParameterBlock> {
    let (i, bytes_per_sector) = le_u16(i)?;
    let (i, sectors_per_cluster) = le_u8(i)?;
    let (i, reserved_sectors) = le_u16(i)?;
    let (i, number_of_fats) = le_u8(i)?;
    let (i, root_directory_entries) = le_u16(i)?;
    let (i, total_sectors_16) = le_u16(i)?;
    let (i, media_descriptor) = le_u8(i)?;
    let (i, fat_size_16) = le_u16(i)?;
    // Sectors per track, number of heads, hidden sectors
    let (i, _) = take(8_usize)(i)?;
    let (i, total_sectors_32) = le_u32(i)?;

    let (i, tail) = if fat_size_16 == 0 {
        let (i, fat_size_32) = le_u32(i)?;
        // Extension flags and filesystem version
        let (i, _) = take(4_usize)(i)?;
        let (i, root_cluster) = le_u32(i)?;
        (
            i,
            BpbTail::Fat32 {
                fat_size_32,
                root_cluster,
            },
        )
    } else {
        (i, BpbTail::Legacy)
    };

    let bios_parameter_block = BiosParameterBlock {
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sectors,
        number_of_fats,
        root_directory_entries,
        total_sectors_16,
        media_descriptor,
        fat_size_16,
        total_sectors_32,
        tail,
    };

    Ok((i, bios_parameter_block))
}

/// A mounted volume: the device plus everything derived from its BPB
pub struct Drive {
    /// The device the volume lives on
    pub(crate) device: Box<dyn BlockDevice>,
    /// Drive letter this volume was mounted as
    pub(crate) letter: char,
    /// FAT entry width, classified from the cluster count
    pub(crate) width: FatWidth,
    /// First sector of the volume on the device
    pub(crate) partition_begin_sector: u32,
    /// Logical sectors per FAT copy
    pub(crate) fat_size: u32,
    /// Number of FAT copies kept in sync on writes
    pub(crate) number_of_fats: u8,
    /// log2 of sectors per cluster
    pub(crate) cluster_shift: u8,
    /// sectors per cluster minus one
    pub(crate) cluster_mask: u32,
    /// Absolute sector of the first FAT copy
    pub(crate) fat_begin_sector: u32,
    /// Absolute sector where the root directory starts
    pub(crate) root_dir_first_sector: u32,
    /// Fixed root directory entry count, zero for FAT32
    pub(crate) root_dir_entries: u16,
    /// Absolute sector of cluster 2
    pub(crate) cluster_begin_sector: u32,
    /// Number of data clusters on the volume
    pub(crate) count_of_clusters: u32,
    /// FAT sector cache, one sector or one FAT12 triad
    pub(crate) fat_buf: [u8; FAT_CACHE_SECTORS * SECTOR_SIZE],
    /// FAT-relative first sector in the cache and how many are loaded
    pub(crate) fat_cached: Option<(u32, u8)>,
    /// The cache holds entries not yet written back
    pub(crate) fat_dirty: bool,
    /// Where the next free-cluster scan resumes
    pub(crate) free_cursor: u32,
    /// Current working directory, `"X:/"` at mount
    pub(crate) cwd: String,
}

impl Display for Drive {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}: {} ", self.letter, self.width)?;
        write!(f, "clusters: {}, ", self.count_of_clusters)?;
        write!(f, "fat_begin: {}, ", self.fat_begin_sector)?;
        write!(f, "root_dir: {}, ", self.root_dir_first_sector)?;
        write!(f, "cluster_begin: {}", self.cluster_begin_sector)
    }
}

fn boot_signature_of(sector: &[u8]) -> u16 {
    u16::from(sector[510]) | (u16::from(sector[511]) << 8)
}

/// Locate the volume's first sector: 0 for a raw volume, otherwise the
/// LBA of the requested MBR partition
fn locate_volume(sector0: &[u8; SECTOR_SIZE], partition: u8) -> Result<u32, FatError> {
    // A raw DOS volume starts with its BPB in sector 0
    if &sector0[3..11] == RAW_VOLUME_OEM {
        debug!("raw volume, OEM name {:?}", RAW_VOLUME_OEM);
        if partition != 0 {
            return Err(FatError::NotPartitioned(partition));
        }
        return Ok(0);
    }

    if boot_signature_of(sector0) != BOOT_SIGNATURE {
        return Err(FatError::BadSignature(0));
    }
    if partition > 3 {
        return Err(FatError::BadPartitionIndex(partition));
    }

    let offset = 446 + usize::from(partition) * 16;
    let (_, entry) = partition_entry_parser(&sector0[offset..offset + 16])
        .map_err(|_| FatError::Corrupt("partition table entry"))?;

    debug!("partition {}: {}", partition, entry);

    if !FAT_PARTITION_TYPES.contains(&entry.type_code) {
        return Err(FatError::UnsupportedPartition {
            index: partition,
            type_code: entry.type_code,
        });
    }
    if !entry.check() {
        return Err(FatError::Corrupt("partition table entry"));
    }

    Ok(entry.lba_begin)
}

/// Mount a volume and derive its geometry.
///
/// `partition` selects an MBR partition entry by index; pass 0 for raw
/// volumes. The drive letter is recorded as given and the working
/// directory starts at the volume root.
pub fn mount_drive(
    letter: char,
    mut device: Box<dyn BlockDevice>,
    partition: u8,
) -> Result<Drive, FatError> {
    let mut sector0 = [0u8; SECTOR_SIZE];
    device.read_sector(0, &mut sector0)?;

    let partition_begin_sector = locate_volume(&sector0, partition)?;

    let mut volume_sector = [0u8; SECTOR_SIZE];
    if partition_begin_sector == 0 {
        volume_sector.copy_from_slice(&sector0);
    } else {
        device.read_sector(partition_begin_sector, &mut volume_sector)?;
    }

    if boot_signature_of(&volume_sector) != BOOT_SIGNATURE {
        return Err(FatError::BadSignature(partition_begin_sector));
    }

    let (_, bpb) = bios_parameter_block_parser(&volume_sector[11..])
        .map_err(|_| FatError::Corrupt("BIOS parameter block"))?;

    debug!("bios_parameter_block: {}", bpb);

    if bpb.bytes_per_sector != SECTOR_SIZE as u16 {
        return Err(FatError::BadSectorSize(bpb.bytes_per_sector));
    }
    if bpb.sectors_per_cluster == 0 || !bpb.sectors_per_cluster.is_power_of_two() {
        return Err(FatError::BadClusterSize(bpb.sectors_per_cluster));
    }
    if !bpb.check() {
        return Err(FatError::Corrupt("BIOS parameter block"));
    }

    let fat_size = bpb.fat_size();
    let cluster_shift = bpb.sectors_per_cluster.trailing_zeros() as u8;
    let cluster_mask = u32::from(bpb.sectors_per_cluster) - 1;

    let fat_begin_sector = partition_begin_sector + u32::from(bpb.reserved_sectors);
    let root_dir_sectors =
        (u32::from(bpb.root_directory_entries) * 32 + SECTOR_SIZE as u32 - 1) / SECTOR_SIZE as u32;
    let after_fats = fat_begin_sector + u32::from(bpb.number_of_fats) * fat_size;
    let cluster_begin_sector = after_fats + root_dir_sectors;

    let data_sectors = bpb
        .total_sectors()
        .saturating_sub(cluster_begin_sector - partition_begin_sector);
    let count_of_clusters = data_sectors >> cluster_shift;

    let width = FatWidth::classify(count_of_clusters);

    // The classified width has to agree with which FAT-size field the
    // volume filled in
    let root_dir_first_sector = match (&width, &bpb.tail) {
        (FatWidth::Fat32, BpbTail::Fat32 { root_cluster, .. }) => {
            if *root_cluster < 2 || *root_cluster >= count_of_clusters + 2 {
                return Err(FatError::Corrupt("FAT32 root cluster out of range"));
            }
            cluster_begin_sector + ((root_cluster - 2) << cluster_shift)
        }
        (FatWidth::Fat12 | FatWidth::Fat16, BpbTail::Legacy) => {
            if bpb.root_directory_entries == 0 {
                return Err(FatError::InconsistentGeometry);
            }
            after_fats
        }
        _ => return Err(FatError::InconsistentGeometry),
    };

    let drive = Drive {
        device,
        letter,
        width,
        partition_begin_sector,
        fat_size,
        number_of_fats: bpb.number_of_fats,
        cluster_shift,
        cluster_mask,
        fat_begin_sector,
        root_dir_first_sector,
        root_dir_entries: bpb.root_directory_entries,
        cluster_begin_sector,
        count_of_clusters,
        fat_buf: [0u8; FAT_CACHE_SECTORS * SECTOR_SIZE],
        fat_cached: None,
        fat_dirty: false,
        free_cursor: 2,
        cwd: format!("{}:/", letter),
    };

    debug!("mounted {}", drive);

    Ok(drive)
}
