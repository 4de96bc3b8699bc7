//! End-to-end tests over a hand-built FAT12 volume image
//!
//! The image is a 64-sector raw volume: boot sector, two 3-sector FAT
//! copies, a 2-sector root directory and data clusters from sector 9,
//! one sector per cluster. The root holds a subdirectory and a file
//! with a VFAT long name; the subdirectory holds a 1300-byte file
//! spanning three clusters.
use std::io::SeekFrom;

use fat_volume::device::RamDisk;
use fat_volume::directory::short_name_checksum;
use fat_volume::error::FatError;
use fat_volume::volume::Volumes;

const SECTOR: usize = 512;
const CLUSTER_BEGIN: usize = 9;
const FILE_SIZE: u32 = 1300;

fn sector_of(cluster: usize) -> usize {
    CLUSTER_BEGIN + cluster - 2
}

/// Pack a 12-bit value into the FAT at an entry index
fn set_fat12(fat: &mut [u8], entry: usize, value: u16) {
    let offset = entry + entry / 2;
    if entry % 2 == 0 {
        fat[offset] = (value & 0xFF) as u8;
        fat[offset + 1] = (fat[offset + 1] & 0xF0) | ((value >> 8) & 0x0F) as u8;
    } else {
        fat[offset] = (fat[offset] & 0x0F) | ((value & 0x0F) << 4) as u8;
        fat[offset + 1] = (value >> 4) as u8;
    }
}

fn short_entry(raw_name: &[u8; 11], attributes: u8, cluster: u16, size: u32) -> [u8; 32] {
    let mut slot = [0u8; 32];
    slot[..11].copy_from_slice(raw_name);
    slot[11] = attributes;
    slot[26..28].copy_from_slice(&cluster.to_le_bytes());
    slot[28..32].copy_from_slice(&size.to_le_bytes());
    slot
}

fn lfn_slot(ordinal: u8, checksum: u8, text: &str, last: bool) -> [u8; 32] {
    let mut units = [0xFFFFu16; 13];
    let encoded: Vec<u16> = text.encode_utf16().collect();
    units[..encoded.len()].copy_from_slice(&encoded);
    if last && encoded.len() < 13 {
        units[encoded.len()] = 0;
    }

    let mut slot = [0u8; 32];
    slot[0] = ordinal;
    slot[11] = 0x0F;
    slot[13] = checksum;
    for (n, unit) in units.iter().enumerate() {
        let offset = match n {
            0..=4 => 1 + n * 2,
            5..=10 => 14 + (n - 5) * 2,
            _ => 28 + (n - 11) * 2,
        };
        slot[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
    }
    slot
}

/// Build the whole test volume
fn build_image() -> Vec<u8> {
    let mut image = vec![0u8; 64 * SECTOR];

    // Boot sector: raw-volume OEM name and a FAT12 BPB
    image[3..11].copy_from_slice(b"MSDOS5.0");
    image[11] = 0x00; // bytes per sector, 512
    image[12] = 0x02;
    image[13] = 1; // sectors per cluster
    image[14] = 1; // reserved sectors
    image[16] = 2; // FAT copies
    image[17] = 32; // root directory entries
    image[19] = 64; // total sectors
    image[21] = 0xF8; // media descriptor
    image[22] = 3; // sectors per FAT
    image[510] = 0x55;
    image[511] = 0xAA;

    // FAT: reserved entries, DIR1 at cluster 2, FILE.TXT spanning
    // 3 -> 4 -> 5, the long-named file at cluster 6
    let mut fat = vec![0u8; 3 * SECTOR];
    set_fat12(&mut fat, 0, 0xFF8);
    set_fat12(&mut fat, 1, 0xFFF);
    set_fat12(&mut fat, 2, 0xFFF);
    set_fat12(&mut fat, 3, 4);
    set_fat12(&mut fat, 4, 5);
    set_fat12(&mut fat, 5, 0xFFF);
    set_fat12(&mut fat, 6, 0xFFF);
    image[SECTOR..4 * SECTOR].copy_from_slice(&fat);
    image[4 * SECTOR..7 * SECTOR].copy_from_slice(&fat);

    // Root directory, sector 7
    let mut root = Vec::new();
    root.extend_from_slice(&short_entry(b"DIR1       ", 0x10, 2, 0));
    let raw_name = *b"TESTFI~1TXT";
    let checksum = short_name_checksum(&raw_name);
    root.extend_from_slice(&lfn_slot(0x42, checksum, "e.txt", true));
    root.extend_from_slice(&lfn_slot(0x01, checksum, "Test File Nam", false));
    let long_file_text = b"long name works\nsecond line\n";
    root.extend_from_slice(&short_entry(&raw_name, 0x20, 6, long_file_text.len() as u32));
    image[7 * SECTOR..7 * SECTOR + root.len()].copy_from_slice(&root);

    // DIR1 at cluster 2: dot entries plus FILE.TXT
    let mut dir1 = Vec::new();
    dir1.extend_from_slice(&short_entry(b".          ", 0x10, 2, 0));
    dir1.extend_from_slice(&short_entry(b"..         ", 0x10, 0, 0));
    dir1.extend_from_slice(&short_entry(b"FILE    TXT", 0x20, 3, FILE_SIZE));
    let dir1_sector = sector_of(2) * SECTOR;
    image[dir1_sector..dir1_sector + dir1.len()].copy_from_slice(&dir1);

    // FILE.TXT data, patterned bytes across clusters 3, 4 and 5
    let file_start = sector_of(3) * SECTOR;
    for n in 0..FILE_SIZE as usize {
        image[file_start + n] = (n % 251) as u8;
    }

    // The long-named file at cluster 6
    let text_start = sector_of(6) * SECTOR;
    image[text_start..text_start + long_file_text.len()].copy_from_slice(long_file_text);

    image
}

fn mounted() -> Volumes {
    let mut volumes = Volumes::new();
    volumes
        .mount('C', Box::new(RamDisk::from_vec(build_image())), 0)
        .unwrap();
    volumes
}

#[test]
fn mount_is_idempotent() {
    let mut volumes = mounted();

    // A second mount of the same letter succeeds without a device
    let empty = RamDisk::new(1);
    volumes.mount('C', Box::new(empty), 0).unwrap();

    // The original volume is still the one mounted
    let file = volumes.open("C:/DIR1/FILE.TXT", "r").unwrap();
    assert_eq!(volumes.file_size(file).unwrap(), FILE_SIZE);
}

#[test]
fn read_spans_cluster_chain_to_eof() {
    let mut volumes = mounted();

    let file = volumes.open("C:/DIR1/FILE.TXT", "r").unwrap();

    let mut count = 0u32;
    while let Some(byte) = volumes.read_byte(file).unwrap() {
        assert_eq!(byte, (count % 251) as u8);
        count += 1;
    }

    // Byte count equals the directory entry's size field
    assert_eq!(count, FILE_SIZE);
    assert!(volumes.read_byte(file).unwrap().is_none());
}

#[test]
fn long_names_are_reconstructed() {
    let mut volumes = mounted();

    let folder = volumes.open_folder("C:/").unwrap();

    let mut names = Vec::new();
    while let Some(item) = volumes.next_item(folder).unwrap() {
        names.push(volumes.long_name(item).unwrap().to_string());
        volumes.close(item).unwrap();
    }

    assert_eq!(names, vec!["DIR1", "Test File Name.txt"]);

    // The file opens by long name, case-insensitively, and by its
    // short alias
    let by_long = volumes.open("C:/test file name.TXT", "r").unwrap();
    assert_eq!(
        volumes.read_line(by_long).unwrap().unwrap(),
        "long name works"
    );
    volumes.close(by_long).unwrap();

    let by_short = volumes.open("C:/TESTFI~1.TXT", "r").unwrap();
    assert_eq!(volumes.long_path(by_short).unwrap(), "C:/Test File Name.txt");
}

#[test]
fn corrupt_lfn_checksums_keep_the_long_name() {
    // Flip the checksum byte of each fragment in turn; slot offsets 1
    // and 2 of root sector 7 hold the two fragments, byte 13 is the
    // checksum
    for slot_index in [1usize, 2] {
        let mut image = build_image();
        image[7 * SECTOR + slot_index * 32 + 13] ^= 0xFF;

        let mut volumes = Volumes::new();
        volumes
            .mount('C', Box::new(RamDisk::from_vec(image)), 0)
            .unwrap();

        let folder = volumes.open_folder("C:/").unwrap();
        let mut names = Vec::new();
        while let Some(item) = volumes.next_item(folder).unwrap() {
            names.push(volumes.long_name(item).unwrap().to_string());
            volumes.close(item).unwrap();
        }

        assert_eq!(names, vec!["DIR1", "Test File Name.txt"]);
    }
}

#[test]
fn folder_navigation_works() {
    let mut volumes = mounted();

    let folder = volumes.open_folder("C:/").unwrap();

    // "." stays in place
    volumes.change_folder(folder, ".").unwrap();
    assert_eq!(volumes.folder_path(folder).unwrap(), "C:/");

    volumes.change_folder(folder, "DIR1").unwrap();
    assert_eq!(volumes.folder_path(folder).unwrap(), "C:/DIR1/");

    // ".." returns to the root through the literal directory entry
    volumes.change_folder(folder, "..").unwrap();
    assert_eq!(volumes.folder_path(folder).unwrap(), "C:/");

    let missing = volumes.change_folder(folder, "NOPE");
    assert!(matches!(missing, Err(FatError::NotFound(_))));

    // The failed descent leaves the folder usable where it was
    let item = volumes.next_item(folder).unwrap().unwrap();
    assert_eq!(volumes.long_name(item).unwrap(), "DIR1");
}

#[test]
fn relative_paths_resolve_against_cwd() {
    let mut volumes = mounted();
    volumes.set_default_drive('C').unwrap();

    let file = volumes.open("DIR1/FILE.TXT", "r").unwrap();
    assert_eq!(volumes.long_path(file).unwrap(), "C:/DIR1/FILE.TXT");

    let folder = volumes.open_folder("DIR1").unwrap();
    assert_eq!(volumes.folder_path(folder).unwrap(), "C:/DIR1/");
}

#[test]
fn backslash_separators_are_accepted() {
    let mut volumes = mounted();

    let file = volumes.open("C:\\DIR1\\FILE.TXT", "r").unwrap();
    assert_eq!(volumes.long_path(file).unwrap(), "C:/DIR1/FILE.TXT");
}

#[test]
fn seek_and_tell_work_through_handles() {
    let mut volumes = mounted();

    let file = volumes.open("C:/DIR1/FILE.TXT", "r").unwrap();

    assert_eq!(volumes.seek(file, SeekFrom::Start(1024)).unwrap(), 1024);
    assert_eq!(
        volumes.read_byte(file).unwrap().unwrap(),
        (1024 % 251) as u8
    );
    assert_eq!(volumes.tell(file).unwrap(), 1025);

    assert_eq!(volumes.seek(file, SeekFrom::End(0)).unwrap(), FILE_SIZE);
    assert!(matches!(
        volumes.seek(file, SeekFrom::End(1)),
        Err(FatError::BadSeek)
    ));
}

#[test]
fn missing_files_are_reported() {
    let mut volumes = mounted();

    assert!(matches!(
        volumes.open("C:/DIR1/MISSING.TXT", "r"),
        Err(FatError::NotFound(_))
    ));
    assert!(matches!(
        volumes.open_folder("C:/NOWHERE"),
        Err(FatError::NotFound(_))
    ));
    assert!(matches!(
        volumes.open("Z:/FILE.TXT", "r"),
        Err(FatError::UnknownDrive('Z'))
    ));
}
