//! Directory enumeration and path navigation
//!
//! A directory is a chain of sectors holding 32-byte slots. A slot is
//! free, an end-of-directory marker, a VFAT long-name fragment or a
//! short 8.3 entry. Enumeration walks a [`DirCursor`] slot by slot,
//! collecting long-name fragments until the short entry that owns them
//! arrives, then yields a [`DirItem`] with the reconstructed name (or a
//! name synthesized from the 8.3 field when no fragments are present).
use std::char::decode_utf16;
use std::fmt::{Display, Formatter, Result as FmtResult};

use log::{debug, warn};
use nom::bytes::complete::take;
use nom::error::ErrorKind;
use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::{Err, IResult};
use time::{Date, Month, Time};

use crate::device::SECTOR_SIZE;
use crate::error::FatError;
use crate::mount::Drive;

/// Read-only attribute bit
pub const ATTR_READ_ONLY: u8 = 0x01;
/// Hidden attribute bit
pub const ATTR_HIDDEN: u8 = 0x02;
/// System attribute bit
pub const ATTR_SYSTEM: u8 = 0x04;
/// Volume-label attribute bit
pub const ATTR_VOLUME_LABEL: u8 = 0x08;
/// Directory attribute bit
pub const ATTR_DIRECTORY: u8 = 0x10;
/// Archive attribute bit
pub const ATTR_ARCHIVE: u8 = 0x20;
/// All four low attribute bits together mark a long-name fragment
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// NT reserved-byte flag: the base name is stored lowercase
pub const NT_LOWERCASE_NAME: u8 = 0x08;
/// NT reserved-byte flag: the extension is stored lowercase
pub const NT_LOWERCASE_EXTENSION: u8 = 0x10;

/// Directory slots per sector
pub const SLOTS_PER_SECTOR: usize = SECTOR_SIZE / 32;

/// A short 8.3 directory entry, decoded from one 32-byte slot
#[derive(Clone, Debug, PartialEq)]
pub struct ShortEntry {
    /// The raw name field, 8 name bytes then 3 extension bytes,
    /// space padded
    pub raw_name: [u8; 11],
    /// File attribute bits
    pub attributes: u8,
    /// NT reserved byte, carries the lowercase flags
    pub nt_reserved: u8,
    /// Creation time, `None` when the field is zero or invalid
    pub create_time: Option<Time>,
    /// Creation date
    pub create_date: Option<Date>,
    /// Last access date
    pub access_date: Option<Date>,
    /// Last write time
    pub write_time: Option<Time>,
    /// Last write date
    pub write_date: Option<Date>,
    /// First cluster of the entry's data, high half joined from the
    /// FAT32 field
    pub first_cluster: u32,
    /// File size in bytes, zero for directories
    pub file_size: u32,
}

/// One VFAT long-name fragment slot
#[derive(Clone, Debug, PartialEq)]
pub struct LfnFragment {
    /// Sequence byte; bit 0x40 marks the final (first-stored) fragment
    pub ordinal: u8,
    /// Checksum of the owning short entry's raw name
    pub checksum: u8,
    /// The fragment's 13 UTF-16 units
    pub units: [u16; 13],
}

/// Classification of one 32-byte directory slot
#[derive(Debug, PartialEq)]
pub enum DirEntrySlot {
    /// Deleted entry, skip and keep scanning
    Free,
    /// First byte zero: no further entries in this directory
    EndOfDirectory,
    /// A long-name fragment
    LongName(LfnFragment),
    /// A short 8.3 entry
    Short(ShortEntry),
}

/// Parse one 32-byte directory slot
pub fn dir_entry_parser(i: &[u8]) -> IResult<&[u8], DirEntrySlot> {
    if i.len() < 32 {
        return Err(Err::Error(nom::error_position!(i, ErrorKind::Eof)));
    }
    if i[0] == 0x00 {
        let (i, _) = take(32_usize)(i)?;
        return Ok((i, DirEntrySlot::EndOfDirectory));
    }
    if i[0] == 0xE5 {
        let (i, _) = take(32_usize)(i)?;
        return Ok((i, DirEntrySlot::Free));
    }

    if i[11] & ATTR_LONG_NAME == ATTR_LONG_NAME {
        let (i, ordinal) = le_u8(i)?;
        let mut units = [0u16; 13];
        let (i, first) = take(10_usize)(i)?;
        let (i, _attributes) = le_u8(i)?;
        let (i, _entry_type) = le_u8(i)?;
        let (i, checksum) = le_u8(i)?;
        let (i, middle) = take(12_usize)(i)?;
        let (i, _first_cluster) = le_u16(i)?;
        let (i, last) = take(4_usize)(i)?;

        for (n, pair) in first
            .chunks_exact(2)
            .chain(middle.chunks_exact(2))
            .chain(last.chunks_exact(2))
            .enumerate()
        {
            units[n] = u16::from_le_bytes([pair[0], pair[1]]);
        }

        return Ok((
            i,
            DirEntrySlot::LongName(LfnFragment {
                ordinal,
                checksum,
                units,
            }),
        ));
    }

    let (i, raw_name_bytes) = take(11_usize)(i)?;
    let mut raw_name = [0u8; 11];
    raw_name.copy_from_slice(raw_name_bytes);

    let (i, attributes) = le_u8(i)?;
    let (i, nt_reserved) = le_u8(i)?;
    let (i, _create_time_tenths) = le_u8(i)?;
    let (i, create_time) = le_u16(i)?;
    let create_time = parse_dos_time(create_time);
    let (i, create_date) = le_u16(i)?;
    let create_date = parse_dos_date(create_date);
    let (i, access_date) = le_u16(i)?;
    let access_date = parse_dos_date(access_date);
    let (i, first_cluster_high) = le_u16(i)?;
    let (i, write_time) = le_u16(i)?;
    let write_time = parse_dos_time(write_time);
    let (i, write_date) = le_u16(i)?;
    let write_date = parse_dos_date(write_date);
    let (i, first_cluster_low) = le_u16(i)?;
    let (i, file_size) = le_u32(i)?;

    let short_entry = ShortEntry {
        raw_name,
        attributes,
        nt_reserved,
        create_time,
        create_date,
        access_date,
        write_time,
        write_date,
        first_cluster: (u32::from(first_cluster_high) << 16) | u32::from(first_cluster_low),
        file_size,
    };

    Ok((i, DirEntrySlot::Short(short_entry)))
}

/// Checksum of an 8.3 raw name, as stored in every long-name fragment
/// of the entry.
///
/// # Examples
///
/// ```
/// use fat_volume::directory::short_name_checksum;
///
/// assert_eq!(short_name_checksum(b"README  TXT"), 0x73);
/// ```
pub fn short_name_checksum(raw_name: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for byte in raw_name {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(*byte);
    }
    sum
}

/// Build a display name from an 8.3 raw name field.
///
/// Trailing pad spaces are trimmed from both halves, the dot is omitted
/// when there is no extension, a leading 0x05 byte is restored to 0xE5,
/// and the NT lowercase flags are honoured.
pub fn synthesize_long_name(raw_name: &[u8; 11], nt_reserved: u8) -> String {
    let mut name_bytes = raw_name[..8].to_vec();
    if name_bytes[0] == 0x05 {
        name_bytes[0] = 0xE5;
    }

    let mut name: String = name_bytes
        .iter()
        .map(|b| char::from(*b))
        .collect::<String>()
        .trim_end_matches(' ')
        .to_string();
    let mut extension: String = raw_name[8..]
        .iter()
        .map(|b| char::from(*b))
        .collect::<String>()
        .trim_end_matches(' ')
        .to_string();

    if nt_reserved & NT_LOWERCASE_NAME != 0 {
        name = name.to_ascii_lowercase();
    }
    if nt_reserved & NT_LOWERCASE_EXTENSION != 0 {
        extension = extension.to_ascii_lowercase();
    }

    if !extension.is_empty() {
        name.push('.');
        name.push_str(&extension);
    }

    name
}

/// Collects long-name fragments until the short entry that owns them
/// arrives
struct LongNameBuffer {
    units: [u16; 260],
    checksum: Option<u8>,
}

impl LongNameBuffer {
    fn new() -> Self {
        LongNameBuffer {
            units: [0u16; 260],
            checksum: None,
        }
    }

    fn reset(&mut self) {
        self.units.fill(0);
        self.checksum = None;
    }

    /// Store a fragment's units at its sequence position
    fn absorb(&mut self, fragment: &LfnFragment) {
        if fragment.ordinal & 0x40 != 0 {
            // Final fragment arrives first on disk, start fresh
            self.reset();
            self.checksum = Some(fragment.checksum);
        } else {
            match self.checksum {
                Some(checksum) if checksum != fragment.checksum => {
                    warn!(
                        "long name fragment checksum 0x{:02X} disagrees with 0x{:02X}",
                        fragment.checksum, checksum
                    );
                }
                Some(_) => {}
                None => self.checksum = Some(fragment.checksum),
            }
        }

        let position = usize::from(fragment.ordinal & 0x3F);
        if position == 0 || position > 20 {
            warn!("long name fragment with bad ordinal 0x{:02X}", fragment.ordinal);
            return;
        }
        let offset = (position - 1) * 13;
        self.units[offset..offset + 13].copy_from_slice(&fragment.units);
    }

    /// Hand over the reconstructed name for a short entry, or `None`
    /// when no fragments were collected. A checksum that disagrees
    /// with the short entry is logged; the best-effort name is still
    /// returned.
    fn take(&mut self, entry: &ShortEntry) -> Option<String> {
        let checksum = self.checksum?;

        if checksum != short_name_checksum(&entry.raw_name) {
            warn!(
                "long name checksum 0x{:02X} does not match its short entry",
                checksum
            );
        }

        let length = self
            .units
            .iter()
            .position(|u| *u == 0x0000 || *u == 0xFFFF)
            .unwrap_or(self.units.len());
        let name: String = decode_utf16(self.units[..length].iter().copied())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();

        self.reset();
        Some(name)
    }
}

/// A position inside a directory, with a one-sector read cache
pub struct DirCursor {
    /// First sector of the directory being enumerated
    pub(crate) start_sector: u32,
    /// Sector the cursor currently points into
    pub(crate) sector: u32,
    /// Slot index inside the current sector
    pub(crate) slot: usize,
    /// Sector-sized read cache
    pub(crate) buffer: [u8; SECTOR_SIZE],
    /// Which sector the cache holds, if any
    pub(crate) sector_in_buffer: Option<u32>,
    /// Accumulated path of the directory, always slash terminated
    pub(crate) path: String,
}

impl DirCursor {
    /// A cursor on the root directory of a drive
    pub fn root(drive: &Drive) -> DirCursor {
        DirCursor {
            start_sector: drive.root_dir_first_sector,
            sector: drive.root_dir_first_sector,
            slot: 0,
            buffer: [0u8; SECTOR_SIZE],
            sector_in_buffer: None,
            path: format!("{}:/", drive.letter),
        }
    }

    /// Rewind to the first slot of the directory
    pub fn reset(&mut self) {
        self.sector = self.start_sector;
        self.slot = 0;
    }

    /// The directory's accumulated path
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// One located directory entry with its display name and full path
#[derive(Clone, Debug)]
pub struct DirItem {
    /// The decoded short entry
    pub entry: ShortEntry,
    /// Long name when fragments were present, else the synthesized
    /// 8.3 name
    pub name: String,
    /// Full path of the entry including the drive letter
    pub path: String,
}

impl DirItem {
    /// True for subdirectory entries (volume labels excluded)
    pub fn is_directory(&self) -> bool {
        self.entry.attributes & (ATTR_DIRECTORY | ATTR_VOLUME_LABEL) == ATTR_DIRECTORY
    }

    /// True for plain file entries
    pub fn is_regular_file(&self) -> bool {
        self.entry.attributes & (ATTR_DIRECTORY | ATTR_VOLUME_LABEL) == 0
    }

    /// Case-insensitive match against the long or the 8.3 name
    pub fn matches(&self, name: &str) -> bool {
        if self.name.eq_ignore_ascii_case(name) {
            return true;
        }
        synthesize_long_name(&self.entry.raw_name, self.entry.nt_reserved)
            .eq_ignore_ascii_case(name)
    }

    /// Attribute bits as a six-letter flag string
    pub fn flag_string(&self) -> String {
        let attributes = self.entry.attributes;
        let mut flags = String::with_capacity(6);
        flags.push(if attributes & ATTR_READ_ONLY != 0 { 'R' } else { '-' });
        flags.push(if attributes & ATTR_HIDDEN != 0 { 'H' } else { '-' });
        flags.push(if attributes & ATTR_SYSTEM != 0 { 'S' } else { '-' });
        flags.push(if attributes & ATTR_VOLUME_LABEL != 0 { 'V' } else { '-' });
        flags.push(if attributes & ATTR_DIRECTORY != 0 { 'D' } else { '-' });
        flags.push(if attributes & ATTR_ARCHIVE != 0 { 'A' } else { '-' });
        flags
    }
}

/// Display an attribute that may be a reserved option.
/// In this case, draw a time that may be reserved.
pub fn reserved_time_display(option: Option<Time>) -> String {
    match option {
        Some(s) => format!("{}", s),
        None => "reserved".to_string(),
    }
}

/// Display an attribute that may be a reserved option.
/// In this case, draw a date that may be reserved.
pub fn reserved_date_display(option: Option<Date>) -> String {
    match option {
        Some(s) => format!("{}", s),
        None => "reserved".to_string(),
    }
}

impl Display for DirItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} ", reserved_date_display(self.entry.write_date))?;
        write!(f, "{} ", reserved_time_display(self.entry.write_time))?;
        write!(f, "{} ", self.flag_string())?;
        write!(f, "{:>10} ", self.entry.file_size)?;
        write!(f, "0x{:<8X} ", self.entry.first_cluster)?;
        write!(f, "{}", self.name)
    }
}

/// Yield the next live entry of the directory, or `Ok(None)` at the
/// end.
///
/// Long-name fragments are collected along the way and attached to the
/// short entry they belong to; a checksum mismatch is logged and the
/// best-effort reconstructed name is kept.
pub fn next_item(drive: &mut Drive, cursor: &mut DirCursor) -> Result<Option<DirItem>, FatError> {
    let mut long_name = LongNameBuffer::new();

    loop {
        if cursor.slot >= SLOTS_PER_SECTOR {
            match drive.next_sector(cursor.sector)? {
                Some(next) => {
                    cursor.sector = next;
                    cursor.slot = 0;
                }
                None => return Ok(None),
            }
        }

        if cursor.sector_in_buffer != Some(cursor.sector) {
            drive.device.read_sector(cursor.sector, &mut cursor.buffer)?;
            cursor.sector_in_buffer = Some(cursor.sector);
        }

        let offset = cursor.slot * 32;
        let (_, slot) = dir_entry_parser(&cursor.buffer[offset..offset + 32])
            .map_err(|_| FatError::Corrupt("directory entry"))?;
        cursor.slot += 1;

        match slot {
            DirEntrySlot::EndOfDirectory => return Ok(None),
            DirEntrySlot::Free => {
                long_name.reset();
            }
            DirEntrySlot::LongName(fragment) => {
                long_name.absorb(&fragment);
            }
            DirEntrySlot::Short(entry) => {
                let name = long_name
                    .take(&entry)
                    .unwrap_or_else(|| synthesize_long_name(&entry.raw_name, entry.nt_reserved));
                let path = format!("{}{}", cursor.path, name);
                debug!("directory entry: {} at cluster {}", name, entry.first_cluster);
                return Ok(Some(DirItem { entry, name, path }));
            }
        }
    }
}

/// Move the cursor into a child directory by name.
///
/// `"."` is a no-op. A failed lookup rewinds the cursor but leaves the
/// directory it points at unchanged, and reports the missing name.
pub fn change_to_child(
    drive: &mut Drive,
    cursor: &mut DirCursor,
    name: &str,
) -> Result<(), FatError> {
    if name == "." {
        return Ok(());
    }

    cursor.reset();

    while let Some(item) = next_item(drive, cursor)? {
        if item.is_directory() && item.matches(name) {
            // A ".." entry with cluster zero points back at the root
            cursor.start_sector = if item.entry.first_cluster < 2 {
                drive.root_dir_first_sector
            } else {
                drive.cluster_to_sector(item.entry.first_cluster)
            };
            cursor.reset();
            add_path(&mut cursor.path, &item.name);
            return Ok(());
        }
    }

    cursor.reset();
    Err(FatError::NotFound(format!("{}{}", cursor.path, name)))
}

/// Append a path component, honouring `"."` and `".."`.
///
/// The path always keeps its drive prefix and stays slash terminated.
pub fn add_path(path: &mut String, component: &str) {
    match component {
        "." => {}
        ".." => {
            // Pop one component, but never the "X:/" prefix
            if path.len() > 3 {
                let trimmed = path.trim_end_matches('/');
                let parent = match trimmed.rfind('/') {
                    Some(pos) => &trimmed[..pos + 1],
                    None => trimmed,
                };
                *path = parent.to_string();
            }
        }
        _ => {
            path.push_str(component);
            path.push('/');
        }
    }
}

/// Split an optional `X:` drive prefix off a path
pub fn split_drive(path: &str) -> (Option<char>, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        (Some(char::from(bytes[0])), &path[2..])
    } else {
        (None, path)
    }
}

/// Parse a FAT DOS time
/// Assume a value of zero is an invalid time / reserved field
/// Return None if the time is invalid
///
/// Bits 0-4: 2-second count, valid value range 0-29 inclusive. \
/// Bits 5-10: Minutes, valid value range 0-59 inclusive. \
/// Bits 11-15: Hours, valid value range 0-23 inclusive.
///
/// # Examples
///
/// ```
/// use fat_volume::directory::parse_dos_time;
///
/// let time = parse_dos_time(0xbf7d);
///
/// assert!(time.is_some());
/// assert_eq!(time.unwrap().hour(), 23);
/// assert_eq!(time.unwrap().minute(), 59);
/// assert_eq!(time.unwrap().second(), 58);
/// ```
pub fn parse_dos_time(dos_time: u16) -> Option<Time> {
    let hours = ((dos_time >> 11) as u8) & 0x1F;
    if hours > 23 {
        return None;
    }
    let minutes = ((dos_time >> 5) as u8) & 0x3F;
    if minutes > 59 {
        return None;
    }
    let seconds = (dos_time & 0x1F) as u8;
    if seconds > 29 {
        return None;
    }

    Time::from_hms(hours, minutes, seconds * 2).ok()
}

/// Parse a FAT DOS date
/// If a date is invalid, a value of None is returned.
///
/// MS-DOS epoch is 01/01/1980 \
/// Bits 0-4: Day of month, valid value range 1-31 inclusive. \
/// Bits 5-8: Month of year, 1 = January, valid value range 1-12 inclusive. \
/// Bits 9-15: Count of years from 1980, valid value range 0-127 inclusive.
///
/// # Examples
///
/// ```
/// use fat_volume::directory::parse_dos_date;
/// use time::Month;
///
/// let date = parse_dos_date(0xff9f);
///
/// assert!(date.is_some());
/// assert_eq!(date.unwrap().year(), 2107);
/// assert_eq!(date.unwrap().month(), Month::December);
/// assert_eq!(date.unwrap().day(), 31);
/// ```
pub fn parse_dos_date(dos_date: u16) -> Option<Date> {
    // Some utilities never write a date at all
    if dos_date == 0 {
        return None;
    }

    let year = i32::from((dos_date >> 9) & 0x7F) + 1980;

    let month = match (dos_date >> 5) & 0x0F {
        1 => Month::January,
        2 => Month::February,
        3 => Month::March,
        4 => Month::April,
        5 => Month::May,
        6 => Month::June,
        7 => Month::July,
        8 => Month::August,
        9 => Month::September,
        10 => Month::October,
        11 => Month::November,
        12 => Month::December,
        _ => return None,
    };

    let day = (dos_date & 0x1F) as u8;
    if day < 1 {
        return None;
    }

    Date::from_calendar_date(year, month, day).ok()
}
