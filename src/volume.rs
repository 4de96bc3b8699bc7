//! The public face of the driver: fixed slot pools and opaque handles
//!
//! A [`Volumes`] owns every mounted drive, every open folder and every
//! open file in fixed-size pools. Callers hold [`FolderHandle`] and
//! [`FileHandle`] values and never see the engine types underneath.
//! Paths at this boundary are UTF-8 with an optional `X:` drive prefix;
//! relative paths resolve against the drive's working directory.
use std::io::SeekFrom;

use log::debug;

use crate::device::BlockDevice;
use crate::directory::{change_to_child, next_item, split_drive, DirCursor};
use crate::error::FatError;
use crate::file::{mode_from_str, FileState};
use crate::mount::{mount_drive, Drive};

/// Number of drive slots
pub const MAX_DRIVES: usize = 4;
/// Number of folder slots
pub const MAX_FOLDERS: usize = 20;
/// Number of file slots
pub const MAX_FILES: usize = 16;

/// Path separators accepted at the API boundary
const SEPARATORS: &[char] = &['/', '\\'];

/// Opaque handle to an open folder slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FolderHandle(usize);

/// Opaque handle to an open file slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHandle(usize);

struct FolderSlot {
    drive: usize,
    cursor: DirCursor,
}

struct FileSlot {
    drive: usize,
    state: FileState,
}

/// All mounted volumes and their open folders and files
pub struct Volumes {
    drives: [Option<Drive>; MAX_DRIVES],
    folders: [Option<FolderSlot>; MAX_FOLDERS],
    files: [Option<FileSlot>; MAX_FILES],
    default_drive: char,
}

impl Default for Volumes {
    fn default() -> Self {
        Volumes::new()
    }
}

impl Volumes {
    /// An empty pool set with `C` as the default drive
    pub fn new() -> Volumes {
        Volumes {
            drives: std::array::from_fn(|_| None),
            folders: std::array::from_fn(|_| None),
            files: std::array::from_fn(|_| None),
            default_drive: 'C',
        }
    }

    fn drive_index(&self, letter: char) -> Result<usize, FatError> {
        self.drives
            .iter()
            .position(|slot| {
                slot.as_ref()
                    .map_or(false, |drive| drive.letter.eq_ignore_ascii_case(&letter))
            })
            .ok_or(FatError::UnknownDrive(letter))
    }

    /// Mount a device as a drive letter.
    ///
    /// Mounting a letter that is already mounted succeeds without
    /// touching the new device. A failed mount consumes no slot.
    pub fn mount(
        &mut self,
        letter: char,
        device: Box<dyn BlockDevice>,
        partition: u8,
    ) -> Result<(), FatError> {
        if self.drive_index(letter).is_ok() {
            debug!("drive {} already mounted", letter);
            return Ok(());
        }

        let free = self
            .drives
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(FatError::NoFreeSlot("drive"))?;

        let drive = mount_drive(letter.to_ascii_uppercase(), device, partition)?;
        self.drives[free] = Some(drive);

        Ok(())
    }

    /// Set the drive used when a path has no drive prefix
    pub fn set_default_drive(&mut self, letter: char) -> Result<(), FatError> {
        self.drive_index(letter)?;
        self.default_drive = letter.to_ascii_uppercase();
        Ok(())
    }

    /// Walk a path to a directory cursor. Relative paths replay the
    /// drive's working directory first. Both `/` and `\` separate
    /// components.
    fn resolve_cursor(&mut self, path: &str) -> Result<(usize, DirCursor), FatError> {
        let (prefix, rest) = split_drive(path);
        let letter = prefix.unwrap_or(self.default_drive);
        let index = self.drive_index(letter)?;
        let drive = self.drives[index]
            .as_mut()
            .ok_or(FatError::UnknownDrive(letter))?;

        let mut cursor = DirCursor::root(drive);

        if !rest.starts_with(SEPARATORS) {
            let cwd = drive.cwd.clone();
            let (_, cwd_rest) = split_drive(&cwd);
            for component in cwd_rest.split(SEPARATORS).filter(|c| !c.is_empty()) {
                change_to_child(drive, &mut cursor, component)?;
            }
        }

        for component in rest.split(SEPARATORS).filter(|c| !c.is_empty()) {
            change_to_child(drive, &mut cursor, component)?;
        }

        Ok((index, cursor))
    }

    /// Open a folder by path and return a handle to enumerate it
    pub fn open_folder(&mut self, path: &str) -> Result<FolderHandle, FatError> {
        let free = self
            .folders
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(FatError::NoFreeSlot("folder"))?;

        let (drive, cursor) = self.resolve_cursor(path)?;

        self.folders[free] = Some(FolderSlot { drive, cursor });
        Ok(FolderHandle(free))
    }

    fn folder_slot(&mut self, handle: FolderHandle) -> Result<&mut FolderSlot, FatError> {
        self.folders
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(FatError::BadHandle)
    }

    /// Rewind a folder to its first entry
    pub fn reset_folder(&mut self, handle: FolderHandle) -> Result<(), FatError> {
        self.folder_slot(handle)?.cursor.reset();
        Ok(())
    }

    /// Yield the next entry of a folder as a file handle, or `Ok(None)`
    /// at the end of the folder.
    ///
    /// The handle starts unopened; pass it to [`Volumes::open_direct`]
    /// before reading.
    pub fn next_item(&mut self, handle: FolderHandle) -> Result<Option<FileHandle>, FatError> {
        let slot = self
            .folders
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(FatError::BadHandle)?;
        let drive_index = slot.drive;
        let drive = self.drives[drive_index]
            .as_mut()
            .ok_or(FatError::BadHandle)?;

        let item = match next_item(drive, &mut slot.cursor)? {
            Some(item) => item,
            None => return Ok(None),
        };

        let free = self
            .files
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(FatError::NoFreeSlot("file"))?;

        self.files[free] = Some(FileSlot {
            drive: drive_index,
            state: FileState::open(drive, item, 0),
        });

        Ok(Some(FileHandle(free)))
    }

    /// Descend into a child of the folder by name
    pub fn change_folder(&mut self, handle: FolderHandle, name: &str) -> Result<(), FatError> {
        let slot = self
            .folders
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(FatError::BadHandle)?;
        let drive = self.drives[slot.drive]
            .as_mut()
            .ok_or(FatError::BadHandle)?;

        change_to_child(drive, &mut slot.cursor, name)
    }

    /// Full path of the folder, drive letter included
    pub fn folder_path(&self, handle: FolderHandle) -> Result<&str, FatError> {
        self.folders
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .map(|slot| slot.cursor.path())
            .ok_or(FatError::BadHandle)
    }

    /// Release a folder slot
    pub fn close_folder(&mut self, handle: FolderHandle) -> Result<(), FatError> {
        self.folder_slot(handle)?;
        self.folders[handle.0] = None;
        Ok(())
    }

    /// Open a file by path with an fopen-style mode string
    pub fn open(&mut self, path: &str, mode: &str) -> Result<FileHandle, FatError> {
        let mode = mode_from_str(mode).ok_or_else(|| FatError::BadMode(mode.to_string()))?;

        let (directory, name) = match path.rfind(SEPARATORS) {
            Some(position) => path.split_at(position + 1),
            None => {
                let (prefix, rest) = split_drive(path);
                if prefix.is_some() {
                    (&path[..2], rest)
                } else {
                    ("", path)
                }
            }
        };
        if name.is_empty() {
            return Err(FatError::NotFound(path.to_string()));
        }

        let free = self
            .files
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(FatError::NoFreeSlot("file"))?;

        let (drive_index, mut cursor) = self.resolve_cursor(directory)?;
        let drive = self.drives[drive_index]
            .as_mut()
            .ok_or(FatError::BadHandle)?;

        while let Some(item) = next_item(drive, &mut cursor)? {
            if item.is_regular_file() && item.matches(name) {
                self.files[free] = Some(FileSlot {
                    drive: drive_index,
                    state: FileState::open(drive, item, mode),
                });
                return Ok(FileHandle(free));
            }
        }

        Err(FatError::NotFound(format!("{}{}", cursor.path(), name)))
    }

    /// Open a handle that came from [`Volumes::next_item`] with an
    /// fopen-style mode string
    pub fn open_direct(&mut self, handle: FileHandle, mode: &str) -> Result<(), FatError> {
        let mode = mode_from_str(mode).ok_or_else(|| FatError::BadMode(mode.to_string()))?;

        let slot = self
            .files
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(FatError::BadHandle)?;
        let drive = self.drives[slot.drive]
            .as_ref()
            .ok_or(FatError::BadHandle)?;

        slot.state = FileState::open(drive, slot.state.item.clone(), mode);
        Ok(())
    }

    /// Release a file slot
    pub fn close(&mut self, handle: FileHandle) -> Result<(), FatError> {
        self.files
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .ok_or(FatError::BadHandle)?;
        self.files[handle.0] = None;
        Ok(())
    }

    fn file_parts(&mut self, handle: FileHandle) -> Result<(&mut FileState, &mut Drive), FatError> {
        let slot = self
            .files
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .ok_or(FatError::BadHandle)?;
        let drive = self.drives[slot.drive]
            .as_mut()
            .ok_or(FatError::BadHandle)?;
        Ok((&mut slot.state, drive))
    }

    /// Read one byte, or `Ok(None)` at end of file
    pub fn read_byte(&mut self, handle: FileHandle) -> Result<Option<u8>, FatError> {
        let (state, drive) = self.file_parts(handle)?;
        state.read_byte(drive)
    }

    /// Fill `buf` from the file, returning the number of bytes read
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, FatError> {
        let (state, drive) = self.file_parts(handle)?;
        state.read(drive, buf)
    }

    /// Read one line, newline excluded, or `Ok(None)` at end of file
    pub fn read_line(&mut self, handle: FileHandle) -> Result<Option<String>, FatError> {
        let (state, drive) = self.file_parts(handle)?;
        state.read_line(drive)
    }

    /// Move the file position, returning the new position
    pub fn seek(&mut self, handle: FileHandle, target: SeekFrom) -> Result<u32, FatError> {
        let (state, _) = self.file_parts(handle)?;
        state.seek(target)
    }

    /// The current file position
    pub fn tell(&self, handle: FileHandle) -> Result<u32, FatError> {
        self.file_state(handle).map(|state| state.tell())
    }

    fn file_state(&self, handle: FileHandle) -> Result<&FileState, FatError> {
        self.files
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .map(|slot| &slot.state)
            .ok_or(FatError::BadHandle)
    }

    /// True if the handle refers to a live file slot
    pub fn is_open(&self, handle: FileHandle) -> bool {
        self.file_state(handle).is_ok()
    }

    /// True if the handle's entry is a subdirectory
    pub fn is_directory(&self, handle: FileHandle) -> bool {
        self.file_state(handle)
            .map_or(false, |state| state.item.is_directory())
    }

    /// True if the handle's entry is a plain file
    pub fn is_regular_file(&self, handle: FileHandle) -> bool {
        self.file_state(handle)
            .map_or(false, |state| state.item.is_regular_file())
    }

    /// The entry's display name
    pub fn long_name(&self, handle: FileHandle) -> Result<&str, FatError> {
        self.file_state(handle).map(|state| state.item.name.as_str())
    }

    /// The entry's full path including the drive letter
    pub fn long_path(&self, handle: FileHandle) -> Result<&str, FatError> {
        self.file_state(handle).map(|state| state.item.path.as_str())
    }

    /// The entry's size in bytes
    pub fn file_size(&self, handle: FileHandle) -> Result<u32, FatError> {
        self.file_state(handle).map(|state| state.size())
    }

    /// A one-line listing of the entry: date, time, flags, size, first
    /// cluster and name
    pub fn describe(&self, handle: FileHandle) -> Result<String, FatError> {
        self.file_state(handle)
            .map(|state| format!("{}", state.item))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{FileHandle, FolderHandle, Volumes, MAX_FILES};
    use crate::error::FatError;
    use crate::mount::FatWidth;
    use crate::testutil::{test_drive, write_sectors};

    fn volumes_with_test_drive() -> Volumes {
        let mut drive = test_drive(FatWidth::Fat12, 3, 100);

        let mut root = Vec::new();
        // DIR1 at cluster 2, FILE.TXT at cluster 3
        let mut dir1 = [0u8; 32];
        dir1[..11].copy_from_slice(b"DIR1       ");
        dir1[11] = 0x10;
        dir1[26] = 2;
        root.extend_from_slice(&dir1);

        let mut file = [0u8; 32];
        file[..11].copy_from_slice(b"FILE    TXT");
        file[11] = 0x20;
        file[26] = 3;
        file[28..32].copy_from_slice(&5u32.to_le_bytes());
        root.extend_from_slice(&file);

        let root_sector = drive.root_dir_first_sector;
        write_sectors(&mut drive, root_sector, &root);

        drive.set_cluster_entry(3, 0xFFF).unwrap();
        let data_sector = drive.cluster_to_sector(3);
        write_sectors(&mut drive, data_sector, b"hello");

        let mut volumes = Volumes::new();
        volumes.drives[0] = Some(drive);
        volumes
    }

    /// Test stale handles are rejected everywhere
    #[test]
    fn stale_handles_fail() {
        let mut volumes = Volumes::new();

        assert!(!volumes.is_open(FileHandle(0)));
        assert!(matches!(
            volumes.read_byte(FileHandle(3)),
            Err(FatError::BadHandle)
        ));
        assert!(matches!(
            volumes.reset_folder(FolderHandle(19)),
            Err(FatError::BadHandle)
        ));
        assert!(matches!(
            volumes.close(FileHandle(15)),
            Err(FatError::BadHandle)
        ));
    }

    /// Test opening a file by absolute path and reading it
    #[test]
    fn open_and_read_works() {
        let mut volumes = volumes_with_test_drive();

        let handle = volumes.open("C:/FILE.TXT", "r").unwrap();
        assert!(volumes.is_regular_file(handle));
        assert_eq!(volumes.file_size(handle).unwrap(), 5);

        let mut buf = [0u8; 16];
        assert_eq!(volumes.read(handle, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");

        volumes.close(handle).unwrap();
        assert!(!volumes.is_open(handle));
    }

    /// Test the default drive is used for unprefixed paths
    #[test]
    fn default_drive_resolution_works() {
        let mut volumes = volumes_with_test_drive();

        let handle = volumes.open("/FILE.TXT", "r").unwrap();
        assert_eq!(volumes.long_path(handle).unwrap(), "C:/FILE.TXT");

        assert!(matches!(
            volumes.set_default_drive('Z'),
            Err(FatError::UnknownDrive('Z'))
        ));
    }

    /// Test folder enumeration hands out file handles in order
    #[test]
    fn folder_enumeration_works() {
        let mut volumes = volumes_with_test_drive();

        let folder = volumes.open_folder("C:/").unwrap();
        assert_eq!(volumes.folder_path(folder).unwrap(), "C:/");

        let first = volumes.next_item(folder).unwrap().unwrap();
        assert_eq!(volumes.long_name(first).unwrap(), "DIR1");
        assert!(volumes.is_directory(first));

        let second = volumes.next_item(folder).unwrap().unwrap();
        assert_eq!(volumes.long_name(second).unwrap(), "FILE.TXT");

        assert!(volumes.next_item(folder).unwrap().is_none());

        // Re-open the located file for reading
        volumes.open_direct(second, "r").unwrap();
        assert_eq!(volumes.read_byte(second).unwrap(), Some(b'h'));

        volumes.close(first).unwrap();
        volumes.close(second).unwrap();
        volumes.close_folder(folder).unwrap();
    }

    /// Test a bad mode string is reported as such
    #[test]
    fn bad_mode_fails() {
        let mut volumes = volumes_with_test_drive();
        assert!(matches!(
            volumes.open("C:/FILE.TXT", "q"),
            Err(FatError::BadMode(_))
        ));
    }

    /// Test the file pool exhausts cleanly
    #[test]
    fn file_pool_exhaustion_fails() {
        let mut volumes = volumes_with_test_drive();

        for _ in 0..MAX_FILES {
            volumes.open("C:/FILE.TXT", "r").unwrap();
        }
        assert!(matches!(
            volumes.open("C:/FILE.TXT", "r"),
            Err(FatError::NoFreeSlot("file"))
        ));
    }
}
