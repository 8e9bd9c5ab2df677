// SPDX-License-Identifier: MPL-2.0

use int_to_c_enum::TryFromInt;
use static_assertions::const_assert;

use crate::{
    inode::{FileType, Inode},
    managed::LockGuard,
    prelude::*,
};

/// The in-memory result of a directory lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    ino: u32,
    file_type: FileType,
}

impl DirEntry {
    pub(crate) fn new(ino: u32, file_type: FileType) -> Self {
        Self { ino, file_type }
    }

    /// The inode number the entry points to.
    pub fn ino(&self) -> u32 {
        self.ino
    }

    /// The file type recorded in the entry.
    pub fn file_type(&self) -> FileType {
        self.file_type
    }
}

/// An offset-carrying handle over an inode, used for sequential directory
/// enumeration.
pub struct FileCursor {
    inode: Arc<Inode>,
    offset: usize,
}

impl FileCursor {
    /// Opens a cursor at offset 0.
    pub fn new(inode: Arc<Inode>) -> Self {
        Self { inode, offset: 0 }
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// The byte offset of the next entry to be read.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Yields the next directory entry's name, or `None` once the cursor
    /// has consumed the whole directory.
    ///
    /// # Panics
    ///
    /// If the underlying inode is not a directory, this method panics.
    pub fn read_entries(&mut self) -> Result<Option<String>> {
        let meta = self.inode.meta()?;
        assert_eq!(meta.file_type, FileType::Dir);
        assert!(self.offset <= meta.size);

        if self.offset == meta.size {
            return Ok(None);
        }

        let block_page = 1usize << self.inode.fs()?.super_block().block_pages_shift();
        let window = meta.data.frontal.lock(0, meta.size.align_up(block_page))?;
        let mut reader = DirEntryReader::new(&window, meta.size, self.offset);
        let Some((_, name)) = reader.next_entry()? else {
            return Ok(None);
        };
        self.offset = reader.offset();
        Ok(Some(String::from_utf8_lossy(&name).into_owned()))
    }
}

/// Walks the on-disk entries of a directory mapped through a locked frontal
/// window.
///
/// Entries chain by record length and must tile the directory's file size
/// exactly; a walk that would overrun it fails with `DirectoryCorrupt`.
pub(crate) struct DirEntryReader<'a> {
    window: &'a LockGuard<'a>,
    file_size: usize,
    offset: usize,
}

impl<'a> DirEntryReader<'a> {
    pub fn new(window: &'a LockGuard<'a>, file_size: usize, offset: usize) -> Self {
        Self {
            window,
            file_size,
            offset,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the entry at the current offset and advances past it, or
    /// returns `None` at the exact end of the directory.
    pub fn next_entry(&mut self) -> Result<Option<(RawDirEntry, Vec<u8>)>> {
        if self.offset == self.file_size {
            return Ok(None);
        }

        let header_len = core::mem::size_of::<RawDirEntry>();
        if self.offset + header_len > self.file_size {
            return Err(Error::DirectoryCorrupt);
        }
        let header: RawDirEntry = self.window.read_val(self.offset)?;

        let record_len = header.record_len as usize;
        if record_len % DIR_ENTRY_ALIGN != 0 {
            return Err(Error::AlignmentViolation);
        }
        if record_len < header_len + header.name_len as usize
            || self.offset + record_len > self.file_size
        {
            return Err(Error::DirectoryCorrupt);
        }

        let mut name = vec![0u8; header.name_len as usize];
        self.window.read_bytes(self.offset + header_len, &mut name)?;

        self.offset += record_len;
        Ok(Some((header, name)))
    }
}

/// Directory entries are 4-byte aligned on disk.
const DIR_ENTRY_ALIGN: usize = 4;

const_assert!(core::mem::size_of::<RawDirEntry>() == 8);

/// The fixed header of an on-disk directory entry; the name follows it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod)]
pub(crate) struct RawDirEntry {
    /// The inode the entry points to.
    pub inode: u32,
    /// Length of the whole record, including the name and its padding.
    pub record_len: u16,
    /// Length of the name.
    pub name_len: u8,
    /// The type byte.
    pub file_type: u8,
}

impl RawDirEntry {
    /// Decodes the type byte; types this driver does not serve decode to
    /// [`FileType::Unknown`].
    pub fn entry_type(&self) -> FileType {
        match DirEntryType::try_from(self.file_type) {
            Ok(DirEntryType::RegFile) => FileType::Regular,
            Ok(DirEntryType::Dir) => FileType::Dir,
            Ok(DirEntryType::SymLink) => FileType::SymLink,
            _ => FileType::Unknown,
        }
    }
}

/// The type byte of an on-disk directory entry.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromInt)]
pub(crate) enum DirEntryType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    CharDev = 3,
    BlockDev = 4,
    Fifo = 5,
    Socket = 6,
    SymLink = 7,
}
