// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;
use static_assertions::const_assert;

use crate::{
    block_dev::BlockDeviceExt,
    block_ptr::{Bid, BidPath, BlockPtrs, BID_SIZE, BLOCK_PTR_CNT},
    dir::{DirEntry, DirEntryReader},
    fs::Ext2,
    managed::{BackingMemory, FrontalMemory, ManagedMemory},
    pager::{DataPager, IndirectPager},
    prelude::*,
    super_block::SuperBlock,
};

/// Max length of a file name.
pub const MAX_FNAME_LEN: usize = 255;

/// Max length of a symlink target stored inside the inode itself.
pub(crate) const MAX_FAST_SYMLINK_LEN: usize = BLOCK_PTR_CNT * BID_SIZE;

/// An open inode record.
///
/// Records are shared: the filesystem's inode cache hands out one record per
/// distinct inode number and holds only a weak reference to it, so a record
/// and its managed memory objects are released when the last user drops.
/// All metadata is immutable once the record is ready.
pub struct Inode {
    ino: u32,
    fs: Weak<Ext2>,
    weak_self: Weak<Inode>,
    meta: Once<Result<InodeMeta>>,
}

impl Inode {
    pub(crate) fn new(ino: u32, fs: Weak<Ext2>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            ino,
            fs,
            weak_self: weak_self.clone(),
            meta: Once::new(),
        })
    }

    /// Reads the on-disk inode, publishes the metadata, and arms the three
    /// page-in handlers. Runs exactly once per record; concurrent callers
    /// share the single outcome.
    pub(crate) fn init(&self, fs: &Ext2) -> Result<()> {
        let outcome = self.meta.call_once(|| {
            let meta = InodeMeta::load(self.ino, fs)?;
            meta.data
                .backing
                .serve(Arc::new(DataPager::new(self.weak_self.clone())));
            meta.indirect1
                .backing
                .serve(Arc::new(IndirectPager::new(self.weak_self.clone(), 1)));
            meta.indirect2
                .backing
                .serve(Arc::new(IndirectPager::new(self.weak_self.clone(), 2)));
            Ok(meta)
        });
        outcome.as_ref().map(|_| ()).map_err(|e| *e)
    }

    /// Waits for the ready gate and returns the record's metadata.
    pub(crate) fn meta(&self) -> Result<&InodeMeta> {
        self.meta.wait().as_ref().map_err(|e| *e)
    }

    /// Returns whether initialization has completed successfully.
    pub fn is_ready(&self) -> bool {
        matches!(self.meta.get(), Some(Ok(_)))
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub(crate) fn fs(&self) -> Result<Arc<Ext2>> {
        self.fs.upgrade().ok_or(Error::IoFailed)
    }

    pub fn file_type(&self) -> Result<FileType> {
        Ok(self.meta()?.file_type)
    }

    pub fn file_perm(&self) -> Result<FilePerm> {
        Ok(self.meta()?.perm)
    }

    pub fn file_size(&self) -> Result<usize> {
        Ok(self.meta()?.size)
    }

    pub fn uid(&self) -> Result<u32> {
        Ok(self.meta()?.uid)
    }

    pub fn gid(&self) -> Result<u32> {
        Ok(self.meta()?.gid)
    }

    pub fn hard_links(&self) -> Result<u16> {
        Ok(self.meta()?.hard_links)
    }

    /// Time of last access, at second precision.
    pub fn atime(&self) -> Result<Duration> {
        Ok(self.meta()?.atime)
    }

    /// Time of last content modification, at second precision.
    pub fn mtime(&self) -> Result<Duration> {
        Ok(self.meta()?.mtime)
    }

    /// Time of last metadata change, at second precision.
    pub fn ctime(&self) -> Result<Duration> {
        Ok(self.meta()?.ctime)
    }

    /// Returns a frontal handle over the file's demand-paged contents.
    ///
    /// Locking a range of the handle faults the covered file bytes in from
    /// disk; bytes past the file size in the paged-in range read as zero.
    pub fn data_memory(&self) -> Result<FrontalMemory> {
        Ok(self.meta()?.data.frontal.clone())
    }

    /// Resolves `name` inside this directory inode.
    ///
    /// Returns the named entry, or `None` if the directory holds no such
    /// name. The returned file type is the one recorded in the directory
    /// entry itself.
    ///
    /// # Panics
    ///
    /// If this inode is not a directory, or `name` is empty, `"."`, or
    /// `".."`, this method panics.
    pub fn find_entry(&self, name: &str) -> Result<Option<DirEntry>> {
        assert!(!name.is_empty() && name != "." && name != "..");
        assert!(name.len() <= MAX_FNAME_LEN);

        let meta = self.meta()?;
        assert_eq!(meta.file_type, FileType::Dir);

        let block_page = 1usize << self.fs()?.super_block().block_pages_shift();
        let window = meta.data.frontal.lock(0, meta.size.align_up(block_page))?;
        let mut reader = DirEntryReader::new(&window, meta.size, 0);
        while let Some((header, entry_name)) = reader.next_entry()? {
            if entry_name == name.as_bytes() {
                return Ok(Some(DirEntry::new(header.inode, header.entry_type())));
            }
        }
        Ok(None)
    }

    /// Reads the target of this symlink inode.
    ///
    /// Targets short enough to live in the inode's block pointer area are
    /// returned from there; longer targets are paged in like file data.
    ///
    /// # Panics
    ///
    /// If this inode is not a symlink, this method panics.
    pub fn read_link(&self) -> Result<String> {
        let meta = self.meta()?;
        assert_eq!(meta.file_type, FileType::SymLink);

        if meta.size <= MAX_FAST_SYMLINK_LEN {
            let target = &meta.block_ptrs.as_symlink_bytes()[..meta.size];
            return Ok(String::from_utf8_lossy(target).into_owned());
        }

        let block_page = 1usize << self.fs()?.super_block().block_pages_shift();
        let window = meta.data.frontal.lock(0, meta.size.align_up(block_page))?;
        let mut target = vec![0u8; meta.size];
        window.read_bytes(0, &mut target)?;
        Ok(String::from_utf8_lossy(&target).into_owned())
    }
}

impl Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("is_ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// A managed memory object owned by an inode record, as both halves.
pub(crate) struct MemoryPair {
    pub frontal: FrontalMemory,
    pub backing: BackingMemory,
}

impl MemoryPair {
    fn create(size: usize) -> Self {
        let (backing, frontal) = ManagedMemory::create(size);
        Self { frontal, backing }
    }
}

/// The metadata of an inode record, immutable once published.
pub(crate) struct InodeMeta {
    pub file_type: FileType,
    pub perm: FilePerm,
    /// Size in bytes; this driver caps file sizes at 32 bits.
    pub size: usize,
    pub uid: u32,
    pub gid: u32,
    pub hard_links: u16,
    pub atime: Duration,
    pub mtime: Duration,
    pub ctime: Duration,
    /// The inode's pointers-to-blocks area.
    pub block_ptrs: BlockPtrs,
    /// Demand-paged file contents, sized to the file size rounded up to a
    /// block page.
    pub data: MemoryPair,
    /// Cache of the three inode-level indirect blocks, one block-page slot
    /// each: single-indirect, double-indirect, treble-indirect.
    pub indirect1: MemoryPair,
    /// Cache of the second-level blocks under the double-indirect block,
    /// one block-page slot per first-level position.
    pub indirect2: MemoryPair,
}

impl InodeMeta {
    /// Reads the on-disk inode and builds the record's metadata, including
    /// its three managed memory pairs.
    fn load(ino: u32, fs: &Ext2) -> Result<Self> {
        let sb = fs.super_block();

        let group = (ino - 1) / sb.inodes_per_group();
        let index = (ino - 1) % sb.inodes_per_group();
        let descriptor = fs.group_descriptors().get(group as usize)?;

        let inode_offset = descriptor.inode_table_bid as usize * sb.block_size()
            + index as usize * sb.inode_size();
        let raw: RawInode = fs.block_device().read_val_at(inode_offset)?;

        let file_type = FileType::from_raw_mode(raw.mode)?;
        let size = raw.size_low as usize;

        // All three objects round to the block-page unit, so the data
        // object always covers whole blocks even when a block spans
        // several hardware pages.
        let block_page = 1usize << sb.block_pages_shift();
        Ok(Self {
            file_type,
            perm: FilePerm::from_raw_mode(raw.mode),
            size,
            uid: ((raw.os_dependent_2.uid_high as u32) << 16) | raw.uid as u32,
            gid: ((raw.os_dependent_2.gid_high as u32) << 16) | raw.gid as u32,
            hard_links: raw.hard_links,
            atime: Duration::from_secs(raw.atime as u64),
            mtime: Duration::from_secs(raw.mtime as u64),
            ctime: Duration::from_secs(raw.ctime as u64),
            block_ptrs: raw.block_ptrs,
            data: MemoryPair::create(size.align_up(block_page)),
            indirect1: MemoryPair::create(3 * block_page),
            indirect2: MemoryPair::create(sb.blocks_per_indirect() * block_page),
        })
    }
}

/// Yields the device block-id ranges backing a range of an inode's logical
/// blocks.
///
/// Each `next` resolves the run's leading block through the inode's direct
/// pointers or its cached indirect tables, then extends it over physically
/// contiguous successors, so one device read can cover the whole run. Runs
/// never cross a table boundary or an indirection-level change.
pub(crate) struct DeviceRangeReader<'a> {
    meta: &'a InodeMeta,
    sb: &'a SuperBlock,
    range: Range<Bid>,
}

impl<'a> DeviceRangeReader<'a> {
    pub fn new(meta: &'a InodeMeta, sb: &'a SuperBlock, range: Range<Bid>) -> Self {
        Self { meta, sb, range }
    }

    /// Returns the next fused device range, or `None` once the logical
    /// range is exhausted.
    pub fn next(&mut self) -> Result<Option<Range<Bid>>> {
        if self.range.is_empty() {
            return Ok(None);
        }

        let per_indirect = self.sb.blocks_per_indirect() as u32;
        let path = BidPath::classify(self.range.start, per_indirect);
        let max_cnt = (self.range.end - self.range.start).min(path.cnt_to_boundary(per_indirect));
        let start_idx = path.last_lvl_idx();
        let block_page = 1usize << self.sb.block_pages_shift();

        let device_range = match path {
            BidPath::Direct(_) => self.fuse(start_idx, max_cnt as usize, |i| {
                Ok(self.meta.block_ptrs.direct(i))
            })?,
            BidPath::Indirect(_) => {
                let window = self.meta.indirect1.frontal.lock(0, block_page)?;
                self.fuse(start_idx, max_cnt as usize, |i| {
                    window.read_val::<Bid>(i * BID_SIZE)
                })?
            }
            BidPath::DbIndirect(lvl1_idx, _) => {
                let slot = lvl1_idx as usize * block_page;
                let window = self.meta.indirect2.frontal.lock(slot, block_page)?;
                self.fuse(start_idx, max_cnt as usize, |i| {
                    window.read_val::<Bid>(slot + i * BID_SIZE)
                })?
            }
            BidPath::TbIndirect => return Err(Error::TripleIndirectUnsupported),
        };

        self.range.start += device_range.end - device_range.start;
        Ok(Some(device_range))
    }

    /// Extends a run from `start_idx` over up to `max_cnt` physically
    /// contiguous table entries.
    fn fuse(
        &self,
        start_idx: usize,
        max_cnt: usize,
        read_entry: impl Fn(usize) -> Result<Bid>,
    ) -> Result<Range<Bid>> {
        let first = read_entry(start_idx)?;
        if first == 0 {
            return Err(Error::HoleEncountered);
        }

        let mut run = first..first + 1;
        for idx in start_idx + 1..start_idx + max_cnt {
            if read_entry(idx)? != run.end {
                break;
            }
            run.end += 1;
        }
        Ok(run)
    }
}

/// The type of a file, as classified from its inode mode or recorded in a
/// directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Dir,
    SymLink,
    /// A directory entry of a type this driver does not serve.
    Unknown,
}

impl FileType {
    const TYPE_MASK: u16 = 0o170000;
    const REGULAR: u16 = 0o100000;
    const DIR: u16 = 0o040000;
    const SYM_LINK: u16 = 0o120000;

    /// Classifies an on-disk mode. Anything but a regular file, directory,
    /// or symlink is refused.
    pub(crate) fn from_raw_mode(mode: u16) -> Result<Self> {
        match mode & Self::TYPE_MASK {
            Self::REGULAR => Ok(Self::Regular),
            Self::DIR => Ok(Self::Dir),
            Self::SYM_LINK => Ok(Self::SymLink),
            _ => Err(Error::UnsupportedInodeType),
        }
    }
}

bitflags! {
    /// The permission bits of a file, the low 12 bits of its mode.
    pub struct FilePerm: u16 {
        /// set-user-ID
        const S_ISUID = 0o4000;
        /// set-group-ID
        const S_ISGID = 0o2000;
        /// sticky bit
        const S_ISVTX = 0o1000;
        /// read by owner
        const S_IRUSR = 0o0400;
        /// write by owner
        const S_IWUSR = 0o0200;
        /// execute/search by owner
        const S_IXUSR = 0o0100;
        /// read by group
        const S_IRGRP = 0o0040;
        /// write by group
        const S_IWGRP = 0o0020;
        /// execute/search by group
        const S_IXGRP = 0o0010;
        /// read by others
        const S_IROTH = 0o0004;
        /// write by others
        const S_IWOTH = 0o0002;
        /// execute/search by others
        const S_IXOTH = 0o0001;
    }
}

impl FilePerm {
    const PERM_MASK: u16 = 0o7777;

    pub(crate) fn from_raw_mode(mode: u16) -> Self {
        Self::from_bits_truncate(mode & Self::PERM_MASK)
    }
}

const_assert!(core::mem::size_of::<RawInode>() == 128);

/// The raw inode on device.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod)]
pub(crate) struct RawInode {
    /// File mode (type and permissions).
    pub mode: u16,
    /// Low 16 bits of User Id.
    pub uid: u16,
    /// Lower 32 bits of size in bytes.
    pub size_low: u32,
    /// Access time.
    pub atime: u32,
    /// Change time.
    pub ctime: u32,
    /// Modification time.
    pub mtime: u32,
    /// Deletion time.
    pub dtime: u32,
    /// Low 16 bits of Group Id.
    pub gid: u16,
    pub hard_links: u16,
    pub blocks_count: u32,
    /// File flags.
    pub flags: u32,
    /// OS dependent Value 1.
    reserved1: u32,
    /// Pointers to blocks, or the target of a short symlink.
    pub block_ptrs: BlockPtrs,
    /// File version (for NFS).
    pub generation: u32,
    /// File ACL (in revision 1).
    pub file_acl: u32,
    /// Upper 32 bits of file size, or directory ACL (in revision 1).
    pub size_high: u32,
    /// Fragment address.
    pub frag_addr: u32,
    /// OS dependent 2.
    pub os_dependent_2: Osd2,
}

/// OS dependent Value 2.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod)]
pub(crate) struct Osd2 {
    /// Fragment number.
    pub frag_num: u8,
    /// Fragment size.
    pub frag_size: u8,
    pad1: u16,
    /// High 16 bits of User Id.
    pub uid_high: u16,
    /// High 16 bits of Group Id.
    pub gid_high: u16,
    reserved2: u32,
}
