// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;
use log::info;
use static_assertions::const_assert;

use crate::{block_group::RawGroupDescriptor, inode::RawInode, prelude::*, SECTOR_SIZE};

/// The magic number of Ext2.
pub const MAGIC_NUM: u16 = 0xef53;

/// The main superblock is located at byte 1024 from the beginning of the
/// device.
pub const SUPER_BLOCK_OFFSET: usize = 1024;

const SUPER_BLOCK_SIZE: usize = 1024;

/// The first group descriptor lies at the first block boundary at or after
/// byte 2048.
const GROUP_DESCRIPTORS_MIN_OFFSET: usize = 2048;

/// The in-memory superblock.
///
/// It carries the filesystem geometry derived once at mount time; all
/// fields are immutable afterwards.
#[derive(Clone, Copy, Debug)]
pub struct SuperBlock {
    /// Total number of blocks.
    blocks_count: u32,
    /// Number of blocks in each block group.
    blocks_per_group: u32,
    /// Number of inodes in each block group.
    inodes_per_group: u32,
    /// Block size in bytes.
    block_size: usize,
    /// log2 of the block size.
    block_shift: u32,
    /// log2 of the paging unit used for block caches; at least a hardware
    /// page, so one page-in covers several blocks when blocks are small.
    block_pages_shift: u32,
    /// Size of the on-disk inode structure.
    inode_size: usize,
    /// Compatible feature set.
    feature_compat: FeatureCompatSet,
    /// Incompatible feature set.
    feature_incompat: FeatureInCompatSet,
    /// Readonly-compatible feature set.
    feature_ro_compat: FeatureRoCompatSet,
}

impl TryFrom<RawSuperBlock> for SuperBlock {
    type Error = Error;

    fn try_from(sb: RawSuperBlock) -> Result<Self> {
        if sb.magic != MAGIC_NUM {
            return Err(Error::GeometryInvalid);
        }
        // Blocks larger than 64 KiB do not occur in Ext2.
        if sb.log_block_size > 6 {
            return Err(Error::GeometryInvalid);
        }
        let block_shift = 10 + sb.log_block_size;
        let block_size = 1usize << block_shift;

        let inode_size = sb.inode_size as usize;
        if inode_size < core::mem::size_of::<RawInode>() || !inode_size.is_power_of_two() {
            return Err(Error::GeometryInvalid);
        }
        if sb.blocks_count == 0 || sb.blocks_per_group == 0 || sb.inodes_per_group == 0 {
            return Err(Error::GeometryInvalid);
        }

        Ok(Self {
            blocks_count: sb.blocks_count,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            block_size,
            block_shift,
            block_pages_shift: block_shift.max(crate::PAGE_SIZE.trailing_zeros()),
            inode_size,
            feature_compat: FeatureCompatSet::from_bits_truncate(sb.feature_compat),
            feature_incompat: FeatureInCompatSet::from_bits_truncate(sb.feature_incompat),
            feature_ro_compat: FeatureRoCompatSet::from_bits_truncate(sb.feature_ro_compat),
        })
    }
}

impl SuperBlock {
    /// Returns the block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns log2 of the block size.
    pub fn block_shift(&self) -> u32 {
        self.block_shift
    }

    /// Returns log2 of the block-cache paging unit.
    pub fn block_pages_shift(&self) -> u32 {
        self.block_pages_shift
    }

    /// Returns the number of device sectors per block (at least 2).
    pub fn sectors_per_block(&self) -> usize {
        self.block_size / SECTOR_SIZE
    }

    /// Returns the size of the on-disk inode structure.
    pub fn inode_size(&self) -> usize {
        self.inode_size
    }

    /// Returns the total number of blocks.
    pub fn total_blocks(&self) -> u32 {
        self.blocks_count
    }

    /// Returns the number of blocks in each block group.
    pub fn blocks_per_group(&self) -> u32 {
        self.blocks_per_group
    }

    /// Returns the number of inodes in each block group.
    pub fn inodes_per_group(&self) -> u32 {
        self.inodes_per_group
    }

    /// Returns the number of block groups.
    pub fn block_groups_count(&self) -> u32 {
        self.blocks_count.div_ceil(self.blocks_per_group)
    }

    /// Returns the number of block pointers per indirect block.
    pub fn blocks_per_indirect(&self) -> usize {
        self.block_size / core::mem::size_of::<u32>()
    }

    /// Returns the device byte offset of the group descriptor table.
    pub(crate) fn group_descriptors_offset(&self) -> usize {
        GROUP_DESCRIPTORS_MIN_OFFSET.align_up(self.block_size)
    }

    /// Returns the size of the group descriptor table buffer, rounded up to
    /// whole sectors.
    pub(crate) fn group_descriptors_size(&self) -> usize {
        let table_len =
            self.block_groups_count() as usize * core::mem::size_of::<RawGroupDescriptor>();
        table_len.align_up(SECTOR_SIZE)
    }

    /// Logs the geometry and feature words, as reported at mount time.
    pub(crate) fn log_features(&self) {
        info!("ext2: block size is {}", self.block_size);
        info!(
            "ext2: optional features: {:?}, w-required features: {:?}, r/w-required features: {:?}",
            self.feature_compat, self.feature_ro_compat, self.feature_incompat
        );
    }
}

bitflags! {
    /// Compatible feature set.
    pub struct FeatureCompatSet: u32 {
        /// Preallocate some number of blocks to a directory when creating a new one
        const DIR_PREALLOC = 1 << 0;
        /// AFS server inodes exist
        const IMAGIC_INODES = 1 << 1;
        /// File system has a journal
        const HAS_JOURNAL = 1 << 2;
        /// Inodes have extended attributes
        const EXT_ATTR = 1 << 3;
        /// File system can resize itself for larger partitions
        const RESIZE_INO = 1 << 4;
        /// Directories use hash index
        const DIR_INDEX = 1 << 5;
    }
}

bitflags! {
    /// Incompatible feature set.
    pub struct FeatureInCompatSet: u32 {
        /// Compression is used
        const COMPRESSION = 1 << 0;
        /// Directory entries contain a type field
        const FILETYPE = 1 << 1;
        /// File system needs to replay its journal
        const RECOVER = 1 << 2;
        /// File system uses a journal device
        const JOURNAL_DEV = 1 << 3;
        /// Metablock block group
        const META_BG = 1 << 4;
    }
}

bitflags! {
    /// Readonly-compatible feature set.
    pub struct FeatureRoCompatSet: u32 {
        /// Sparse superblocks and group descriptor tables
        const SPARSE_SUPER = 1 << 0;
        /// File system uses a 64-bit file size
        const LARGE_FILE = 1 << 1;
        /// Directory contents are stored in the form of a Binary Tree
        const BTREE_DIR = 1 << 2;
    }
}

const_assert!(core::mem::size_of::<RawSuperBlock>() == SUPER_BLOCK_SIZE);

/// The raw superblock, exactly 1024 bytes in length.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod)]
pub(crate) struct RawSuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    /// The number to left-shift 1024 to obtain the block size.
    pub log_block_size: u32,
    /// The number to left-shift 1024 to obtain the fragment size.
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    /// Mount time.
    pub mtime: u32,
    /// Write time.
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub min_rev_level: u16,
    /// Time of last check.
    pub last_check_time: u32,
    pub check_interval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_idx: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted_dir: [u8; 64],
    pub algorithm_usage_bitmap: u32,
    pub prealloc_file_blocks: u8,
    pub prealloc_dir_blocks: u8,
    padding1: u16,
    /// Uuid of journal superblock.
    pub journal_uuid: [u8; 16],
    /// Inode number of journal file.
    pub journal_ino: u32,
    /// Device number of journal file.
    pub journal_dev: u32,
    /// Start of list of inodes to delete.
    pub last_orphan: u32,
    /// HTREE hash seed.
    pub hash_seed: [u32; 4],
    /// Default hash version to use
    pub def_hash_version: u8,
    reserved_char_pad: u8,
    reserved_word_pad: u16,
    /// Default mount options.
    pub default_mount_opts: u32,
    /// First metablock block group.
    pub first_meta_bg: u32,
    reserved: [u32; 190],
}
