// SPDX-License-Identifier: MPL-2.0

use static_assertions::const_assert;

use crate::prelude::*;

/// The group descriptor table, loaded once at mount time and immutable
/// afterwards.
///
/// Blocks are clustered into block groups; each descriptor records where
/// the group's important data structures are located.
pub(crate) struct GroupDescriptors {
    buffer: Vec<u8>,
}

impl GroupDescriptors {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    /// Returns the descriptor of the group at `idx`.
    pub fn get(&self, idx: usize) -> Result<GroupDescriptor> {
        let size = core::mem::size_of::<RawGroupDescriptor>();
        let offset = idx.checked_mul(size).ok_or(Error::GeometryInvalid)?;
        let bytes = self
            .buffer
            .get(offset..offset + size)
            .ok_or(Error::GeometryInvalid)?;
        Ok(GroupDescriptor::from(RawGroupDescriptor::from_bytes(bytes)))
    }
}

/// The in-memory block group descriptor.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GroupDescriptor {
    /// Blocks usage bitmap block.
    pub block_bitmap_bid: u32,
    /// Inodes usage bitmap block.
    pub inode_bitmap_bid: u32,
    /// Starting block of the inode table.
    pub inode_table_bid: u32,
    /// Number of free blocks in the group.
    pub free_blocks_count: u16,
    /// Number of free inodes in the group.
    pub free_inodes_count: u16,
    /// Number of directories in the group.
    pub dirs_count: u16,
}

impl From<RawGroupDescriptor> for GroupDescriptor {
    fn from(desc: RawGroupDescriptor) -> Self {
        Self {
            block_bitmap_bid: desc.block_bitmap,
            inode_bitmap_bid: desc.inode_bitmap,
            inode_table_bid: desc.inode_table,
            free_blocks_count: desc.free_blocks_count,
            free_inodes_count: desc.free_inodes_count,
            dirs_count: desc.dirs_count,
        }
    }
}

const_assert!(core::mem::size_of::<RawGroupDescriptor>() == 32);

/// The raw block group descriptor.
///
/// The table starts on the first block boundary at or after byte 2048.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod)]
pub(crate) struct RawGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub dirs_count: u16,
    pad: u16,
    reserved: [u32; 3],
}
