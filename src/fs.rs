// SPDX-License-Identifier: MPL-2.0

use crate::{
    block_group::GroupDescriptors,
    inode::Inode,
    prelude::*,
    super_block::{RawSuperBlock, SuperBlock, SUPER_BLOCK_OFFSET},
    BlockDevice, SECTOR_SIZE,
};

/// The root inode number.
pub const ROOT_INO: u32 = 2;

/// The Ext2 filesystem.
///
/// Opening a filesystem reads the primary superblock and the group
/// descriptor table; both are immutable afterwards. Inode records are handed
/// out through a cache that holds weak references only, so each record lives
/// exactly as long as its users.
pub struct Ext2 {
    block_device: Arc<dyn BlockDevice>,
    super_block: SuperBlock,
    group_descriptors: GroupDescriptors,
    inodes: Mutex<BTreeMap<u32, Weak<Inode>>>,
    weak_self: Weak<Ext2>,
}

impl Ext2 {
    /// Opens the filesystem on `block_device`.
    ///
    /// Reads the primary superblock at byte 1024, derives and validates the
    /// geometry, and loads the group descriptor table from the first block
    /// boundary at or after byte 2048.
    pub fn open(block_device: Arc<dyn BlockDevice>) -> Result<Arc<Self>> {
        let super_block = {
            let mut buf = vec![0u8; core::mem::size_of::<RawSuperBlock>()];
            block_device.read_sectors((SUPER_BLOCK_OFFSET / SECTOR_SIZE) as u64, &mut buf)?;
            SuperBlock::try_from(RawSuperBlock::from_bytes(&buf))?
        };
        super_block.log_features();

        let group_descriptors = {
            let mut buf = vec![0u8; super_block.group_descriptors_size()];
            let sector = (super_block.group_descriptors_offset() / SECTOR_SIZE) as u64;
            block_device.read_sectors(sector, &mut buf)?;
            GroupDescriptors::new(buf)
        };

        Ok(Arc::new_cyclic(|weak_self| Self {
            block_device,
            super_block,
            group_descriptors,
            inodes: Mutex::new(BTreeMap::new()),
            weak_self: weak_self.clone(),
        }))
    }

    /// Returns the filesystem geometry.
    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub(crate) fn group_descriptors(&self) -> &GroupDescriptors {
        &self.group_descriptors
    }

    pub(crate) fn block_device(&self) -> &dyn BlockDevice {
        &*self.block_device
    }

    /// Returns the root directory's inode record.
    pub fn access_root(&self) -> Result<Arc<Inode>> {
        self.access_inode(ROOT_INO)
    }

    /// Returns the record for inode `ino`, creating and initializing it if
    /// no live record exists.
    ///
    /// Concurrent calls for the same number resolve to one shared record,
    /// and its initializer runs exactly once.
    ///
    /// # Panics
    ///
    /// Inodes are 1-indexed; `ino` of 0 panics.
    pub fn access_inode(&self, ino: u32) -> Result<Arc<Inode>> {
        assert!(ino >= 1);

        let inode = {
            let mut inodes = self.inodes.lock();
            if let Some(inode) = inodes.get(&ino).and_then(Weak::upgrade) {
                return Ok(inode);
            }
            // Slots whose records have been released are reclaimed lazily.
            inodes.retain(|_, slot| slot.strong_count() > 0);

            let inode = Inode::new(ino, self.weak_self.clone());
            inodes.insert(ino, Arc::downgrade(&inode));
            inode
        };

        match inode.init(self) {
            Ok(()) => Ok(inode),
            Err(e) => {
                self.inodes.lock().remove(&ino);
                Err(e)
            }
        }
    }
}

impl Debug for Ext2 {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Ext2")
            .field("super_block", &self.super_block)
            .finish_non_exhaustive()
    }
}
