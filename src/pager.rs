// SPDX-License-Identifier: MPL-2.0

//! Per-inode page-in handlers.
//!
//! Every open inode arms three handlers: one serving its file data and two
//! serving its indirect-block caches. Each handler resolves the blocks a
//! manage request covers and reads them from the device before completing
//! the load.

use log::debug;

use crate::{
    block_ptr::{Bid, BID_SIZE},
    inode::{DeviceRangeReader, Inode},
    managed::{ManageHandler, ManageRequest},
    prelude::*,
};

/// Serves manage requests for an inode's file contents.
///
/// Requests must be block-aligned; their length is any whole number of
/// pages. Blocks are resolved through the inode's block pointers and fused
/// into as few device reads as the on-disk layout allows.
pub(crate) struct DataPager {
    inode: Weak<Inode>,
}

impl DataPager {
    pub fn new(inode: Weak<Inode>) -> Self {
        Self { inode }
    }
}

impl ManageHandler for DataPager {
    fn manage(&self, mut req: ManageRequest<'_>) -> Result<()> {
        let inode = self.inode.upgrade().ok_or(Error::IoFailed)?;
        let fs = inode.fs()?;
        let meta = inode.meta()?;
        let sb = fs.super_block();
        let block_size = sb.block_size();

        let offset = req.offset();
        let length = req.length();
        debug!(
            "ext2: paging in [{:#x}, {:#x}) of inode {}",
            offset,
            offset + length,
            inode.ino()
        );

        if offset % block_size != 0 {
            return Err(Error::AlignmentViolation);
        }
        let read_size = length.min(meta.size.saturating_sub(offset));
        let num_blocks = read_size.div_ceil(block_size);
        if num_blocks * block_size > length {
            return Err(Error::AlignmentViolation);
        }

        let window = req.window();
        let mut reader = {
            let start = (offset / block_size) as Bid;
            DeviceRangeReader::new(meta, sb, start..start + num_blocks as Bid)
        };
        let mut progress = 0;
        while let Some(dev_range) = reader.next()? {
            let run_blocks = (dev_range.end - dev_range.start) as usize;
            let run_bytes = &mut window[progress * block_size..(progress + run_blocks) * block_size];
            fs.block_device().read_sectors(
                dev_range.start as u64 * sb.sectors_per_block() as u64,
                run_bytes,
            )?;
            progress += run_blocks;
        }

        // The final block may extend past the end of the file; those bytes
        // read as zero through the frontal handle.
        window[read_size..num_blocks * block_size].fill(0);

        req.complete_load();
        Ok(())
    }
}

/// Serves manage requests for an inode's indirect-block caches.
///
/// Order 1 caches the three inode-level indirect blocks in slots 0..3
/// (single-, double-, treble-indirect). Order 2 caches the second-level
/// blocks under the double-indirect block, one slot per first-level
/// position; their ids are looked up through the order-1 cache, whose slot 0
/// holds the single-indirect block and whose slots 1..3 hold the roots of
/// the deeper trees.
pub(crate) struct IndirectPager {
    inode: Weak<Inode>,
    order: u32,
}

impl IndirectPager {
    pub fn new(inode: Weak<Inode>, order: u32) -> Self {
        assert!(order == 1 || order == 2);
        Self { inode, order }
    }
}

impl ManageHandler for IndirectPager {
    fn manage(&self, mut req: ManageRequest<'_>) -> Result<()> {
        let inode = self.inode.upgrade().ok_or(Error::IoFailed)?;
        let fs = inode.fs()?;
        let meta = inode.meta()?;
        let sb = fs.super_block();

        let block_page = 1usize << sb.block_pages_shift();
        // Multi-page requests are not supported for the caches; the kernel
        // asks for one block page at a time.
        if req.length() != block_page || req.offset() % block_page != 0 {
            return Err(Error::AlignmentViolation);
        }

        let element = req.offset() >> sb.block_pages_shift();
        let block: Bid = match self.order {
            1 => match element {
                0 => meta.block_ptrs.indirect(),
                1 => meta.block_ptrs.db_indirect(),
                2 => meta.block_ptrs.tb_indirect(),
                _ => return Err(Error::AlignmentViolation),
            },
            2 => {
                let first_lvl = element >> (sb.block_shift() - 2);
                let within_first = element & ((1usize << (sb.block_shift() - 2)) - 1);
                let slot = (1 + first_lvl) << sb.block_pages_shift();
                let window = meta.indirect1.frontal.lock(slot, block_page)?;
                window.read_val::<Bid>(slot + within_first * BID_SIZE)?
            }
            _ => unreachable!(),
        };
        if block == 0 {
            return Err(Error::HoleEncountered);
        }
        debug!(
            "ext2: caching indirect block {} (order {}, slot {}) of inode {}",
            block,
            self.order,
            element,
            inode.ino()
        );

        // One filesystem block per slot; the rest of the slot stays zero.
        let window = req.window();
        fs.block_device().read_sectors(
            block as u64 * sb.sectors_per_block() as u64,
            &mut window[..sb.block_size()],
        )?;

        req.complete_load();
        Ok(())
    }
}
