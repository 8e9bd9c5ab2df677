// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// A block id on the device.
pub(crate) type Bid = u32;

/// Direct pointers to blocks.
pub(crate) const DIRECT_RANGE: Range<usize> = 0..12;
/// The number of direct blocks.
pub(crate) const DIRECT_CNT: u32 = DIRECT_RANGE.end as u32;

/// Indirect pointer to blocks.
pub(crate) const INDIRECT: usize = DIRECT_RANGE.end;
/// Doubly indirect pointer to blocks.
pub(crate) const DB_INDIRECT: usize = INDIRECT + 1;
/// Trebly indirect pointer to blocks.
pub(crate) const TB_INDIRECT: usize = DB_INDIRECT + 1;
/// The number of block pointers.
pub(crate) const BLOCK_PTR_CNT: usize = TB_INDIRECT + 1;

/// The size of a block id.
pub(crate) const BID_SIZE: usize = core::mem::size_of::<Bid>();

/// The pointers-to-blocks area of an inode.
///
/// For symlink inodes the same 60 bytes hold the link target instead.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod)]
pub(crate) struct BlockPtrs {
    inner: [Bid; BLOCK_PTR_CNT],
}

impl BlockPtrs {
    /// Returns the direct block id at `idx`.
    ///
    /// # Panics
    ///
    /// If `idx` is out of the direct range, this method panics.
    pub fn direct(&self, idx: usize) -> Bid {
        assert!(DIRECT_RANGE.contains(&idx));
        self.inner[idx]
    }

    /// Returns the block id of the single indirect block.
    pub fn indirect(&self) -> Bid {
        self.inner[INDIRECT]
    }

    /// Returns the block id of the double indirect block.
    pub fn db_indirect(&self) -> Bid {
        self.inner[DB_INDIRECT]
    }

    /// Returns the block id of the treble indirect block.
    pub fn tb_indirect(&self) -> Bid {
        self.inner[TB_INDIRECT]
    }

    /// Views the area as the raw bytes of a symlink target.
    pub fn as_symlink_bytes(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

/// The way a logical block is located: directly in the inode, through the
/// single-indirect table, or through two levels under the double-indirect
/// table.
///
/// The indirection counts depend on the block size, so classification takes
/// the per-indirect-block pointer count derived from the superblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BidPath {
    /// Direct reference; the block id sits at the given index in the inode.
    Direct(u32),
    /// Single level of indirection; the block id sits at the given index of
    /// the single-indirect table.
    Indirect(u32),
    /// Double level of indirection; the first value indexes the
    /// double-indirect table, the second the referenced second-level table.
    DbIndirect(u32, u32),
    /// At or beyond the treble-indirect range, which this driver does not
    /// map.
    TbIndirect,
}

impl BidPath {
    /// Classifies the logical block index `bid`.
    pub fn classify(bid: u32, per_indirect: u32) -> Self {
        if bid < DIRECT_CNT {
            Self::Direct(bid)
        } else if bid - DIRECT_CNT < per_indirect {
            Self::Indirect(bid - DIRECT_CNT)
        } else if bid - DIRECT_CNT - per_indirect < per_indirect * per_indirect {
            let db_bid = bid - DIRECT_CNT - per_indirect;
            Self::DbIndirect(db_bid / per_indirect, db_bid % per_indirect)
        } else {
            Self::TbIndirect
        }
    }

    /// Returns the number of blocks remaining before the next table
    /// boundary; fused reads never cross it.
    pub fn cnt_to_boundary(&self, per_indirect: u32) -> u32 {
        match self {
            Self::Direct(idx) => DIRECT_CNT - idx,
            Self::Indirect(idx) | Self::DbIndirect(_, idx) => per_indirect - idx,
            Self::TbIndirect => 0,
        }
    }

    /// Returns the index of the block within its innermost table.
    pub fn last_lvl_idx(&self) -> usize {
        match self {
            Self::Direct(idx) | Self::Indirect(idx) | Self::DbIndirect(_, idx) => *idx as usize,
            Self::TbIndirect => 0,
        }
    }
}
