// SPDX-License-Identifier: MPL-2.0

//! A read-only Ext2 filesystem driver.
//!
//! The driver consumes a sector-granular [`BlockDevice`] and exposes inodes,
//! directory traversal, and demand-paged file data. Every open inode owns a
//! pair of [managed memory](crate::managed) objects for its file contents and
//! two more for its cached indirect blocks; page-in requests against the
//! backing halves are served by per-inode handlers that translate logical
//! file blocks to disk sectors through the inode's direct, single-indirect,
//! and double-indirect block pointers, fusing physically contiguous runs
//! into single device reads.
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
// The raw on-disk structures carry every field of the format, read or not.
#![allow(dead_code)]

extern crate alloc;

pub use block_dev::{BlockDevice, SECTOR_SIZE};
pub use dir::{DirEntry, FileCursor};
pub use error::{Error, Result};
pub use fs::{Ext2, ROOT_INO};
pub use inode::{FilePerm, FileType, Inode};
pub use managed::{
    BackingMemory, FrontalMemory, LockGuard, ManageHandler, ManageRequest, ManagedMemory,
    PAGE_SIZE,
};
pub use super_block::SuperBlock;

mod block_dev;
mod block_group;
mod block_ptr;
mod dir;
mod error;
mod fs;
mod inode;
mod managed;
mod pager;
mod prelude;
mod super_block;

#[cfg(test)]
mod test;

#[cfg(test)]
#[macro_use]
extern crate lazy_static;
