// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// An underlying sector read or memory operation failed.
    IoFailed,
    /// The superblock magic is wrong, or the derived geometry is impossible.
    GeometryInvalid,
    /// The on-disk inode mode is not a regular file, directory, or symlink.
    UnsupportedInodeType,
    /// A logical block index falls into the triple-indirect range.
    TripleIndirectUnsupported,
    /// A logical block maps to physical block 0 (sparse region).
    HoleEncountered,
    /// A manage event or directory record violates alignment or size
    /// constraints.
    AlignmentViolation,
    /// A directory walk would overrun the directory's file size.
    DirectoryCorrupt,
}

pub type Result<T> = core::result::Result<T, Error>;
