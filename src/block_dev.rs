// SPDX-License-Identifier: MPL-2.0

use crate::prelude::*;

/// The transfer unit of a block device, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// The sector-read port of an attached block device.
///
/// The driver is the only consumer of the device; `read_sectors` returns
/// once the transfer has fully completed.
pub trait BlockDevice: Send + Sync {
    /// Reads `buf.len() / SECTOR_SIZE` sectors starting at `sector` into
    /// `buf`. The buffer length must be a non-zero multiple of
    /// [`SECTOR_SIZE`].
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<()>;
}

/// Typed convenience reads on top of the sector port.
pub(crate) trait BlockDeviceExt: BlockDevice {
    /// Reads a POD value that lies within a single sector.
    ///
    /// `byte_offset` is an absolute device offset; the value must not cross
    /// a sector boundary.
    fn read_val_at<T: Pod>(&self, byte_offset: usize) -> Result<T> {
        let within = byte_offset % SECTOR_SIZE;
        debug_assert!(within + core::mem::size_of::<T>() <= SECTOR_SIZE);

        let mut sector = [0u8; SECTOR_SIZE];
        self.read_sectors((byte_offset / SECTOR_SIZE) as u64, &mut sector)?;
        Ok(T::from_bytes(
            &sector[within..within + core::mem::size_of::<T>()],
        ))
    }
}

impl<T: BlockDevice + ?Sized> BlockDeviceExt for T {}
