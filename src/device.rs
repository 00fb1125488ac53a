//! Raw sector I/O.
//!
//! The engine talks to its backing store through [`BlockDevice`], one
//! synchronous call per sector transfer. Receivers are `&self` so a device
//! can be shared with the layers above; implementations provide their own
//! interior mutability.

use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::common::{BofsError, BofsResult};
use crate::SECTOR_SIZE;

pub trait BlockDevice {
    /// Read one sector at `lba` into `buf`. `buf` must be exactly
    /// [`SECTOR_SIZE`] bytes.
    fn read_sector(&self, lba: u32, buf: &mut [u8]) -> BofsResult<()>;

    /// Write one sector at `lba` from `buf`. `buf` must be exactly
    /// [`SECTOR_SIZE`] bytes.
    fn write_sector(&self, lba: u32, buf: &[u8]) -> BofsResult<()>;

    /// Number of sectors the device exposes.
    fn sector_count(&self) -> u32;
}

/// Sector-addressed memory device, for tests and hosted harnesses.
pub struct RamDisk {
    sectors: u32,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            sectors,
            data: Mutex::new(vec![0; sectors as usize * SECTOR_SIZE]),
        }
    }

    fn range(&self, lba: u32, len: usize) -> BofsResult<core::ops::Range<usize>> {
        if lba >= self.sectors || len != SECTOR_SIZE {
            return Err(BofsError::DeviceIo);
        }
        let start = lba as usize * SECTOR_SIZE;
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&self, lba: u32, buf: &mut [u8]) -> BofsResult<()> {
        let range = self.range(lba, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_sector(&self, lba: u32, buf: &[u8]) -> BofsResult<()> {
        let range = self.range(lba, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_disk_round_trip() {
        let disk = RamDisk::new(4);
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0] = 0xab;
        sector[SECTOR_SIZE - 1] = 0xcd;
        disk.write_sector(2, &sector).unwrap();

        let mut back = [0u8; SECTOR_SIZE];
        disk.read_sector(2, &mut back).unwrap();
        assert_eq!(sector, back);
    }

    #[test]
    fn ram_disk_out_of_range() {
        let disk = RamDisk::new(4);
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.read_sector(4, &mut buf), Err(BofsError::DeviceIo));
        assert_eq!(disk.write_sector(9, &buf), Err(BofsError::DeviceIo));
    }

    #[test]
    fn ram_disk_rejects_partial_buffers() {
        let disk = RamDisk::new(1);
        let mut short = [0u8; 16];
        assert_eq!(disk.read_sector(0, &mut short), Err(BofsError::DeviceIo));
    }
}
