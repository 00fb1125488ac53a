//! The engine front: a [`Bofs`] owns the block device, the superblock and
//! the sector bitmap, and carries the allocate/free primitives the
//! translator and the release path share.

use log::{debug, error};

use crate::bitmap::SectorBitmap;
use crate::common::{BofsError, BofsResult};
use crate::device::BlockDevice;
use crate::super_block::{SuperBlock, SUPER_BLOCK_LBA};
use crate::SECTOR_SIZE;

pub struct Bofs<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) sb: SuperBlock,
    pub(crate) bitmap: SectorBitmap,
}

impl<D: BlockDevice> Bofs<D> {
    /// Lay a fresh filesystem onto `device`: superblock at sector 0, zeroed
    /// bitmap region, zeroed inode table.
    pub fn format(device: D, device_id: u32, max_inodes: u32) -> BofsResult<Self> {
        let total_sectors = device.sector_count();
        let sb = SuperBlock::new(device_id, total_sectors, max_inodes)?;
        debug!(
            "format device {}: {} sectors, data starts at lba {}",
            device_id, total_sectors, sb.data_start_lba
        );

        let mut buf = [0u8; SECTOR_SIZE];
        sb.encode(&mut buf);
        device.write_sector(SUPER_BLOCK_LBA, &buf)?;

        let zeroes = [0u8; SECTOR_SIZE];
        for lba in sb.bitmap_lba..sb.data_start_lba {
            device.write_sector(lba, &zeroes)?;
        }

        let bitmap = SectorBitmap::new(&sb);
        Ok(Self { device, sb, bitmap })
    }

    /// Open a previously formatted device: validate the superblock and
    /// rebuild the bitmap mirror.
    pub fn open(device: D) -> BofsResult<Self> {
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(SUPER_BLOCK_LBA, &mut buf)?;
        let sb = SuperBlock::decode(&buf)?;
        if sb.total_sectors > device.sector_count() {
            return Err(BofsError::BadSuperBlock);
        }
        let bitmap = SectorBitmap::load(&device, &sb)?;
        Ok(Self { device, sb, bitmap })
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.sb
    }

    pub fn allocator(&self) -> &SectorBitmap {
        &self.bitmap
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub(crate) fn read_sector(&self, lba: u32, buf: &mut [u8]) -> BofsResult<()> {
        self.device.read_sector(lba, buf).map_err(|e| {
            error!("device {}: read of sector {} failed", self.sb.device_id, lba);
            e
        })
    }

    pub(crate) fn write_sector(&self, lba: u32, buf: &[u8]) -> BofsResult<()> {
        self.device.write_sector(lba, buf).map_err(|e| {
            error!("device {}: write of sector {} failed", self.sb.device_id, lba);
            e
        })
    }

    /// Allocate one data sector and persist the owning bitmap sector before
    /// handing the address out.
    pub(crate) fn alloc_sector(&mut self) -> BofsResult<u32> {
        let idx = self.bitmap.alloc().ok_or_else(|| {
            error!("device {}: sector bitmap exhausted", self.sb.device_id);
            BofsError::NoFreeSector
        })?;
        self.bitmap.sync(&self.device, idx)?;
        Ok(self.bitmap.idx_to_lba(idx))
    }

    /// Release one data sector: wipe its content on disk, clear its bitmap
    /// bit and persist the owning bitmap sector.
    pub(crate) fn free_sector(&mut self, lba: u32) -> BofsResult<()> {
        let zeroes = [0u8; SECTOR_SIZE];
        self.write_sector(lba, &zeroes)?;
        let idx = self.bitmap.lba_to_idx(lba);
        self.bitmap.free(idx);
        self.bitmap.sync(&self.device, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDisk;

    #[test]
    fn format_then_open_round_trip() {
        let fs = Bofs::format(RamDisk::new(2048), 3, 64).unwrap();
        let sb = *fs.super_block();
        let free = fs.allocator().free_count();

        let reopened = Bofs::open(fs.device).unwrap();
        assert_eq!(*reopened.super_block(), sb);
        assert_eq!(reopened.allocator().free_count(), free);
    }

    #[test]
    fn open_blank_device_fails() {
        assert_eq!(
            Bofs::open(RamDisk::new(64)).err(),
            Some(BofsError::BadSuperBlock)
        );
    }

    #[test]
    fn alloc_persists_before_returning() {
        let mut fs = Bofs::format(RamDisk::new(2048), 0, 64).unwrap();
        let lba = fs.alloc_sector().unwrap();
        assert!(lba >= fs.sb.data_start_lba);

        // The bit must already be on disk: a reopen sees it.
        let reopened = Bofs::open(fs.device).unwrap();
        assert!(reopened.bitmap.is_used(reopened.bitmap.lba_to_idx(lba)));
    }

    #[test]
    fn free_wipes_and_returns_sector() {
        let mut fs = Bofs::format(RamDisk::new(2048), 0, 64).unwrap();
        let lba = fs.alloc_sector().unwrap();
        let garbage = [0x5au8; SECTOR_SIZE];
        fs.write_sector(lba, &garbage).unwrap();

        let free_before = fs.allocator().free_count();
        fs.free_sector(lba).unwrap();
        assert_eq!(fs.allocator().free_count(), free_before + 1);

        let mut buf = [0u8; SECTOR_SIZE];
        fs.read_sector(lba, &mut buf).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }
}
