//! Superblock: the on-disk layout record.
//!
//! Sector 0 holds the superblock, followed by the sector bitmap region, the
//! inode table, and the data area the bitmap allocates from. The engine
//! consumes the layout read-only after [`SuperBlock::new`] has computed it.

use crate::common::{div_round_up, BofsError, BofsResult};
use crate::inode::INODE_SIZE;
use crate::{u32, SECTOR_SIZE};

/// "BOFS" in ASCII.
pub const BOFS_MAGIC: u32 = 0x424f_4653;

pub const SUPER_BLOCK_LBA: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: u32,
    pub device_id: u32,
    pub sector_size: u32,
    pub total_sectors: u32,
    pub bitmap_lba: u32,
    pub bitmap_sectors: u32,
    pub inode_table_lba: u32,
    pub inode_table_sectors: u32,
    pub inode_nr_in_sector: u32,
    pub data_start_lba: u32,
}

impl SuperBlock {
    /// Compute the layout for a device of `total_sectors` sectors with room
    /// for `max_inodes` inode records. The bitmap region is sized for one
    /// bit per device sector, which over-provisions slightly but keeps the
    /// layout arithmetic independent of its own result.
    pub fn new(device_id: u32, total_sectors: u32, max_inodes: u32) -> BofsResult<Self> {
        let inode_nr_in_sector = (SECTOR_SIZE / INODE_SIZE) as u32;
        let bitmap_sectors = div_round_up(total_sectors, (SECTOR_SIZE * 8) as u32);
        let inode_table_sectors = div_round_up(max_inodes, inode_nr_in_sector);

        let bitmap_lba = SUPER_BLOCK_LBA + 1;
        let inode_table_lba = bitmap_lba + bitmap_sectors;
        let data_start_lba = inode_table_lba + inode_table_sectors;
        if data_start_lba >= total_sectors {
            return Err(BofsError::BadSuperBlock);
        }

        Ok(Self {
            magic: BOFS_MAGIC,
            device_id,
            sector_size: SECTOR_SIZE as u32,
            total_sectors,
            bitmap_lba,
            bitmap_sectors,
            inode_table_lba,
            inode_table_sectors,
            inode_nr_in_sector,
            data_start_lba,
        })
    }

    /// Serialize into the first bytes of a sector buffer, fixed field order,
    /// little-endian.
    pub fn encode(&self, buf: &mut [u8]) {
        let fields = [
            self.magic,
            self.device_id,
            self.sector_size,
            self.total_sectors,
            self.bitmap_lba,
            self.bitmap_sectors,
            self.inode_table_lba,
            self.inode_table_sectors,
            self.inode_nr_in_sector,
            self.data_start_lba,
        ];
        for (i, field) in fields.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
    }

    /// Deserialize and validate a superblock sector.
    pub fn decode(buf: &[u8]) -> BofsResult<Self> {
        let sb = Self {
            magic: u32!(buf[0..4]),
            device_id: u32!(buf[4..8]),
            sector_size: u32!(buf[8..12]),
            total_sectors: u32!(buf[12..16]),
            bitmap_lba: u32!(buf[16..20]),
            bitmap_sectors: u32!(buf[20..24]),
            inode_table_lba: u32!(buf[24..28]),
            inode_table_sectors: u32!(buf[28..32]),
            inode_nr_in_sector: u32!(buf[32..36]),
            data_start_lba: u32!(buf[36..40]),
        };
        if sb.magic != BOFS_MAGIC || sb.sector_size != SECTOR_SIZE as u32 {
            return Err(BofsError::BadSuperBlock);
        }
        Ok(sb)
    }

    /// Highest inode id the table can hold, exclusive.
    pub fn inode_capacity(&self) -> u32 {
        self.inode_table_sectors * self.inode_nr_in_sector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_regions_are_contiguous() {
        let sb = SuperBlock::new(1, 4096, 64).unwrap();
        assert_eq!(sb.bitmap_lba, 1);
        assert_eq!(sb.inode_table_lba, sb.bitmap_lba + sb.bitmap_sectors);
        assert_eq!(sb.data_start_lba, sb.inode_table_lba + sb.inode_table_sectors);
        assert!(sb.data_start_lba < sb.total_sectors);
        assert_eq!(sb.inode_capacity() % sb.inode_nr_in_sector, 0);
    }

    #[test]
    fn layout_too_small_is_rejected() {
        assert_eq!(SuperBlock::new(1, 3, 64), Err(BofsError::BadSuperBlock));
    }

    #[test]
    fn encode_decode_round_trip() {
        let sb = SuperBlock::new(7, 8192, 128).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        sb.encode(&mut buf);
        assert_eq!(SuperBlock::decode(&buf).unwrap(), sb);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let sb = SuperBlock::new(7, 8192, 128).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        sb.encode(&mut buf);
        buf[0] ^= 0xff;
        assert_eq!(SuperBlock::decode(&buf), Err(BofsError::BadSuperBlock));
    }
}
