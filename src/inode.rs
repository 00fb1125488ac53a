//! Inode records and their lifecycle in the on-disk inode table.
//!
//! A record is 64 bytes, packed little-endian in declaration order; the
//! field order is part of the format. Record `id` lives at entry
//! `id % inode_nr_in_sector` of table sector `id / inode_nr_in_sector`.

use log::debug;

use crate::common::{div_round_up, BofsError, BofsMode, BofsResult};
use crate::device::BlockDevice;
use crate::fs::Bofs;
use crate::{u32, SECTOR_SIZE};

/// Root block pointers per inode, one per tier.
pub const BOFS_BLOCK_NR: usize = 3;

/// On-disk record size. 52 bytes of fields, zero-padded.
pub const INODE_SIZE: usize = 64;

/// One file or directory.
///
/// `block[0]` is the direct data sector, `block[1]` the single-indirect
/// table, `block[2]` the double-indirect root. Zero means the tier has
/// never been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inode {
    pub id: u32,
    pub mode: u32,
    pub flags: u32,
    pub links: u32,
    pub size: u32,
    pub crttime: u32,
    pub mdftime: u32,
    pub acstime: u32,
    pub device_id: u32,
    pub other_device_id: u32,
    pub block: [u32; BOFS_BLOCK_NR],
}

impl Inode {
    /// Fresh in-memory record: identity and timestamps filled in, size and
    /// link count zero, all tier roots unallocated. `now` is the packed
    /// creation time supplied by the caller (see
    /// [`crate::common::pack_datetime`]).
    pub fn new(id: u32, mode: BofsMode, flags: u32, device_id: u32, now: u32) -> Self {
        Self {
            id,
            mode: mode.bits(),
            flags,
            device_id,
            crttime: now,
            mdftime: now,
            acstime: now,
            ..Self::default()
        }
    }

    /// Copy the identity-independent fields of `src`: id, mode, links,
    /// size, timestamps and flags. The record is reset first, so the tier
    /// roots never travel along. Duplicating metadata is distinct from
    /// duplicating data.
    pub fn copy_metadata(&mut self, src: &Inode) {
        *self = Self::default();
        self.id = src.id;
        self.mode = src.mode;
        self.links = src.links;
        self.size = src.size;
        self.crttime = src.crttime;
        self.mdftime = src.mdftime;
        self.acstime = src.acstime;
        self.flags = src.flags;
    }

    /// Serialize into a 64-byte table entry.
    pub fn encode(&self, buf: &mut [u8]) {
        let fields = [
            self.id,
            self.mode,
            self.flags,
            self.links,
            self.size,
            self.crttime,
            self.mdftime,
            self.acstime,
            self.device_id,
            self.other_device_id,
            self.block[0],
            self.block[1],
            self.block[2],
        ];
        for (i, field) in fields.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
        }
        for byte in buf[fields.len() * 4..INODE_SIZE].iter_mut() {
            *byte = 0;
        }
    }

    /// Deserialize from a 64-byte table entry.
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            id: u32!(buf[0..4]),
            mode: u32!(buf[4..8]),
            flags: u32!(buf[8..12]),
            links: u32!(buf[12..16]),
            size: u32!(buf[16..20]),
            crttime: u32!(buf[20..24]),
            mdftime: u32!(buf[24..28]),
            acstime: u32!(buf[28..32]),
            device_id: u32!(buf[32..36]),
            other_device_id: u32!(buf[36..40]),
            block: [u32!(buf[40..44]), u32!(buf[44..48]), u32!(buf[48..52])],
        }
    }
}

impl<D: BlockDevice> Bofs<D> {
    /// Table sector lba and byte offset of record `id`. An id beyond the
    /// table is a hard error, never clipped.
    fn inode_location(&self, id: u32) -> BofsResult<(u32, usize)> {
        let sector_offset = id / self.sb.inode_nr_in_sector;
        if sector_offset >= self.sb.inode_table_sectors {
            return Err(BofsError::InvalidInode);
        }
        let lba = self.sb.inode_table_lba + sector_offset;
        let entry = (id % self.sb.inode_nr_in_sector) as usize * INODE_SIZE;
        Ok((lba, entry))
    }

    /// Load record `id` from the inode table.
    pub fn load_inode(&self, id: u32) -> BofsResult<Inode> {
        let (lba, entry) = self.inode_location(id)?;
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sector(lba, &mut buf)?;
        Ok(Inode::decode(&buf[entry..entry + INODE_SIZE]))
    }

    /// Write `inode` back to its table entry, read-modify-write of the
    /// owning sector.
    pub fn sync_inode(&self, inode: &Inode) -> BofsResult<()> {
        let (lba, entry) = self.inode_location(inode.id)?;
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sector(lba, &mut buf)?;
        inode.encode(&mut buf[entry..entry + INODE_SIZE]);
        self.write_sector(lba, &buf)
    }

    /// Zero the on-disk record of `inode`, used on deletion after
    /// [`Bofs::release_all`].
    pub fn empty_inode(&self, inode: &Inode) -> BofsResult<()> {
        let (lba, entry) = self.inode_location(inode.id)?;
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sector(lba, &mut buf)?;
        buf[entry..entry + INODE_SIZE].fill(0);
        self.write_sector(lba, &buf)
    }

    /// Copy the data of `src` into `dst`, block by block, allocating in
    /// `dst` as needed. A zero-size source is an [`BofsError::EmptyFile`]
    /// failure and performs no sector I/O.
    pub fn copy_inode_data(&mut self, dst: &mut Inode, src: &mut Inode) -> BofsResult<()> {
        if src.size == 0 {
            return Err(BofsError::EmptyFile);
        }
        let blocks = div_round_up(src.size, SECTOR_SIZE as u32);
        debug!("copy inode {} -> {}: {} blocks", src.id, dst.id, blocks);

        let mut buf = [0u8; SECTOR_SIZE];
        for block_id in 0..blocks {
            let src_lba = self.locate_block(src, block_id)?;
            self.read_sector(src_lba, &mut buf)?;
            let dst_lba = self.locate_block(dst, block_id)?;
            self.write_sector(dst_lba, &buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_encode_decode_round_trip() {
        let mut inode = Inode::new(5, BofsMode::S_IFREG, 0x2, 1, 0x4f2d_6b5a);
        inode.links = 1;
        inode.size = 1234;
        inode.block = [17, 18, 0];

        let mut buf = [0xffu8; INODE_SIZE];
        inode.encode(&mut buf);
        assert_eq!(Inode::decode(&buf), inode);
        // Padding is part of the format and must be zeroed.
        assert!(buf[52..].iter().all(|&b| b == 0));
    }

    #[test]
    fn new_inode_has_no_tier_roots() {
        let inode = Inode::new(9, BofsMode::S_IFDIR, 0, 2, 42);
        assert_eq!(inode.block, [0; BOFS_BLOCK_NR]);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.links, 0);
        assert_eq!(inode.crttime, 42);
        assert_eq!(inode.mdftime, 42);
        assert_eq!(inode.acstime, 42);
    }

    #[test]
    fn copy_metadata_never_copies_tier_roots() {
        let mut src = Inode::new(3, BofsMode::S_IFREG, 7, 1, 100);
        src.links = 2;
        src.size = 4096;
        src.block = [10, 11, 12];

        let mut dst = Inode::new(8, BofsMode::S_IFDIR, 0, 1, 200);
        dst.block = [20, 0, 0];
        dst.copy_metadata(&src);

        assert_eq!(dst.id, src.id);
        assert_eq!(dst.mode, src.mode);
        assert_eq!(dst.links, src.links);
        assert_eq!(dst.size, src.size);
        assert_eq!(dst.crttime, src.crttime);
        assert_eq!(dst.flags, src.flags);
        assert_eq!(dst.block, [0; BOFS_BLOCK_NR]);
    }
}
