//! Shared leaf types: the error taxonomy, integer helpers and the packed
//! date/time format used by the inode timestamps.

use onlyerror::Error;

pub type BofsResult<T> = Result<T, BofsError>;

/// Engine failures, reported synchronously to the immediate caller.
///
/// Nothing is retried internally and there is no rollback: a failed
/// allocate-and-link sequence leaves any already-linked sectors in place,
/// which is a controlled leak, not corruption. The bitmap and the
/// indirection tree stay mutually consistent up to the last completed step.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BofsError {
    /// A read or write to the backing device failed.
    #[error("device I/O failed")]
    DeviceIo,
    /// The sector bitmap has no free index left.
    #[error("no free sector available")]
    NoFreeSector,
    /// An operation that requires existing data was called on a
    /// zero-size inode.
    #[error("inode has no data")]
    EmptyFile,
    /// The logical block number lies beyond the double-indirect tier.
    #[error("logical block out of range")]
    BlockOutOfRange,
    /// The inode id resolves outside the on-disk inode table.
    #[error("inode id outside inode table")]
    InvalidInode,
    /// The superblock sector failed validation on open.
    #[error("superblock magic or sector size mismatch")]
    BadSuperBlock,
}

pub const fn div_round_up(n: u32, d: u32) -> u32 {
    (n + d - 1) / d
}

/// Calendar date and wall-clock time, as carried by the inode timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

/// Pack a [`DateTime`] into the on-disk timestamp format: FAT-style date in
/// the high 16 bits (year since 1980, month, day), FAT-style time in the low
/// 16 bits (hour, minute, second / 2).
pub fn pack_datetime(dt: DateTime) -> u32 {
    let date = ((dt.year.saturating_sub(1980) & 0x7f) << 9)
        | ((dt.month & 0xf) << 5)
        | (dt.day & 0x1f);
    let time = ((dt.hour & 0x1f) << 11) | ((dt.minute & 0x3f) << 5) | ((dt.second / 2) & 0x1f);
    (date << 16) | time
}

/// Inverse of [`pack_datetime`]. Seconds come back rounded down to an even
/// value, which is all the 5-bit field can hold.
pub fn unpack_datetime(raw: u32) -> DateTime {
    let date = raw >> 16;
    let time = raw & 0xffff;
    DateTime {
        year: ((date >> 9) & 0x7f) + 1980,
        month: (date >> 5) & 0xf,
        day: date & 0x1f,
        hour: (time >> 11) & 0x1f,
        minute: (time >> 5) & 0x3f,
        second: (time & 0x1f) * 2,
    }
}

bitflags::bitflags! {
    /// Inode type and permission bits, POSIX-style.
    pub struct BofsMode: u32 {
        const S_IFMT  = 0o170000;
        const S_IFREG = 0o100000;
        const S_IFDIR = 0o040000;
        const S_IFCHR = 0o020000;
        const S_IRWXU = 0o700;
        const S_IRWXG = 0o070;
        const S_IRWXO = 0o007;
    }
}

impl BofsMode {
    pub fn is_dir(self) -> bool {
        self & Self::S_IFMT == Self::S_IFDIR
    }

    pub fn is_file(self) -> bool {
        self & Self::S_IFMT == Self::S_IFREG
    }
}
