/*
 * mntkit: safe Linux mount, filesystem-traversal, and ACL primitives
 * Copyright (C) 2023-2025 The mntkit Authors
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU Lesser General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
 * or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
 * for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Semantic mapping of `statx(2)`.
//!
//! [`StatxRecord`] copies every kernel field into a typed attribute. Fields
//! the caller did not request (or the kernel could not provide) are `None`
//! rather than silently zero, which is the distinction `stx_mask` exists to
//! make.

use crate::{
    error::{Error, ErrorImpl},
    syscalls,
};

use std::{os::unix::io::AsFd, path::Path};

use bitflags::bitflags;
use rustix::fs as rustix_fs;

pub use rustix::fs::AtFlags;

bitflags! {
    /// `STATX_*` field-request mask.
    ///
    /// The values match `linux/stat.h`; the post-6.11 bits are carried here
    /// directly because libc headers lag them.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct StatxMask: u32 {
        const TYPE = 0x0001;
        const MODE = 0x0002;
        const NLINK = 0x0004;
        const UID = 0x0008;
        const GID = 0x0010;
        const ATIME = 0x0020;
        const MTIME = 0x0040;
        const CTIME = 0x0080;
        const INO = 0x0100;
        const SIZE = 0x0200;
        const BLOCKS = 0x0400;
        const BASIC_STATS = 0x07ff;
        const BTIME = 0x0800;
        const MNT_ID = 0x1000;
        const DIOALIGN = 0x2000;
        const MNT_ID_UNIQUE = 0x4000;
        const SUBVOL = 0x8000;
        const WRITE_ATOMIC = 0x1_0000;
        const DIO_READ_ALIGN = 0x2_0000;

        // Don't clobber unknown STATX_* bits.
        const _ = !0;
    }
}

bitflags! {
    /// `STATX_ATTR_*` inode attribute indicators.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct StatxAttributes: u64 {
        const COMPRESSED = 0x0004;
        const IMMUTABLE = 0x0010;
        const APPEND = 0x0020;
        const NODUMP = 0x0040;
        const ENCRYPTED = 0x0800;
        const AUTOMOUNT = 0x1000;
        const MOUNT_ROOT = 0x2000;
        const VERITY = 0x10_0000;
        const DAX = 0x20_0000;
        const WRITE_ATOMIC = 0x40_0000;

        const _ = !0;
    }
}

/// `struct statx_timestamp`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RawStatxTimestamp {
    pub(crate) tv_sec: i64,
    pub(crate) tv_nsec: u32,
    pub(crate) __reserved: i32,
}

/// `struct statx`, including the fields added after Linux 6.11
/// (`stx_subvol`, the atomic-write limits, the direct-IO read alignment).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RawStatx {
    pub(crate) stx_mask: u32,
    pub(crate) stx_blksize: u32,
    pub(crate) stx_attributes: u64,
    pub(crate) stx_nlink: u32,
    pub(crate) stx_uid: u32,
    pub(crate) stx_gid: u32,
    pub(crate) stx_mode: u16,
    pub(crate) __spare0: [u16; 1],
    pub(crate) stx_ino: u64,
    pub(crate) stx_size: u64,
    pub(crate) stx_blocks: u64,
    pub(crate) stx_attributes_mask: u64,
    pub(crate) stx_atime: RawStatxTimestamp,
    pub(crate) stx_btime: RawStatxTimestamp,
    pub(crate) stx_ctime: RawStatxTimestamp,
    pub(crate) stx_mtime: RawStatxTimestamp,
    pub(crate) stx_rdev_major: u32,
    pub(crate) stx_rdev_minor: u32,
    pub(crate) stx_dev_major: u32,
    pub(crate) stx_dev_minor: u32,
    pub(crate) stx_mnt_id: u64,
    pub(crate) stx_dio_mem_align: u32,
    pub(crate) stx_dio_offset_align: u32,
    pub(crate) stx_subvol: u64,
    pub(crate) stx_atomic_write_unit_min: u32,
    pub(crate) stx_atomic_write_unit_max: u32,
    pub(crate) stx_atomic_write_segments_max: u32,
    pub(crate) stx_dio_read_offset_align: u32,
    pub(crate) stx_atomic_write_unit_max_opt: u32,
    pub(crate) __spare2: [u32; 1],
    pub(crate) __spare3: [u64; 8],
}

/// A kernel timestamp, exposed both as fractional seconds and as total
/// nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: u32,
}

impl Timespec {
    fn from_raw(ts: &RawStatxTimestamp) -> Self {
        Self {
            tv_sec: ts.tv_sec,
            tv_nsec: ts.tv_nsec,
        }
    }

    /// The timestamp as (lossy) fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.tv_sec as f64 + self.tv_nsec as f64 * 1e-9
    }

    /// The timestamp as total nanoseconds since the epoch.
    pub fn as_nanos(&self) -> i64 {
        self.tv_sec * 1_000_000_000 + self.tv_nsec as i64
    }
}

/// A `(major, minor)` device number pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Device {
    pub major: u32,
    pub minor: u32,
}

impl Device {
    /// The packed `dev_t` representation.
    pub fn packed(&self) -> u64 {
        rustix_fs::makedev(self.major, self.minor)
    }
}

/// Object kind derived from `stx_mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    Directory,
    Regular,
    Symlink,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
}

impl FileKind {
    pub(crate) fn from_mode(mode: u16) -> Option<Self> {
        match u32::from(mode) & libc::S_IFMT {
            libc::S_IFDIR => Some(FileKind::Directory),
            libc::S_IFREG => Some(FileKind::Regular),
            libc::S_IFLNK => Some(FileKind::Symlink),
            libc::S_IFBLK => Some(FileKind::BlockDevice),
            libc::S_IFCHR => Some(FileKind::CharacterDevice),
            libc::S_IFIFO => Some(FileKind::Fifo),
            libc::S_IFSOCK => Some(FileKind::Socket),
            _ => None,
        }
    }
}

/// Typed result of a `statx(2)` call.
///
/// Any field whose `STATX_*` bit is missing from the reply mask is `None`.
/// The device numbers and attribute words are always filled by the kernel
/// and so are not optional.
#[derive(Clone, Debug, Default)]
pub struct StatxRecord {
    /// The reply mask: which optional fields below are populated.
    pub mask: StatxMask,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// Extra inode attribute indicators.
    pub attributes: StatxAttributes,
    /// Which bits of `attributes` this filesystem supports.
    pub attributes_mask: StatxAttributes,
    pub nlink: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// File type and permission bits (`st_mode` layout).
    pub mode: Option<u16>,
    pub ino: Option<u64>,
    pub size: Option<u64>,
    pub blocks: Option<u64>,
    pub atime: Option<Timespec>,
    /// Birth (creation) time.
    pub btime: Option<Timespec>,
    pub ctime: Option<Timespec>,
    pub mtime: Option<Timespec>,
    /// Device this inode represents (device special files only).
    pub rdev: Device,
    /// Device containing the inode.
    pub dev: Device,
    /// Mount id of the containing mount. `mnt_id_unique` records whether
    /// this is the 64-bit unique id or the reusable 32-bit one.
    pub mnt_id: Option<u64>,
    pub mnt_id_unique: bool,
    pub dio_mem_align: Option<u32>,
    pub dio_offset_align: Option<u32>,
    pub subvol: Option<u64>,
    pub atomic_write_unit_min: Option<u32>,
    pub atomic_write_unit_max: Option<u32>,
    pub atomic_write_unit_max_opt: Option<u32>,
    pub atomic_write_segments_max: Option<u32>,
    pub dio_read_offset_align: Option<u32>,
}

impl StatxRecord {
    pub(crate) fn from_raw(stx: &RawStatx) -> Self {
        let mask = StatxMask::from_bits_retain(stx.stx_mask);
        let field = |bit: StatxMask| mask.contains(bit);

        Self {
            mask,
            blksize: stx.stx_blksize,
            attributes: StatxAttributes::from_bits_retain(stx.stx_attributes),
            attributes_mask: StatxAttributes::from_bits_retain(stx.stx_attributes_mask),
            nlink: field(StatxMask::NLINK).then_some(stx.stx_nlink),
            uid: field(StatxMask::UID).then_some(stx.stx_uid),
            gid: field(StatxMask::GID).then_some(stx.stx_gid),
            mode: (field(StatxMask::TYPE) || field(StatxMask::MODE)).then_some(stx.stx_mode),
            ino: field(StatxMask::INO).then_some(stx.stx_ino),
            size: field(StatxMask::SIZE).then_some(stx.stx_size),
            blocks: field(StatxMask::BLOCKS).then_some(stx.stx_blocks),
            atime: field(StatxMask::ATIME).then(|| Timespec::from_raw(&stx.stx_atime)),
            btime: field(StatxMask::BTIME).then(|| Timespec::from_raw(&stx.stx_btime)),
            ctime: field(StatxMask::CTIME).then(|| Timespec::from_raw(&stx.stx_ctime)),
            mtime: field(StatxMask::MTIME).then(|| Timespec::from_raw(&stx.stx_mtime)),
            rdev: Device {
                major: stx.stx_rdev_major,
                minor: stx.stx_rdev_minor,
            },
            dev: Device {
                major: stx.stx_dev_major,
                minor: stx.stx_dev_minor,
            },
            mnt_id: (field(StatxMask::MNT_ID) || field(StatxMask::MNT_ID_UNIQUE))
                .then_some(stx.stx_mnt_id),
            mnt_id_unique: field(StatxMask::MNT_ID_UNIQUE),
            dio_mem_align: field(StatxMask::DIOALIGN).then_some(stx.stx_dio_mem_align),
            dio_offset_align: field(StatxMask::DIOALIGN).then_some(stx.stx_dio_offset_align),
            subvol: field(StatxMask::SUBVOL).then_some(stx.stx_subvol),
            atomic_write_unit_min: field(StatxMask::WRITE_ATOMIC)
                .then_some(stx.stx_atomic_write_unit_min),
            atomic_write_unit_max: field(StatxMask::WRITE_ATOMIC)
                .then_some(stx.stx_atomic_write_unit_max),
            atomic_write_unit_max_opt: field(StatxMask::WRITE_ATOMIC)
                .then_some(stx.stx_atomic_write_unit_max_opt),
            atomic_write_segments_max: field(StatxMask::WRITE_ATOMIC)
                .then_some(stx.stx_atomic_write_segments_max),
            dio_read_offset_align: field(StatxMask::DIO_READ_ALIGN)
                .then_some(stx.stx_dio_read_offset_align),
        }
    }

    /// Object kind, if `STATX_TYPE` was returned.
    pub fn file_kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode?)
    }

    pub fn is_dir(&self) -> bool {
        self.file_kind() == Some(FileKind::Directory)
    }
}

/// Get extended attributes of a file.
///
/// Thin typed wrapper over `statx(2)`; use [`AtFlags::EMPTY_PATH`] with an
/// empty `path` to stat an open file descriptor directly.
pub fn statx<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: AtFlags,
    mask: StatxMask,
) -> Result<StatxRecord, Error> {
    let stx = syscalls::statx(dirfd, path, flags, mask).map_err(|err| ErrorImpl::RawOsError {
        operation: "statx".into(),
        source: err,
    })?;
    Ok(StatxRecord::from_raw(&stx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syscalls;

    use std::io::Write;

    use anyhow::Error;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn timespec_forms() {
        let ts = Timespec {
            tv_sec: 5,
            tv_nsec: 500_000_000,
        };
        assert_eq!(ts.as_secs_f64(), 5.5);
        assert_eq!(ts.as_nanos(), 5_500_000_000);

        let negative = Timespec {
            tv_sec: -2,
            tv_nsec: 0,
        };
        assert_eq!(negative.as_nanos(), -2_000_000_000);
    }

    #[test]
    fn device_packing() {
        let dev = Device { major: 8, minor: 1 };
        assert_eq!(dev.packed(), rustix::fs::makedev(8, 1));
        assert_eq!(
            rustix::fs::major(dev.packed()),
            8,
            "major must round-trip through packing"
        );
        assert_eq!(rustix::fs::minor(dev.packed()), 1);
    }

    #[test]
    fn raw_statx_is_kernel_sized() {
        // The kernel's struct statx has been 256 bytes since its
        // introduction; a mismatch means a field was added or dropped
        // without adjusting the spare words.
        assert_eq!(std::mem::size_of::<RawStatx>(), 256);
    }

    #[test]
    fn unrequested_fields_are_absent() {
        let mut stx = RawStatx {
            stx_mask: (StatxMask::INO | StatxMask::SIZE).bits(),
            stx_ino: 42,
            stx_size: 1337,
            ..Default::default()
        };
        // The kernel is free to fill fields it was not asked about; those
        // must still come back as None.
        stx.stx_nlink = 3;
        stx.stx_btime.tv_sec = 1234;

        let record = StatxRecord::from_raw(&stx);
        assert_eq!(record.ino, Some(42));
        assert_eq!(record.size, Some(1337));
        assert_eq!(record.nlink, None, "unrequested nlink must be absent");
        assert_eq!(record.btime, None, "unrequested btime must be absent");
        assert_eq!(record.mode, None);
        assert_eq!(record.mnt_id, None);
        assert!(!record.mnt_id_unique);
    }

    #[test]
    fn statx_regular_file() -> Result<(), Error> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"hello world")?;

        let record = statx(
            syscalls::AT_FDCWD,
            file.path(),
            AtFlags::SYMLINK_NOFOLLOW,
            StatxMask::BASIC_STATS,
        )?;

        assert_eq!(record.size, Some(11));
        assert_eq!(record.file_kind(), Some(FileKind::Regular));
        assert!(!record.is_dir());
        assert!(record.ino.is_some());
        assert!(record.mtime.is_some());
        Ok(())
    }

    #[test]
    fn statx_empty_path_on_fd() -> Result<(), Error> {
        let file = NamedTempFile::new()?;

        let record = statx(
            file.as_file(),
            "",
            AtFlags::EMPTY_PATH | AtFlags::SYMLINK_NOFOLLOW,
            StatxMask::BASIC_STATS,
        )?;
        assert_eq!(record.file_kind(), Some(FileKind::Regular));
        Ok(())
    }
}
