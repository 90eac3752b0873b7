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

//! Mount enumeration and the new mount API.
//!
//! [`statmount`]/[`listmount`] are the id-based replacements for parsing
//! `/proc/self/mountinfo`; [`MountIter`] fuses the two into one iterator.
//! The remaining functions are thin typed wrappers over the fd-based mount
//! syscalls (`fsopen(2)` and friends).

use crate::{
    error::{Error, ErrorImpl},
    flags::{OpenFlags, RenameFlags},
    syscalls::{self, StatmountBuf},
};

use std::{
    os::unix::io::{AsFd, OwnedFd},
    path::Path,
};

use bitflags::bitflags;
use rustix::{
    fs as rustix_fs,
    mount::{FsMountFlags, FsOpenFlags, MountAttrFlags, MoveMountFlags, OpenTreeFlags},
};

pub use crate::syscalls::MountAttr;

/// Opaque kernel identifier for a mount. Stable within the lifetime of a
/// mount namespace.
pub type MountId = u64;

/// `listmount(2)`/`statmount(2)` pseudo-id for the root of the current mount
/// namespace.
pub const LSMT_ROOT: MountId = !0;

/// How many mount ids we ask `listmount(2)` for per batch.
const LISTMOUNT_BATCH_SIZE: usize = 1024;

/// `AT_RECURSIVE` for [`mount_setattr`].
const AT_RECURSIVE: libc::c_uint = 0x8000;

bitflags! {
    /// `STATMOUNT_*` field-request mask.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct StatmountMask: u64 {
        const SB_BASIC = 0x0001;
        const MNT_BASIC = 0x0002;
        const PROPAGATE_FROM = 0x0004;
        const MNT_ROOT = 0x0008;
        const MNT_POINT = 0x0010;
        const FS_TYPE = 0x0020;
        const MNT_NS_ID = 0x0040;
        const MNT_OPTS = 0x0080;
        const FS_SUBTYPE = 0x0100;
        const SB_SOURCE = 0x0200;
        const OPT_ARRAY = 0x0400;
        const OPT_SEC_ARRAY = 0x0800;
        const SUPPORTED_MASK = 0x1000;

        // Don't clobber unknown STATMOUNT_* bits.
        const _ = !0;
    }
}

/// The default field set: cheap numeric info only, no strings.
pub const STATMOUNT_DEFAULT_MASK: StatmountMask =
    StatmountMask::MNT_BASIC.union(StatmountMask::SB_BASIC);

/// Typed result of a `statmount(2)` call.
///
/// A field is `Some` only when its `STATMOUNT_*` bit was both requested and
/// confirmed by the kernel's reply mask; everything else is absent rather
/// than zeroed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatmountRecord {
    /// Unique 64-bit mount id.
    pub mnt_id: Option<MountId>,
    pub mnt_parent_id: Option<MountId>,
    /// Reusable mount id, as seen in `/proc/self/mountinfo`.
    pub mnt_id_old: Option<u32>,
    pub mnt_parent_id_old: Option<u32>,
    /// Root of the mount relative to the root of its filesystem.
    pub mnt_root: Option<String>,
    /// Mountpoint relative to the process root.
    pub mnt_point: Option<String>,
    /// `MOUNT_ATTR_*` attribute bits.
    pub mnt_attr: Option<u64>,
    /// `MS_SHARED`/`MS_SLAVE`/`MS_PRIVATE`/`MS_UNBINDABLE`.
    pub mnt_propagation: Option<u64>,
    pub mnt_peer_group: Option<u64>,
    pub mnt_master: Option<u64>,
    pub propagate_from: Option<u64>,
    pub fs_type: Option<String>,
    pub mnt_ns_id: Option<u64>,
    pub mnt_opts: Option<String>,
    pub sb_dev_major: Option<u32>,
    pub sb_dev_minor: Option<u32>,
    /// `*_SUPER_MAGIC` of the filesystem.
    pub sb_magic: Option<u64>,
    /// `SB_*` superblock flags.
    pub sb_flags: Option<u32>,
    pub fs_subtype: Option<String>,
    /// Source string of the mount (block device, dataset, share, ...).
    pub sb_source: Option<String>,
    /// Filesystem-specific mount options.
    pub opt_array: Option<Vec<String>>,
    /// Security mount options (e.g. SELinux context).
    pub opt_sec_array: Option<Vec<String>>,
    /// `STATMOUNT_*` bits this kernel supports.
    pub supported_mask: Option<u64>,
    /// The effective reply mask.
    pub mask: StatmountMask,
}

fn stm_string(strings: &[u8], offset: u32) -> Option<String> {
    let tail = strings.get(offset as usize..)?;
    let len = tail.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&tail[..len]).into_owned())
}

fn stm_string_array(strings: &[u8], offset: u32, num: u32) -> Option<Vec<String>> {
    let mut out = Vec::with_capacity(num as usize);
    let mut pos = offset as usize;
    for _ in 0..num {
        let tail = strings.get(pos..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        out.push(String::from_utf8_lossy(&tail[..len]).into_owned());
        pos += len + 1;
    }
    Some(out)
}

impl StatmountRecord {
    fn parse(buf: &StatmountBuf, requested: StatmountMask) -> Self {
        let sm = buf.header();
        let strings = buf.strings();
        // A field counts as populated only when the caller asked for it and
        // the kernel confirmed it.
        let mask = StatmountMask::from_bits_retain(sm.mask) & requested;
        let have = |bit: StatmountMask| mask.contains(bit);

        let mut record = StatmountRecord {
            mask,
            ..Default::default()
        };

        if have(StatmountMask::MNT_BASIC) {
            record.mnt_id = Some(sm.mnt_id);
            record.mnt_parent_id = Some(sm.mnt_parent_id);
            record.mnt_id_old = Some(sm.mnt_id_old);
            record.mnt_parent_id_old = Some(sm.mnt_parent_id_old);
            record.mnt_attr = Some(sm.mnt_attr);
            record.mnt_propagation = Some(sm.mnt_propagation);
            record.mnt_peer_group = Some(sm.mnt_peer_group);
            record.mnt_master = Some(sm.mnt_master);
        }
        if have(StatmountMask::SB_BASIC) {
            record.sb_dev_major = Some(sm.sb_dev_major);
            record.sb_dev_minor = Some(sm.sb_dev_minor);
            record.sb_magic = Some(sm.sb_magic);
            record.sb_flags = Some(sm.sb_flags);
        }
        if have(StatmountMask::PROPAGATE_FROM) {
            record.propagate_from = Some(sm.propagate_from);
        }
        if have(StatmountMask::MNT_ROOT) {
            record.mnt_root = stm_string(strings, sm.mnt_root);
        }
        if have(StatmountMask::MNT_POINT) {
            record.mnt_point = stm_string(strings, sm.mnt_point);
        }
        if have(StatmountMask::FS_TYPE) {
            record.fs_type = stm_string(strings, sm.fs_type);
        }
        if have(StatmountMask::MNT_NS_ID) {
            record.mnt_ns_id = Some(sm.mnt_ns_id);
        }
        if have(StatmountMask::MNT_OPTS) {
            record.mnt_opts = stm_string(strings, sm.mnt_opts);
        }
        if have(StatmountMask::FS_SUBTYPE) {
            record.fs_subtype = stm_string(strings, sm.fs_subtype);
        }
        if have(StatmountMask::SB_SOURCE) {
            record.sb_source = stm_string(strings, sm.sb_source);
        }
        if have(StatmountMask::OPT_ARRAY) {
            record.opt_array = stm_string_array(strings, sm.opt_array, sm.opt_num);
        }
        if have(StatmountMask::OPT_SEC_ARRAY) {
            record.opt_sec_array = stm_string_array(strings, sm.opt_sec_array, sm.opt_sec_num);
        }
        if have(StatmountMask::SUPPORTED_MASK) {
            record.supported_mask = Some(sm.supported_mask);
        }

        record
    }
}

/// Is `statmount(2)`/`listmount(2)` available on this kernel (6.8+)?
pub fn statmount_supported() -> bool {
    *syscalls::STATMOUNT_IS_SUPPORTED
}

/// Get detailed information about a mount by id.
pub fn statmount(mnt_id: MountId, mask: StatmountMask) -> Result<StatmountRecord, Error> {
    let buf = syscalls::statmount(mnt_id, mask.bits()).map_err(|err| {
        if err.errno() == rustix::io::Errno::NOSYS {
            ErrorImpl::NotSupported {
                feature: "statmount".into(),
            }
        } else {
            ErrorImpl::RawOsError {
                operation: "statmount".into(),
                source: err,
            }
        }
    })?;
    Ok(StatmountRecord::parse(&buf, mask))
}

/// List the ids of all mounts below `mnt_id` (use [`LSMT_ROOT`] for the
/// whole namespace), resuming after `last_mnt_id` if non-zero. Pagination
/// against the kernel's batch limit is handled here.
pub fn listmount(mnt_id: MountId, last_mnt_id: u64, reverse: bool) -> Result<Vec<MountId>, Error> {
    let mut out = Vec::new();
    let mut batch = vec![0_u64; LISTMOUNT_BATCH_SIZE];
    let mut last = last_mnt_id;

    loop {
        let count = syscalls::listmount(mnt_id, last, reverse, &mut batch).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "listmount".into(),
                source: err,
            }
        })?;
        out.extend_from_slice(&batch[..count]);
        if count < LISTMOUNT_BATCH_SIZE {
            return Ok(out);
        }
        last = batch[count - 1];
    }
}

/// Iterator over mount information.
///
/// Fuses `listmount(2)` (fetched in batches) with a `statmount(2)` call per
/// mount id. Construct with [`MountIter::new`], or [`MountIter::all`] to
/// walk every mount in the namespace with the default field set.
pub struct MountIter {
    mnt_id: MountId,
    mask: StatmountMask,
    reverse: bool,
    batch: Vec<u64>,
    batch_len: usize,
    idx: usize,
    exhausted: bool,
}

impl MountIter {
    pub fn new(
        mnt_id: MountId,
        last_mnt_id: u64,
        reverse: bool,
        mask: StatmountMask,
    ) -> Result<Self, Error> {
        let mut iter = Self {
            mnt_id,
            mask,
            reverse,
            batch: vec![0_u64; LISTMOUNT_BATCH_SIZE],
            batch_len: 0,
            idx: 0,
            exhausted: false,
        };
        iter.fetch_batch(last_mnt_id)?;
        Ok(iter)
    }

    /// Walk every mount in the current namespace.
    pub fn all() -> Result<Self, Error> {
        Self::new(LSMT_ROOT, 0, false, STATMOUNT_DEFAULT_MASK)
    }

    fn fetch_batch(&mut self, last_mnt_id: u64) -> Result<(), Error> {
        let count = syscalls::listmount(self.mnt_id, last_mnt_id, self.reverse, &mut self.batch)
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "listmount".into(),
                source: err,
            })?;
        self.batch_len = count;
        self.idx = 0;
        if count == 0 {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for MountIter {
    type Item = Result<StatmountRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        if self.idx >= self.batch_len {
            // Only fetch more if the previous batch was full.
            if self.batch_len < LISTMOUNT_BATCH_SIZE {
                self.exhausted = true;
                return None;
            }
            let last = self.batch[self.batch_len - 1];
            if let Err(err) = self.fetch_batch(last) {
                self.exhausted = true;
                return Some(Err(err));
            }
            if self.exhausted {
                return None;
            }
        }

        let id = self.batch[self.idx];
        self.idx += 1;
        Some(statmount(id, self.mask))
    }
}

/// Open the mountpoint of a mounted filesystem by its mount id.
///
/// Useful when a file handle must be converted into a usable file
/// descriptor but no fd on the relevant filesystem is at hand.
pub fn open_mount_by_id(mnt_id: MountId, flags: OpenFlags) -> Result<OwnedFd, Error> {
    let record = statmount(mnt_id, StatmountMask::MNT_POINT)?;
    let mnt_point = record.mnt_point.ok_or(ErrorImpl::InvalidArgument {
        name: "mnt_id".into(),
        description: "mount point not available for this mount".into(),
    })?;

    let oflags = rustix_fs::OFlags::from_bits_retain(flags.bits() as u32)
        | rustix_fs::OFlags::CLOEXEC;
    syscalls::retry_on_eintr(|| rustix_fs::open(mnt_point.as_str(), oflags, rustix_fs::Mode::empty()))
        .map_err(|errno| {
            ErrorImpl::OsError {
                operation: format!("open mountpoint {mnt_point:?}").into(),
                source: errno.into(),
            }
            .into()
        })
}

/// Create a new filesystem context (`fsopen(2)`).
pub fn fsopen<S: AsRef<str>>(fstype: S, flags: FsOpenFlags) -> Result<OwnedFd, Error> {
    syscalls::fsopen(fstype, flags).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "fsopen".into(),
            source: err,
        }
        .into()
    })
}

/// Set a string parameter on a filesystem context.
pub fn fsconfig_set_string<Fd: AsFd, K: AsRef<str>, V: AsRef<str>>(
    sfd: Fd,
    key: K,
    value: V,
) -> Result<(), Error> {
    syscalls::fsconfig_set_string(sfd, key, value).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "fsconfig".into(),
            source: err,
        }
        .into()
    })
}

/// Set a flag parameter on a filesystem context.
pub fn fsconfig_set_flag<Fd: AsFd, K: AsRef<str>>(sfd: Fd, key: K) -> Result<(), Error> {
    syscalls::fsconfig_set_flag(sfd, key).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "fsconfig".into(),
            source: err,
        }
        .into()
    })
}

/// Invoke superblock creation on a filesystem context.
pub fn fsconfig_create<Fd: AsFd>(sfd: Fd) -> Result<(), Error> {
    syscalls::fsconfig_create(sfd).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "fsconfig".into(),
            source: err,
        }
        .into()
    })
}

/// Turn a configured filesystem context into a detached mount fd.
pub fn fsmount<Fd: AsFd>(
    sfd: Fd,
    flags: FsMountFlags,
    mount_attrs: MountAttrFlags,
) -> Result<OwnedFd, Error> {
    syscalls::fsmount(sfd, flags, mount_attrs).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "fsmount".into(),
            source: err,
        }
        .into()
    })
}

/// Move (or attach) a mount.
pub fn move_mount<Fd1: AsFd, P1: AsRef<Path>, Fd2: AsFd, P2: AsRef<Path>>(
    from_dirfd: Fd1,
    from_path: P1,
    to_dirfd: Fd2,
    to_path: P2,
    flags: MoveMountFlags,
) -> Result<(), Error> {
    syscalls::move_mount(from_dirfd, from_path, to_dirfd, to_path, flags).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "move_mount".into(),
            source: err,
        }
        .into()
    })
}

/// Get a detached fd for a mount subtree (`open_tree(2)`).
pub fn open_tree<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenTreeFlags,
) -> Result<OwnedFd, Error> {
    syscalls::open_tree(dirfd, path, flags).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "open_tree".into(),
            source: err,
        }
        .into()
    })
}

/// Change the properties of a mount (`mount_setattr(2)`), optionally for
/// the whole subtree.
pub fn mount_setattr<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    recursive: bool,
    attr: &MountAttr,
) -> Result<(), Error> {
    let flags = if recursive { AT_RECURSIVE } else { 0 };
    syscalls::mount_setattr(dirfd, path, flags, attr).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "mount_setattr".into(),
            source: err,
        }
        .into()
    })
}

/// Unmount a filesystem (`umount2(2)`).
pub fn umount2<P: AsRef<Path>>(path: P, flags: libc::c_int) -> Result<(), Error> {
    syscalls::umount2(path, flags).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "umount2".into(),
            source: err,
        }
        .into()
    })
}

/// Rename with `RENAME_*` semantics (`renameat2(2)`); flag-less calls fall
/// back to plain `renameat(2)`.
pub fn renameat2<Fd1: AsFd, P1: AsRef<Path>, Fd2: AsFd, P2: AsRef<Path>>(
    old_dirfd: Fd1,
    old_path: P1,
    new_dirfd: Fd2,
    new_path: P2,
    flags: RenameFlags,
) -> Result<(), Error> {
    syscalls::renameat2(old_dirfd, old_path, new_dirfd, new_path, flags).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "renameat2".into(),
            source: err,
        }
        .into()
    })
}
