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

// We need to permit unsafe code because we are interacting with libc APIs.
#![allow(unsafe_code)]

//! Raw syscall shims.
//!
//! Everything in here is a thin wrapper around one system call, returning a
//! per-syscall error variant that records the arguments the call was made
//! with. Wrappers for calls that `rustix` covers go through `rustix`;
//! extensible-struct syscalls (`openat2`, `statx`, `statmount`, `listmount`,
//! `name_to_handle_at`, `open_by_handle_at`, `mount_setattr`) are issued
//! directly so we control the struct versions.

use crate::{
    flags::{HandleFlags, OpenFlags, RenameFlags, ResolveFlags},
    statx::{RawStatx, StatxMask},
    utils::{unsafe_fd_path, ToCString},
};

use std::{
    fmt,
    io::Error as IOError,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use rustix::{
    fs as rustix_fs,
    fs::AtFlags,
    io::Errno,
    mount::{self as rustix_mount, FsMountFlags, FsOpenFlags, MountAttrFlags, OpenTreeFlags},
};

// SAFETY: AT_FDCWD is always a valid file descriptor.
pub(crate) const AT_FDCWD: BorrowedFd<'static> = rustix_fs::CWD;

// Syscall numbers for the mount-id family (standard amd64 mapping). These
// predate most libc crates, so we carry them ourselves like the kernel
// headers do.
const SYS_MOUNT_SETATTR: libc::c_long = 442;
const SYS_STATMOUNT: libc::c_long = 457;
const SYS_LISTMOUNT: libc::c_long = 458;

/// `struct file_handle` header: `handle_bytes` + `handle_type`.
pub(crate) const FILE_HANDLE_HEADER_SZ: usize = 8;
/// MAX_HANDLE_SZ as of Linux 6.6.
pub(crate) const MAX_HANDLE_SZ: usize = 128;

/// Fixed (non-string) part of `struct statmount`. The string table starts
/// here; the kernel has kept this at 512 bytes across every version of the
/// struct by shrinking `__spare2` as fields are added.
pub(crate) const STATMOUNT_HEADER_SZ: usize = 512;

pub(crate) const MNT_ID_REQ_SIZE_VER1: u32 = 32;

pub(crate) const LISTMOUNT_REVERSE: libc::c_ulong = 1 << 0;

/// Retry a syscall closure until it stops failing with `EINTR`.
///
/// Every blocking wrapper in this module funnels through here. There is no
/// global runtime lock to drop in Rust; an interrupted call is simply
/// reissued.
pub(crate) fn retry_on_eintr<T, F>(mut f: F) -> Result<T, Errno>
where
    F: FnMut() -> Result<T, Errno>,
{
    loop {
        match f() {
            Err(Errno::INTR) => continue,
            other => return other,
        }
    }
}

fn syscall_result(ret: libc::c_long) -> Result<libc::c_long, Errno> {
    if ret >= 0 {
        Ok(ret)
    } else {
        Err(IOError::last_os_error()
            .raw_os_error()
            .map(Errno::from_raw_os_error)
            .expect("syscall failure must result in a real OS error"))
    }
}

/// Representation of a file descriptor and its associated path at a given
/// point in time.
///
/// This is primarily used to make pretty-printing syscall arguments much
/// nicer, and users really shouldn't be interacting with this directly.
///
/// # Caveats
/// Note that the file descriptor value is very unlikely to reference a live
/// file descriptor. Its value is only used for informational purposes.
#[derive(Clone, Debug)]
pub(crate) struct FrozenFd(RawFd, Option<PathBuf>);

impl<Fd: AsFd> From<Fd> for FrozenFd {
    fn from(fd: Fd) -> Self {
        Self(fd.as_fd().as_raw_fd(), unsafe_fd_path(fd))
    }
}

impl fmt::Display for FrozenFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            libc::AT_FDCWD => write!(f, "[AT_FDCWD]")?,
            fd => write!(f, "[{fd}]")?,
        };
        match &self.1 {
            Some(path) => write!(f, "{path:?}")?,
            None => write!(f, "<unknown>")?,
        };
        Ok(())
    }
}

/// Internal error returned by mntkit's syscall wrappers.
///
/// The primary thing of note is that these errors contain detailed debugging
/// information about the arguments to each given syscall. Users would most
/// often not interact with these error variants directly and instead would
/// make use of the top-level [`Error`] type.
///
/// [`Error`]: crate::error::Error
#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error("openat2({dirfd}, {path:?}, {how}, {size})")]
    Openat2 {
        dirfd: FrozenFd,
        path: PathBuf,
        how: OpenHow,
        size: usize,
        source: Errno,
    },

    #[error("statx({dirfd}, {path:?}, {flags:?}, {mask:?})")]
    Statx {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: AtFlags,
        mask: StatxMask,
        source: Errno,
    },

    #[error("statmount(mnt_id={mnt_id:#x}, mask={mask:#x})")]
    Statmount { mnt_id: u64, mask: u64, source: Errno },

    #[error("listmount(mnt_id={mnt_id:#x}, last={last_mnt_id:#x})")]
    Listmount {
        mnt_id: u64,
        last_mnt_id: u64,
        source: Errno,
    },

    #[error("name_to_handle_at({dirfd}, {path:?}, {flags:?})")]
    NameToHandleAt {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: HandleFlags,
        source: Errno,
    },

    #[error("open_by_handle_at({mount_fd}, {flags:?})")]
    OpenByHandleAt {
        mount_fd: FrozenFd,
        flags: OpenFlags,
        source: Errno,
    },

    #[error("fgetxattr({fd}, {name:?})")]
    Fgetxattr {
        fd: FrozenFd,
        name: &'static str,
        source: Errno,
    },

    #[error("fsetxattr({fd}, {name:?}, <{size} bytes>)")]
    Fsetxattr {
        fd: FrozenFd,
        name: &'static str,
        size: usize,
        source: Errno,
    },

    #[error("fremovexattr({fd}, {name:?})")]
    Fremovexattr {
        fd: FrozenFd,
        name: &'static str,
        source: Errno,
    },

    #[error("fsopen({fstype:?}, {flags:?})")]
    Fsopen {
        fstype: String,
        flags: FsOpenFlags,
        source: Errno,
    },

    #[error("fsconfig({sfd}, FSCONFIG_CMD_CREATE)")]
    FsconfigCreate { sfd: FrozenFd, source: Errno },

    #[error("fsconfig({sfd}, FSCONFIG_SET_STRING, {key:?}, {value:?})")]
    FsconfigSetString {
        sfd: FrozenFd,
        key: String,
        value: String,
        source: Errno,
    },

    #[error("fsconfig({sfd}, FSCONFIG_SET_FLAG, {key:?})")]
    FsconfigSetFlag {
        sfd: FrozenFd,
        key: String,
        source: Errno,
    },

    #[error("fsmount({sfd}, {flags:?}, {mount_attrs:?})")]
    Fsmount {
        sfd: FrozenFd,
        flags: FsMountFlags,
        mount_attrs: MountAttrFlags,
        source: Errno,
    },

    #[error("move_mount({from_dirfd}, {from_path:?}, {to_dirfd}, {to_path:?})")]
    MoveMount {
        from_dirfd: FrozenFd,
        from_path: PathBuf,
        to_dirfd: FrozenFd,
        to_path: PathBuf,
        source: Errno,
    },

    #[error("open_tree({dirfd}, {path:?}, {flags:?})")]
    OpenTree {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: OpenTreeFlags,
        source: Errno,
    },

    #[error("mount_setattr({dirfd}, {path:?}, flags={flags:#x})")]
    MountSetattr {
        dirfd: FrozenFd,
        path: PathBuf,
        flags: libc::c_uint,
        source: Errno,
    },

    #[error("umount2({path:?}, flags={flags:#x})")]
    Umount2 {
        path: PathBuf,
        flags: libc::c_int,
        source: Errno,
    },

    #[error("renameat({old_dirfd}, {old_path:?}, {new_dirfd}, {new_path:?})")]
    Renameat {
        old_dirfd: FrozenFd,
        old_path: PathBuf,
        new_dirfd: FrozenFd,
        new_path: PathBuf,
        source: Errno,
    },

    #[error("renameat2({old_dirfd}, {old_path:?}, {new_dirfd}, {new_path:?}, {flags:?})")]
    Renameat2 {
        old_dirfd: FrozenFd,
        old_path: PathBuf,
        new_dirfd: FrozenFd,
        new_path: PathBuf,
        flags: RenameFlags,
        source: Errno,
    },
}

impl Error {
    pub(crate) fn errno(&self) -> Errno {
        // XXX: This should probably be a macro...
        *match self {
            Error::Openat2 { source, .. } => source,
            Error::Statx { source, .. } => source,
            Error::Statmount { source, .. } => source,
            Error::Listmount { source, .. } => source,
            Error::NameToHandleAt { source, .. } => source,
            Error::OpenByHandleAt { source, .. } => source,
            Error::Fgetxattr { source, .. } => source,
            Error::Fsetxattr { source, .. } => source,
            Error::Fremovexattr { source, .. } => source,
            Error::Fsopen { source, .. } => source,
            Error::FsconfigCreate { source, .. } => source,
            Error::FsconfigSetString { source, .. } => source,
            Error::FsconfigSetFlag { source, .. } => source,
            Error::Fsmount { source, .. } => source,
            Error::MoveMount { source, .. } => source,
            Error::OpenTree { source, .. } => source,
            Error::MountSetattr { source, .. } => source,
            Error::Umount2 { source, .. } => source,
            Error::Renameat { source, .. } => source,
            Error::Renameat2 { source, .. } => source,
        }
    }

    pub(crate) fn root_cause(&self) -> IOError {
        IOError::from_raw_os_error(self.errno().raw_os_error())
    }
}

/// Arguments for how `openat2` should open the target path.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct OpenHow {
    /// O_* flags (`-EINVAL` on unknown or incompatible flags).
    pub flags: u64,
    /// O_CREAT or O_TMPFILE file mode (must be zero otherwise).
    pub mode: u64,
    /// RESOLVE_* flags (`-EINVAL` on unknown flags).
    pub resolve: u64,
}

impl fmt::Display for OpenHow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        if let Ok(oflags) = i32::try_from(self.flags) {
            // If the flags can fit inside OpenFlags, pretty-print the flags.
            write!(f, "flags: {:?}, ", OpenFlags::from_bits_retain(oflags))?;
        } else {
            write!(f, "flags: 0x{:x}, ", self.flags)?;
        }
        if self.flags & (libc::O_CREAT | libc::O_TMPFILE) as u64 != 0 {
            write!(f, "mode: 0o{:o}, ", self.mode)?;
        }
        write!(
            f,
            "resolve: {:?}",
            ResolveFlags::from_bits_retain(self.resolve)
        )?;
        write!(f, " }}")
    }
}

// MSRV(1.80): Use LazyLock.
pub(crate) static OPENAT2_IS_SUPPORTED: Lazy<bool> =
    Lazy::new(|| openat2(AT_FDCWD, ".", &Default::default()).is_ok());

/// Wrapper for `openat2(2)`.
///
/// rustix's openat2 wrapper is not extensible-friendly so we issue the
/// syscall ourselves with our own `OpenHow`.
pub(crate) fn openat2<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    how: &OpenHow,
) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();

    let mut how = how.clone();
    how.flags |= libc::O_CLOEXEC as u64;

    let path_c = path.to_c_string();
    retry_on_eintr(|| {
        // SAFETY: Obviously safe-to-use Linux syscall.
        let fd = syscall_result(unsafe {
            libc::syscall(
                libc::SYS_openat2,
                dirfd.as_raw_fd(),
                path_c.as_ptr(),
                &how as *const OpenHow,
                std::mem::size_of::<OpenHow>(),
            )
        })? as RawFd;
        // SAFETY: We know it's a real file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    })
    .map_err(|errno| Error::Openat2 {
        dirfd: dirfd.into(),
        path: path.into(),
        how: how.clone(),
        size: std::mem::size_of::<OpenHow>(),
        source: errno,
    })
}

/// Wrapper for `statx(2)`.
///
/// We issue the syscall ourselves (rather than through rustix) because the
/// kernel's statx struct has grown fields (`stx_subvol`, the atomic-write
/// limits, the direct-IO read alignment) that lag behind library bindings.
pub(crate) fn statx<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: AtFlags,
    mask: StatxMask,
) -> Result<RawStatx, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();

    let path_c = path.to_c_string();
    let mut stx = RawStatx::default();
    retry_on_eintr(|| {
        // SAFETY: Obviously safe-to-use Linux syscall; stx is a correctly
        //         sized and aligned statx buffer.
        syscall_result(unsafe {
            libc::syscall(
                libc::SYS_statx,
                dirfd.as_raw_fd(),
                path_c.as_ptr(),
                flags.bits() as libc::c_int,
                mask.bits() as libc::c_uint,
                &mut stx as *mut RawStatx,
            )
        })
        .map(|_| ())
    })
    .map_err(|errno| Error::Statx {
        dirfd: dirfd.into(),
        path: path.into(),
        flags,
        mask,
        source: errno,
    })?;
    Ok(stx)
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct MntIdReq {
    size: u32,
    spare: u32,
    mnt_id: u64,
    param: u64,
    mnt_ns_id: u64,
}

/// Fixed part of the kernel's `struct statmount` reply. The kernel has kept
/// this at 512 bytes across every version by shrinking `__spare2` as fields
/// are added; the string table always starts at byte 512.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawStatmount {
    pub(crate) size: u32,
    pub(crate) mnt_opts: u32,
    pub(crate) mask: u64,
    pub(crate) sb_dev_major: u32,
    pub(crate) sb_dev_minor: u32,
    pub(crate) sb_magic: u64,
    pub(crate) sb_flags: u32,
    pub(crate) fs_type: u32,
    pub(crate) mnt_id: u64,
    pub(crate) mnt_parent_id: u64,
    pub(crate) mnt_id_old: u32,
    pub(crate) mnt_parent_id_old: u32,
    pub(crate) mnt_attr: u64,
    pub(crate) mnt_propagation: u64,
    pub(crate) mnt_peer_group: u64,
    pub(crate) mnt_master: u64,
    pub(crate) propagate_from: u64,
    pub(crate) mnt_root: u32,
    pub(crate) mnt_point: u32,
    pub(crate) mnt_ns_id: u64,
    pub(crate) fs_subtype: u32,
    pub(crate) sb_source: u32,
    pub(crate) opt_num: u32,
    pub(crate) opt_array: u32,
    pub(crate) opt_sec_num: u32,
    pub(crate) opt_sec_array: u32,
    pub(crate) supported_mask: u64,
    pub(crate) mnt_uidmap_num: u32,
    pub(crate) mnt_uidmap: u32,
    pub(crate) mnt_gidmap_num: u32,
    pub(crate) mnt_gidmap: u32,
    pub(crate) __spare2: [u64; 43],
}

/// An owned, aligned `statmount(2)` reply buffer.
pub(crate) struct StatmountBuf {
    words: Vec<u64>,
}

impl StatmountBuf {
    pub(crate) fn header(&self) -> &RawStatmount {
        // SAFETY: the buffer is u64-aligned and statmount() only returns
        //         buffers at least STATMOUNT_HEADER_SZ long.
        unsafe { &*(self.words.as_ptr() as *const RawStatmount) }
    }

    /// The string table (everything past the fixed header, bounded by the
    /// kernel-reported total size).
    pub(crate) fn strings(&self) -> &[u8] {
        let total = (self.header().size as usize).clamp(
            STATMOUNT_HEADER_SZ,
            self.words.len() * std::mem::size_of::<u64>(),
        );
        // SAFETY: total is within the allocation by the clamp above.
        let bytes =
            unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, total) };
        &bytes[STATMOUNT_HEADER_SZ..]
    }
}

// MSRV(1.80): Use LazyLock.
pub(crate) static STATMOUNT_IS_SUPPORTED: Lazy<bool> = Lazy::new(|| {
    // mnt_id 0 never exists; a supporting kernel answers ENOENT (or EINVAL),
    // only a pre-6.8 kernel answers ENOSYS.
    match statmount(0, 0) {
        Ok(_) => true,
        Err(err) => err.errno() != Errno::NOSYS,
    }
});

/// Wrapper for `statmount(2)`.
///
/// Returns the raw reply buffer (fixed header + string table). The buffer is
/// `u64`-allocated so the header can be read in place; parsing into a
/// [`StatmountRecord`] happens in the mount module.
///
/// Starts with a 1 KiB buffer and grows by 4 KiB on `EOVERFLOW` until the
/// kernel accepts the size.
///
/// [`StatmountRecord`]: crate::mount::StatmountRecord
pub(crate) fn statmount(mnt_id: u64, mask: u64) -> Result<StatmountBuf, Error> {
    let req = MntIdReq {
        size: MNT_ID_REQ_SIZE_VER1,
        mnt_id,
        param: mask,
        ..Default::default()
    };

    let mut size = 1024_usize;
    loop {
        let mut buf = vec![0_u64; size / 8];
        let ret = retry_on_eintr(|| {
            // SAFETY: req and buf are valid for the advertised sizes.
            syscall_result(unsafe {
                libc::syscall(
                    SYS_STATMOUNT,
                    &req as *const MntIdReq,
                    buf.as_mut_ptr(),
                    size,
                    0_usize,
                )
            })
            .map(|_| ())
        });
        match ret {
            Ok(()) => return Ok(StatmountBuf { words: buf }),
            Err(Errno::OVERFLOW) => {
                size += 4096;
                continue;
            }
            Err(errno) => {
                return Err(Error::Statmount {
                    mnt_id,
                    mask,
                    source: errno,
                })
            }
        }
    }
}

/// Wrapper for `listmount(2)`. Fills `out` with child mount ids of `mnt_id`
/// after `last_mnt_id` and returns how many were written. Pagination is the
/// caller's job.
pub(crate) fn listmount(
    mnt_id: u64,
    last_mnt_id: u64,
    reverse: bool,
    out: &mut [u64],
) -> Result<usize, Error> {
    let req = MntIdReq {
        size: MNT_ID_REQ_SIZE_VER1,
        mnt_id,
        param: last_mnt_id,
        ..Default::default()
    };
    let flags: libc::c_ulong = if reverse { LISTMOUNT_REVERSE } else { 0 };

    retry_on_eintr(|| {
        // SAFETY: req and out are valid for the advertised sizes.
        syscall_result(unsafe {
            libc::syscall(
                SYS_LISTMOUNT,
                &req as *const MntIdReq,
                out.as_mut_ptr(),
                out.len(),
                flags,
            )
        })
        .map(|count| count as usize)
    })
    .map_err(|errno| Error::Listmount {
        mnt_id,
        last_mnt_id,
        source: errno,
    })
}

/// Raw result of a `name_to_handle_at(2)` call: the serialised
/// `struct file_handle` (header included) and the mount id the kernel
/// reported (widened to 64 bits; only actually unique when
/// `AT_HANDLE_MNT_ID_UNIQUE` was passed).
pub(crate) struct RawHandle {
    pub(crate) bytes: Vec<u8>,
    pub(crate) mount_id: u64,
}

/// Wrapper for `name_to_handle_at(2)`.
///
/// The kernel signals a too-small handle buffer with `EOVERFLOW` and writes
/// the required size into `handle_bytes`; we retry once with that size.
pub(crate) fn name_to_handle_at<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: HandleFlags,
) -> Result<RawHandle, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();
    let path_c = path.to_c_string();
    let want_unique = flags.contains(HandleFlags::AT_HANDLE_MNT_ID_UNIQUE);

    let mkerr = |errno| Error::NameToHandleAt {
        dirfd: (&dirfd).into(),
        path: path.into(),
        flags,
        source: errno,
    };

    let mut data_size = MAX_HANDLE_SZ;
    let mut resized = false;
    loop {
        // u32-allocated so the header fields can be accessed in place.
        let words = (FILE_HANDLE_HEADER_SZ + data_size).div_ceil(4);
        let mut buf = vec![0_u32; words];
        buf[0] = data_size as u32; // handle_bytes

        let mut mount_id_unique: u64 = 0;
        let mut mount_id_legacy: libc::c_int = 0;
        let mount_id_ptr: *mut libc::c_void = if want_unique {
            &mut mount_id_unique as *mut u64 as *mut libc::c_void
        } else {
            &mut mount_id_legacy as *mut libc::c_int as *mut libc::c_void
        };

        let ret = retry_on_eintr(|| {
            // SAFETY: buf is a valid file_handle buffer of the advertised
            //         handle_bytes, and mount_id_ptr matches the width the
            //         kernel will write for the given flags.
            syscall_result(unsafe {
                libc::syscall(
                    libc::SYS_name_to_handle_at,
                    dirfd.as_raw_fd(),
                    path_c.as_ptr(),
                    buf.as_mut_ptr(),
                    mount_id_ptr,
                    flags.bits(),
                )
            })
            .map(|_| ())
        });

        match ret {
            Ok(()) => {
                let handle_bytes = buf[0] as usize;
                let total = FILE_HANDLE_HEADER_SZ + handle_bytes;
                let mut bytes = vec![0_u8; total];
                // SAFETY: total <= buf length in bytes by construction.
                bytes.copy_from_slice(unsafe {
                    std::slice::from_raw_parts(buf.as_ptr() as *const u8, total)
                });
                let mount_id = if want_unique {
                    mount_id_unique
                } else {
                    mount_id_legacy as u64
                };
                return Ok(RawHandle { bytes, mount_id });
            }
            Err(Errno::OVERFLOW) if !resized => {
                // handle_bytes now holds the required size.
                data_size = (buf[0] as usize).max(MAX_HANDLE_SZ);
                resized = true;
                continue;
            }
            Err(errno) => return Err(mkerr(errno)),
        }
    }
}

/// Wrapper for `open_by_handle_at(2)`. `handle` must be a serialised
/// `struct file_handle` (header included).
pub(crate) fn open_by_handle_at<Fd: AsFd>(
    mount_fd: Fd,
    handle: &[u8],
    flags: OpenFlags,
) -> Result<OwnedFd, Error> {
    let mount_fd = mount_fd.as_fd();

    // Re-align the serialised handle for the kernel.
    let words = handle.len().div_ceil(4);
    let mut buf = vec![0_u32; words];
    // SAFETY: the destination covers handle.len() bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(handle.as_ptr(), buf.as_mut_ptr() as *mut u8, handle.len())
    };

    retry_on_eintr(|| {
        // SAFETY: buf is a valid file_handle buffer.
        let fd = syscall_result(unsafe {
            libc::syscall(
                libc::SYS_open_by_handle_at,
                mount_fd.as_raw_fd(),
                buf.as_ptr(),
                flags.bits(),
            )
        })? as RawFd;
        // SAFETY: We know it's a real file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    })
    .map_err(|errno| Error::OpenByHandleAt {
        mount_fd: mount_fd.into(),
        flags,
        source: errno,
    })
}

/// Wrapper for `fgetxattr(2)`. An empty `value` buffer is the size probe.
pub(crate) fn fgetxattr<Fd: AsFd>(
    fd: Fd,
    name: &'static str,
    value: &mut [u8],
) -> Result<usize, Error> {
    let fd = fd.as_fd();

    retry_on_eintr(|| rustix_fs::fgetxattr(fd, name, value)).map_err(|errno| Error::Fgetxattr {
        fd: fd.into(),
        name,
        source: errno,
    })
}

/// Wrapper for `fsetxattr(2)`.
pub(crate) fn fsetxattr<Fd: AsFd>(fd: Fd, name: &'static str, value: &[u8]) -> Result<(), Error> {
    let fd = fd.as_fd();

    retry_on_eintr(|| rustix_fs::fsetxattr(fd, name, value, rustix_fs::XattrFlags::empty()))
        .map_err(|errno| Error::Fsetxattr {
            fd: fd.into(),
            name,
            size: value.len(),
            source: errno,
        })
}

/// Wrapper for `fremovexattr(2)`.
pub(crate) fn fremovexattr<Fd: AsFd>(fd: Fd, name: &'static str) -> Result<(), Error> {
    let fd = fd.as_fd();

    retry_on_eintr(|| rustix_fs::fremovexattr(fd, name)).map_err(|errno| Error::Fremovexattr {
        fd: fd.into(),
        name,
        source: errno,
    })
}

pub(crate) fn fsopen<S: AsRef<str>>(fstype: S, flags: FsOpenFlags) -> Result<OwnedFd, Error> {
    let fstype = fstype.as_ref();

    retry_on_eintr(|| rustix_mount::fsopen(fstype, flags)).map_err(|errno| Error::Fsopen {
        fstype: fstype.into(),
        flags,
        source: errno,
    })
}

pub(crate) fn fsconfig_set_string<Fd: AsFd, K: AsRef<str>, V: AsRef<str>>(
    sfd: Fd,
    key: K,
    value: V,
) -> Result<(), Error> {
    let sfd = sfd.as_fd();
    let key = key.as_ref();
    let value = value.as_ref();

    retry_on_eintr(|| rustix_mount::fsconfig_set_string(sfd, key, value)).map_err(|errno| {
        Error::FsconfigSetString {
            sfd: sfd.into(),
            key: key.into(),
            value: value.into(),
            source: errno,
        }
    })
}

pub(crate) fn fsconfig_set_flag<Fd: AsFd, K: AsRef<str>>(sfd: Fd, key: K) -> Result<(), Error> {
    let sfd = sfd.as_fd();
    let key = key.as_ref();

    retry_on_eintr(|| rustix_mount::fsconfig_set_flag(sfd, key)).map_err(|errno| {
        Error::FsconfigSetFlag {
            sfd: sfd.into(),
            key: key.into(),
            source: errno,
        }
    })
}

pub(crate) fn fsconfig_create<Fd: AsFd>(sfd: Fd) -> Result<(), Error> {
    let sfd = sfd.as_fd();

    retry_on_eintr(|| rustix_mount::fsconfig_create(sfd)).map_err(|errno| Error::FsconfigCreate {
        sfd: sfd.into(),
        source: errno,
    })
}

pub(crate) fn fsmount<Fd: AsFd>(
    sfd: Fd,
    flags: FsMountFlags,
    mount_attrs: MountAttrFlags,
) -> Result<OwnedFd, Error> {
    let sfd = sfd.as_fd();

    retry_on_eintr(|| rustix_mount::fsmount(sfd, flags, mount_attrs)).map_err(|errno| {
        Error::Fsmount {
            sfd: sfd.into(),
            flags,
            mount_attrs,
            source: errno,
        }
    })
}

pub(crate) fn move_mount<Fd1: AsFd, P1: AsRef<Path>, Fd2: AsFd, P2: AsRef<Path>>(
    from_dirfd: Fd1,
    from_path: P1,
    to_dirfd: Fd2,
    to_path: P2,
    flags: rustix_mount::MoveMountFlags,
) -> Result<(), Error> {
    let (from_dirfd, from_path) = (from_dirfd.as_fd(), from_path.as_ref());
    let (to_dirfd, to_path) = (to_dirfd.as_fd(), to_path.as_ref());

    retry_on_eintr(|| rustix_mount::move_mount(from_dirfd, from_path, to_dirfd, to_path, flags))
        .map_err(|errno| Error::MoveMount {
            from_dirfd: from_dirfd.into(),
            from_path: from_path.into(),
            to_dirfd: to_dirfd.into(),
            to_path: to_path.into(),
            source: errno,
        })
}

pub(crate) fn open_tree<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: OpenTreeFlags,
) -> Result<OwnedFd, Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();

    retry_on_eintr(|| rustix_mount::open_tree(dirfd, path, flags)).map_err(|errno| {
        Error::OpenTree {
            dirfd: dirfd.into(),
            path: path.into(),
            flags,
            source: errno,
        }
    })
}

/// `struct mount_attr` for [`mount_setattr`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MountAttr {
    /// `MOUNT_ATTR_*` bits to set.
    pub attr_set: u64,
    /// `MOUNT_ATTR_*` bits to clear.
    pub attr_clr: u64,
    /// Mount propagation (`MS_SHARED`, `MS_SLAVE`, `MS_PRIVATE`,
    /// `MS_UNBINDABLE`, or 0 to leave unchanged).
    pub propagation: u64,
    /// User namespace fd for `MOUNT_ATTR_IDMAP`.
    pub userns_fd: u64,
}

/// Wrapper for `mount_setattr(2)`. Issued raw: libc bindings for it are not
/// dependable yet.
pub(crate) fn mount_setattr<Fd: AsFd, P: AsRef<Path>>(
    dirfd: Fd,
    path: P,
    flags: libc::c_uint,
    attr: &MountAttr,
) -> Result<(), Error> {
    let dirfd = dirfd.as_fd();
    let path = path.as_ref();
    let path_c = path.to_c_string();

    retry_on_eintr(|| {
        // SAFETY: attr is a valid mount_attr of the advertised size.
        syscall_result(unsafe {
            libc::syscall(
                SYS_MOUNT_SETATTR,
                dirfd.as_raw_fd(),
                path_c.as_ptr(),
                flags,
                attr as *const MountAttr,
                std::mem::size_of::<MountAttr>(),
            )
        })
        .map(|_| ())
    })
    .map_err(|errno| Error::MountSetattr {
        dirfd: dirfd.into(),
        path: path.into(),
        flags,
        source: errno,
    })
}

/// Wrapper for `umount2(2)`.
pub(crate) fn umount2<P: AsRef<Path>>(path: P, flags: libc::c_int) -> Result<(), Error> {
    let path = path.as_ref();
    let path_c = path.to_c_string();

    retry_on_eintr(|| {
        // SAFETY: Obviously safe-to-use Linux syscall.
        syscall_result(unsafe { libc::syscall(libc::SYS_umount2, path_c.as_ptr(), flags) })
            .map(|_| ())
    })
    .map_err(|errno| Error::Umount2 {
        path: path.into(),
        flags,
        source: errno,
    })
}

/// Wrapper for `renameat(2)`.
pub(crate) fn renameat<Fd1: AsFd, P1: AsRef<Path>, Fd2: AsFd, P2: AsRef<Path>>(
    old_dirfd: Fd1,
    old_path: P1,
    new_dirfd: Fd2,
    new_path: P2,
) -> Result<(), Error> {
    let (old_dirfd, old_path) = (old_dirfd.as_fd(), old_path.as_ref());
    let (new_dirfd, new_path) = (new_dirfd.as_fd(), new_path.as_ref());

    retry_on_eintr(|| rustix_fs::renameat(old_dirfd, old_path, new_dirfd, new_path)).map_err(
        |errno| Error::Renameat {
            old_dirfd: old_dirfd.into(),
            old_path: old_path.into(),
            new_dirfd: new_dirfd.into(),
            new_path: new_path.into(),
            source: errno,
        },
    )
}

// MSRV(1.80): Use LazyLock.
pub(crate) static RENAME_FLAGS_SUPPORTED: Lazy<bool> = Lazy::new(|| {
    match renameat2(AT_FDCWD, ".", AT_FDCWD, ".", RenameFlags::RENAME_EXCHANGE) {
        Ok(_) => true,
        // We expect EBUSY, but just to be safe we only check for ENOSYS.
        Err(err) => err.root_cause().raw_os_error() != Some(libc::ENOSYS),
    }
});

/// Wrapper for `renameat2(2)`.
pub(crate) fn renameat2<Fd1: AsFd, P1: AsRef<Path>, Fd2: AsFd, P2: AsRef<Path>>(
    old_dirfd: Fd1,
    old_path: P1,
    new_dirfd: Fd2,
    new_path: P2,
    flags: RenameFlags,
) -> Result<(), Error> {
    // Use renameat(2) if no flags are specified.
    if flags.is_empty() {
        return renameat(old_dirfd, old_path, new_dirfd, new_path);
    }

    let (old_dirfd, old_path) = (old_dirfd.as_fd(), old_path.as_ref());
    let (new_dirfd, new_path) = (new_dirfd.as_fd(), new_path.as_ref());

    retry_on_eintr(|| {
        rustix_fs::renameat_with(
            old_dirfd,
            old_path,
            new_dirfd,
            new_path,
            rustix_fs::RenameFlags::from_bits_retain(flags.bits()),
        )
    })
    .map_err(|errno| Error::Renameat2 {
        old_dirfd: old_dirfd.into(),
        old_path: old_path.into(),
        new_dirfd: new_dirfd.into(),
        new_path: new_path.into(),
        flags,
        source: errno,
    })
}
