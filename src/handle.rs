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

//! Kernel file handles.
//!
//! A [`FileHandle`] is an opaque kernel-encoded reference to an inode that
//! stays valid across process lifetimes and reboots (for filesystems with
//! stable handle encodings, notably ZFS and NFS exports). It is the
//! `name_to_handle_at(2)` / `open_by_handle_at(2)` pair with the mount-id
//! bookkeeping callers otherwise get wrong: the handle remembers which
//! mount it was resolved against, and [`FileHandle::open`] refuses to hand
//! the handle to a mount fd on any other filesystem.

use crate::{
    error::{Error, ErrorImpl},
    flags::{HandleFlags, OpenFlags},
    statx::{AtFlags, StatxMask},
    syscalls::{self, FILE_HANDLE_HEADER_SZ, MAX_HANDLE_SZ},
};

use std::{
    os::unix::io::{AsFd, OwnedFd},
    path::Path,
};

/// A serialisable kernel file handle plus the mount id it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHandle {
    /// Serialised `struct file_handle`: `(handle_bytes: u32, handle_type:
    /// u32, data[handle_bytes])`.
    bytes: Vec<u8>,
    mount_id: u64,
    /// Whether `mount_id` is the unique 64-bit id or the legacy reusable
    /// 32-bit one.
    unique_mount_id: bool,
}

impl FileHandle {
    /// Resolve a path to a file handle with `name_to_handle_at(2)`.
    ///
    /// Pass [`HandleFlags::AT_HANDLE_MNT_ID_UNIQUE`] to record the unique
    /// 64-bit mount id rather than the reusable one (Linux 6.12+).
    pub fn from_path<Fd: AsFd, P: AsRef<Path>>(
        dirfd: Fd,
        path: P,
        flags: HandleFlags,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let unique = flags.contains(HandleFlags::AT_HANDLE_MNT_ID_UNIQUE);

        if path.as_os_str().is_empty() && !flags.contains(HandleFlags::AT_EMPTY_PATH) {
            Err(ErrorImpl::InvalidArgument {
                name: "path".into(),
                description: "resolving an open file descriptor to a handle requires \
                              AT_EMPTY_PATH"
                    .into(),
            })?
        }

        let raw = syscalls::name_to_handle_at(dirfd, path, flags).map_err(|err| {
            match err.errno().raw_os_error() {
                libc::ENOTDIR => Error::from(ErrorImpl::NotADirectory { path: path.into() }),
                libc::EOPNOTSUPP => ErrorImpl::NotSupported {
                    feature: "file handle encoding on this filesystem".into(),
                }
                .into(),
                _ => ErrorImpl::RawOsError {
                    operation: "resolve path to file handle".into(),
                    source: err,
                }
                .into(),
            }
        })?;

        Ok(Self {
            bytes: raw.bytes,
            mount_id: raw.mount_id,
            unique_mount_id: unique,
        })
    }

    /// Resolve an already-open file descriptor to a file handle
    /// (`AT_EMPTY_PATH`).
    pub fn from_fd<Fd: AsFd>(fd: Fd, flags: HandleFlags) -> Result<Self, Error> {
        Self::from_path(fd, "", flags | HandleFlags::AT_EMPTY_PATH)
    }

    /// Reconstruct a handle from persisted [`FileHandle::to_bytes`] output
    /// plus the recorded mount id.
    ///
    /// The byte form is validated structurally (header present, inner
    /// length consistent, total within `MAX_HANDLE_SZ`) before it is ever
    /// handed to the kernel.
    pub fn from_bytes(bytes: &[u8], mount_id: u64, unique_mount_id: bool) -> Result<Self, Error> {
        if bytes.len() < FILE_HANDLE_HEADER_SZ {
            Err(ErrorImpl::InvalidArgument {
                name: "handle_bytes".into(),
                description: format!(
                    "too small: {} bytes (min: {FILE_HANDLE_HEADER_SZ})",
                    bytes.len()
                )
                .into(),
            })?
        }
        if bytes.len() > FILE_HANDLE_HEADER_SZ + MAX_HANDLE_SZ {
            Err(ErrorImpl::InvalidArgument {
                name: "handle_bytes".into(),
                description: format!(
                    "too large: {} bytes (max: {})",
                    bytes.len(),
                    FILE_HANDLE_HEADER_SZ + MAX_HANDLE_SZ
                )
                .into(),
            })?
        }

        let handle_bytes =
            u32::from_ne_bytes(bytes[0..4].try_into().expect("header is 4 bytes")) as usize;
        if handle_bytes != bytes.len() - FILE_HANDLE_HEADER_SZ {
            Err(ErrorImpl::InvalidArgument {
                name: "handle_bytes".into(),
                description: format!(
                    "inconsistent encoded length: {handle_bytes} (expected {})",
                    bytes.len() - FILE_HANDLE_HEADER_SZ
                )
                .into(),
            })?
        }

        Ok(Self {
            bytes: bytes.to_vec(),
            mount_id,
            unique_mount_id,
        })
    }

    /// The serialised handle, suitable for persisting alongside
    /// [`FileHandle::mount_id`].
    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The mount id the handle was resolved against.
    pub fn mount_id(&self) -> u64 {
        self.mount_id
    }

    /// Whether [`FileHandle::mount_id`] is the unique 64-bit id.
    pub fn has_unique_mount_id(&self) -> bool {
        self.unique_mount_id
    }

    /// Open the object this handle refers to.
    ///
    /// `mount_fd` must be an fd on the same filesystem the handle was
    /// resolved against. This is verified by comparing the fd's statx mount
    /// id (unique or legacy, matching the handle's flavour) to the recorded
    /// one *before* the kernel is asked to decode the handle; a mismatch is
    /// a domain error, not an errno.
    pub fn open<Fd: AsFd>(&self, mount_fd: Fd, flags: OpenFlags) -> Result<OwnedFd, Error> {
        let mount_fd = mount_fd.as_fd();

        let mask = if self.unique_mount_id {
            StatxMask::MNT_ID_UNIQUE
        } else {
            StatxMask::MNT_ID
        };
        let stx = syscalls::statx(mount_fd, "", AtFlags::EMPTY_PATH, mask).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "check mount id of mount fd".into(),
                source: err,
            }
        })?;

        if stx.stx_mnt_id != self.mount_id {
            Err(ErrorImpl::HandleMountMismatch {
                recorded: self.mount_id,
                found: stx.stx_mnt_id,
            })?
        }

        syscalls::open_by_handle_at(mount_fd, &self.bytes, flags).map_err(|err| {
            match err.errno().raw_os_error() {
                libc::ESTALE => ErrorImpl::InvalidArgument {
                    name: "handle".into(),
                    description: "file handle is stale (object was deleted)".into(),
                }
                .into(),
                _ => Error::from(ErrorImpl::RawOsError {
                    operation: "open file by handle".into(),
                    source: err,
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    use pretty_assertions::assert_eq;

    fn sample_bytes(data_len: usize) -> Vec<u8> {
        let mut bytes = vec![0_u8; FILE_HANDLE_HEADER_SZ + data_len];
        bytes[0..4].copy_from_slice(&(data_len as u32).to_ne_bytes());
        bytes[4..8].copy_from_slice(&1_u32.to_ne_bytes()); // handle_type
        for (i, b) in bytes[FILE_HANDLE_HEADER_SZ..].iter_mut().enumerate() {
            *b = i as u8;
        }
        bytes
    }

    #[test]
    fn from_bytes_round_trip() {
        let bytes = sample_bytes(16);
        let handle = FileHandle::from_bytes(&bytes, 0xdead, true).expect("valid handle bytes");

        assert_eq!(handle.to_bytes(), &bytes[..]);
        assert_eq!(handle.mount_id(), 0xdead);
        assert!(handle.has_unique_mount_id());
    }

    #[test]
    fn from_bytes_rejects_short_buffer() {
        let err = FileHandle::from_bytes(&[0_u8; 4], 1, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn from_bytes_rejects_oversized_buffer() {
        let bytes = sample_bytes(MAX_HANDLE_SZ + 8);
        let err = FileHandle::from_bytes(&bytes, 1, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn from_bytes_rejects_inconsistent_length() {
        let mut bytes = sample_bytes(16);
        // Claim more data than the buffer carries.
        bytes[0..4].copy_from_slice(&64_u32.to_ne_bytes());
        let err = FileHandle::from_bytes(&bytes, 1, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn handle_for_live_file() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("f"), b"x")?;

        let handle = match FileHandle::from_path(
            syscalls::AT_FDCWD,
            dir.path().join("f"),
            HandleFlags::empty(),
        ) {
            Ok(handle) => handle,
            // Not every test filesystem can encode handles.
            Err(err) if err.kind() == ErrorKind::NotSupported => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        assert!(handle.to_bytes().len() > FILE_HANDLE_HEADER_SZ);
        assert!(!handle.has_unique_mount_id());

        // Serialise and reconstruct; the two must agree.
        let copy = FileHandle::from_bytes(handle.to_bytes(), handle.mount_id(), false)?;
        assert_eq!(copy, handle);
        Ok(())
    }

    #[test]
    fn open_rejects_wrong_mount() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("f"), b"x")?;

        let handle = match FileHandle::from_path(
            syscalls::AT_FDCWD,
            dir.path().join("f"),
            HandleFlags::empty(),
        ) {
            Ok(handle) => handle,
            Err(err) if err.kind() == ErrorKind::NotSupported => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        // Forge a handle recorded against a different mount id; open() must
        // fail the domain check before the kernel ever sees the handle.
        let forged = FileHandle::from_bytes(handle.to_bytes(), handle.mount_id() + 1, false)?;
        let mount_fd = std::fs::File::open(dir.path())?;
        let err = forged.open(&mount_fd, OpenFlags::O_RDONLY).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandleMountMismatch);
        Ok(())
    }
}
