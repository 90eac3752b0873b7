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

//! Unified ACL access on open file descriptors.
//!
//! ZFS (and NFSv4 servers) store a rich ACL in the `system.nfs4_acl_xdr`
//! xattr; classic filesystems store POSIX.1e ACLs in
//! `system.posix_acl_access` and `system.posix_acl_default`. [`fgetacl`]
//! probes which flavour the target filesystem speaks and returns a tagged
//! [`Acl`]; [`fsetacl`] and [`fremoveacl`] dispatch the other way.
//!
//! The xattr probe protocol is shared by all of these: a zero-length read
//! distinguishes *present* (size returned), *absent* (`ENODATA`), and
//! *flavour not supported here* (`EOPNOTSUPP`) without allocating.

pub mod nfs4;
pub mod posix;

use crate::{
    error::{Error, ErrorImpl},
    syscalls,
};

use nfs4::Nfs4Acl;
use posix::PosixAcl;

use std::os::unix::io::AsFd;

use rustix::io::Errno;

pub(crate) const NFS4_ACL_XATTR: &str = "system.nfs4_acl_xdr";
pub(crate) const POSIX_ACCESS_XATTR: &str = "system.posix_acl_access";
pub(crate) const POSIX_DEFAULT_XATTR: &str = "system.posix_acl_default";

/// Result of a zero-length xattr probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XattrProbe {
    /// The xattr exists and is `size` bytes long.
    Present(usize),
    /// The filesystem speaks this xattr but none is set (`ENODATA`).
    Missing,
    /// The filesystem does not support this xattr at all (`EOPNOTSUPP`).
    Unsupported,
}

pub(crate) fn probe_xattr<Fd: AsFd>(fd: Fd, name: &'static str) -> Result<XattrProbe, Error> {
    match syscalls::fgetxattr(fd, name, &mut []) {
        Ok(size) => Ok(XattrProbe::Present(size)),
        Err(err) => match err.errno() {
            Errno::NODATA => Ok(XattrProbe::Missing),
            Errno::OPNOTSUPP => Ok(XattrProbe::Unsupported),
            _ => Err(ErrorImpl::RawOsError {
                operation: "probe ACL xattr".into(),
                source: err,
            })?,
        },
    }
}

/// Read an xattr whose size was learned from a prior probe. The buffer is
/// allocated to exactly that size; a racing enlargement surfaces as the
/// kernel's `ERANGE`.
pub(crate) fn read_xattr<Fd: AsFd>(
    fd: Fd,
    name: &'static str,
    size: usize,
) -> Result<Vec<u8>, Error> {
    if size == 0 {
        // A zero-length read is the probe itself; don't reissue it.
        return Ok(Vec::new());
    }
    let mut buf = vec![0_u8; size];
    let n = syscalls::fgetxattr(fd, name, &mut buf).map_err(|err| ErrorImpl::RawOsError {
        operation: "read ACL xattr".into(),
        source: err,
    })?;
    buf.truncate(n);
    Ok(buf)
}

fn remove_xattr_ignore_missing<Fd: AsFd>(fd: Fd, name: &'static str) -> Result<(), Error> {
    match syscalls::fremovexattr(fd, name) {
        Ok(()) => Ok(()),
        Err(err) if err.errno() == Errno::NODATA => Ok(()),
        Err(err) => Err(ErrorImpl::RawOsError {
            operation: "remove ACL xattr".into(),
            source: err,
        })?,
    }
}

/// An ACL read from (or destined for) a file descriptor, tagged by the
/// xattr flavour it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acl {
    Nfs4(Nfs4Acl),
    Posix(PosixAcl),
}

impl Acl {
    /// Does this ACL add nothing beyond the traditional mode bits?
    pub fn is_trivial(&self) -> bool {
        match self {
            Acl::Nfs4(acl) => acl.is_trivial(),
            Acl::Posix(acl) => acl.is_trivial(),
        }
    }
}

/// Read the ACL of an open file descriptor.
///
/// Probes `system.nfs4_acl_xdr` first; filesystems answering `EOPNOTSUPP`
/// fall through to the POSIX xattr pair. `ENODATA` means the flavour is
/// supported but nothing is set, which decodes as an empty (trivial) ACL.
/// A filesystem rejecting both flavours is an error (ACLs are disabled).
pub fn fgetacl<Fd: AsFd>(fd: Fd) -> Result<Acl, Error> {
    let fd = fd.as_fd();

    match probe_xattr(fd, NFS4_ACL_XATTR)? {
        XattrProbe::Present(size) => {
            let bytes = read_xattr(fd, NFS4_ACL_XATTR, size)?;
            Ok(Acl::Nfs4(Nfs4Acl::from_xdr(&bytes)?))
        }
        XattrProbe::Missing => Ok(Acl::Nfs4(Nfs4Acl::empty())),
        XattrProbe::Unsupported => {
            let access = match probe_xattr(fd, POSIX_ACCESS_XATTR)? {
                XattrProbe::Present(size) => read_xattr(fd, POSIX_ACCESS_XATTR, size)?,
                XattrProbe::Missing => Vec::new(),
                XattrProbe::Unsupported => Err(ErrorImpl::NotSupported {
                    feature: "ACLs on this filesystem".into(),
                })?,
            };
            let default = match probe_xattr(fd, POSIX_DEFAULT_XATTR)? {
                XattrProbe::Present(size) => Some(read_xattr(fd, POSIX_DEFAULT_XATTR, size)?),
                XattrProbe::Missing | XattrProbe::Unsupported => None,
            };
            Ok(Acl::Posix(PosixAcl::from_xattrs(&access, default.as_deref())?))
        }
    }
}

/// Write an ACL to an open file descriptor, dispatching on the flavour.
///
/// For the POSIX flavour the default xattr is replaced when the value
/// carries one and removed when it does not, so the fd always ends up
/// matching the value exactly.
pub fn fsetacl<Fd: AsFd>(fd: Fd, acl: &Acl) -> Result<(), Error> {
    let fd = fd.as_fd();

    match acl {
        Acl::Nfs4(acl) => set_nfs4_xattr(fd, &acl.to_xdr()),
        Acl::Posix(acl) => set_posix_xattrs(
            fd,
            &acl.access_bytes(),
            acl.default_bytes().as_deref(),
        ),
    }
}

/// Remove all ACL xattrs from an open file descriptor.
///
/// The filesystem flavour is probed the same way [`fgetacl`] does it;
/// `ENODATA` on any individual removal is ignored (there was nothing to
/// remove).
pub fn fremoveacl<Fd: AsFd>(fd: Fd) -> Result<(), Error> {
    let fd = fd.as_fd();

    match probe_xattr(fd, NFS4_ACL_XATTR)? {
        XattrProbe::Present(_) => remove_xattr_ignore_missing(fd, NFS4_ACL_XATTR),
        XattrProbe::Missing => Ok(()),
        XattrProbe::Unsupported => {
            remove_xattr_ignore_missing(fd, POSIX_ACCESS_XATTR)?;
            remove_xattr_ignore_missing(fd, POSIX_DEFAULT_XATTR)
        }
    }
}

/// Low-level writer: store raw XDR bytes into `system.nfs4_acl_xdr`,
/// bypassing the [`Nfs4Acl`] wrapper.
pub fn set_nfs4_xattr<Fd: AsFd>(fd: Fd, xdr: &[u8]) -> Result<(), Error> {
    syscalls::fsetxattr(fd, NFS4_ACL_XATTR, xdr).map_err(|err| {
        ErrorImpl::RawOsError {
            operation: "set NFSv4 ACL xattr".into(),
            source: err,
        }
        .into()
    })
}

/// Low-level writer: store raw POSIX.1e xattr blobs, bypassing the
/// [`PosixAcl`] wrapper. A `None` default removes the default xattr.
pub fn set_posix_xattrs<Fd: AsFd>(
    fd: Fd,
    access: &[u8],
    default: Option<&[u8]>,
) -> Result<(), Error> {
    let fd = fd.as_fd();

    syscalls::fsetxattr(fd, POSIX_ACCESS_XATTR, access).map_err(|err| ErrorImpl::RawOsError {
        operation: "set POSIX access ACL xattr".into(),
        source: err,
    })?;

    match default {
        Some(default) => {
            syscalls::fsetxattr(fd, POSIX_DEFAULT_XATTR, default).map_err(|err| {
                ErrorImpl::RawOsError {
                    operation: "set POSIX default ACL xattr".into(),
                    source: err,
                }
                .into()
            })
        }
        None => remove_xattr_ignore_missing(fd, POSIX_DEFAULT_XATTR),
    }
}
