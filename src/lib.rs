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

//! mntkit exposes the Linux kernel's filesystem and mount primitives that
//! portable standard libraries leave out, behind a safe, typed surface. It
//! exists for storage-management software (ZFS/NFSv4 deployments in
//! particular) that needs to:
//!
//! * enumerate mounts by id ([`mount::listmount`], [`mount::statmount`],
//!   [`mount::MountIter`]) instead of scraping `/proc/self/mountinfo`;
//! * walk a mounted dataset depth-first without ever crossing a symlink or
//!   a mount boundary ([`iter::FsIterator`]), with mid-walk checkpointing
//!   and resume;
//! * persist kernel file handles across reboots and open them again safely
//!   ([`handle::FileHandle`]);
//! * read and write both NFSv4 and POSIX.1e ACLs on open file descriptors
//!   ([`acl::fgetacl`], [`acl::fsetacl`]).
//!
//! # Example
//!
//! ```no_run
//! use mntkit::{FsIterator, IterOptions};
//!
//! # fn main() -> Result<(), mntkit::Error> {
//! let mut iter = FsIterator::open("/mnt/tank/home", "tank/home", IterOptions::default())?;
//! while let Some(entry) = iter.next_entry()? {
//!     println!("{:?}/{:?}: {:?} bytes", entry.parent, entry.name, entry.stat.size);
//! }
//! let totals = iter.stats();
//! println!("{} items, {} bytes", totals.count, totals.bytes);
//! # Ok(())
//! # }
//! ```
//!
//! # Assumptions
//!
//! This library is Linux-only and assumes `openat2(2)` support (Linux
//! 5.6+). `statmount(2)`/`listmount(2)` (Linux 6.8+) are probed at runtime;
//! features that depend on them degrade or report
//! [`ErrorKind::NotSupported`] on older kernels.

// mntkit only supports Linux.
#![cfg(target_os = "linux")]
// Raw syscall plumbing is confined to the syscalls module.
#![deny(unsafe_code)]

pub mod acl;
pub mod error;
pub mod flags;
pub mod handle;
pub mod iter;
pub mod mount;
pub mod statx;

// Internally used helpers.
mod syscalls;
mod utils;


pub use crate::{
    acl::{fgetacl, fremoveacl, fsetacl, Acl},
    error::{Error, ErrorKind},
    flags::{HandleFlags, OpenFlags, RenameFlags, ResolveFlags},
    handle::FileHandle,
    iter::{
        DirStackEntry, DirStackSnapshot, FsIterator, IterEntry, IterOptions, IterState, MAX_DEPTH,
    },
    mount::{MountId, MountIter, StatmountMask, StatmountRecord, LSMT_ROOT},
    statx::{statx, AtFlags, Device, FileKind, StatxMask, StatxRecord, Timespec},
};
