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

//! Fixture helpers for the integration tests.

use crate::{
    mount::{self, StatmountMask},
    statx::{statx, AtFlags, StatxMask},
    syscalls,
};

use std::path::Path;

use anyhow::{Context, Error};
use rustix::fs::{self as rustix_fs, Mode, OFlags};

macro_rules! create_inode {
    // "foo/bar" => (dir)
    ($path:expr => dir) => {
        anyhow::Context::with_context(std::fs::create_dir($path), || {
            format!("mkdir {}", $path.display())
        })
    };
    // "foo/bar" => (file "contents")
    ($path:expr => file $content:expr) => {
        anyhow::Context::with_context(std::fs::write($path, $content), || {
            format!("mkfile {}", $path.display())
        })
    };
    // "foo/bar" => (file)
    ($path:expr => file) => {
        $crate::tests::common::create_inode!($path => file "")
    };
    // "foo/bar" => (symlink -> "target")
    ($path:expr => symlink -> $target:expr) => {
        anyhow::Context::with_context(std::os::unix::fs::symlink($target, $path), || {
            format!("symlink {} -> {}", $path.display(), $target)
        })
    };
}

macro_rules! create_tree {
    // create_tree! {
    //     "a" => (dir);
    //     "a/b/c" => (file "data");
    //     "b-link" => (symlink -> "a/b");
    // }
    ($($subpath:expr => ($($inner:tt)*));+ $(;)*) => {
        {
            (|| -> anyhow::Result<tempfile::TempDir> {
                let root = tempfile::TempDir::new()?;
                $(
                    {
                        let root_dir: &std::path::Path = root.as_ref();
                        let path = root_dir.join($subpath);
                        if let Some(parent) = path.parent() {
                            anyhow::Context::with_context(std::fs::create_dir_all(parent), || {
                                format!("mkdirall {}", path.display())
                            })?;
                        }
                        $crate::tests::common::create_inode!(&path => $($inner)*)?;
                    }
                )*
                Ok(root)
            })()
        }
    }
}

pub(crate) use {create_inode, create_tree};

/// The `statmount(2)` source string the iterator will verify the fixture
/// root against, or `None` when the running kernel cannot report one (in
/// which case the verification is skipped and any name passes).
pub(crate) fn filesystem_source(path: &Path) -> Result<Option<String>, Error> {
    if !mount::statmount_supported() {
        return Ok(None);
    }
    let record = statx(
        syscalls::AT_FDCWD,
        path,
        AtFlags::SYMLINK_NOFOLLOW,
        StatxMask::MNT_ID_UNIQUE,
    )?;
    let Some(mnt_id) = record.mnt_id else {
        return Ok(None);
    };
    let record = mount::statmount(mnt_id, StatmountMask::SB_SOURCE)?;
    Ok(record.sb_source)
}

/// The name to hand [`FsIterator::open`] so the source check passes on the
/// test filesystem.
///
/// [`FsIterator::open`]: crate::iter::FsIterator::open
pub(crate) fn fixture_source(path: &Path) -> Result<String, Error> {
    Ok(filesystem_source(path)?.unwrap_or_else(|| "unchecked".into()))
}

/// Does the fixture filesystem report birth times?
pub(crate) fn btime_supported(path: &Path) -> Result<bool, Error> {
    let record = statx(
        syscalls::AT_FDCWD,
        path,
        AtFlags::SYMLINK_NOFOLLOW,
        StatxMask::BTIME,
    )?;
    Ok(record.btime.is_some())
}

/// Create a chain of `depth` nested single-letter directories under
/// `root`, working fd-to-fd so the chain can exceed `PATH_MAX`.
pub(crate) fn make_deep_chain(root: &Path, depth: usize) -> Result<(), Error> {
    let mut dirfd = rustix_fs::open(
        root,
        OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .context("open chain root")?;

    for _ in 0..depth {
        rustix_fs::mkdirat(&dirfd, "d", Mode::from_raw_mode(0o755)).context("mkdirat chain")?;
        dirfd = rustix_fs::openat(
            &dirfd,
            "d",
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .context("openat chain")?;
    }
    Ok(())
}

/// Make sure at least `need` file descriptors can be open at once, raising
/// the soft `RLIMIT_NOFILE` towards the hard limit if necessary. Returns
/// false when the hard limit is too low (callers should skip the test).
#[allow(unsafe_code)]
pub(crate) fn ensure_fd_headroom(need: u64) -> bool {
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rl is a valid rlimit out-buffer.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } != 0 {
        return false;
    }
    if rl.rlim_cur >= need {
        return true;
    }
    if rl.rlim_max != libc::RLIM_INFINITY && rl.rlim_max < need {
        return false;
    }

    rl.rlim_cur = need;
    // SAFETY: rl holds the validated new limits.
    unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rl) == 0 }
}
