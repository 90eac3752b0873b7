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

//! Depth-first filesystem traversal that never leaves its filesystem.
//!
//! [`FsIterator`] walks a mounted filesystem in strict pre-order, opening
//! every child with `RESOLVE_NO_XDEV | RESOLVE_NO_SYMLINKS` so that neither
//! a symlink nor a foreign mount planted in the tree can redirect the walk.
//! Such entries are silently pruned, because the policy is "never leave
//! this filesystem", not "complain about its edges".
//!
//! The traversal state is a bounded stack of directory frames. A
//! [`FsIterator::dir_stack`] snapshot (path + inode per frame) can be fed
//! back into a new iterator to resume a traversal after a restart: the
//! iterator re-descends by matching inode "cookies" against directory
//! entries, without yielding the intermediate directories again.

use crate::{
    error::{Error, ErrorExt, ErrorImpl},
    flags::{OpenFlags, ResolveFlags},
    mount::{self, StatmountMask},
    statx::{AtFlags, FileKind, StatxMask, StatxRecord},
    syscalls::{self, OpenHow},
};

use std::{
    ffi::OsString,
    os::unix::{
        ffi::OsStrExt,
        io::{AsRawFd, OwnedFd, RawFd},
    },
    path::{Path, PathBuf},
};

use rustix::{
    fs::{Dir, FileType},
    io::Errno,
};

/// Hard ceiling on the directory stack. Exceeding it aborts the traversal
/// with [`ErrorKind::DepthExceeded`].
///
/// [`ErrorKind::DepthExceeded`]: crate::error::ErrorKind::DepthExceeded
pub const MAX_DEPTH: usize = 2048;

const ITER_STATX_MASK: StatxMask = StatxMask::BASIC_STATS
    .union(StatxMask::BTIME)
    .union(StatxMask::MNT_ID_UNIQUE);

const DIR_OPEN_FLAGS: OpenFlags = OpenFlags::O_DIRECTORY.union(OpenFlags::O_NOFOLLOW);

fn statx_flags_iter() -> AtFlags {
    AtFlags::EMPTY_PATH | AtFlags::SYMLINK_NOFOLLOW
}

fn resolve_flags_iter() -> u64 {
    (ResolveFlags::RESOLVE_NO_XDEV | ResolveFlags::RESOLVE_NO_SYMLINKS).bits()
}

/// One element of a [`FsIterator::dir_stack`] snapshot: the absolute path
/// of a directory frame and its inode number (the resume cookie).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirStackEntry {
    pub path: PathBuf,
    pub ino: u64,
}

/// An ordered directory-stack snapshot, root first. Feed it back through
/// [`IterOptions::dir_stack`] to resume a traversal.
pub type DirStackSnapshot = Vec<DirStackEntry>;

/// Running totals of a traversal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterState {
    /// Items yielded so far (files and directories).
    pub count: u64,
    /// Total size in bytes of the regular files yielded so far.
    pub bytes: u64,
    /// Directory currently being read; empty once iteration completed.
    pub current_directory: PathBuf,
}

/// One yielded item.
#[derive(Debug)]
pub struct IterEntry {
    /// Path of the directory containing this entry.
    pub parent: PathBuf,
    /// Entry name within `parent`.
    pub name: OsString,
    /// An open file descriptor for the entry.
    ///
    /// The descriptor is owned by the iterator and is closed on the next
    /// advance (or when the iterator is dropped). Read from it, `fstat`
    /// it, or duplicate it if you need it longer, but do not close it.
    pub fd: RawFd,
    /// statx taken on `fd`.
    pub stat: StatxRecord,
    /// Object kind (directories and regular files in the common case;
    /// symlinks only appear if `file_open_flags` includes `O_PATH`).
    pub kind: FileKind,
}

/// Progress callback: receives the current directory stack and running
/// totals. Returning an error terminates the iteration with that error.
pub type ProgressCallback = Box<dyn FnMut(&[DirStackEntry], &IterState) -> Result<(), Error> + Send>;

/// Options for [`FsIterator::open`].
#[derive(Default)]
pub struct IterOptions {
    /// Start the walk at `mountpoint/relative_path` instead of the
    /// mountpoint itself.
    pub relative_path: Option<PathBuf>,
    /// Flags used to open non-directory entries (`O_RDONLY` by default).
    /// Directories always use `O_DIRECTORY | O_NOFOLLOW`.
    pub file_open_flags: OpenFlags,
    /// Skip non-directory entries born after this time (seconds). `None`
    /// disables the filter.
    pub btime_cutoff: Option<i64>,
    /// Invoke `progress` after every `reporting_increment`-th yield. Zero
    /// means never.
    pub reporting_increment: u64,
    pub progress: Option<ProgressCallback>,
    /// Resume from a prior [`FsIterator::dir_stack`] snapshot.
    pub dir_stack: Option<DirStackSnapshot>,
}

struct DirFrame {
    path: PathBuf,
    /// The frame's own directory fd, used as the dirfd for opening
    /// children. `stream` holds an independent duplicate, so the fd
    /// handed out in an [`IterEntry`] never aliases the read position.
    dirfd: OwnedFd,
    stream: Dir,
    ino: u64,
}

struct LastEntry {
    fd: OwnedFd,
    is_dir: bool,
}

/// Depth-first iterator over one mounted filesystem.
///
/// Also usable as a plain [`Iterator`] of `Result<IterEntry, Error>`.
pub struct FsIterator {
    stack: Vec<DirFrame>,
    last: Option<LastEntry>,
    cnt: u64,
    cnt_bytes: u64,
    file_open_flags: OpenFlags,
    btime_cutoff: Option<i64>,
    skip_next: bool,
    /// Inode cookies from a resume snapshot, indexed by stack depth.
    /// `cookies[d]` is the inode of the directory to descend into when the
    /// stack is `d` frames deep; consumed cookies are zeroed.
    cookies: Vec<u64>,
    restoring: bool,
    reporting_increment: u64,
    progress: Option<ProgressCallback>,
}

impl FsIterator {
    /// Open a traversal rooted at `mountpoint` (or
    /// `mountpoint/relative_path`).
    ///
    /// The root is opened with `RESOLVE_NO_SYMLINKS` and directory
    /// semantics. When the kernel supports `statmount(2)`, the mount's
    /// source string is verified byte-for-byte against `filesystem_name`
    /// so that a traversal meant for one dataset cannot silently run on
    /// whatever got mounted over its path since.
    pub fn open<P: AsRef<Path>>(
        mountpoint: P,
        filesystem_name: &str,
        options: IterOptions,
    ) -> Result<Self, Error> {
        if !*syscalls::OPENAT2_IS_SUPPORTED {
            Err(ErrorImpl::NotSupported {
                feature: "openat2".into(),
            })?
        }

        let mountpoint = mountpoint.as_ref();
        let root_path = match &options.relative_path {
            Some(rel) if !rel.as_os_str().is_empty() => mountpoint.join(rel),
            _ => mountpoint.to_path_buf(),
        };

        let how = OpenHow {
            flags: DIR_OPEN_FLAGS.bits() as u64,
            mode: 0,
            resolve: ResolveFlags::RESOLVE_NO_SYMLINKS.bits(),
        };
        let root_fd = syscalls::openat2(syscalls::AT_FDCWD, &root_path, &how).map_err(|err| {
            match err.errno() {
                Errno::NOTDIR => Error::from(ErrorImpl::NotADirectory {
                    path: root_path.clone(),
                }),
                _ => ErrorImpl::RawOsError {
                    operation: "open iteration root".into(),
                    source: err,
                }
                .into(),
            }
        })?;

        let root_stx = syscalls::statx(&root_fd, "", statx_flags_iter(), ITER_STATX_MASK)
            .map_err(|err| ErrorImpl::RawOsError {
                operation: "statx iteration root".into(),
                source: err,
            })?;

        // Verify the mount source. Kernels without statmount(2) simply
        // don't get this protection.
        if mount::statmount_supported() {
            let record = mount::statmount(
                root_stx.stx_mnt_id,
                StatmountMask::SB_BASIC | StatmountMask::SB_SOURCE,
            )
            .with_wrap(|| format!("verify mount source of {root_path:?}"))?;
            if let Some(source) = record.sb_source {
                if source != filesystem_name {
                    return Err(ErrorImpl::SourceMismatch {
                        path: root_path,
                        expected: filesystem_name.into(),
                        found: source,
                    }
                    .into());
                }
            }
        }

        let stream = Dir::read_from(&root_fd).map_err(|errno| ErrorImpl::OsError {
            operation: format!("open directory stream for {root_path:?}").into(),
            source: errno.into(),
        })?;

        let cookies: Vec<u64> = options
            .dir_stack
            .as_deref()
            .map(|snapshot| snapshot.iter().map(|entry| entry.ino).collect())
            .unwrap_or_default();
        // cookies[0] is the root itself, which we just opened; restoration
        // only has work to do when there is somewhere deeper to descend.
        let restoring = cookies.len() > 1;

        Ok(Self {
            stack: vec![DirFrame {
                path: root_path,
                dirfd: root_fd,
                stream,
                ino: root_stx.stx_ino,
            }],
            last: None,
            cnt: 0,
            cnt_bytes: 0,
            file_open_flags: options.file_open_flags,
            btime_cutoff: options.btime_cutoff,
            skip_next: false,
            cookies: if restoring { cookies } else { Vec::new() },
            restoring,
            reporting_increment: options.reporting_increment,
            progress: options.progress,
        })
    }

    /// Advance the traversal. `Ok(None)` means the walk completed.
    pub fn next_entry(&mut self) -> Result<Option<IterEntry>, Error> {
        // Close the fd handed out on the previous advance.
        self.last = None;

        // A requested skip() pops the frame that was pushed for the last
        // yielded directory before anything is read from it.
        if self.skip_next {
            self.skip_next = false;
            if self.stack.len() > 1 {
                self.stack.pop();
            }
        }

        loop {
            let depth = self.stack.len();
            if depth == 0 {
                return Ok(None);
            }

            let dent = match self.stack.last_mut().expect("stack is non-empty").stream.next() {
                None => {
                    // Directory exhausted. If a restore cookie for this
                    // depth is still unsatisfied, the saved directory no
                    // longer exists here.
                    if self.restoring && depth < self.cookies.len() && self.cookies[depth] != 0 {
                        let path = self.stack[depth - 1].path.clone();
                        return Err(ErrorImpl::RestoreFailed { depth, path }.into());
                    }
                    // Frame-drop closes the stream; close errors on pop are
                    // not interesting.
                    self.stack.pop();
                    continue;
                }
                Some(Err(errno)) => {
                    let path = &self.stack[depth - 1].path;
                    return Err(ErrorImpl::OsError {
                        operation: format!("readdir {path:?}").into(),
                        source: errno.into(),
                    })?;
                }
                Some(Ok(dent)) => dent,
            };

            let name_bytes = dent.file_name().to_bytes();
            if name_bytes == b"." || name_bytes == b".." {
                continue;
            }

            // Cookie matching: while restoring, skip everything in this
            // directory except the entry whose inode matches the saved
            // cookie for the next depth.
            if self.restoring && depth < self.cookies.len() {
                let cookie = self.cookies[depth];
                if cookie != 0 {
                    if dent.ino() != cookie {
                        continue;
                    }
                    self.cookies[depth] = 0;
                }
            }

            let name: OsString = std::ffi::OsStr::from_bytes(name_bytes).to_os_string();
            let dir_hint = dent.file_type() == FileType::Directory;
            let open_flags = if dir_hint {
                DIR_OPEN_FLAGS
            } else {
                self.file_open_flags
            };
            let how = OpenHow {
                flags: open_flags.bits() as u64,
                mode: 0,
                resolve: resolve_flags_iter(),
            };

            let parent = self.stack.last().expect("stack is non-empty");
            let fd = match syscalls::openat2(&parent.dirfd, &name, &how) {
                Ok(fd) => fd,
                // ELOOP: the entry (or a racing replacement) is a symlink.
                // EXDEV: the entry is on a different filesystem (a mount
                // boundary). Both prune the branch and continue.
                Err(err) if matches!(err.errno(), Errno::LOOP | Errno::XDEV) => continue,
                Err(err) => {
                    return Err(ErrorImpl::RawOsError {
                        operation: format!("open entry {name:?}").into(),
                        source: err,
                    })?
                }
            };

            let stx = syscalls::statx(&fd, "", statx_flags_iter(), ITER_STATX_MASK).map_err(
                |err| ErrorImpl::RawOsError {
                    operation: format!("statx entry {name:?}").into(),
                    source: err,
                },
            )?;
            let stat = StatxRecord::from_raw(&stx);
            let Some(kind) = FileKind::from_mode(stx.stx_mode) else {
                // A mode without a recognisable type; nothing useful can
                // be yielded for it.
                continue;
            };
            let is_dir = kind == FileKind::Directory;

            // Birth-time filter applies to non-directories only.
            if !is_dir {
                if let Some(cutoff) = self.btime_cutoff {
                    if stx.stx_btime.tv_sec > cutoff {
                        continue;
                    }
                }
            }

            let parent_path = parent.path.clone();

            if is_dir {
                let frame_path = parent_path.join(&name);
                if self.stack.len() >= MAX_DEPTH {
                    return Err(ErrorImpl::DepthExceeded {
                        limit: MAX_DEPTH,
                        path: frame_path,
                    })?;
                }

                // The caller gets the original fd for the yield; the frame
                // needs its own lifetime, so it runs on a duplicate.
                let dirfd = fd.try_clone().map_err(|err| ErrorImpl::OsError {
                    operation: format!("duplicate directory fd for {frame_path:?}").into(),
                    source: err,
                })?;
                let stream = Dir::read_from(&dirfd).map_err(|errno| ErrorImpl::OsError {
                    operation: format!("open directory stream for {frame_path:?}").into(),
                    source: errno.into(),
                })?;
                self.stack.push(DirFrame {
                    path: frame_path,
                    dirfd,
                    stream,
                    ino: stx.stx_ino,
                });

                if self.restoring {
                    // This descent was driven by a cookie; the contract is
                    // that yields resume *inside* the restored directory,
                    // so the directory itself is not re-yielded.
                    if self.stack.len() >= self.cookies.len() {
                        self.restoring = false;
                        self.cookies.clear();
                    }
                    continue;
                }
            }

            self.cnt += 1;
            if kind == FileKind::Regular {
                self.cnt_bytes += stx.stx_size;
            }

            let raw_fd = fd.as_raw_fd();
            self.last = Some(LastEntry { fd, is_dir });
            self.maybe_report(&parent_path)?;

            return Ok(Some(IterEntry {
                parent: parent_path,
                name,
                fd: raw_fd,
                stat,
                kind,
            }));
        }
    }

    fn maybe_report(&mut self, current_dir: &Path) -> Result<(), Error> {
        if self.reporting_increment == 0 || self.cnt % self.reporting_increment != 0 {
            return Ok(());
        }
        let Some(callback) = self.progress.as_mut() else {
            return Ok(());
        };

        let snapshot: Vec<DirStackEntry> = self
            .stack
            .iter()
            .map(|frame| DirStackEntry {
                path: frame.path.clone(),
                ino: frame.ino,
            })
            .collect();
        let state = IterState {
            count: self.cnt,
            bytes: self.cnt_bytes,
            current_directory: current_dir.to_path_buf(),
        };
        callback(&snapshot, &state)
    }

    /// Current traversal statistics.
    pub fn stats(&self) -> IterState {
        IterState {
            count: self.cnt,
            bytes: self.cnt_bytes,
            current_directory: self
                .stack
                .last()
                .map(|frame| frame.path.clone())
                .unwrap_or_default(),
        }
    }

    /// Skip recursion into the directory yielded by the previous advance.
    ///
    /// Legal only while the last yielded item is a directory; the pending
    /// child frame is dropped on the next advance, before anything is read
    /// from it.
    pub fn skip(&mut self) -> Result<(), Error> {
        match &self.last {
            Some(last) if last.is_dir => {
                self.skip_next = true;
                Ok(())
            }
            _ => Err(ErrorImpl::InvalidArgument {
                name: "skip".into(),
                description: "skip() can only be called when the last yielded item was a \
                              directory"
                    .into(),
            })?,
        }
    }

    /// Snapshot of the current directory stack, root first.
    ///
    /// Note that restoration matches directories by inode, not by path: if
    /// a directory was renamed between snapshot and resume, the resumed
    /// iterator follows the inode and this method then reports the
    /// directory's *current* path.
    pub fn dir_stack(&self) -> DirStackSnapshot {
        self.stack
            .iter()
            .map(|frame| DirStackEntry {
                path: frame.path.clone(),
                ino: frame.ino,
            })
            .collect()
    }
}

impl std::fmt::Debug for FsIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsIterator")
            .field("cnt", &self.cnt)
            .field("cnt_bytes", &self.cnt_bytes)
            .field("skip_next", &self.skip_next)
            .field("restoring", &self.restoring)
            .finish_non_exhaustive()
    }
}

impl Iterator for FsIterator {
    type Item = Result<IterEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
