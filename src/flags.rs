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

//! Bit-flag types shared across the mntkit API.

use crate::syscalls;

use bitflags::bitflags;

bitflags! {
    /// Wrapper for the underlying `libc`'s `O_*` flags.
    ///
    /// The flag values and their meaning is identical to the description in
    /// the `open(2)` man page.
    ///
    /// # Caveats
    ///
    /// For historical reasons, the first three bits of `open(2)`'s flags are
    /// for the access mode and are actually treated as a 2-bit number. So, it
    /// is incorrect to attempt to do any checks on the access mode without
    /// masking it correctly. So some helpers were added to make usage more
    /// ergonomic.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct OpenFlags: libc::c_int {
        // Access modes (including O_PATH).
        const O_RDWR = libc::O_RDWR;
        const O_RDONLY = libc::O_RDONLY;
        const O_WRONLY = libc::O_WRONLY;
        const O_PATH = libc::O_PATH;

        // Fd flags.
        const O_CLOEXEC = libc::O_CLOEXEC;

        // Control lookups.
        const O_NOFOLLOW = libc::O_NOFOLLOW;
        const O_DIRECTORY = libc::O_DIRECTORY;
        const O_NOCTTY = libc::O_NOCTTY;

        // NOTE: This flag contains O_DIRECTORY!
        const O_TMPFILE = libc::O_TMPFILE;

        // File creation.
        const O_CREAT = libc::O_CREAT;
        const O_EXCL = libc::O_EXCL;
        const O_TRUNC = libc::O_TRUNC;
        const O_APPEND = libc::O_APPEND;

        // Sync.
        const O_SYNC = libc::O_SYNC;
        const O_DSYNC = libc::O_DSYNC;
        const O_DIRECT = libc::O_DIRECT;
        const O_NOATIME = libc::O_NOATIME;
        const O_NONBLOCK = libc::O_NONBLOCK;

        // Don't clobber unknown O_* bits.
        const _ = !0;
    }
}

impl OpenFlags {
    /// Grab the access mode bits from the flags.
    ///
    /// If the flags contain `O_PATH`, this returns `None`.
    #[inline]
    pub fn access_mode(self) -> Option<libc::c_int> {
        if self.contains(OpenFlags::O_PATH) {
            None
        } else {
            Some(self.bits() & libc::O_ACCMODE)
        }
    }

    /// Does the access mode imply read access?
    ///
    /// Returns false for `O_PATH`.
    #[inline]
    pub fn wants_read(self) -> bool {
        match self.access_mode() {
            None => false, // O_PATH
            Some(acc) => acc == libc::O_RDONLY || acc == libc::O_RDWR,
        }
    }

    /// Does the access mode imply write access? Note that there are several
    /// other bits in OpenFlags that imply write access other than `O_WRONLY`
    /// and `O_RDWR`. This function checks those bits as well.
    ///
    /// Returns false for `O_PATH`.
    #[inline]
    pub fn wants_write(self) -> bool {
        match self.access_mode() {
            None => false, // O_PATH
            Some(acc) => {
                acc == libc::O_WRONLY
                    || acc == libc::O_RDWR
                    || !self
                        // O_CREAT and O_TRUNC are silently ignored with O_PATH.
                        .intersection(OpenFlags::O_TRUNC | OpenFlags::O_CREAT)
                        .is_empty()
            }
        }
    }
}

bitflags! {
    /// Wrapper for the underlying `libc`'s `RESOLVE_*` flags.
    ///
    /// The flag values and their meaning is identical to the description in
    /// the [`openat2(2)`] man page.
    ///
    /// [`openat2(2)`]: http://man7.org/linux/man-pages/man2/openat2.2.html
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct ResolveFlags: u64 {
        const RESOLVE_BENEATH = libc::RESOLVE_BENEATH;
        const RESOLVE_IN_ROOT = libc::RESOLVE_IN_ROOT;
        const RESOLVE_NO_MAGICLINKS = libc::RESOLVE_NO_MAGICLINKS;
        const RESOLVE_NO_SYMLINKS = libc::RESOLVE_NO_SYMLINKS;
        const RESOLVE_NO_XDEV = libc::RESOLVE_NO_XDEV;
        const RESOLVE_CACHED = libc::RESOLVE_CACHED;

        // Don't clobber unknown RESOLVE_* bits.
        const _ = !0;
    }
}

bitflags! {
    /// Wrapper for the underlying `libc`'s `RENAME_*` flags.
    ///
    /// The flag values and their meaning is identical to the description in
    /// the [`renameat2(2)`] man page.
    ///
    /// [`renameat2(2)`] might not not be supported on your kernel -- in which
    /// case [`renameat2`] will fail if you specify any RenameFlags. You can
    /// verify whether [`renameat2(2)`] flags are supported by calling
    /// [`RenameFlags::is_supported`].
    ///
    /// [`renameat2(2)`]: http://man7.org/linux/man-pages/man2/rename.2.html
    /// [`renameat2`]: crate::mount::renameat2
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct RenameFlags: libc::c_uint {
        const RENAME_EXCHANGE = libc::RENAME_EXCHANGE;
        const RENAME_NOREPLACE = libc::RENAME_NOREPLACE;
        const RENAME_WHITEOUT = libc::RENAME_WHITEOUT;

        // Don't clobber unknown RENAME_* bits.
        const _ = !0;
    }
}

impl RenameFlags {
    /// Is this set of RenameFlags supported by the running kernel?
    pub fn is_supported(self) -> bool {
        self.is_empty() || *syscalls::RENAME_FLAGS_SUPPORTED
    }
}

bitflags! {
    /// Flags for [`name_to_handle_at(2)`]-based [`FileHandle`] creation.
    ///
    /// `AT_HANDLE_FID` and `AT_HANDLE_CONNECTABLE` are only understood by
    /// Linux 6.7+ and 6.13+ respectively; `AT_HANDLE_MNT_ID_UNIQUE` (6.12+)
    /// requests the unique 64-bit mount id rather than the reusable 32-bit
    /// one.
    ///
    /// [`name_to_handle_at(2)`]: http://man7.org/linux/man-pages/man2/name_to_handle_at.2.html
    /// [`FileHandle`]: crate::handle::FileHandle
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
    pub struct HandleFlags: libc::c_int {
        const AT_SYMLINK_FOLLOW = libc::AT_SYMLINK_FOLLOW;
        const AT_EMPTY_PATH = libc::AT_EMPTY_PATH;
        // AT_HANDLE_FID aliases AT_REMOVEDIR for name_to_handle_at(2).
        const AT_HANDLE_FID = 0x200;
        const AT_HANDLE_MNT_ID_UNIQUE = 0x001;
        const AT_HANDLE_CONNECTABLE = 0x002;
    }
}

#[cfg(test)]
mod tests {
    use crate::flags::{HandleFlags, OpenFlags, RenameFlags};

    macro_rules! openflags_tests {
        ($($test_name:ident ( $($flag:ident)|+ ) == {accmode: $accmode:expr, read: $wants_read:expr, write: $wants_write:expr} );+ $(;)?) => {
            $(
                paste::paste! {
                    #[test]
                    fn [<openflags_ $test_name _access_mode>]() {
                        let flags = $(OpenFlags::$flag)|*;
                        let accmode: Option<i32> = $accmode;
                        assert_eq!(flags.access_mode(), accmode, "{:?} access mode should be {:?}", flags, accmode.map(OpenFlags::from_bits_retain));
                    }

                    #[test]
                    fn [<openflags_ $test_name _wants_read>]() {
                        let flags = $(OpenFlags::$flag)|*;
                        assert_eq!(flags.wants_read(), $wants_read, "{:?} wants_read should be {:?}", flags, $wants_read);
                    }

                    #[test]
                    fn [<openflags_ $test_name _wants_write>]() {
                        let flags = $(OpenFlags::$flag)|*;
                        assert_eq!(flags.wants_write(), $wants_write, "{:?} wants_write should be {:?}", flags, $wants_write);
                    }
                }
            )*
        }
    }

    openflags_tests! {
        plain_rdonly(O_RDONLY) == {accmode: Some(libc::O_RDONLY), read: true, write: false};
        plain_wronly(O_WRONLY) == {accmode: Some(libc::O_WRONLY), read: false, write: true};
        plain_rdwr(O_RDWR) == {accmode: Some(libc::O_RDWR), read: true, write: true};
        plain_opath(O_PATH) == {accmode: None, read: false, write: false};
        rdwr_opath(O_RDWR|O_PATH) == {accmode: None, read: false, write: false};

        trunc_rdonly(O_RDONLY|O_TRUNC) == {accmode: Some(libc::O_RDONLY), read: true, write: true};
        creat_rdonly(O_RDONLY|O_CREAT) == {accmode: Some(libc::O_RDONLY), read: true, write: true};
        creat_path(O_PATH|O_CREAT) == {accmode: None, read: false, write: false};
    }

    #[test]
    fn rename_flags_is_supported() {
        assert!(
            RenameFlags::empty().is_supported(),
            "empty flags should be supported"
        );
    }

    #[test]
    fn handle_flags_disjoint() {
        // The AT_HANDLE_* bits intentionally reuse low AT_* values; they must
        // not collide with the path-resolution AT_* bits we accept.
        let resolution = HandleFlags::AT_SYMLINK_FOLLOW | HandleFlags::AT_EMPTY_PATH;
        let handle = HandleFlags::AT_HANDLE_MNT_ID_UNIQUE | HandleFlags::AT_HANDLE_CONNECTABLE;
        assert!(resolution.intersection(handle).is_empty());
    }
}
