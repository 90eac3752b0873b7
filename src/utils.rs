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

//! Internal helpers shared across mntkit.

use std::{
    ffi::{CString, OsStr},
    fs,
    os::unix::{
        ffi::OsStrExt,
        io::{AsFd, AsRawFd},
    },
    path::{Path, PathBuf},
};

pub(crate) trait ToCString {
    /// Convert to a CStr.
    fn to_c_string(&self) -> CString;
}

impl ToCString for OsStr {
    fn to_c_string(&self) -> CString {
        let filtered: Vec<_> = self
            .as_bytes()
            .iter()
            .copied()
            .take_while(|&c| c != b'\0')
            .collect();
        CString::new(filtered).expect("nul bytes should've been excluded")
    }
}

impl ToCString for Path {
    fn to_c_string(&self) -> CString {
        self.as_os_str().to_c_string()
    }
}

/// Get the path a file descriptor currently references.
///
/// This is done through `readlink(/proc/self/fd/$n)` and is naturally racy,
/// so it MUST only be used for informational purposes (we only use it to
/// pretty-print syscall arguments in error messages).
pub(crate) fn unsafe_fd_path<Fd: AsFd>(fd: Fd) -> Option<PathBuf> {
    let fd = fd.as_fd().as_raw_fd();
    if fd == libc::AT_FDCWD {
        return fs::read_link("/proc/self/cwd").ok();
    }
    if fd.is_negative() {
        return None;
    }
    fs::read_link(format!("/proc/self/fd/{fd}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_c_string_plain() {
        assert_eq!(
            Path::new("/a/b").to_c_string(),
            CString::new("/a/b").unwrap()
        );
    }

    #[test]
    fn to_c_string_truncates_at_nul() {
        let s = OsStr::from_bytes(b"abc\0def");
        assert_eq!(s.to_c_string(), CString::new("abc").unwrap());
    }
}
