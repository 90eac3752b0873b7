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

#![forbid(unsafe_code)]

//! Error types for mntkit.

use crate::syscalls::Error as SyscallError;

use std::{
    borrow::Cow,
    io::Error as IOError,
    path::{Path, PathBuf},
};

/// Opaque error type for mntkit.
///
/// If you wish to do non-trivial error handling with mntkit errors, use
/// [`Error::kind`] to get an [`ErrorKind`] you can handle programmatically.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] Box<ErrorImpl>);

impl<E: Into<ErrorImpl>> From<E> for Error {
    #[doc(hidden)]
    fn from(err: E) -> Self {
        Self(Box::new(err.into()))
    }
}

impl Error {
    /// Programmatic error class for this error.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    /// If this error is an iterator restore failure, return the depth and
    /// the path of the directory that was being restored when the saved
    /// inode chain could not be matched.
    pub fn restore_failure(&self) -> Option<(usize, &Path)> {
        self.0.restore_failure()
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum ErrorImpl {
    #[error("feature {feature} not supported on this kernel")]
    NotSupported { feature: Cow<'static, str> },

    #[error("invalid {name} argument: {description}")]
    InvalidArgument {
        name: Cow<'static, str>,
        description: Cow<'static, str>,
    },

    #[error("not a directory: {path:?}")]
    NotADirectory { path: PathBuf },

    #[error("invalid {flavour} ACL: {description}")]
    InvalidAcl {
        flavour: &'static str,
        description: Cow<'static, str>,
    },

    #[error("{path:?}: filesystem source mismatch (expected {expected:?}, got {found:?})")]
    SourceMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("maximum traversal depth {limit} exceeded at {path:?}")]
    DepthExceeded { limit: usize, path: PathBuf },

    #[error("failed to restore iterator position at depth {depth} in directory {path:?}")]
    RestoreFailed { depth: usize, path: PathBuf },

    #[error("file handle mount id {recorded:#x} does not match mount fd mount id {found:#x}")]
    HandleMountMismatch { recorded: u64, found: u64 },

    #[error("{operation} failed")]
    OsError {
        operation: Cow<'static, str>,
        source: IOError,
    },

    #[error("{operation} failed")]
    RawOsError {
        operation: Cow<'static, str>,
        source: SyscallError,
    },

    #[error("{context}")]
    Wrapped {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

/// Underlying error class for mntkit errors.
///
/// This is similar in concept to [`std::io::ErrorKind`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The requested feature is not supported by the running kernel or the
    /// target filesystem.
    NotSupported,
    /// The provided arguments to mntkit were invalid.
    InvalidArgument,
    /// The caller targeted a non-directory where directory semantics were
    /// required.
    NotADirectory,
    /// An ACL violated the structural rules of its flavour.
    InvalidAcl,
    /// The root of an iteration did not match the expected filesystem
    /// source reported by `statmount(2)`.
    SourceMismatch,
    /// A traversal exceeded the fixed directory-stack depth limit.
    DepthExceeded,
    /// A resumed iteration could not re-find a directory from its saved
    /// inode chain. Use [`Error::restore_failure`] for the details.
    RestoreFailed,
    /// A file handle was opened against a mount fd on a different
    /// filesystem than the handle was resolved on.
    HandleMountMismatch,
    /// The underlying error came from a system call. The value is the
    /// numerical `errno`, if available.
    OsError(Option<i32>),
}

impl ErrorImpl {
    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotADirectory { .. } => ErrorKind::NotADirectory,
            Self::InvalidAcl { .. } => ErrorKind::InvalidAcl,
            Self::SourceMismatch { .. } => ErrorKind::SourceMismatch,
            Self::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            Self::RestoreFailed { .. } => ErrorKind::RestoreFailed,
            Self::HandleMountMismatch { .. } => ErrorKind::HandleMountMismatch,
            // Any syscall-related errors get mapped to an OsError, since the
            // distinction doesn't matter to users checking error values.
            Self::OsError { source, .. } => ErrorKind::OsError(source.raw_os_error()),
            Self::RawOsError { source, .. } => {
                ErrorKind::OsError(source.root_cause().raw_os_error())
            }
            Self::Wrapped { source, .. } => source.kind(),
        }
    }

    pub(crate) fn restore_failure(&self) -> Option<(usize, &Path)> {
        match self {
            Self::RestoreFailed { depth, path } => Some((*depth, path.as_path())),
            Self::Wrapped { source, .. } => source.restore_failure(),
            _ => None,
        }
    }
}

impl ErrorKind {
    /// Return a C-like errno for the [`ErrorKind`].
    ///
    /// Aside from fetching the errno represented by standard
    /// [`ErrorKind::OsError`] errors, pure-Rust errors are also mapped to C
    /// errno values where appropriate.
    pub fn errno(&self) -> Option<i32> {
        match self {
            ErrorKind::NotSupported => Some(libc::EOPNOTSUPP),
            ErrorKind::InvalidArgument | ErrorKind::InvalidAcl => Some(libc::EINVAL),
            ErrorKind::NotADirectory => Some(libc::ENOTDIR),
            ErrorKind::OsError(errno) => *errno,
            _ => None,
        }
    }
}

// Private trait necessary to work around the "orphan trait" restriction.
pub(crate) trait ErrorExt: Sized {
    /// Wrap a `Result<..., Error>` with an additional context string.
    fn wrap<S: Into<String>>(self, context: S) -> Self {
        self.with_wrap(|| context.into())
    }

    /// Wrap a `Result<..., Error>` with an additional context string created
    /// by a closure.
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String;
}

impl ErrorExt for ErrorImpl {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        Self::Wrapped {
            context: context_fn().into(),
            source: self.into(),
        }
    }
}

impl ErrorExt for Error {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.0.with_wrap(context_fn).into()
    }
}

impl<T, E: ErrorExt> ErrorExt for Result<T, E> {
    fn with_wrap<F>(self, context_fn: F) -> Self
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| err.with_wrap(context_fn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn error_kind_errno() {
        assert_eq!(
            ErrorKind::InvalidArgument.errno(),
            Some(libc::EINVAL),
            "ErrorKind::InvalidArgument is equivalent to EINVAL"
        );
        assert_eq!(
            ErrorKind::NotADirectory.errno(),
            Some(libc::ENOTDIR),
            "ErrorKind::NotADirectory is equivalent to ENOTDIR"
        );
        assert_eq!(
            ErrorKind::NotSupported.errno(),
            Some(libc::EOPNOTSUPP),
            "ErrorKind::NotSupported is equivalent to EOPNOTSUPP"
        );
        assert_eq!(
            ErrorKind::OsError(Some(libc::ENOANO)).errno(),
            Some(libc::ENOANO),
            "ErrorKind::OsError(...)::errno() returns the inner errno"
        );
    }

    #[test]
    fn restore_failure_attributes() {
        let err: Error = ErrorImpl::RestoreFailed {
            depth: 3,
            path: "/mnt/tank/a/b".into(),
        }
        .into();

        assert_eq!(err.kind(), ErrorKind::RestoreFailed);
        assert_eq!(
            err.restore_failure(),
            Some((3, Path::new("/mnt/tank/a/b"))),
            "restore_failure() must expose the failing depth and path"
        );
    }

    #[test]
    fn restore_failure_survives_wrapping() {
        let err: Error = Error::from(ErrorImpl::RestoreFailed {
            depth: 1,
            path: "/mnt/tank".into(),
        })
        .wrap("resume traversal");

        assert_eq!(err.restore_failure(), Some((1, Path::new("/mnt/tank"))));
    }
}
