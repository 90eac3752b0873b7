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

//! ACL round-trips against live file descriptors.
//!
//! The test filesystem (usually tmpfs) speaks POSIX.1e; every test
//! tolerates `EOPNOTSUPP`, since ACLs can be disabled entirely in
//! minimal environments.

use crate::{
    acl::{
        fgetacl, fremoveacl, fsetacl,
        posix::{PosixAce, PosixAcl, PosixPerms, PosixTag},
        Acl,
    },
    error::{Error as MntError, ErrorKind},
};

use std::fs::File;

use anyhow::Error;
use pretty_assertions::assert_eq;

fn acls_unsupported(err: &MntError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotSupported | ErrorKind::OsError(Some(libc::EOPNOTSUPP))
    ) || err.kind() == ErrorKind::OsError(Some(libc::EPERM))
}

fn ace(tag: PosixTag, perms: PosixPerms, id: i64, default: bool) -> PosixAce {
    PosixAce {
        tag,
        perms,
        id,
        default,
    }
}

const RW: PosixPerms = PosixPerms::READ.union(PosixPerms::WRITE);

fn minimal_acl(default: bool) -> Vec<PosixAce> {
    vec![
        ace(PosixTag::UserObj, RW, -1, default),
        ace(PosixTag::GroupObj, PosixPerms::READ, -1, default),
        ace(PosixTag::Other, PosixPerms::empty(), -1, default),
    ]
}

#[test]
fn fresh_file_has_trivial_acl() -> Result<(), Error> {
    let file = tempfile::NamedTempFile::new()?;

    match fgetacl(file.as_file()) {
        Ok(acl) => assert!(acl.is_trivial(), "fresh file must have a trivial ACL"),
        Err(err) if acls_unsupported(&err) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

#[test]
fn posix_set_get_round_trip() -> Result<(), Error> {
    let file = tempfile::NamedTempFile::new()?;
    let acl = PosixAcl::from_aces(minimal_acl(false));
    acl.validate_fd(file.as_file())?;

    match fsetacl(file.as_file(), &Acl::Posix(acl.clone())) {
        Ok(()) => {}
        Err(err) if acls_unsupported(&err) => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    match fgetacl(file.as_file())? {
        Acl::Posix(read_back) => {
            assert_eq!(read_back.access_aces(), acl.access_aces());
            assert_eq!(read_back.default_aces(), None);
            assert!(!read_back.is_trivial());
        }
        Acl::Nfs4(_) => panic!("POSIX filesystem answered with an NFSv4 ACL"),
    }
    Ok(())
}

#[test]
fn fremoveacl_restores_triviality() -> Result<(), Error> {
    let file = tempfile::NamedTempFile::new()?;

    match fsetacl(
        file.as_file(),
        &Acl::Posix(PosixAcl::from_aces(minimal_acl(false))),
    ) {
        Ok(()) => {}
        Err(err) if acls_unsupported(&err) => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    assert!(!fgetacl(file.as_file())?.is_trivial());

    fremoveacl(file.as_file())?;
    assert!(fgetacl(file.as_file())?.is_trivial());
    // Removing again is a no-op, not an error.
    fremoveacl(file.as_file())?;
    Ok(())
}

#[test]
fn default_acl_on_directory_round_trips_and_inherits() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let dirfd = File::open(dir.path())?;

    let mut entries = minimal_acl(false);
    entries.extend(minimal_acl(true));
    let acl = PosixAcl::from_aces(entries);
    acl.validate_fd(&dirfd)?;

    match fsetacl(&dirfd, &Acl::Posix(acl.clone())) {
        Ok(()) => {}
        Err(err) if acls_unsupported(&err) => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    let read_back = match fgetacl(&dirfd)? {
        Acl::Posix(read_back) => read_back,
        Acl::Nfs4(_) => panic!("POSIX filesystem answered with an NFSv4 ACL"),
    };
    assert_eq!(read_back.default_aces(), acl.default_aces());

    // What a new subdirectory would receive: the default ACL as both its
    // access and default ACLs.
    let child = read_back.generate_inherited(true)?;
    assert_eq!(child.access_aces().len(), 3);
    assert_eq!(child.default_aces(), read_back.default_aces());
    Ok(())
}

#[test]
fn fsetacl_without_default_removes_the_default_xattr() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let dirfd = File::open(dir.path())?;

    let mut entries = minimal_acl(false);
    entries.extend(minimal_acl(true));
    match fsetacl(&dirfd, &Acl::Posix(PosixAcl::from_aces(entries))) {
        Ok(()) => {}
        Err(err) if acls_unsupported(&err) => return Ok(()),
        Err(err) => return Err(err.into()),
    }

    // Re-set with no default entries; the default xattr must go away.
    fsetacl(&dirfd, &Acl::Posix(PosixAcl::from_aces(minimal_acl(false))))?;
    match fgetacl(&dirfd)? {
        Acl::Posix(read_back) => assert_eq!(read_back.default_aces(), None),
        Acl::Nfs4(_) => panic!("POSIX filesystem answered with an NFSv4 ACL"),
    }
    Ok(())
}
