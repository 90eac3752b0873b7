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

use crate::{
    error::{Error as MntError, ErrorImpl, ErrorKind},
    iter::{DirStackEntry, FsIterator, IterOptions, MAX_DEPTH},
    statx::FileKind,
    tests::common::{
        btime_supported, create_tree, ensure_fd_headroom, filesystem_source, fixture_source,
        make_deep_chain,
    },
};

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Error;
use pretty_assertions::assert_eq;

fn open_iter(root: &Path, options: IterOptions) -> Result<FsIterator, Error> {
    Ok(FsIterator::open(root, &fixture_source(root)?, options)?)
}

/// Collect `(relative parent, name, kind)` for every yield, in order.
fn collect(iter: &mut FsIterator, root: &Path) -> Result<Vec<(PathBuf, String, FileKind)>, Error> {
    let mut out = Vec::new();
    while let Some(entry) = iter.next_entry()? {
        out.push((
            entry.parent.strip_prefix(root)?.to_path_buf(),
            entry.name.to_string_lossy().into_owned(),
            entry.kind,
        ));
    }
    Ok(out)
}

#[test]
fn yields_depth_first_and_prunes_symlinks() -> Result<(), Error> {
    let root = create_tree! {
        "a" => (dir);
        "a/x" => (file "xxxxx");
        "b" => (symlink -> "/etc");
        "a/y" => (symlink -> "/etc/passwd");
    }?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let entries = collect(&mut iter, root.path())?;

    // Exactly `a` and `a/x`; both symlinks silently pruned, with no error.
    assert_eq!(
        entries,
        vec![
            (PathBuf::new(), "a".into(), FileKind::Directory),
            (PathBuf::from("a"), "x".into(), FileKind::Regular),
        ]
    );

    let totals = iter.stats();
    assert_eq!(totals.count, 2);
    assert_eq!(totals.bytes, 5, "only regular-file bytes are counted");
    assert_eq!(totals.current_directory, PathBuf::new());
    Ok(())
}

#[test]
fn directories_yield_before_their_children() -> Result<(), Error> {
    let root = create_tree! {
        "d1" => (dir);
        "d1/c1" => (file "1");
        "d1/sub" => (dir);
        "d1/sub/c2" => (file "22");
    }?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let entries = collect(&mut iter, root.path())?;

    let position = |parent: &str, name: &str| {
        entries
            .iter()
            .position(|(p, n, _)| p == Path::new(parent) && n == name)
            .unwrap_or_else(|| panic!("{parent:?}/{name} was not yielded"))
    };

    assert!(position("", "d1") < position("d1", "c1"));
    assert!(position("", "d1") < position("d1", "sub"));
    assert!(position("d1", "sub") < position("d1/sub", "c2"));
    assert_eq!(entries.len(), 4);
    Ok(())
}

#[test]
fn entry_stat_is_taken_on_the_entry_fd() -> Result<(), Error> {
    let root = create_tree! {
        "data" => (file "some file contents");
    }?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let entry = iter.next_entry()?.expect("one entry");
    assert_eq!(entry.stat.size, Some(18));
    assert!(entry.fd >= 0);
    assert!(iter.next_entry()?.is_none());
    Ok(())
}

#[test]
fn skip_prevents_recursion_into_directory() -> Result<(), Error> {
    let root = create_tree! {
        "d1" => (dir);
        "d1/c1" => (file);
        "d1/c2" => (file);
        "d2" => (dir);
        "d2/c3" => (file);
    }?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let mut seen = Vec::new();
    while let Some(entry) = iter.next_entry()? {
        let name = entry.name.to_string_lossy().into_owned();
        if entry.kind == FileKind::Directory && name == "d1" {
            FsIterator::skip(&mut iter)?;
        }
        seen.push(name);
    }

    assert!(seen.contains(&"d1".to_string()));
    assert!(!seen.contains(&"c1".to_string()), "grandchild of skipped dir");
    assert!(!seen.contains(&"c2".to_string()), "grandchild of skipped dir");
    assert!(
        seen.contains(&"c3".to_string()),
        "skip() must not affect siblings"
    );
    Ok(())
}

#[test]
fn skip_after_file_is_an_error() -> Result<(), Error> {
    let root = create_tree! {
        "f" => (file "x");
    }?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let entry = iter.next_entry()?.expect("one entry");
    assert_eq!(entry.kind, FileKind::Regular);
    assert_eq!(
        FsIterator::skip(&mut iter).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    Ok(())
}

#[test]
fn relative_path_narrows_the_root() -> Result<(), Error> {
    let root = create_tree! {
        "outside" => (file);
        "inner" => (dir);
        "inner/kept" => (file "abc");
    }?;

    let mut iter = open_iter(
        root.path(),
        IterOptions {
            relative_path: Some("inner".into()),
            ..Default::default()
        },
    )?;

    let mut names = Vec::new();
    while let Some(entry) = iter.next_entry()? {
        names.push(entry.name.to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["kept".to_string()]);
    Ok(())
}

#[test]
fn root_must_be_a_directory() -> Result<(), Error> {
    let root = create_tree! {
        "f" => (file);
    }?;

    let err = FsIterator::open(
        root.path().join("f"),
        &fixture_source(root.path())?,
        IterOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotADirectory);
    Ok(())
}

#[test]
fn source_mismatch_is_rejected() -> Result<(), Error> {
    let root = create_tree! {
        "f" => (file);
    }?;

    // Only enforceable when the kernel reports a source string at all.
    if filesystem_source(root.path())?.is_none() {
        return Ok(());
    }

    let err = FsIterator::open(
        root.path(),
        "definitely/not-this-filesystem",
        IterOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceMismatch);
    Ok(())
}

#[test]
fn btime_cutoff_in_the_past_skips_files() -> Result<(), Error> {
    let root = create_tree! {
        "d" => (dir);
        "d/f" => (file "content");
    }?;
    if !btime_supported(root.path())? {
        return Ok(());
    }

    let mut iter = open_iter(
        root.path(),
        IterOptions {
            btime_cutoff: Some(1),
            ..Default::default()
        },
    )?;
    let entries = collect(&mut iter, root.path())?;

    // Directories are exempt from the birth-time filter.
    assert_eq!(
        entries,
        vec![(PathBuf::new(), "d".into(), FileKind::Directory)]
    );
    Ok(())
}

#[test]
fn btime_cutoff_in_the_future_keeps_files() -> Result<(), Error> {
    let root = create_tree! {
        "f" => (file "content");
    }?;

    let mut iter = open_iter(
        root.path(),
        IterOptions {
            btime_cutoff: Some(i64::MAX),
            ..Default::default()
        },
    )?;
    assert_eq!(collect(&mut iter, root.path())?.len(), 1);
    Ok(())
}

#[test]
fn resume_restarts_inside_the_saved_directory() -> Result<(), Error> {
    let root = create_tree! {
        "a" => (dir);
        "a/x" => (file "1");
        "a/y" => (file "2");
        "a/z" => (file "3");
    }?;

    // Walk until the first yield inside `a`, then snapshot.
    let mut first = open_iter(root.path(), IterOptions::default())?;
    let snapshot = loop {
        let entry = first.next_entry()?.expect("tree is not exhausted yet");
        if entry.parent == root.path().join("a") {
            break first.dir_stack();
        }
    };
    drop(first);

    let paths: Vec<_> = snapshot.iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec![root.path().to_path_buf(), root.path().join("a")]);

    // The resumed iterator must start inside `a`: no frame directories are
    // re-yielded, and because directory streams cannot seek, the files of
    // the restored directory are re-yielded from the top.
    let mut resumed = open_iter(
        root.path(),
        IterOptions {
            dir_stack: Some(snapshot),
            ..Default::default()
        },
    )?;
    let entries = collect(&mut resumed, root.path())?;

    assert!(
        entries.iter().all(|(parent, ..)| parent == Path::new("a")),
        "all resumed yields must be inside the restored directory: {entries:?}"
    );
    let mut names: Vec<_> = entries.iter().map(|(_, name, _)| name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["x", "y", "z"]);
    Ok(())
}

#[test]
fn resume_with_dead_cookie_reports_depth_and_path() -> Result<(), Error> {
    let root = create_tree! {
        "a" => (dir);
        "a/x" => (file);
    }?;

    let root_ino = {
        let iter = open_iter(root.path(), IterOptions::default())?;
        iter.dir_stack()[0].ino
    };

    let snapshot = vec![
        DirStackEntry {
            path: root.path().to_path_buf(),
            ino: root_ino,
        },
        DirStackEntry {
            path: root.path().join("gone"),
            // No entry in the fixture has this inode.
            ino: u64::MAX - 1,
        },
    ];

    let mut iter = open_iter(
        root.path(),
        IterOptions {
            dir_stack: Some(snapshot),
            ..Default::default()
        },
    )?;
    let err = loop {
        match iter.next_entry() {
            Ok(Some(_)) => panic!("nothing may be yielded while the cookie is unsatisfied"),
            Ok(None) => panic!("iterator completed instead of failing restoration"),
            Err(err) => break err,
        }
    };

    assert_eq!(err.kind(), ErrorKind::RestoreFailed);
    assert_eq!(err.restore_failure(), Some((1, root.path())));
    Ok(())
}

#[test]
fn progress_callback_runs_on_the_increment() -> Result<(), Error> {
    let root = create_tree! {
        "f1" => (file);
        "f2" => (file);
        "f3" => (file);
        "f4" => (file);
        "f5" => (file);
    }?;

    let counts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&counts);
    let mut iter = open_iter(
        root.path(),
        IterOptions {
            reporting_increment: 2,
            progress: Some(Box::new(move |stack, state| {
                assert!(!stack.is_empty(), "stack snapshot includes the root");
                seen.lock().unwrap().push(state.count);
                Ok(())
            })),
            ..Default::default()
        },
    )?;

    while iter.next_entry()?.is_some() {}
    assert_eq!(*counts.lock().unwrap(), vec![2, 4]);
    Ok(())
}

#[test]
fn progress_callback_error_terminates_iteration() -> Result<(), Error> {
    let root = create_tree! {
        "f1" => (file);
        "f2" => (file);
    }?;

    let mut iter = open_iter(
        root.path(),
        IterOptions {
            reporting_increment: 1,
            progress: Some(Box::new(|_, _| {
                Err(MntError::from(ErrorImpl::InvalidArgument {
                    name: "progress".into(),
                    description: "caller requested cancellation".into(),
                }))
            })),
            ..Default::default()
        },
    )?;

    let err = iter.next_entry().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    Ok(())
}

#[test]
fn depth_limit_is_enforced() -> Result<(), Error> {
    // Each frame holds the directory fd plus its stream's duplicate, so a
    // full stack needs well over the usual 1024-fd soft limit.
    if !ensure_fd_headroom(4 * MAX_DEPTH as u64 + 1024) {
        return Ok(());
    }

    // A chain of MAX_DEPTH - 1 directories fills the stack exactly (the
    // root occupies the first frame) and must succeed.
    let root = tempfile::TempDir::new()?;
    make_deep_chain(root.path(), MAX_DEPTH - 1)?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let mut yields = 0_u64;
    while iter.next_entry()?.is_some() {
        yields += 1;
    }
    assert_eq!(yields, (MAX_DEPTH - 1) as u64);
    Ok(())
}

#[test]
fn depth_limit_overflow_names_the_path() -> Result<(), Error> {
    if !ensure_fd_headroom(4 * MAX_DEPTH as u64 + 1024) {
        return Ok(());
    }

    let root = tempfile::TempDir::new()?;
    make_deep_chain(root.path(), MAX_DEPTH)?;

    let mut iter = open_iter(root.path(), IterOptions::default())?;
    let err = loop {
        match iter.next_entry() {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("traversal beyond the depth limit must fail"),
            Err(err) => break err,
        }
    };

    assert_eq!(err.kind(), ErrorKind::DepthExceeded);
    assert!(
        err.to_string().contains("/d"),
        "the error must name the path that exceeded the limit: {err}"
    );
    Ok(())
}
