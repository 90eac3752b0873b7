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

//! POSIX.1e ACL codec (`system.posix_acl_access` / `system.posix_acl_default`).
//!
//! Each xattr is little-endian: a 4-byte version word (always 2) followed
//! by 8-byte records `(tag: u16, perm: u16, id: u32)`. The id is
//! `0xFFFFFFFF` for the special tags (USER_OBJ, GROUP_OBJ, MASK, OTHER)
//! and a real uid/gid for named USER/GROUP entries.

use crate::{
    error::{Error, ErrorImpl},
    statx::{AtFlags, StatxMask},
    syscalls,
};

use std::os::unix::io::AsFd;

use bitflags::bitflags;

const POSIX_HDR_SZ: usize = 4;
const POSIX_ACE_SZ: usize = 8;
const POSIX_ACL_VERSION: u32 = 2;
const POSIX_SPECIAL_ID: u32 = 0xFFFF_FFFF;

/// POSIX.1e entry tag.
///
/// The numeric values are the wire values; their ascending order is also
/// the kernel's canonical entry order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum PosixTag {
    UserObj = 0x01,
    User = 0x02,
    GroupObj = 0x04,
    Group = 0x08,
    Mask = 0x10,
    Other = 0x20,
}

impl PosixTag {
    /// Special tags carry no uid/gid; their wire id is `0xFFFFFFFF`.
    pub fn is_special(&self) -> bool {
        !matches!(self, PosixTag::User | PosixTag::Group)
    }

    fn from_wire(raw: u16) -> Result<Self, Error> {
        match raw {
            0x01 => Ok(PosixTag::UserObj),
            0x02 => Ok(PosixTag::User),
            0x04 => Ok(PosixTag::GroupObj),
            0x08 => Ok(PosixTag::Group),
            0x10 => Ok(PosixTag::Mask),
            0x20 => Ok(PosixTag::Other),
            _ => Err(ErrorImpl::InvalidAcl {
                flavour: "POSIX",
                description: format!("unknown tag {raw:#06x}").into(),
            })?,
        }
    }
}

bitflags! {
    /// POSIX.1e permission bits.
    #[derive(Default, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash)]
    pub struct PosixPerms: u16 {
        const EXECUTE = 0x1;
        const WRITE = 0x2;
        const READ = 0x4;
    }
}

/// One POSIX.1e ACL entry.
///
/// `id` is the uid/gid for named USER/GROUP entries and `-1` for special
/// entries. `default` marks entries belonging to the default (inheritable)
/// ACL rather than the access ACL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PosixAce {
    pub tag: PosixTag,
    pub perms: PosixPerms,
    pub id: i64,
    pub default: bool,
}

impl PosixAce {
    /// Canonical POSIX ordering key: tag first, then id, so named entries
    /// sort by uid/gid within their tag. Special entries all share id `-1`
    /// and keep their relative order under a stable sort.
    fn canonical_key(&self) -> (u16, i64) {
        (self.tag as u16, self.id)
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let id = if self.tag.is_special() {
            POSIX_SPECIAL_ID
        } else {
            self.id as u32
        };
        out.extend_from_slice(&(self.tag as u16).to_le_bytes());
        out.extend_from_slice(&self.perms.bits().to_le_bytes());
        out.extend_from_slice(&id.to_le_bytes());
    }

    fn decode(slot: &[u8], default: bool) -> Result<Self, Error> {
        let tag_raw = u16::from_le_bytes(slot[0..2].try_into().expect("2-byte tag"));
        let perm_raw = u16::from_le_bytes(slot[2..4].try_into().expect("2-byte perm"));
        let id_raw = u32::from_le_bytes(slot[4..8].try_into().expect("4-byte id"));

        Ok(Self {
            tag: PosixTag::from_wire(tag_raw)?,
            perms: PosixPerms::from_bits_retain(perm_raw),
            id: if id_raw == POSIX_SPECIAL_ID {
                -1
            } else {
                i64::from(id_raw)
            },
            default,
        })
    }
}

fn encode_aces(aces: &[PosixAce]) -> Vec<u8> {
    let mut out = Vec::with_capacity(POSIX_HDR_SZ + aces.len() * POSIX_ACE_SZ);
    out.extend_from_slice(&POSIX_ACL_VERSION.to_le_bytes());
    for ace in aces {
        ace.encode(&mut out);
    }
    out
}

fn parse_aces(bytes: &[u8], default: bool) -> Result<Vec<PosixAce>, Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    if bytes.len() < POSIX_HDR_SZ || (bytes.len() - POSIX_HDR_SZ) % POSIX_ACE_SZ != 0 {
        Err(ErrorImpl::InvalidAcl {
            flavour: "POSIX",
            description: format!("malformed xattr length {}", bytes.len()).into(),
        })?
    }

    let version = u32::from_le_bytes(bytes[0..4].try_into().expect("version word"));
    if version != POSIX_ACL_VERSION {
        Err(ErrorImpl::InvalidAcl {
            flavour: "POSIX",
            description: format!("unexpected version {version}").into(),
        })?
    }

    bytes[POSIX_HDR_SZ..]
        .chunks_exact(POSIX_ACE_SZ)
        .map(|slot| PosixAce::decode(slot, default))
        .collect()
}

/// A POSIX.1e ACL: the access ACL plus an optional default ACL.
///
/// Both entry lists are kept in canonical `(tag, id)` order; constructing
/// via [`PosixAcl::from_aces`] sorts.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PosixAcl {
    access: Vec<PosixAce>,
    default: Option<Vec<PosixAce>>,
}

impl PosixAcl {
    /// Build an ACL from a flat entry list. Entries with `default: true`
    /// go to the default ACL (which only exists if at least one such entry
    /// is present); all others form the access ACL. Each list is sorted
    /// into canonical order with a stable sort, so identical inputs always
    /// produce byte-identical xattrs.
    pub fn from_aces<I>(aces: I) -> Self
    where
        I: IntoIterator<Item = PosixAce>,
    {
        let (mut default, mut access): (Vec<_>, Vec<_>) =
            aces.into_iter().partition(|ace| ace.default);
        access.sort_by_key(PosixAce::canonical_key);
        default.sort_by_key(PosixAce::canonical_key);

        Self {
            access,
            default: if default.is_empty() {
                None
            } else {
                Some(default)
            },
        }
    }

    /// Decode the raw xattr pair. An empty access blob (no xattr present)
    /// decodes as an empty entry list.
    pub fn from_xattrs(access: &[u8], default: Option<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            access: parse_aces(access, false)?,
            default: default.map(|bytes| parse_aces(bytes, true)).transpose()?,
        })
    }

    /// Entries of the access ACL.
    pub fn access_aces(&self) -> &[PosixAce] {
        &self.access
    }

    /// Entries of the default ACL, if one exists.
    pub fn default_aces(&self) -> Option<&[PosixAce]> {
        self.default.as_deref()
    }

    /// Raw bytes for `system.posix_acl_access`.
    pub fn access_bytes(&self) -> Vec<u8> {
        encode_aces(&self.access)
    }

    /// Raw bytes for `system.posix_acl_default`, or `None` when there is
    /// no default ACL (in which case the xattr should be removed).
    pub fn default_bytes(&self) -> Option<Vec<u8>> {
        self.default.as_deref().map(encode_aces)
    }

    /// Does this ACL add nothing beyond the traditional mode bits?
    ///
    /// Defined as "no access xattr was present and there is no default
    /// ACL". Note this deliberately differs from the kernel-side notion of
    /// triviality ("reducible to mode bits"): an access ACL that merely
    /// restates the mode still counts as non-trivial here, because the
    /// xattr physically exists.
    pub fn is_trivial(&self) -> bool {
        self.access.is_empty() && self.default.is_none()
    }

    /// Produce the ACL for a new child object from this directory's
    /// default ACL.
    ///
    /// A directory child receives the default ACL as both its access and
    /// default ACL (so it keeps propagating); a file child receives it as
    /// the access ACL only. Fails if this ACL is trivial or carries no
    /// default ACL.
    pub fn generate_inherited(&self, is_dir: bool) -> Result<PosixAcl, Error> {
        if self.is_trivial() {
            Err(ErrorImpl::InvalidAcl {
                flavour: "POSIX",
                description: "cannot generate inherited ACL from trivial ACL".into(),
            })?
        }
        let default = self.default.as_ref().ok_or(ErrorImpl::InvalidAcl {
            flavour: "POSIX",
            description: "cannot generate inherited ACL: no default ACL".into(),
        })?;

        let access = default
            .iter()
            .map(|ace| PosixAce {
                default: false,
                ..*ace
            })
            .collect();

        Ok(PosixAcl {
            access,
            default: is_dir.then(|| default.clone()),
        })
    }

    /// Check the structural rules the kernel enforces in
    /// `posix_acl_valid()`, for a target of the given kind.
    ///
    /// Per blob: exactly one USER_OBJ, GROUP_OBJ and OTHER entry; named
    /// USER/GROUP entries must carry a concrete id; when any named entry
    /// exists there must be exactly one MASK, and never more than one. A
    /// default ACL is only valid on directories.
    pub fn validate(&self, is_dir: bool) -> Result<(), Error> {
        validate_entries(&self.access, "access")?;

        match &self.default {
            None => Ok(()),
            Some(default) => {
                if !is_dir {
                    Err(ErrorImpl::InvalidAcl {
                        flavour: "POSIX",
                        description: "default ACL is only valid on directories".into(),
                    })?
                }
                validate_entries(default, "default")
            }
        }
    }

    /// [`PosixAcl::validate`] against a live file descriptor. The target
    /// kind is taken from the fd.
    pub fn validate_fd<Fd: AsFd>(&self, fd: Fd) -> Result<(), Error> {
        let stx = syscalls::statx(fd, "", AtFlags::EMPTY_PATH, StatxMask::TYPE).map_err(|err| {
            ErrorImpl::RawOsError {
                operation: "stat ACL target".into(),
                source: err,
            }
        })?;
        let is_dir = u32::from(stx.stx_mode) & libc::S_IFMT == libc::S_IFDIR;
        self.validate(is_dir)
    }
}

fn validate_entries(aces: &[PosixAce], label: &'static str) -> Result<(), Error> {
    let mut n_user_obj = 0_usize;
    let mut n_group_obj = 0_usize;
    let mut n_other = 0_usize;
    let mut n_mask = 0_usize;
    let mut n_named = 0_usize;

    let fail = |description: String| -> Error {
        ErrorImpl::InvalidAcl {
            flavour: "POSIX",
            description: description.into(),
        }
        .into()
    };

    for ace in aces {
        match ace.tag {
            PosixTag::UserObj => n_user_obj += 1,
            PosixTag::GroupObj => n_group_obj += 1,
            PosixTag::Other => n_other += 1,
            PosixTag::Mask => n_mask += 1,
            PosixTag::User => {
                if ace.id < 0 {
                    return Err(fail(format!("{label} ACL: named USER entry has no uid")));
                }
                n_named += 1;
            }
            PosixTag::Group => {
                if ace.id < 0 {
                    return Err(fail(format!("{label} ACL: named GROUP entry has no gid")));
                }
                n_named += 1;
            }
        }
    }

    if n_user_obj != 1 {
        return Err(fail(format!(
            "{label} ACL must have exactly one USER_OBJ entry"
        )));
    }
    if n_group_obj != 1 {
        return Err(fail(format!(
            "{label} ACL must have exactly one GROUP_OBJ entry"
        )));
    }
    if n_other != 1 {
        return Err(fail(format!("{label} ACL must have exactly one OTHER entry")));
    }
    if n_named > 0 && n_mask != 1 {
        return Err(fail(format!(
            "{label} ACL must have exactly one MASK entry when named USER or GROUP \
             entries are present"
        )));
    }
    if n_mask > 1 {
        return Err(fail(format!("{label} ACL has more than one MASK entry")));
    }

    Ok(())
}
