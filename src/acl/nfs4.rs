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

//! NFSv4 ACL codec (`system.nfs4_acl_xdr`).
//!
//! The wire format is big-endian XDR: a two-word header (`acl_flags`,
//! `n_aces`) followed by five words per ACE `(type, flags, iflag,
//! access_mask, who)`. `iflag` selects between a named principal (`who` is
//! a uid/gid) and a special one (`who` is OWNER@/GROUP@/EVERYONE@); the
//! [`Nfs4Principal`] enum makes that pairing unrepresentable-if-wrong.

use crate::{
    error::{Error, ErrorImpl},
    statx::{AtFlags, StatxMask},
    syscalls,
};

use std::os::unix::io::AsFd;

use bitflags::bitflags;

const NFS4_HDR_SZ: usize = 8;
const NFS4_ACE_SZ: usize = 20;

// iflag values on the wire.
const NFS4_IFLAG_NAMED: u32 = 0;
const NFS4_IFLAG_SPECIAL: u32 = 1;

// Special-principal who values (XDR encoding).
const NFS4_WHO_OWNER: u32 = 1;
const NFS4_WHO_GROUP: u32 = 2;
const NFS4_WHO_EVERYONE: u32 = 3;

bitflags! {
    /// Per-ACE flag bits.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy, Hash)]
    pub struct Nfs4AceFlags: u32 {
        const FILE_INHERIT = 0x0001;
        const DIRECTORY_INHERIT = 0x0002;
        const NO_PROPAGATE_INHERIT = 0x0004;
        const INHERIT_ONLY = 0x0008;
        const SUCCESSFUL_ACCESS = 0x0010;
        const FAILED_ACCESS = 0x0020;
        const IDENTIFIER_GROUP = 0x0040;
        const INHERITED = 0x0080;
    }
}

impl Nfs4AceFlags {
    /// All ACE-level inheritance bits.
    pub const INHERIT_MASK: Self = Self::FILE_INHERIT
        .union(Self::DIRECTORY_INHERIT)
        .union(Self::NO_PROPAGATE_INHERIT)
        .union(Self::INHERIT_ONLY);

    /// The bits that make an ACE inheritable by some child type.
    pub const INHERITABLE: Self = Self::FILE_INHERIT.union(Self::DIRECTORY_INHERIT);
}

bitflags! {
    /// Per-ACE access mask bits.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy, Hash)]
    pub struct Nfs4Perms: u32 {
        const READ_DATA = 0x0000_0001;
        const WRITE_DATA = 0x0000_0002;
        const APPEND_DATA = 0x0000_0004;
        const READ_NAMED_ATTRS = 0x0000_0008;
        const WRITE_NAMED_ATTRS = 0x0000_0010;
        const EXECUTE = 0x0000_0020;
        const DELETE_CHILD = 0x0000_0040;
        const READ_ATTRIBUTES = 0x0000_0080;
        const WRITE_ATTRIBUTES = 0x0000_0100;
        const DELETE = 0x0001_0000;
        const READ_ACL = 0x0002_0000;
        const WRITE_ACL = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;
    }
}

bitflags! {
    /// ACL-level flag bits from the XDR header.
    ///
    /// `ACL_IS_TRIVIAL` and `ACL_IS_DIR` are ZFS extensions stored in the
    /// on-disk `acl_flags` word.
    #[derive(Default, PartialEq, Eq, Debug, Clone, Copy, Hash)]
    pub struct Nfs4AclFlags: u32 {
        const AUTO_INHERIT = 0x0001;
        const PROTECTED = 0x0002;
        const DEFAULTED = 0x0004;
        /// ACL is equivalent to mode bits.
        const ACL_IS_TRIVIAL = 0x1_0000;
        /// ACL belongs to a directory.
        const ACL_IS_DIR = 0x2_0000;
    }
}

/// ACE type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Nfs4AceType {
    Allow,
    Deny,
    Audit,
    Alarm,
}

impl Nfs4AceType {
    fn to_wire(self) -> u32 {
        match self {
            Nfs4AceType::Allow => 0,
            Nfs4AceType::Deny => 1,
            Nfs4AceType::Audit => 2,
            Nfs4AceType::Alarm => 3,
        }
    }

    fn from_wire(raw: u32) -> Result<Self, Error> {
        match raw {
            0 => Ok(Nfs4AceType::Allow),
            1 => Ok(Nfs4AceType::Deny),
            2 => Ok(Nfs4AceType::Audit),
            3 => Ok(Nfs4AceType::Alarm),
            _ => Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: format!("unknown ACE type {raw}").into(),
            })?,
        }
    }
}

/// The principal an ACE applies to.
///
/// On the wire this is the `(iflag, who)` pair: named principals carry a
/// uid/gid in `who` with `iflag=0`, special principals carry the
/// principal's own code in `who` with `iflag=1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Nfs4Principal {
    /// A concrete uid (or gid, when `IDENTIFIER_GROUP` is set).
    Named(u32),
    /// `OWNER@`
    Owner,
    /// `GROUP@`
    Group,
    /// `EVERYONE@`
    Everyone,
}

impl Nfs4Principal {
    /// Is this one of the special (mode-bit-mapped) principals?
    pub fn is_special(&self) -> bool {
        !matches!(self, Nfs4Principal::Named(_))
    }

    /// The numeric id: the uid/gid for named principals, `-1` otherwise.
    pub fn who_id(&self) -> i64 {
        match self {
            Nfs4Principal::Named(id) => i64::from(*id),
            _ => -1,
        }
    }

    fn to_wire(self) -> (u32, u32) {
        match self {
            Nfs4Principal::Named(id) => (NFS4_IFLAG_NAMED, id),
            Nfs4Principal::Owner => (NFS4_IFLAG_SPECIAL, NFS4_WHO_OWNER),
            Nfs4Principal::Group => (NFS4_IFLAG_SPECIAL, NFS4_WHO_GROUP),
            Nfs4Principal::Everyone => (NFS4_IFLAG_SPECIAL, NFS4_WHO_EVERYONE),
        }
    }

    fn from_wire(iflag: u32, who: u32) -> Result<Self, Error> {
        match (iflag, who) {
            (NFS4_IFLAG_NAMED, id) => Ok(Nfs4Principal::Named(id)),
            (NFS4_IFLAG_SPECIAL, NFS4_WHO_OWNER) => Ok(Nfs4Principal::Owner),
            (NFS4_IFLAG_SPECIAL, NFS4_WHO_GROUP) => Ok(Nfs4Principal::Group),
            (NFS4_IFLAG_SPECIAL, NFS4_WHO_EVERYONE) => Ok(Nfs4Principal::Everyone),
            (iflag, who) => Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: format!("unknown principal (iflag={iflag}, who={who})").into(),
            })?,
        }
    }
}

/// One NFSv4 access control entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nfs4Ace {
    pub ace_type: Nfs4AceType,
    pub flags: Nfs4AceFlags,
    pub access_mask: Nfs4Perms,
    pub who: Nfs4Principal,
}

impl Nfs4Ace {
    /// Was this ACE propagated down from a parent object?
    pub fn is_inherited(&self) -> bool {
        self.flags.contains(Nfs4AceFlags::INHERITED)
    }

    pub fn is_allow(&self) -> bool {
        self.ace_type == Nfs4AceType::Allow
    }

    /// Windows-compatible canonical DACL ordering key.
    ///
    /// Windows requires ACEs in a specific order for correct access-check
    /// semantics and interoperability with SMB clients:
    ///
    ///   1. All explicit ACEs before any inherited ACEs.
    ///   2. Within explicit ACEs: deny before allow.
    ///   3. Within inherited ACEs: deny before allow.
    ///
    /// "Inherited" means the `INHERITED` flag (0x80) is set on the ACE,
    /// indicating it was propagated from a parent object. This is distinct
    /// from `FILE_INHERIT`/`DIRECTORY_INHERIT`, which control whether the
    /// ACE is propagated *to* children.
    ///
    /// See <https://docs.microsoft.com/en-us/windows/desktop/secauthz/order-of-aces-in-a-dacl>
    fn canonical_key(&self) -> u8 {
        (self.is_inherited() as u8) * 2 + self.is_allow() as u8
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let (iflag, who) = self.who.to_wire();
        out.extend_from_slice(&self.ace_type.to_wire().to_be_bytes());
        out.extend_from_slice(&self.flags.bits().to_be_bytes());
        out.extend_from_slice(&iflag.to_be_bytes());
        out.extend_from_slice(&self.access_mask.bits().to_be_bytes());
        out.extend_from_slice(&who.to_be_bytes());
    }

    fn decode(slot: &[u8]) -> Result<Self, Error> {
        let word = |i: usize| {
            u32::from_be_bytes(
                slot[i * 4..i * 4 + 4]
                    .try_into()
                    .expect("slot is exactly five words"),
            )
        };
        Ok(Self {
            ace_type: Nfs4AceType::from_wire(word(0))?,
            flags: Nfs4AceFlags::from_bits_retain(word(1)),
            access_mask: Nfs4Perms::from_bits_retain(word(3)),
            who: Nfs4Principal::from_wire(word(2), word(4))?,
        })
    }
}

/// An NFSv4 ACL.
///
/// The ACE list is kept in canonical (Windows DACL) order; constructing via
/// [`Nfs4Acl::from_aces`] sorts, and decoding preserves whatever order the
/// filesystem stored.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Nfs4Acl {
    acl_flags: Nfs4AclFlags,
    aces: Vec<Nfs4Ace>,
}

impl Nfs4Acl {
    /// An ACL with no entries and no flags, as decoded from a missing
    /// xattr.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an ACL from a list of ACEs, sorting them into canonical
    /// order. The sort is stable, so ACEs within one canonical bucket keep
    /// their relative order.
    pub fn from_aces<I>(aces: I, acl_flags: Nfs4AclFlags) -> Self
    where
        I: IntoIterator<Item = Nfs4Ace>,
    {
        let mut aces: Vec<_> = aces.into_iter().collect();
        aces.sort_by_key(Nfs4Ace::canonical_key);
        Self { acl_flags, aces }
    }

    /// Decode big-endian XDR bytes. An empty buffer decodes as the empty
    /// ACL (no xattr present means no ACL beyond the mode bits).
    pub fn from_xdr(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        if bytes.len() < NFS4_HDR_SZ {
            Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: format!("data too short ({} bytes)", bytes.len()).into(),
            })?
        }

        let acl_flags = u32::from_be_bytes(bytes[0..4].try_into().expect("header word"));
        let n_aces = u32::from_be_bytes(bytes[4..8].try_into().expect("header word")) as usize;

        let need = NFS4_HDR_SZ + n_aces * NFS4_ACE_SZ;
        if bytes.len() < need {
            Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: format!(
                    "data truncated ({} bytes, {n_aces} ACEs need {need})",
                    bytes.len()
                )
                .into(),
            })?
        }

        let aces = (0..n_aces)
            .map(|i| {
                let off = NFS4_HDR_SZ + i * NFS4_ACE_SZ;
                Nfs4Ace::decode(&bytes[off..off + NFS4_ACE_SZ])
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            acl_flags: Nfs4AclFlags::from_bits_retain(acl_flags),
            aces,
        })
    }

    /// Encode to big-endian XDR bytes.
    pub fn to_xdr(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NFS4_HDR_SZ + self.aces.len() * NFS4_ACE_SZ);
        out.extend_from_slice(&self.acl_flags.bits().to_be_bytes());
        out.extend_from_slice(&(self.aces.len() as u32).to_be_bytes());
        for ace in &self.aces {
            ace.encode(&mut out);
        }
        out
    }

    pub fn acl_flags(&self) -> Nfs4AclFlags {
        self.acl_flags
    }

    pub fn aces(&self) -> &[Nfs4Ace] {
        &self.aces
    }

    pub fn len(&self) -> usize {
        self.aces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aces.is_empty()
    }

    /// Is this ACL equivalent to plain mode bits? True for the empty ACL
    /// and whenever the filesystem set `ACL_IS_TRIVIAL`.
    pub fn is_trivial(&self) -> bool {
        self.aces.is_empty() || self.acl_flags.contains(Nfs4AclFlags::ACL_IS_TRIVIAL)
    }

    /// Apply NFSv4 ACE inheritance rules to produce the ACL for a new
    /// child object.
    ///
    /// For a file child only ACEs with `FILE_INHERIT` are included, and
    /// every inheritance bit is stripped from the output. For a directory
    /// child ACEs with `FILE_INHERIT` or `DIRECTORY_INHERIT` are included;
    /// unless `NO_PROPAGATE_INHERIT` suppresses it, the inherit bits are
    /// kept (with `INHERIT_ONLY` cleared, since the ACE now applies to the
    /// directory itself) so the ACE propagates to grandchildren. All output
    /// ACEs get `INHERITED`; a directory child's ACL gets `ACL_IS_DIR`.
    pub fn generate_inherited(&self, is_dir: bool) -> Result<Nfs4Acl, Error> {
        let inheritable = |ace: &Nfs4Ace| {
            if is_dir {
                ace.flags.intersects(Nfs4AceFlags::INHERITABLE)
            } else {
                ace.flags.contains(Nfs4AceFlags::FILE_INHERIT)
            }
        };

        let aces: Vec<_> = self
            .aces
            .iter()
            .filter(|ace| inheritable(ace))
            .map(|ace| {
                let flags = if is_dir && !ace.flags.contains(Nfs4AceFlags::NO_PROPAGATE_INHERIT) {
                    // Directory child, propagation not suppressed: keep
                    // FILE/DIRECTORY_INHERIT for further propagation, clear
                    // INHERIT_ONLY so the ACE applies to this directory.
                    (ace.flags - Nfs4AceFlags::INHERIT_ONLY) | Nfs4AceFlags::INHERITED
                } else {
                    // File child, or directory with NO_PROPAGATE: strip all
                    // inheritance flags.
                    (ace.flags - Nfs4AceFlags::INHERIT_MASK) | Nfs4AceFlags::INHERITED
                };
                Nfs4Ace { flags, ..*ace }
            })
            .collect();

        if aces.is_empty() {
            Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: "parent ACL has no inheritable ACEs for this object type".into(),
            })?
        }

        let acl_flags = if is_dir {
            Nfs4AclFlags::ACL_IS_DIR
        } else {
            Nfs4AclFlags::empty()
        };
        Ok(Nfs4Acl { acl_flags, aces })
    }

    /// Check the structural validity rules for a target of the given kind.
    ///
    /// Rules:
    /// 1. `DENY` is not permitted for special principals.
    /// 2. `INHERIT_ONLY` requires `FILE_INHERIT` or `DIRECTORY_INHERIT`.
    /// 3. Any propagation bit requires the target to be a directory.
    /// 4. A directory ACL must contain at least one inheritable ACE.
    pub fn validate(&self, is_dir: bool) -> Result<(), Error> {
        let mut has_propagate = false;
        let mut has_inheritable = false;

        for ace in &self.aces {
            if ace.ace_type == Nfs4AceType::Deny && ace.who.is_special() {
                Err(ErrorImpl::InvalidAcl {
                    flavour: "NFSv4",
                    description: "DENY entries are not permitted for special principals \
                                  (OWNER@, GROUP@, EVERYONE@)"
                        .into(),
                })?
            }
            if ace.flags.contains(Nfs4AceFlags::INHERIT_ONLY)
                && !ace.flags.intersects(Nfs4AceFlags::INHERITABLE)
            {
                Err(ErrorImpl::InvalidAcl {
                    flavour: "NFSv4",
                    description: "INHERIT_ONLY requires FILE_INHERIT or DIRECTORY_INHERIT \
                                  to also be set"
                        .into(),
                })?
            }
            has_propagate |= ace.flags.intersects(Nfs4AceFlags::INHERIT_MASK);
            has_inheritable |= ace.flags.intersects(Nfs4AceFlags::INHERITABLE);
        }

        if has_propagate && !is_dir {
            Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: "inheritance flags are only valid on directories".into(),
            })?
        }
        if is_dir && !has_inheritable {
            Err(ErrorImpl::InvalidAcl {
                flavour: "NFSv4",
                description: "directory ACL must contain at least one ACE with FILE_INHERIT \
                              or DIRECTORY_INHERIT"
                    .into(),
            })?
        }
        Ok(())
    }

    /// [`Nfs4Acl::validate`] against a live file descriptor. The target
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
