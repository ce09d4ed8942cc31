// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Plain-data argument and reply types for the forwarded file operations.
//!
//! These mirror the wire-level shapes the backend transport understands. The
//! layer itself only ever inspects [`OpenFlags`]; everything else is carried
//! through opaquely.

use std::ops::{BitOr, BitOrAssign};

use uuid::Uuid;

/// Open(2)-style flag bits, also used as per-call I/O flags on reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Open for writing only.
    pub const WRONLY: Self = Self(0o1);
    /// Open for reading and writing.
    pub const RDWR: Self = Self(0o2);
    /// Create the file if it does not exist.
    pub const CREAT: Self = Self(0o100);
    /// Truncate the file on open.
    pub const TRUNC: Self = Self(0o1000);
    /// Append on each write.
    pub const APPEND: Self = Self(0o2000);
    /// Bypass caches; I/O goes directly to the backing store.
    pub const DIRECT: Self = Self(0o40000);

    /// No flag bits set (plain read-only open).
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// File attributes as returned by stat-like operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttr {
    /// Globally unique file identity.
    pub gfid: Uuid,
    /// Size in bytes.
    pub size: u64,
    /// Permission bits and file type.
    pub mode: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Last access time, seconds since the epoch.
    pub atime: u64,
    /// Last modification time, seconds since the epoch.
    pub mtime: u64,
    /// Last status change time, seconds since the epoch.
    pub ctime: u64,
}

/// Attribute changes requested by a setattr operation.
///
/// `None` fields are left untouched, replacing the C-style valid-bits mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// New permission bits.
    pub mode: Option<u32>,
    /// New owning user.
    pub uid: Option<u32>,
    /// New owning group.
    pub gid: Option<u32>,
    /// New file size.
    pub size: Option<u64>,
    /// New access time.
    pub atime: Option<u64>,
    /// New modification time.
    pub mtime: Option<u64>,
}

/// Kind of a byte-range lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Shared read lock.
    Read,
    /// Exclusive write lock.
    Write,
    /// Release a held lock.
    Unlock,
}

/// A byte-range lock request or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLock {
    /// What kind of lock is requested or held.
    pub kind: LockType,
    /// First byte of the range.
    pub start: u64,
    /// Length of the range; zero means to end of file.
    pub len: u64,
    /// Opaque lock-owner identity.
    pub owner: u64,
}

/// Command selector for `lk` and `finodelk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCmd {
    /// Query whether the lock could be placed.
    Get,
    /// Place the lock, failing immediately on conflict.
    Set,
    /// Place the lock, waiting for conflicting holders.
    SetWait,
}

/// Command selector for entry locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrylkCmd {
    /// Acquire, waiting on conflict.
    Lock,
    /// Acquire, failing immediately on conflict.
    LockNb,
    /// Release.
    Unlock,
}

/// Kind of an entry lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrylkType {
    /// Shared.
    Read,
    /// Exclusive.
    Write,
}

/// Arithmetic applied by an xattrop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattropOp {
    /// Element-wise add of 32-bit counters.
    AddArray,
    /// Element-wise add of 64-bit counters.
    AddArray64,
}

/// Collision policy for setting extended attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum XattrSetFlags {
    /// Create the attribute or replace an existing value.
    #[default]
    CreateOrReplace,
    /// Fail if the attribute already exists.
    Create,
    /// Fail if the attribute does not exist.
    Replace,
}
