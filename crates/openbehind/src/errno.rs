// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! POSIX-style error codes reported by the backend and relayed by the layer.

use thiserror::Error;

/// Error code carried by every failed file operation.
///
/// The layer never invents error codes of its own: whatever the backend
/// reports is what callers observe, possibly replayed later when a deferred
/// open fails after the open itself was already acknowledged upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Errno {
    /// No such file or directory (`ENOENT`).
    #[error("no such file or directory")]
    NoEnt,
    /// Input/output error (`EIO`).
    #[error("input/output error")]
    Io,
    /// Permission denied (`EACCES`).
    #[error("permission denied")]
    Access,
    /// Operation not permitted (`EPERM`).
    #[error("operation not permitted")]
    Perm,
    /// Bad file descriptor (`EBADF`).
    #[error("bad file descriptor")]
    BadFd,
    /// Invalid argument (`EINVAL`).
    #[error("invalid argument")]
    Inval,
    /// Stale file handle (`ESTALE`).
    #[error("stale file handle")]
    Stale,
    /// Operation not supported (`ENOTSUP`).
    #[error("operation not supported")]
    NotSup,
    /// No space left on device (`ENOSPC`).
    #[error("no space left on device")]
    NoSpc,
    /// Device or resource busy (`EBUSY`).
    #[error("device or resource busy")]
    Busy,
}

impl Errno {
    /// The numeric `errno` value as defined on Linux.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Perm => 1,
            Self::NoEnt => 2,
            Self::Io => 5,
            Self::BadFd => 9,
            Self::Access => 13,
            Self::Busy => 16,
            Self::Inval => 22,
            Self::NoSpc => 28,
            Self::NotSup => 95,
            Self::Stale => 116,
        }
    }
}
