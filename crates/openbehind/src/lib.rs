// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deferred-open layer for stackable distributed-filesystem clients.
//!
//! File open is one of the most latency-sensitive round trips in a
//! distributed filesystem, and a surprising share of opens is never followed
//! by an operation that actually needs an open backend handle (stat-style
//! access, metadata scans, open-then-close). This crate provides
//! [`OpenBehind`], a layer that acknowledges the open upstream immediately
//! and captures its arguments; the real backend open is launched later, on
//! demand, by the first operation that requires it.
//!
//! The hard part is everything around that trick:
//!
//! - Operations arriving while the backend open is pending are suspended on
//!   per-handle FIFO queues and replayed after the open settles; at most one
//!   backend open is ever issued per handle, no matter how many operations
//!   race.
//! - Inode-scope operations (unlink, rename, ACL changes) first *drain* the
//!   inode: every deferred open on any of its handles is forced to the
//!   backend and completed before the operation runs, and such operations
//!   queue FIFO behind the drain.
//! - If the deferred backend open fails, the handle is permanently poisoned:
//!   the already-acknowledged open is paid back by failing every subsequent
//!   operation with the backend's error.
//! - Reads and fstat can optionally be served on [anonymous
//!   handles](Fd::anonymous) while the open is still pending.
//!
//! # Example
//!
//! ```no_run
//! use openbehind::{Fd, Inode, Loc, OpenBehind, OpenBehindConfig, OpenFlags};
//! # async fn example<B: openbehind::Backend>(backend: B) -> Result<(), openbehind::Errno> {
//!
//! let layer = OpenBehind::new(backend, OpenBehindConfig::enabled());
//!
//! let inode = Inode::new();
//! let fd = Fd::create(&inode);
//!
//! // Succeeds immediately; no backend round trip.
//! layer.open(Loc::new("/data/log", &inode), OpenFlags::empty(), &fd, None).await?;
//!
//! // Forces the deferred open, then runs behind it on the real handle.
//! layer.write(&fd, "entry".into(), 0, OpenFlags::empty()).await?;
//!
//! layer.release(&fd);
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod errno;
mod layer;
mod ops;
mod pending;
mod statedump;
mod types;
mod vfs;
mod wake;

pub use backend::Backend;
pub use config::OpenBehindConfig;
pub use errno::Errno;
pub use layer::{
    OpenBehind, POSIX_ACL_ACCESS_XATTR, POSIX_ACL_DEFAULT_XATTR, SECURITY_LABEL_XATTR,
};
pub use types::{
    EntrylkCmd, EntrylkType, FileAttr, FileLock, LockCmd, LockType, OpenFlags, SetAttr,
    XattrSetFlags, XattropOp,
};
pub use vfs::{Fd, FdId, Inode, InodeId, Loc, Xdata};
