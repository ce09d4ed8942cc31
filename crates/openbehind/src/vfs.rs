// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Minimal handle/inode objects of the surrounding client framework.
//!
//! The layer sits between an upper caller and a lower backend; both sides
//! exchange these reference-counted objects. An [`Inode`] identifies a file
//! independently of any open handle, and an [`Fd`] is one open handle on it.
//! A freshly created handle is invisible to [`Inode::lookup_fd`] until it is
//! [bound](Fd::bind), which happens when an open is acknowledged upstream.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

static NEXT_INODE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_FD_ID: AtomicU64 = AtomicU64::new(1);

/// Auxiliary key/value data carried alongside certain operations.
pub type Xdata = HashMap<String, Bytes>;

/// Unique identity of an [`Inode`] within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeId(u64);

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inode:{}", self.0)
    }
}

/// Unique identity of an [`Fd`] within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdId(u64);

impl fmt::Display for FdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// The framework's per-file object, independent of any open handle.
pub struct Inode {
    id: InodeId,
    gfid: Uuid,
    fds: Mutex<Vec<Weak<Fd>>>,
}

impl Inode {
    /// Creates a new inode with a fresh gfid.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_gfid(Uuid::new_v4())
    }

    /// Creates a new inode with the given gfid.
    #[must_use]
    pub fn with_gfid(gfid: Uuid) -> Arc<Self> {
        Arc::new(Self {
            id: InodeId(NEXT_INODE_ID.fetch_add(1, Ordering::Relaxed)),
            gfid,
            fds: Mutex::new(Vec::new()),
        })
    }

    /// This inode's process-local identity.
    #[must_use]
    pub fn id(&self) -> InodeId {
        self.id
    }

    /// The globally unique file identity.
    #[must_use]
    pub fn gfid(&self) -> Uuid {
        self.gfid
    }

    /// Returns any currently bound live handle on this inode, if one exists.
    #[must_use]
    pub fn lookup_fd(&self) -> Option<Arc<Fd>> {
        let mut fds = self.fds.lock();
        fds.retain(|weak| weak.strong_count() > 0);
        fds.iter().find_map(Weak::upgrade)
    }

    fn attach(&self, fd: &Arc<Fd>) {
        self.fds.lock().push(Arc::downgrade(fd));
    }

    fn detach(&self, id: FdId) {
        self.fds
            .lock()
            .retain(|weak| weak.upgrade().is_some_and(|fd| fd.id != id));
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("id", &self.id)
            .field("gfid", &self.gfid)
            .finish_non_exhaustive()
    }
}

/// One open handle on a file.
///
/// Distinct handles on the same file share the same [`Inode`]. Anonymous
/// handles are transient, never bound to their inode, and resolved by the
/// backend on the fly; they are only valid for side-effect-free operations.
pub struct Fd {
    id: FdId,
    inode: Arc<Inode>,
    anonymous: bool,
    bound: AtomicBool,
}

impl Fd {
    /// Creates a new, not yet bound handle on `inode`.
    #[must_use]
    pub fn create(inode: &Arc<Inode>) -> Arc<Self> {
        Arc::new(Self {
            id: FdId(NEXT_FD_ID.fetch_add(1, Ordering::Relaxed)),
            inode: Arc::clone(inode),
            anonymous: false,
            bound: AtomicBool::new(false),
        })
    }

    /// Creates a transient anonymous handle that the backend resolves itself.
    #[must_use]
    pub fn anonymous(inode: &Arc<Inode>) -> Arc<Self> {
        Arc::new(Self {
            id: FdId(NEXT_FD_ID.fetch_add(1, Ordering::Relaxed)),
            inode: Arc::clone(inode),
            anonymous: true,
            bound: AtomicBool::new(false),
        })
    }

    /// This handle's process-local identity.
    #[must_use]
    pub fn id(&self) -> FdId {
        self.id
    }

    /// The inode this handle was opened against.
    #[must_use]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// Whether this is a transient anonymous handle.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Registers this handle in its inode's live-handle list.
    ///
    /// Called once an open has been acknowledged upstream; anonymous handles
    /// are never bound.
    pub fn bind(self: &Arc<Self>) {
        if !self.anonymous && !self.bound.swap(true, Ordering::AcqRel) {
            self.inode.attach(self);
        }
    }

    /// Removes this handle from its inode's live-handle list.
    ///
    /// Models the application closing the handle: the handle object may stay
    /// alive while a deferred open pins it, but it is no longer discoverable
    /// through [`Inode::lookup_fd`].
    pub fn unbind(&self) {
        if self.bound.swap(false, Ordering::AcqRel) {
            self.inode.detach(self.id);
        }
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        if self.bound.load(Ordering::Acquire) {
            self.inode.detach(self.id);
        }
    }
}

impl fmt::Debug for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fd")
            .field("id", &self.id)
            .field("inode", &self.inode.id)
            .field("anonymous", &self.anonymous)
            .finish_non_exhaustive()
    }
}

/// A resolved or partially resolved file location.
#[derive(Debug, Clone)]
pub struct Loc {
    /// Path as supplied by the caller.
    pub path: String,
    /// The resolved inode; absent when the target does not exist yet.
    pub inode: Option<Arc<Inode>>,
}

impl Loc {
    /// A location resolved to an existing inode.
    #[must_use]
    pub fn new(path: impl Into<String>, inode: &Arc<Inode>) -> Self {
        Self {
            path: path.into(),
            inode: Some(Arc::clone(inode)),
        }
    }

    /// A location whose target has not been resolved.
    #[must_use]
    pub fn unresolved(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            inode: None,
        }
    }

    /// The gfid of the resolved inode, if any.
    #[must_use]
    pub fn gfid(&self) -> Option<Uuid> {
        self.inode.as_ref().map(|inode| inode.gfid())
    }
}
