// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-handle and per-inode records of deferred backend opens.
//!
//! Lock discipline: every field lives under exactly one lock. The fields of
//! [`PendingFdState`] are covered by the handle record's own mutex; the
//! fields of [`InodeState`] by the inode record's mutex. When both locks are
//! needed, the inode lock is taken first.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::errno::Errno;
use crate::ops::Resume;
use crate::types::OpenFlags;
use crate::vfs::{Fd, FdId, Inode, Loc, Xdata};

/// The captured arguments of a deferred open, owned by whichever party is
/// currently committed to issuing the backend open.
pub(crate) struct OpenRequest {
    pub loc: Loc,
    pub flags: OpenFlags,
    pub xdata: Option<Xdata>,
    /// Monotonic id identifying this capture in state dumps.
    pub unique: u64,
}

/// Mutable state of one handle's deferred open, covered by the handle lock.
pub(crate) struct PendingFdState<B: Backend> {
    /// Present until a backend open has been launched from this record.
    /// Taking it out is the commit point of "this handle opens for real".
    pub open_request: Option<OpenRequest>,
    /// Set once the backend open completed, with any outcome.
    pub opened: bool,
    /// Error of a failed backend open; permanently poisons the handle.
    pub err: Option<Errno>,
    /// An inode drain has counted this handle.
    pub drain_waiter: bool,
    /// Operations suspended until this handle's open result is known.
    pub queue: VecDeque<Box<dyn Resume<B>>>,
}

/// One handle's deferred-open record.
pub(crate) struct PendingFd<B: Backend> {
    pub fd: Arc<Fd>,
    /// Aggregation record of the owning inode.
    pub inode_rec: Arc<InodeRec<B>>,
    pub state: Mutex<PendingFdState<B>>,
}

impl<B: Backend> PendingFd<B> {
    /// Creates the record with the open captured and not yet launched.
    ///
    /// Holding the handle inside the record pins it for as long as the
    /// deferred or in-flight open needs it.
    pub(crate) fn new(fd: &Arc<Fd>, inode_rec: &Arc<InodeRec<B>>, request: OpenRequest) -> Self {
        Self {
            fd: Arc::clone(fd),
            inode_rec: Arc::clone(inode_rec),
            state: Mutex::new(PendingFdState {
                open_request: Some(request),
                opened: false,
                err: None,
                drain_waiter: false,
                queue: VecDeque::new(),
            }),
        }
    }
}

impl<B: Backend> Drop for PendingFd<B> {
    fn drop(&mut self) {
        // Every suspended operation must have been resumed or failed before
        // the record can go away.
        debug_assert!(self.state.lock().queue.is_empty());
    }
}

impl<B: Backend> fmt::Debug for PendingFd<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFd")
            .field("fd", &self.fd.id())
            .finish_non_exhaustive()
    }
}

/// Mutable per-inode aggregation state, covered by the inode lock.
pub(crate) struct InodeState<B: Backend> {
    /// Handle records with a deferred open on this inode.
    pub deferred: Vec<Arc<PendingFd<B>>>,
    /// Inode-scope operations suspended until the current drain completes.
    pub queue: VecDeque<Box<dyn Resume<B>>>,
    pub drain_in_progress: bool,
    /// Backend opens that must still complete before the drain ends.
    pub drain_count: usize,
    /// First error seen among the drain's participating opens.
    pub drain_error: Option<Errno>,
    /// Sticky: the inode saw an inode-scope mutating operation; no new
    /// deferred opens are created on it.
    pub unlinked: bool,
}

/// Per-inode aggregation of all deferred opens.
pub(crate) struct InodeRec<B: Backend> {
    pub inode: Arc<Inode>,
    pub state: Mutex<InodeState<B>>,
}

impl<B: Backend> InodeRec<B> {
    pub(crate) fn new(inode: &Arc<Inode>) -> Self {
        Self {
            inode: Arc::clone(inode),
            state: Mutex::new(InodeState {
                deferred: Vec::new(),
                queue: VecDeque::new(),
                drain_in_progress: false,
                drain_count: 0,
                drain_error: None,
                unlinked: false,
            }),
        }
    }

    /// Unlinks a handle record from the deferred set.
    pub(crate) fn remove_deferred(&self, id: FdId) {
        self.state.lock().deferred.retain(|rec| rec.fd.id() != id);
    }
}

impl<B: Backend> fmt::Debug for InodeRec<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InodeRec")
            .field("inode", &self.inode.id())
            .finish_non_exhaustive()
    }
}
