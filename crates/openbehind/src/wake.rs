// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The wake engine: escalates deferred opens into real backend opens and
//! settles everything waiting on the result.
//!
//! Grabbing the captured open request out of a handle record is the atomic
//! commit point for "this handle opens for real"; whoever wins the grab runs
//! the backend open and then the completion, which releases the handle's
//! suspended operations in FIFO order and, when the open participated in an
//! inode drain, finalizes the drain.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::errno::Errno;
use crate::layer::OpenBehind;
use crate::ops::{FdOp, InodeOp, suspend, suspend_inode};
use crate::pending::{OpenRequest, PendingFd};
use crate::vfs::{Fd, Inode};

impl<B: Backend> OpenBehind<B> {
    /// Dispatches a handle-scope operation.
    ///
    /// A handle without a deferred-open record is normal: the operation is
    /// forwarded right away. A poisoned record fails the operation with the
    /// captured open error. Otherwise the operation is suspended on the
    /// handle queue and the deferred open is woken; the wake is idempotent,
    /// so only the first operation to race through here actually launches
    /// the backend open.
    pub(crate) async fn submit<O: FdOp>(&self, fd: &Arc<Fd>, op: O) -> Result<O::Reply, Errno> {
        let Some(rec) = self.fd_record(fd) else {
            return op.forward(self.backend(), fd).await;
        };

        enum Gate<O, R> {
            Forward(O),
            Wait(R),
        }

        let gate = {
            let mut state = rec.state.lock();
            if let Some(err) = state.err {
                return Err(err);
            }
            if state.opened {
                Gate::Forward(op)
            } else {
                let (stub, rx) = suspend::<B, O>(Arc::clone(fd), op);
                state.queue.push_back(stub);
                Gate::Wait(rx)
            }
        };

        match gate {
            Gate::Forward(op) => op.forward(self.backend(), fd).await,
            Gate::Wait(rx) => {
                self.wake_fd(&rec).await;
                rx.await.unwrap_or(Err(Errno::Io))
            }
        }
    }

    /// Dispatches an inode-scope operation, first waiting for every deferred
    /// open on the inode to reach the backend.
    ///
    /// Marks the inode so no new deferred opens are created on it. If a
    /// drain is already running the operation just joins the inode queue;
    /// otherwise the deferred handles are walked, still-captured open
    /// requests are harvested, and a drain is armed whenever any handle is
    /// still unopened. With nothing to wait for the operation forwards
    /// immediately.
    pub(crate) async fn submit_inode<O: InodeOp>(
        &self,
        inode: Option<&Arc<Inode>>,
        op: O,
    ) -> Result<O::Reply, Errno> {
        let Some(inode) = inode else {
            return op.forward(self.backend()).await;
        };
        let rec = self.inode_record(inode);

        enum Plan<O, R> {
            Immediate(O),
            Wait(R),
        }

        let mut wakes: Vec<(Arc<PendingFd<B>>, OpenRequest)> = Vec::new();
        let plan = {
            let mut state = rec.state.lock();
            state.unlinked = true;
            if state.drain_in_progress {
                let (stub, rx) = suspend_inode::<B, O>(op);
                state.queue.push_back(stub);
                Plan::Wait(rx)
            } else {
                let mut count = 0usize;
                for pending in &state.deferred {
                    let mut fd_state = pending.state.lock();
                    if fd_state.opened {
                        continue;
                    }
                    count += 1;
                    fd_state.drain_waiter = true;
                    if let Some(request) = fd_state.open_request.take() {
                        wakes.push((Arc::clone(pending), request));
                    }
                    // A taken request means the open is already in flight;
                    // counting it is enough.
                }
                if count == 0 {
                    Plan::Immediate(op)
                } else {
                    state.drain_count = count;
                    // Each drain aggregates its own result.
                    state.drain_error = None;
                    state.drain_in_progress = true;
                    let (stub, rx) = suspend_inode::<B, O>(op);
                    state.queue.push_back(stub);
                    Plan::Wait(rx)
                }
            }
        };

        match plan {
            Plan::Immediate(op) => op.forward(self.backend()).await,
            Plan::Wait(rx) => {
                if !wakes.is_empty() {
                    debug!(inode = %rec.inode.id(), opens = wakes.len(), "draining deferred opens");
                }
                self.wake_set(wakes).await;
                rx.await.unwrap_or(Err(Errno::Io))
            }
        }
    }

    /// Issues the backend open for every harvested wake record.
    async fn wake_set(&self, wakes: Vec<(Arc<PendingFd<B>>, OpenRequest)>) {
        join_all(
            wakes
                .into_iter()
                .map(|(pending, request)| self.run_open(pending, request)),
        )
        .await;
    }

    /// Escalates the handle's deferred open if nobody else has yet.
    pub(crate) async fn wake_fd(&self, rec: &Arc<PendingFd<B>>) {
        let request = rec.state.lock().open_request.take();
        if let Some(request) = request {
            self.run_open(Arc::clone(rec), request).await;
        }
    }

    /// Issues the backend open captured in `request` and runs completion.
    async fn run_open(&self, rec: Arc<PendingFd<B>>, request: OpenRequest) {
        debug!(fd = %rec.fd.id(), path = %request.loc.path, unique = request.unique, "backend open launched");
        let result = self
            .backend()
            .open(&request.loc, request.flags, &rec.fd, request.xdata.as_ref())
            .await;
        self.complete_open(&rec, result).await;
    }

    /// Settles a finished backend open: marks the record, releases the
    /// handle queue, and finalizes an inode drain this open participated in.
    async fn complete_open(&self, rec: &Arc<PendingFd<B>>, result: Result<(), Errno>) {
        let (stubs, drain_waiter) = {
            let mut state = rec.state.lock();
            state.opened = true;
            if let Err(err) = result {
                state.err = Some(err);
            }
            (std::mem::take(&mut state.queue), state.drain_waiter)
        };

        match result {
            Ok(()) => {
                // The record has served its purpose; a normal handle needs
                // no context at all.
                self.inner.fds.remove(&rec.fd.id());
                rec.inode_rec.remove_deferred(rec.fd.id());
                debug!(fd = %rec.fd.id(), "backend open completed");
            }
            Err(err) => {
                // The record stays installed so every future operation on
                // this handle keeps failing with the open's error.
                warn!(fd = %rec.fd.id(), %err, "backend open failed, handle poisoned");
            }
        }

        let mut drained = None;
        if drain_waiter {
            let mut inode_state = rec.inode_rec.state.lock();
            debug_assert!(inode_state.drain_count > 0);
            inode_state.drain_count -= 1;
            if let Err(err) = result
                && inode_state.drain_error.is_none()
            {
                inode_state.drain_error = Some(err);
            }
            if inode_state.drain_count == 0 {
                inode_state.drain_in_progress = false;
                let status = match inode_state.drain_error {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
                drained = Some((std::mem::take(&mut inode_state.queue), status));
            }
        }

        for stub in stubs {
            match result {
                Ok(()) => stub.resume(self.backend()).await,
                Err(err) => stub.fail(err),
            }
        }

        if let Some((queue, status)) = drained {
            debug!(inode = %rec.inode_rec.inode.id(), "inode drain finished");
            for stub in queue {
                match status {
                    Ok(()) => stub.resume(self.backend()).await,
                    Err(err) => stub.fail(err),
                }
            }
        }
    }
}
