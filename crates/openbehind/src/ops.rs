// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reified file operations and their suspension records.
//!
//! Every operation that may have to wait for a pending backend open is
//! captured as a small owned struct implementing [`FdOp`] or [`InodeOp`].
//! A suspended operation lives in a queue as a type-erased [`Resume`] record
//! carrying the reply channel; the wake path either resumes it (forwards it
//! to the backend and replies) or fails it with the open's error.

use std::sync::Arc;

use bytes::Bytes;
use futures::channel::oneshot;
use futures::future::BoxFuture;

use crate::backend::Backend;
use crate::errno::Errno;
use crate::types::{
    EntrylkCmd, EntrylkType, FileAttr, FileLock, LockCmd, OpenFlags, SetAttr, XattrSetFlags,
    XattropOp,
};
use crate::vfs::{Fd, Loc, Xdata};

/// A handle-scope operation that forwards on a wind handle.
pub(crate) trait FdOp: Send + 'static {
    type Reply: Send + 'static;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<Self::Reply, Errno>> + Send;
}

/// An inode-scope operation that forwards on locations only.
pub(crate) trait InodeOp: Send + 'static {
    type Reply: Send + 'static;

    fn forward<B: Backend>(
        self,
        backend: &B,
    ) -> impl Future<Output = Result<Self::Reply, Errno>> + Send;
}

/// A type-erased suspended operation awaiting an open result.
pub(crate) trait Resume<B: Backend>: Send {
    /// Forwards the operation to the backend and delivers its reply.
    fn resume<'a>(self: Box<Self>, backend: &'a B) -> BoxFuture<'a, ()>;

    /// Fails the operation with the given error.
    fn fail(self: Box<Self>, err: Errno);
}

struct Suspended<O: FdOp> {
    fd: Arc<Fd>,
    op: O,
    tx: oneshot::Sender<Result<O::Reply, Errno>>,
}

impl<B: Backend, O: FdOp> Resume<B> for Suspended<O> {
    fn resume<'a>(self: Box<Self>, backend: &'a B) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Suspended { fd, op, tx } = *self;
            let reply = op.forward(backend, &fd).await;
            let _ = tx.send(reply);
        })
    }

    fn fail(self: Box<Self>, err: Errno) {
        let _ = self.tx.send(Err(err));
    }
}

struct SuspendedInode<O: InodeOp> {
    op: O,
    tx: oneshot::Sender<Result<O::Reply, Errno>>,
}

impl<B: Backend, O: InodeOp> Resume<B> for SuspendedInode<O> {
    fn resume<'a>(self: Box<Self>, backend: &'a B) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let SuspendedInode { op, tx } = *self;
            let reply = op.forward(backend).await;
            let _ = tx.send(reply);
        })
    }

    fn fail(self: Box<Self>, err: Errno) {
        let _ = self.tx.send(Err(err));
    }
}

type Reply<O> = oneshot::Receiver<Result<O, Errno>>;

/// Captures a handle-scope operation as a queueable suspension record.
pub(crate) fn suspend<B: Backend, O: FdOp>(
    fd: Arc<Fd>,
    op: O,
) -> (Box<dyn Resume<B>>, Reply<O::Reply>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(Suspended { fd, op, tx }), rx)
}

/// Captures an inode-scope operation as a queueable suspension record.
pub(crate) fn suspend_inode<B: Backend, O: InodeOp>(
    op: O,
) -> (Box<dyn Resume<B>>, Reply<O::Reply>) {
    let (tx, rx) = oneshot::channel();
    (Box::new(SuspendedInode { op, tx }), rx)
}

/// A deferred or serialized open being forwarded for real.
///
/// Unlike every other handle-scope operation this one targets its own
/// handle, not the handle whose queue it waited on: a second open on an
/// inode serializes behind the first handle's pending open.
pub(crate) struct Open {
    pub loc: Loc,
    pub flags: OpenFlags,
    pub fd: Arc<Fd>,
    pub xdata: Option<Xdata>,
}

impl FdOp for Open {
    type Reply = ();

    fn forward<B: Backend>(
        self,
        backend: &B,
        _queued_on: &Arc<Fd>,
    ) -> impl Future<Output = Result<(), Errno>> + Send {
        async move {
            backend
                .open(&self.loc, self.flags, &self.fd, self.xdata.as_ref())
                .await?;
            self.fd.bind();
            Ok(())
        }
    }
}

pub(crate) struct Read {
    pub size: usize,
    pub offset: u64,
    pub flags: OpenFlags,
}

impl FdOp for Read {
    type Reply = Bytes;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<Bytes, Errno>> + Send {
        backend.read(fd, self.size, self.offset, self.flags)
    }
}

pub(crate) struct Write {
    pub data: Bytes,
    pub offset: u64,
    pub flags: OpenFlags,
}

impl FdOp for Write {
    type Reply = usize;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<usize, Errno>> + Send {
        backend.write(fd, self.data, self.offset, self.flags)
    }
}

pub(crate) struct Fstat;

impl FdOp for Fstat {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        backend.fstat(fd)
    }
}

pub(crate) struct Flush;

impl FdOp for Flush {
    type Reply = ();

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<(), Errno>> + Send {
        backend.flush(fd)
    }
}

pub(crate) struct Fsync {
    pub datasync: bool,
}

impl FdOp for Fsync {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        backend.fsync(fd, self.datasync)
    }
}

pub(crate) struct Ftruncate {
    pub offset: u64,
}

impl FdOp for Ftruncate {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        backend.ftruncate(fd, self.offset)
    }
}

pub(crate) struct Fsetxattr {
    pub xattrs: Xdata,
    pub flags: XattrSetFlags,
}

impl FdOp for Fsetxattr {
    type Reply = ();

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<(), Errno>> + Send {
        async move { backend.fsetxattr(fd, &self.xattrs, self.flags).await }
    }
}

pub(crate) struct Fgetxattr {
    pub name: Option<String>,
}

impl FdOp for Fgetxattr {
    type Reply = Xdata;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<Xdata, Errno>> + Send {
        async move { backend.fgetxattr(fd, self.name.as_deref()).await }
    }
}

pub(crate) struct Fremovexattr {
    pub name: String,
}

impl FdOp for Fremovexattr {
    type Reply = ();

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<(), Errno>> + Send {
        async move { backend.fremovexattr(fd, &self.name).await }
    }
}

pub(crate) struct Finodelk {
    pub volume: String,
    pub cmd: LockCmd,
    pub lock: FileLock,
}

impl FdOp for Finodelk {
    type Reply = ();

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<(), Errno>> + Send {
        async move { backend.finodelk(&self.volume, fd, self.cmd, &self.lock).await }
    }
}

pub(crate) struct Fentrylk {
    pub volume: String,
    pub basename: String,
    pub cmd: EntrylkCmd,
    pub kind: EntrylkType,
}

impl FdOp for Fentrylk {
    type Reply = ();

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<(), Errno>> + Send {
        async move {
            backend
                .fentrylk(&self.volume, fd, &self.basename, self.cmd, self.kind)
                .await
        }
    }
}

pub(crate) struct Fxattrop {
    pub op: XattropOp,
    pub xattrs: Xdata,
}

impl FdOp for Fxattrop {
    type Reply = Xdata;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<Xdata, Errno>> + Send {
        async move { backend.fxattrop(fd, self.op, &self.xattrs).await }
    }
}

pub(crate) struct Fsetattr {
    pub attr: SetAttr,
}

impl FdOp for Fsetattr {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        async move { backend.fsetattr(fd, &self.attr).await }
    }
}

pub(crate) struct Fallocate {
    pub mode: i32,
    pub offset: u64,
    pub len: u64,
}

impl FdOp for Fallocate {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        backend.fallocate(fd, self.mode, self.offset, self.len)
    }
}

pub(crate) struct Discard {
    pub offset: u64,
    pub len: u64,
}

impl FdOp for Discard {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        backend.discard(fd, self.offset, self.len)
    }
}

pub(crate) struct Zerofill {
    pub offset: u64,
    pub len: u64,
}

impl FdOp for Zerofill {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        backend.zerofill(fd, self.offset, self.len)
    }
}

pub(crate) struct Lk {
    pub cmd: LockCmd,
    pub lock: FileLock,
}

impl FdOp for Lk {
    type Reply = FileLock;

    fn forward<B: Backend>(
        self,
        backend: &B,
        fd: &Arc<Fd>,
    ) -> impl Future<Output = Result<FileLock, Errno>> + Send {
        async move { backend.lk(fd, self.cmd, &self.lock).await }
    }
}

pub(crate) struct Unlink {
    pub loc: Loc,
    pub flags: i32,
}

impl InodeOp for Unlink {
    type Reply = ();

    fn forward<B: Backend>(self, backend: &B) -> impl Future<Output = Result<(), Errno>> + Send {
        async move { backend.unlink(&self.loc, self.flags).await }
    }
}

pub(crate) struct Rename {
    pub src: Loc,
    pub dst: Loc,
}

impl InodeOp for Rename {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        async move { backend.rename(&self.src, &self.dst).await }
    }
}

pub(crate) struct Setattr {
    pub loc: Loc,
    pub attr: SetAttr,
}

impl InodeOp for Setattr {
    type Reply = FileAttr;

    fn forward<B: Backend>(
        self,
        backend: &B,
    ) -> impl Future<Output = Result<FileAttr, Errno>> + Send {
        async move { backend.setattr(&self.loc, &self.attr).await }
    }
}

pub(crate) struct Setxattr {
    pub loc: Loc,
    pub xattrs: Xdata,
    pub flags: XattrSetFlags,
}

impl InodeOp for Setxattr {
    type Reply = ();

    fn forward<B: Backend>(self, backend: &B) -> impl Future<Output = Result<(), Errno>> + Send {
        async move { backend.setxattr(&self.loc, &self.xattrs, self.flags).await }
    }
}
