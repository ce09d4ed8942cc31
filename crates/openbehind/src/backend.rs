// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The transport seam towards the lower layer of the client stack.

use std::sync::Arc;

use bytes::Bytes;

use crate::errno::Errno;
use crate::types::{
    EntrylkCmd, EntrylkType, FileAttr, FileLock, LockCmd, OpenFlags, SetAttr, XattrSetFlags,
    XattropOp,
};
use crate::vfs::{Fd, Loc, Xdata};

/// Asynchronous transport to the next lower layer.
///
/// The layer assumes nothing about the backend beyond three capabilities: an
/// asynchronous [`open`](Backend::open) that associates a handle with a file,
/// forwarding of any other operation on a given handle, and resolution of
/// [anonymous handles](crate::Fd::anonymous) for side-effect-free operations.
/// Handle-scope methods may therefore receive either a real, previously
/// opened handle or an anonymous one.
///
/// # Thread safety
///
/// This trait requires `Send` from both the implementation and any returned
/// futures.
#[trait_variant::make(Send)]
pub trait Backend: Send + Sync + 'static {
    /// Opens `loc` with `flags`, associating `fd` with the file.
    async fn open(
        &self,
        loc: &Loc,
        flags: OpenFlags,
        fd: &Arc<Fd>,
        xdata: Option<&Xdata>,
    ) -> Result<(), Errno>;

    /// Reads up to `size` bytes at `offset`.
    async fn read(
        &self,
        fd: &Arc<Fd>,
        size: usize,
        offset: u64,
        flags: OpenFlags,
    ) -> Result<Bytes, Errno>;

    /// Writes `data` at `offset`, returning the number of bytes written.
    async fn write(
        &self,
        fd: &Arc<Fd>,
        data: Bytes,
        offset: u64,
        flags: OpenFlags,
    ) -> Result<usize, Errno>;

    /// Retrieves the attributes of the open file.
    async fn fstat(&self, fd: &Arc<Fd>) -> Result<FileAttr, Errno>;

    /// Flushes buffered state for the handle.
    async fn flush(&self, fd: &Arc<Fd>) -> Result<(), Errno>;

    /// Synchronizes file contents (and metadata unless `datasync`) to stable
    /// storage.
    async fn fsync(&self, fd: &Arc<Fd>, datasync: bool) -> Result<FileAttr, Errno>;

    /// Truncates the open file to `offset` bytes.
    async fn ftruncate(&self, fd: &Arc<Fd>, offset: u64) -> Result<FileAttr, Errno>;

    /// Sets extended attributes on the open file.
    async fn fsetxattr(
        &self,
        fd: &Arc<Fd>,
        xattrs: &Xdata,
        flags: XattrSetFlags,
    ) -> Result<(), Errno>;

    /// Reads extended attributes of the open file; `name` of `None` lists
    /// them all.
    async fn fgetxattr(&self, fd: &Arc<Fd>, name: Option<&str>) -> Result<Xdata, Errno>;

    /// Removes one extended attribute from the open file.
    async fn fremovexattr(&self, fd: &Arc<Fd>, name: &str) -> Result<(), Errno>;

    /// Takes or releases an inode lock in the given lock volume.
    async fn finodelk(
        &self,
        volume: &str,
        fd: &Arc<Fd>,
        cmd: LockCmd,
        lock: &FileLock,
    ) -> Result<(), Errno>;

    /// Takes or releases an entry lock on `basename` under the open
    /// directory.
    async fn fentrylk(
        &self,
        volume: &str,
        fd: &Arc<Fd>,
        basename: &str,
        cmd: EntrylkCmd,
        kind: EntrylkType,
    ) -> Result<(), Errno>;

    /// Atomically combines extended attributes on the open file.
    async fn fxattrop(&self, fd: &Arc<Fd>, op: XattropOp, xattrs: &Xdata) -> Result<Xdata, Errno>;

    /// Changes attributes of the open file.
    async fn fsetattr(&self, fd: &Arc<Fd>, attr: &SetAttr) -> Result<FileAttr, Errno>;

    /// Preallocates space for the open file.
    async fn fallocate(
        &self,
        fd: &Arc<Fd>,
        mode: i32,
        offset: u64,
        len: u64,
    ) -> Result<FileAttr, Errno>;

    /// Deallocates a byte range of the open file.
    async fn discard(&self, fd: &Arc<Fd>, offset: u64, len: u64) -> Result<FileAttr, Errno>;

    /// Zero-fills a byte range of the open file.
    async fn zerofill(&self, fd: &Arc<Fd>, offset: u64, len: u64) -> Result<FileAttr, Errno>;

    /// POSIX advisory record locking on the open file.
    async fn lk(&self, fd: &Arc<Fd>, cmd: LockCmd, lock: &FileLock) -> Result<FileLock, Errno>;

    /// Removes the directory entry at `loc`.
    async fn unlink(&self, loc: &Loc, flags: i32) -> Result<(), Errno>;

    /// Renames `src` to `dst`.
    async fn rename(&self, src: &Loc, dst: &Loc) -> Result<FileAttr, Errno>;

    /// Changes attributes of the file at `loc`.
    async fn setattr(&self, loc: &Loc, attr: &SetAttr) -> Result<FileAttr, Errno>;

    /// Sets extended attributes on the file at `loc`.
    async fn setxattr(&self, loc: &Loc, xattrs: &Xdata, flags: XattrSetFlags)
    -> Result<(), Errno>;
}
