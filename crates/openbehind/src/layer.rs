// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The fop dispatcher: one entry point per file operation.
//!
//! Every operation arriving on a handle is classified here: forwarded
//! immediately (possibly on an anonymous handle), suspended on the handle or
//! inode queue, or used as the trigger that escalates a deferred open into a
//! real one. The wake machinery itself lives in `wake.rs`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyspawn::Spawner;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::backend::Backend;
use crate::config::OpenBehindConfig;
use crate::errno::Errno;
use crate::ops;
use crate::pending::{InodeRec, OpenRequest, PendingFd};
use crate::types::{
    EntrylkCmd, EntrylkType, FileAttr, FileLock, LockCmd, OpenFlags, SetAttr, XattrSetFlags,
    XattropOp,
};
use crate::vfs::{Fd, FdId, Inode, InodeId, Loc, Xdata};

/// Extended-attribute key of a POSIX access ACL.
pub const POSIX_ACL_ACCESS_XATTR: &str = "system.posix_acl_access";
/// Extended-attribute key of a POSIX default ACL.
pub const POSIX_ACL_DEFAULT_XATTR: &str = "system.posix_acl_default";
/// Extended-attribute key of the mandatory security label.
pub const SECURITY_LABEL_XATTR: &str = "security.selinux";

/// Whether a setxattr request touches access-control state and therefore
/// must observe all deferred opens on the inode.
fn touches_access_control(xattrs: &Xdata) -> bool {
    xattrs.contains_key(POSIX_ACL_ACCESS_XATTR)
        || xattrs.contains_key(POSIX_ACL_DEFAULT_XATTR)
        || xattrs.contains_key(SECURITY_LABEL_XATTR)
}

pub(crate) struct Shared<B: Backend> {
    pub(crate) backend: B,
    pub(crate) conf: RwLock<Arc<OpenBehindConfig>>,
    pub(crate) inodes: DashMap<InodeId, Arc<InodeRec<B>>>,
    pub(crate) fds: DashMap<FdId, Arc<PendingFd<B>>>,
    pub(crate) spawner: Spawner,
    next_unique: AtomicU64,
}

/// The open-behind layer.
///
/// Sits between an upper caller and a lower [`Backend`] and makes file open
/// appear synchronous and successful while the real backend open is deferred
/// until some operation genuinely needs an open handle. Cloning is cheap and
/// shares all state.
///
/// # Examples
///
/// ```no_run
/// use openbehind::{Fd, Inode, Loc, OpenBehind, OpenBehindConfig, OpenFlags};
/// # async fn example<B: openbehind::Backend>(backend: B) -> Result<(), openbehind::Errno> {
///
/// let layer = OpenBehind::new(backend, OpenBehindConfig::enabled());
///
/// let inode = Inode::new();
/// let fd = Fd::create(&inode);
/// // Replies immediately; the backend sees nothing yet.
/// layer.open(Loc::new("/a", &inode), OpenFlags::empty(), &fd, None).await?;
///
/// // The first write forces the real open, then runs behind it.
/// let written = layer.write(&fd, "x".into(), 0, OpenFlags::empty()).await?;
/// # let _ = written;
/// # Ok(())
/// # }
/// ```
pub struct OpenBehind<B: Backend> {
    pub(crate) inner: Arc<Shared<B>>,
}

impl<B: Backend> Clone for OpenBehind<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for OpenBehind<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenBehind")
            .field("inodes", &self.inner.inodes.len())
            .field("fds", &self.inner.fds.len())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> OpenBehind<B> {
    /// Creates the layer over `backend`, spawning eager wakes on the ambient
    /// Tokio runtime.
    #[must_use]
    pub fn new(backend: B, config: OpenBehindConfig) -> Self {
        Self::with_spawner(backend, config, Spawner::new_tokio())
    }

    /// Creates the layer with an explicit spawner for detached wakes.
    #[must_use]
    pub fn with_spawner(backend: B, config: OpenBehindConfig, spawner: Spawner) -> Self {
        Self {
            inner: Arc::new(Shared {
                backend,
                conf: RwLock::new(Arc::new(config)),
                inodes: DashMap::new(),
                fds: DashMap::new(),
                spawner,
                next_unique: AtomicU64::new(1),
            }),
        }
    }

    /// The configuration snapshot current operations run under.
    #[must_use]
    pub fn config(&self) -> Arc<OpenBehindConfig> {
        Arc::clone(&self.inner.conf.read())
    }

    /// Replaces the configuration snapshot.
    ///
    /// In-flight operations keep the snapshot they started with; only
    /// operations dispatched afterwards observe the new options.
    pub fn reconfigure(&self, config: OpenBehindConfig) {
        *self.inner.conf.write() = Arc::new(config);
    }

    pub(crate) fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub(crate) fn fd_record(&self, fd: &Arc<Fd>) -> Option<Arc<PendingFd<B>>> {
        self.inner.fds.get(&fd.id()).map(|rec| Arc::clone(&rec))
    }

    pub(crate) fn inode_record(&self, inode: &Arc<Inode>) -> Arc<InodeRec<B>> {
        let rec = self
            .inner
            .inodes
            .entry(inode.id())
            .or_insert_with(|| Arc::new(InodeRec::new(inode)));
        Arc::clone(&rec)
    }

    /// Opens `loc` on the (not yet bound) handle `fd`.
    ///
    /// When the layer is active and this is the first handle on the inode,
    /// the reply is immediate and fabricated: the backend open is captured
    /// and deferred. A failure of that later backend open permanently
    /// poisons the handle, and every subsequent operation on it reports the
    /// backend's error.
    ///
    /// Truncating opens, opens on inodes that saw an inode-scope mutating
    /// operation, and opens racing an inode drain are forwarded
    /// synchronously. A second handle on an inode with a deferred first
    /// handle serializes behind that handle's backend open.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports when the open is forwarded
    /// synchronously; a deferred open always succeeds upstream.
    pub async fn open(
        &self,
        loc: Loc,
        flags: OpenFlags,
        fd: &Arc<Fd>,
        xdata: Option<Xdata>,
    ) -> Result<(), Errno> {
        let conf = self.config();
        if !conf.active() || flags.contains(OpenFlags::TRUNC) {
            return self.forward_open(loc, flags, fd, xdata).await;
        }

        if let Some(sibling) = fd.inode().lookup_fd() {
            // Open-behind applies only to the first handle of an inode;
            // later opens wait behind that handle's pending open.
            let open = ops::Open {
                loc,
                flags,
                fd: Arc::clone(fd),
                xdata,
            };
            return self.submit(&sibling, open).await;
        }

        let inode_rec = self.inode_record(fd.inode());
        let outcome = {
            let mut state = inode_rec.state.lock();
            if state.unlinked || state.drain_in_progress {
                Err((loc, xdata))
            } else {
                let request = OpenRequest {
                    loc,
                    flags,
                    xdata,
                    unique: self.inner.next_unique.fetch_add(1, Ordering::Relaxed),
                };
                let rec = Arc::new(PendingFd::new(fd, &inode_rec, request));
                state.deferred.push(Arc::clone(&rec));
                self.inner.fds.insert(fd.id(), Arc::clone(&rec));
                Ok(rec)
            }
        };

        match outcome {
            Ok(rec) => {
                fd.bind();
                debug!(fd = %fd.id(), inode = %fd.inode().id(), "open deferred");
                if !conf.lazy_open {
                    let layer = self.clone();
                    drop(
                        self.inner
                            .spawner
                            .spawn(async move { layer.wake_fd(&rec).await }),
                    );
                }
                Ok(())
            }
            Err((loc, xdata)) => self.forward_open(loc, flags, fd, xdata).await,
        }
    }

    pub(crate) async fn forward_open(
        &self,
        loc: Loc,
        flags: OpenFlags,
        fd: &Arc<Fd>,
        xdata: Option<Xdata>,
    ) -> Result<(), Errno> {
        self.backend().open(&loc, flags, fd, xdata.as_ref()).await?;
        fd.bind();
        Ok(())
    }

    /// Picks the handle a read or fstat should be forwarded on.
    ///
    /// While the backend open is still deferred and anonymous handles are
    /// allowed, the operation goes to a fresh anonymous handle; direct-I/O
    /// intent from the deferred open is carried over into the call flags.
    fn wind_fd(
        &self,
        fd: &Arc<Fd>,
        call_flags: Option<&mut OpenFlags>,
        conf: &OpenBehindConfig,
    ) -> Arc<Fd> {
        if !conf.use_anonymous_fd {
            return Arc::clone(fd);
        }
        let deferred_flags = self.fd_record(fd).and_then(|rec| {
            let state = rec.state.lock();
            state.open_request.as_ref().map(|request| request.flags)
        });
        match deferred_flags {
            Some(flags) => {
                if let Some(call_flags) = call_flags
                    && flags.contains(OpenFlags::DIRECT)
                {
                    *call_flags |= OpenFlags::DIRECT;
                }
                Fd::anonymous(fd.inode())
            }
            None => Arc::clone(fd),
        }
    }

    /// Reads up to `size` bytes at `offset`.
    ///
    /// With `use_anonymous_fd` enabled and the backend open still pending,
    /// the read is served on an anonymous handle and does not force the
    /// open; `read_after_open` overrides this and makes the read wait for
    /// the real handle.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn read(
        &self,
        fd: &Arc<Fd>,
        size: usize,
        offset: u64,
        flags: OpenFlags,
    ) -> Result<Bytes, Errno> {
        let conf = self.config();
        let mut flags = flags;
        let wind = if conf.read_after_open {
            Arc::clone(fd)
        } else {
            self.wind_fd(fd, Some(&mut flags), &conf)
        };
        self.submit(&wind, ops::Read { size, offset, flags }).await
    }

    /// Writes `data` at `offset`, forcing the deferred open first.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn write(
        &self,
        fd: &Arc<Fd>,
        data: Bytes,
        offset: u64,
        flags: OpenFlags,
    ) -> Result<usize, Errno> {
        self.submit(fd, ops::Write { data, offset, flags }).await
    }

    /// Retrieves the open file's attributes, eligible for anonymous-handle
    /// substitution like [`read`](Self::read) (but unaffected by
    /// `read_after_open`).
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fstat(&self, fd: &Arc<Fd>) -> Result<FileAttr, Errno> {
        let conf = self.config();
        let wind = self.wind_fd(fd, None, &conf);
        self.submit(&wind, ops::Fstat).await
    }

    /// Flushes the handle.
    ///
    /// If no backend open was ever launched for this handle there is nothing
    /// to flush, and the call succeeds without touching the backend.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn flush(&self, fd: &Arc<Fd>) -> Result<(), Errno> {
        let never_launched = self
            .fd_record(fd)
            .is_some_and(|rec| rec.state.lock().open_request.is_some());
        if never_launched {
            return Ok(());
        }
        self.submit(fd, ops::Flush).await
    }

    /// Synchronizes the open file to stable storage.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fsync(&self, fd: &Arc<Fd>, datasync: bool) -> Result<FileAttr, Errno> {
        self.submit(fd, ops::Fsync { datasync }).await
    }

    /// Truncates the open file to `offset` bytes.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn ftruncate(&self, fd: &Arc<Fd>, offset: u64) -> Result<FileAttr, Errno> {
        self.submit(fd, ops::Ftruncate { offset }).await
    }

    /// Sets extended attributes on the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fsetxattr(
        &self,
        fd: &Arc<Fd>,
        xattrs: Xdata,
        flags: XattrSetFlags,
    ) -> Result<(), Errno> {
        self.submit(fd, ops::Fsetxattr { xattrs, flags }).await
    }

    /// Reads extended attributes of the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fgetxattr(&self, fd: &Arc<Fd>, name: Option<&str>) -> Result<Xdata, Errno> {
        let name = name.map(str::to_owned);
        self.submit(fd, ops::Fgetxattr { name }).await
    }

    /// Removes an extended attribute from the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fremovexattr(&self, fd: &Arc<Fd>, name: &str) -> Result<(), Errno> {
        let name = name.to_owned();
        self.submit(fd, ops::Fremovexattr { name }).await
    }

    /// Takes or releases an inode lock.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn finodelk(
        &self,
        volume: &str,
        fd: &Arc<Fd>,
        cmd: LockCmd,
        lock: FileLock,
    ) -> Result<(), Errno> {
        let volume = volume.to_owned();
        self.submit(fd, ops::Finodelk { volume, cmd, lock }).await
    }

    /// Takes or releases an entry lock.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fentrylk(
        &self,
        volume: &str,
        fd: &Arc<Fd>,
        basename: &str,
        cmd: EntrylkCmd,
        kind: EntrylkType,
    ) -> Result<(), Errno> {
        let op = ops::Fentrylk {
            volume: volume.to_owned(),
            basename: basename.to_owned(),
            cmd,
            kind,
        };
        self.submit(fd, op).await
    }

    /// Atomically combines extended attributes on the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fxattrop(
        &self,
        fd: &Arc<Fd>,
        op: XattropOp,
        xattrs: Xdata,
    ) -> Result<Xdata, Errno> {
        self.submit(fd, ops::Fxattrop { op, xattrs }).await
    }

    /// Changes attributes of the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fsetattr(&self, fd: &Arc<Fd>, attr: SetAttr) -> Result<FileAttr, Errno> {
        self.submit(fd, ops::Fsetattr { attr }).await
    }

    /// Preallocates space for the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn fallocate(
        &self,
        fd: &Arc<Fd>,
        mode: i32,
        offset: u64,
        len: u64,
    ) -> Result<FileAttr, Errno> {
        self.submit(fd, ops::Fallocate { mode, offset, len }).await
    }

    /// Deallocates a byte range of the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn discard(&self, fd: &Arc<Fd>, offset: u64, len: u64) -> Result<FileAttr, Errno> {
        self.submit(fd, ops::Discard { offset, len }).await
    }

    /// Zero-fills a byte range of the open file.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn zerofill(&self, fd: &Arc<Fd>, offset: u64, len: u64) -> Result<FileAttr, Errno> {
        self.submit(fd, ops::Zerofill { offset, len }).await
    }

    /// POSIX advisory record locking.
    ///
    /// # Errors
    ///
    /// The backend's error, or the poisoned handle's captured open error.
    pub async fn lk(&self, fd: &Arc<Fd>, cmd: LockCmd, lock: FileLock) -> Result<FileLock, Errno> {
        self.submit(fd, ops::Lk { cmd, lock }).await
    }

    /// Removes the entry at `loc` after all deferred opens on its inode have
    /// reached the backend.
    ///
    /// # Errors
    ///
    /// The backend's error, or the drain's aggregate error when a
    /// participating backend open failed.
    pub async fn unlink(&self, loc: Loc, flags: i32) -> Result<(), Errno> {
        let inode = loc.inode.clone();
        self.submit_inode(inode.as_ref(), ops::Unlink { loc, flags })
            .await
    }

    /// Renames `src` to `dst`, draining deferred opens on the target inode.
    ///
    /// # Errors
    ///
    /// The backend's error, or the drain's aggregate error when a
    /// participating backend open failed.
    pub async fn rename(&self, src: Loc, dst: Loc) -> Result<FileAttr, Errno> {
        let target = dst.inode.clone();
        self.submit_inode(target.as_ref(), ops::Rename { src, dst })
            .await
    }

    /// Changes attributes of the file at `loc`, draining deferred opens on
    /// its inode first.
    ///
    /// # Errors
    ///
    /// The backend's error, or the drain's aggregate error when a
    /// participating backend open failed.
    pub async fn setattr(&self, loc: Loc, attr: SetAttr) -> Result<FileAttr, Errno> {
        let inode = loc.inode.clone();
        self.submit_inode(inode.as_ref(), ops::Setattr { loc, attr })
            .await
    }

    /// Sets extended attributes on the file at `loc`.
    ///
    /// Requests carrying ACL or security-label keys drain deferred opens on
    /// the inode first; anything else bypasses the layer entirely.
    ///
    /// # Errors
    ///
    /// The backend's error, or the drain's aggregate error when a
    /// participating backend open failed.
    pub async fn setxattr(
        &self,
        loc: Loc,
        xattrs: Xdata,
        flags: XattrSetFlags,
    ) -> Result<(), Errno> {
        if !touches_access_control(&xattrs) {
            return self.backend().setxattr(&loc, &xattrs, flags).await;
        }
        let inode = loc.inode.clone();
        self.submit_inode(inode.as_ref(), ops::Setxattr { loc, xattrs, flags })
            .await
    }

    /// Releases the layer's record for a closed handle.
    ///
    /// If no backend open was ever launched, the captured open dies here and
    /// the backend never hears about the handle. A backend open still in
    /// flight keeps the record alive until its completion finishes cleanup.
    pub fn release(&self, fd: &Arc<Fd>) {
        if let Some((_, rec)) = self.inner.fds.remove(&fd.id()) {
            rec.inode_rec.remove_deferred(fd.id());
            debug!(fd = %fd.id(), "handle released");
        }
    }

    /// Drops the layer's per-inode record.
    ///
    /// All handles of the inode must have been released first; by then both
    /// queues are empty.
    pub fn forget(&self, inode: &Arc<Inode>) {
        if let Some((_, rec)) = self.inner.inodes.remove(&inode.id()) {
            let state = rec.state.lock();
            debug_assert!(state.queue.is_empty());
            debug_assert_eq!(state.drain_count, 0);
        }
    }
}
