// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared mock backend recording every forwarded operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use openbehind::{
    Backend, EntrylkCmd, EntrylkType, Errno, Fd, FdId, FileAttr, FileLock, LockCmd, Loc,
    OpenFlags, SetAttr, Xdata, XattrSetFlags, XattropOp,
};

/// One operation observed by the backend, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open {
        path: String,
        fd: FdId,
        direct: bool,
    },
    Read {
        fd: FdId,
        anonymous: bool,
        direct: bool,
    },
    Write {
        fd: FdId,
        offset: u64,
    },
    Fstat {
        fd: FdId,
        anonymous: bool,
    },
    Flush {
        fd: FdId,
    },
    /// Any other handle-scope operation.
    Fop {
        name: &'static str,
        fd: FdId,
    },
    /// Any inode-scope operation, with the number of backend opens that had
    /// fully completed when it arrived.
    InodeFop {
        name: &'static str,
        path: String,
        opens_done: usize,
    },
}

struct Inner {
    calls: Mutex<Vec<Call>>,
    open_errors: Mutex<HashMap<String, Errno>>,
    gated: AtomicBool,
    open_gate: tokio::sync::Semaphore,
    opens_completed: AtomicUsize,
}

/// Mock backend; clones share state.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(Vec::new()),
                open_errors: Mutex::new(HashMap::new()),
                gated: AtomicBool::new(false),
                open_gate: tokio::sync::Semaphore::new(0),
                opens_completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes opens of `path` fail with `err`.
    pub fn fail_open(&self, path: &str, err: Errno) {
        self.inner
            .open_errors
            .lock()
            .expect("lock poisoned")
            .insert(path.to_owned(), err);
    }

    /// Blocks every subsequent open until [`release_opens`](Self::release_opens).
    pub fn gate_opens(&self) {
        self.inner.gated.store(true, Ordering::Release);
    }

    /// Lets `n` gated opens proceed.
    pub fn release_opens(&self, n: usize) {
        self.inner.open_gate.add_permits(n);
    }

    /// Every observed call, in arrival order.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().expect("lock poisoned").clone()
    }

    /// Number of open attempts observed so far.
    pub fn open_attempts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Open { .. }))
            .count()
    }

    /// Number of open attempts for one specific handle.
    pub fn open_attempts_for(&self, id: FdId) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Open { fd, .. } if *fd == id))
            .count()
    }

    fn push(&self, call: Call) {
        self.inner.calls.lock().expect("lock poisoned").push(call);
    }

    fn push_inode_fop(&self, name: &'static str, path: &str) {
        let opens_done = self.inner.opens_completed.load(Ordering::Acquire);
        self.push(Call::InodeFop {
            name,
            path: path.to_owned(),
            opens_done,
        });
    }

    async fn wait_gate(&self) {
        if self.inner.gated.load(Ordering::Acquire) {
            let permit = self
                .inner
                .open_gate
                .acquire()
                .await
                .expect("gate semaphore closed");
            permit.forget();
        }
    }
}

impl Backend for MockBackend {
    async fn open(
        &self,
        loc: &Loc,
        flags: OpenFlags,
        fd: &Arc<Fd>,
        _xdata: Option<&Xdata>,
    ) -> Result<(), Errno> {
        self.push(Call::Open {
            path: loc.path.clone(),
            fd: fd.id(),
            direct: flags.contains(OpenFlags::DIRECT),
        });
        self.wait_gate().await;
        let failure = self
            .inner
            .open_errors
            .lock()
            .expect("lock poisoned")
            .get(&loc.path)
            .copied();
        if let Some(err) = failure {
            return Err(err);
        }
        self.inner.opens_completed.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn read(
        &self,
        fd: &Arc<Fd>,
        _size: usize,
        _offset: u64,
        flags: OpenFlags,
    ) -> Result<Bytes, Errno> {
        self.push(Call::Read {
            fd: fd.id(),
            anonymous: fd.is_anonymous(),
            direct: flags.contains(OpenFlags::DIRECT),
        });
        Ok(Bytes::from_static(b"data"))
    }

    async fn write(
        &self,
        fd: &Arc<Fd>,
        data: Bytes,
        offset: u64,
        _flags: OpenFlags,
    ) -> Result<usize, Errno> {
        self.push(Call::Write {
            fd: fd.id(),
            offset,
        });
        Ok(data.len())
    }

    async fn fstat(&self, fd: &Arc<Fd>) -> Result<FileAttr, Errno> {
        self.push(Call::Fstat {
            fd: fd.id(),
            anonymous: fd.is_anonymous(),
        });
        Ok(FileAttr::default())
    }

    async fn flush(&self, fd: &Arc<Fd>) -> Result<(), Errno> {
        self.push(Call::Flush { fd: fd.id() });
        Ok(())
    }

    async fn fsync(&self, fd: &Arc<Fd>, _datasync: bool) -> Result<FileAttr, Errno> {
        self.push(Call::Fop {
            name: "fsync",
            fd: fd.id(),
        });
        Ok(FileAttr::default())
    }

    async fn ftruncate(&self, fd: &Arc<Fd>, _offset: u64) -> Result<FileAttr, Errno> {
        self.push(Call::Fop {
            name: "ftruncate",
            fd: fd.id(),
        });
        Ok(FileAttr::default())
    }

    async fn fsetxattr(
        &self,
        fd: &Arc<Fd>,
        _xattrs: &Xdata,
        _flags: XattrSetFlags,
    ) -> Result<(), Errno> {
        self.push(Call::Fop {
            name: "fsetxattr",
            fd: fd.id(),
        });
        Ok(())
    }

    async fn fgetxattr(&self, fd: &Arc<Fd>, _name: Option<&str>) -> Result<Xdata, Errno> {
        self.push(Call::Fop {
            name: "fgetxattr",
            fd: fd.id(),
        });
        Ok(Xdata::new())
    }

    async fn fremovexattr(&self, fd: &Arc<Fd>, _name: &str) -> Result<(), Errno> {
        self.push(Call::Fop {
            name: "fremovexattr",
            fd: fd.id(),
        });
        Ok(())
    }

    async fn finodelk(
        &self,
        _volume: &str,
        fd: &Arc<Fd>,
        _cmd: LockCmd,
        _lock: &FileLock,
    ) -> Result<(), Errno> {
        self.push(Call::Fop {
            name: "finodelk",
            fd: fd.id(),
        });
        Ok(())
    }

    async fn fentrylk(
        &self,
        _volume: &str,
        fd: &Arc<Fd>,
        _basename: &str,
        _cmd: EntrylkCmd,
        _kind: EntrylkType,
    ) -> Result<(), Errno> {
        self.push(Call::Fop {
            name: "fentrylk",
            fd: fd.id(),
        });
        Ok(())
    }

    async fn fxattrop(
        &self,
        fd: &Arc<Fd>,
        _op: XattropOp,
        _xattrs: &Xdata,
    ) -> Result<Xdata, Errno> {
        self.push(Call::Fop {
            name: "fxattrop",
            fd: fd.id(),
        });
        Ok(Xdata::new())
    }

    async fn fsetattr(&self, fd: &Arc<Fd>, _attr: &SetAttr) -> Result<FileAttr, Errno> {
        self.push(Call::Fop {
            name: "fsetattr",
            fd: fd.id(),
        });
        Ok(FileAttr::default())
    }

    async fn fallocate(
        &self,
        fd: &Arc<Fd>,
        _mode: i32,
        _offset: u64,
        _len: u64,
    ) -> Result<FileAttr, Errno> {
        self.push(Call::Fop {
            name: "fallocate",
            fd: fd.id(),
        });
        Ok(FileAttr::default())
    }

    async fn discard(&self, fd: &Arc<Fd>, _offset: u64, _len: u64) -> Result<FileAttr, Errno> {
        self.push(Call::Fop {
            name: "discard",
            fd: fd.id(),
        });
        Ok(FileAttr::default())
    }

    async fn zerofill(&self, fd: &Arc<Fd>, _offset: u64, _len: u64) -> Result<FileAttr, Errno> {
        self.push(Call::Fop {
            name: "zerofill",
            fd: fd.id(),
        });
        Ok(FileAttr::default())
    }

    async fn lk(&self, fd: &Arc<Fd>, _cmd: LockCmd, lock: &FileLock) -> Result<FileLock, Errno> {
        self.push(Call::Fop {
            name: "lk",
            fd: fd.id(),
        });
        Ok(*lock)
    }

    async fn unlink(&self, loc: &Loc, _flags: i32) -> Result<(), Errno> {
        self.push_inode_fop("unlink", &loc.path);
        Ok(())
    }

    async fn rename(&self, src: &Loc, _dst: &Loc) -> Result<FileAttr, Errno> {
        self.push_inode_fop("rename", &src.path);
        Ok(FileAttr::default())
    }

    async fn setattr(&self, loc: &Loc, _attr: &SetAttr) -> Result<FileAttr, Errno> {
        self.push_inode_fop("setattr", &loc.path);
        Ok(FileAttr::default())
    }

    async fn setxattr(
        &self,
        loc: &Loc,
        _xattrs: &Xdata,
        _flags: XattrSetFlags,
    ) -> Result<(), Errno> {
        self.push_inode_fop("setxattr", &loc.path);
        Ok(())
    }
}
