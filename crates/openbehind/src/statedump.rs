// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Debug state dump of the layer's records.
//!
//! Locks are only tried, never waited on, so a dump taken from a signal
//! handler or debug endpoint cannot deadlock against in-flight operations;
//! contended records are skipped.

use std::fmt::{self, Write};

use crate::backend::Backend;
use crate::layer::OpenBehind;

impl<B: Backend> OpenBehind<B> {
    /// Writes a human-readable dump of the configuration and every live
    /// deferred-open record to `out`.
    ///
    /// # Errors
    ///
    /// Propagates formatting errors from `out`.
    pub fn dump(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(out, "[performance/open-behind]")?;
        if let Some(conf) = self.inner.conf.try_read() {
            writeln!(out, "use_anonymous_fd={}", conf.use_anonymous_fd)?;
            writeln!(out, "lazy_open={}", conf.lazy_open)?;
            writeln!(out, "read_after_open={}", conf.read_after_open)?;
        } else {
            writeln!(out, "config=<busy>")?;
        }

        for entry in self.inner.fds.iter() {
            let rec = entry.value();
            let Some(state) = rec.state.try_lock() else {
                continue;
            };
            writeln!(out, "[performance/open-behind.fd]")?;
            writeln!(out, "fd={}", rec.fd.id())?;
            match &state.open_request {
                Some(request) => {
                    writeln!(out, "open_pending=yes")?;
                    writeln!(out, "open_pending.unique={}", request.unique)?;
                    writeln!(out, "loc.path={}", request.loc.path)?;
                    writeln!(out, "loc.gfid={}", rec.fd.inode().gfid())?;
                    writeln!(out, "flags={:#o}", request.flags.bits())?;
                }
                None => writeln!(out, "open_pending=no")?,
            }
        }
        Ok(())
    }
}
