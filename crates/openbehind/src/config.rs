// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runtime-reconfigurable layer options.

/// Options controlling when the layer defers, wakes, and substitutes handles.
///
/// The layer holds an immutable snapshot of this struct behind an atomic
/// swap; every operation reads one consistent snapshot for its whole
/// lifetime, so a concurrent [`reconfigure`](crate::OpenBehind::reconfigure)
/// never mixes old and new settings within a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenBehindConfig {
    /// Master switch; when disabled every open is forwarded synchronously.
    pub enabled: bool,
    /// Serve reads and fstat on anonymous handles while the backend open is
    /// still pending, instead of forcing the open.
    pub use_anonymous_fd: bool,
    /// Defer the backend open until an operation actually needs it. When
    /// disabled, the backend open is launched right after the deferred open
    /// is acknowledged upstream.
    pub lazy_open: bool,
    /// Force reads to wait for the real backend open rather than going to an
    /// anonymous handle. Takes precedence over `use_anonymous_fd` for reads.
    pub read_after_open: bool,
    /// Framework-level bypass; behaves like the master switch being off.
    pub pass_through: bool,
}

impl Default for OpenBehindConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_anonymous_fd: false,
            lazy_open: true,
            read_after_open: true,
            pass_through: false,
        }
    }
}

impl OpenBehindConfig {
    /// A snapshot with the master switch turned on and all other options at
    /// their defaults.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Whether the layer should defer opens at all under this snapshot.
    #[must_use]
    pub(crate) fn active(&self) -> bool {
        self.enabled && !self.pass_through
    }
}
