//! Process-unique connection identifiers.
//!
//! A [`DeviceKey`](crate::DeviceKey) names a *session*, but the registry also
//! needs to tell apart two connections that used the same key at different
//! times (a device disconnects, a new one happens to draw the same key) and
//! the individual clients bound to one device.  Each accepted connection is
//! therefore stamped with a [`ConnectionId`] drawn from a shared
//! [`ConnectionIdAllocator`].
//!
//! # Thread safety
//!
//! The allocator uses `AtomicU64` internally, so many accept tasks can draw
//! ids at the same time without a lock and without ever receiving the same
//! value twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one accepted connection (device or client).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw value.  Mostly useful in tests.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A thread-safe, monotonically increasing source of [`ConnectionId`]s.
///
/// Ids start at 1 so that 0 never appears in logs as a "real" connection.
///
/// # Examples
///
/// ```rust
/// use devrelay_core::ConnectionIdAllocator;
///
/// let ids = ConnectionIdAllocator::new();
/// assert_eq!(ids.next().as_u64(), 1);
/// assert_eq!(ids.next().as_u64(), 2);
/// ```
#[derive(Debug)]
pub struct ConnectionIdAllocator {
    inner: AtomicU64,
}

impl ConnectionIdAllocator {
    /// Creates an allocator whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next id.
    ///
    /// `Ordering::Relaxed` is enough: ids only need to be unique, they do not
    /// order any other memory accesses.
    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.inner.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
