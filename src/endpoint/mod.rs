//! Non-blocking transport abstraction.
//!
//! An [`Endpoint`] is a duplex byte channel that never blocks. `fill()` and
//! `flush()` move whatever is possible right now and report how much that was.
//! Both the raw socket and the [TLS adapter][crate::tls::TlsEndpoint] implement
//! it, which is what lets the codec run unaware of TLS.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::Error;

mod memory;
pub use memory::MemoryEndpoint;

/// Outcome of [`Endpoint::fill()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filled {
    /// This many bytes were added to the buffer. Can be 0.
    Bytes(usize),

    /// Nothing was added and the input side is shut down.
    Eof,
}

impl Filled {
    /// Number of bytes added, where end of stream counts as 0.
    pub fn bytes(&self) -> usize {
        match self {
            Filled::Bytes(n) => *n,
            Filled::Eof => 0,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Filled::Eof)
    }
}

/// A non-blocking duplex byte channel.
///
/// Methods take `&self` since an endpoint is shared between the connection
/// driving it and whoever cancels or times out exchanges on it.
pub trait Endpoint: Send + Sync {
    fn is_open(&self) -> bool;

    /// Close both directions. Further fill/flush fail.
    fn close(&self);

    /// Read what is available into the free space of `buf`.
    fn fill(&self, buf: &mut Buffer) -> Result<Filled, Error>;

    /// Write from the content of `buf`, consuming what was written.
    fn flush(&self, buf: &mut Buffer) -> Result<usize, Error>;

    /// Write any output the endpoint itself is holding on to.
    fn flush_buffered(&self) -> Result<(), Error>;

    /// Whether the endpoint holds input that a `fill()` would hand out
    /// without new bytes from the transport.
    fn is_buffering_input(&self) -> bool;

    /// Whether the endpoint holds output not yet written to the transport.
    fn is_buffering_output(&self) -> bool;

    fn shutdown_input(&self) -> Result<(), Error>;

    fn shutdown_output(&self) -> Result<(), Error>;

    fn is_input_shutdown(&self) -> bool;

    fn is_output_shutdown(&self) -> bool;

    /// Ask the readiness notifier for a drive cycle once writable.
    fn schedule_write(&self);

    fn schedule_idle(&self);

    fn cancel_idle(&self);

    fn schedule_timeout(&self, task: TimeoutTask, timeout_ms: u64);

    fn cancel_timeout(&self, task: &TimeoutTask);

    fn max_idle_time(&self) -> u64;

    fn set_max_idle_time(&self, ms: u64);

    /// Whether the endpoint made progress the caller can't see in the
    /// bytes filled or flushed. Reading the flag resets it.
    fn has_progressed(&self) -> bool;
}

static TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Action to run when a scheduled timeout expires.
#[derive(Clone)]
pub struct TimeoutTask {
    id: u64,
    action: Arc<dyn Fn() + Send + Sync>,
}

impl TimeoutTask {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        TimeoutTask {
            id: TASK_ID.fetch_add(1, Ordering::Relaxed),
            action: Arc::new(action),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run the action.
    pub fn expire(&self) {
        (self.action)()
    }
}

impl PartialEq for TimeoutTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TimeoutTask {}

impl fmt::Debug for TimeoutTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeoutTask({})", self.id)
    }
}
