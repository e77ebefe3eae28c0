use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Error;

/// A protocol handler bound to an endpoint.
///
/// The readiness notifier calls [`handle()`](Connection::handle) whenever the
/// endpoint may have work. No two calls run concurrently for one connection.
pub trait Connection: Send {
    /// Run one drive cycle. Never blocks.
    fn handle(&mut self) -> Result<Handled, Error>;

    /// Whether there is no exchange in flight.
    fn is_idle(&self) -> bool;

    /// The peer shut down its output.
    fn on_input_shutdown(&mut self) -> Result<(), Error>;

    /// The endpoint was closed.
    fn on_close(&mut self) {}
}

/// Outcome of [`Connection::handle()`].
pub enum Handled {
    /// Keep calling the same connection.
    Continue,

    /// The endpoint now belongs to another connection, typically after a
    /// protocol switch. The old connection must not be driven again.
    Switched(Box<dyn Connection>),
}

impl Handled {
    pub fn is_switched(&self) -> bool {
        matches!(self, Handled::Switched(_))
    }
}

impl fmt::Debug for Handled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handled::Continue => write!(f, "Continue"),
            Handled::Switched(_) => write!(f, "Switched"),
        }
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a connection towards its [`Destination`][crate::Destination].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
