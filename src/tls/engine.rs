use std::fmt;

use crate::Error;

/// What the engine needs before application data can flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake in progress.
    NotHandshaking,

    /// Peer data must be unwrapped.
    NeedUnwrap,

    /// Handshake data must be wrapped and sent.
    NeedWrap,

    /// Delegated tasks must run.
    NeedTask,

    /// A handshake just completed. Only seen in [`EngineResult`].
    Finished,
}

/// Outcome of a single wrap or unwrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,

    /// The engine is closed in this direction.
    Closed,

    /// The destination had no room for the record.
    BufferOverflow,

    /// The source did not hold a complete record.
    BufferUnderflow,
}

/// Result of [`Engine::wrap()`] and [`Engine::unwrap()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

impl EngineResult {
    pub fn new(
        status: EngineStatus,
        handshake_status: HandshakeStatus,
        bytes_consumed: usize,
        bytes_produced: usize,
    ) -> Self {
        EngineResult {
            status,
            handshake_status,
            bytes_consumed,
            bytes_produced,
        }
    }

    pub(crate) fn made_progress(&self) -> bool {
        self.bytes_consumed > 0 || self.bytes_produced > 0
    }
}

impl fmt::Display for EngineResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} consumed={} produced={}",
            self.status, self.handshake_status, self.bytes_consumed, self.bytes_produced
        )
    }
}

/// CPU bound work the engine hands out while in [`HandshakeStatus::NeedTask`].
pub type DelegatedTask = Box<dyn FnOnce() + Send>;

/// A TLS session turning application bytes into records and back.
///
/// The engine does no I/O. It reads from and writes to the slices it is
/// given and reports how much of each it used.
pub trait Engine: Send {
    fn handshake_status(&self) -> HandshakeStatus;

    /// Next pending delegated task, if any.
    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Start a new handshake on an established session.
    fn begin_handshake(&mut self) -> Result<(), Error>;

    /// Encrypt application bytes from `src` into records in `dst`.
    fn wrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error>;

    /// Decrypt records from `src` into application bytes in `dst`.
    fn unwrap(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult, Error>;

    /// The transport delivered end of stream.
    fn close_inbound(&mut self) -> Result<(), Error>;

    /// No more application data will be wrapped. The next wrap produces
    /// the close alert.
    fn close_outbound(&mut self);

    fn is_inbound_done(&self) -> bool;

    fn is_outbound_done(&self) -> bool;

    /// Largest record the engine produces or accepts.
    fn packet_buffer_size(&self) -> usize;

    /// Largest amount of application data one record decrypts to.
    fn application_buffer_size(&self) -> usize;
}
