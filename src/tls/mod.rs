//! TLS record adapter.
//!
//! [`TlsEndpoint`] sits between a connection and the raw endpoint, presenting
//! the same fill/flush contract while an [`Engine`] does the cryptography.
//!
//! ```text
//!     codec ── fill/flush ──▶ TlsEndpoint ── fill/flush ──▶ raw endpoint
//!                                  │
//!                             wrap/unwrap
//!                                  ▼
//!                                Engine
//! ```
//!
//! One processing step loops over:
//!
//! 1. fill the inbound buffer from the raw endpoint, flush the outbound one.
//! 2. do what the handshake status asks: wrap or unwrap application data,
//!    wrap or unwrap a handshake record, or run delegated tasks.
//! 3. pass half-closes through: raw end of stream closes the engine inbound,
//!    a finished engine outbound shuts down the raw output.
//!
//! It stops at the first pass that moves nothing, so it never waits for I/O.

mod connection;
mod endpoint;
mod engine;

pub use connection::TlsConnection;
pub use endpoint::{BufferScope, TlsEndpoint};
pub use engine::{DelegatedTask, Engine, EngineResult, EngineStatus, HandshakeStatus};

#[cfg(test)]
pub(crate) mod test;
