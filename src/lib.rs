//! Non-blocking HTTP/1.1 client connections with an optional TLS record layer.
//!
//! hconn holds no sockets and spawns no threads. Everything runs on an
//! [`Endpoint`], a non-blocking transport that some readiness notifier owns,
//! and each call into a [`Connection`] either makes progress or returns.
//!
//! ```text
//!   Exchange ──▶ HttpConnection ── Generator/Parser ──▶ Endpoint
//!                                                      (raw, or
//!                                                   TlsEndpoint ──▶ raw)
//! ```
//!
//! * [`HttpConnection`] is the drive cycle: commit, send body, parse the
//!   response, pipelining and protocol switches.
//! * [`tls::TlsEndpoint`] turns plaintext fill/flush into TLS records by way of
//!   a pluggable [`tls::Engine`], and [`tls::TlsConnection`] drives its
//!   handshakes.
//! * [`codec`] has the HTTP/1.1 request generator and response parser.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hconn::*;
//! use hconn::http::Request;
//!
//! struct Pool;
//!
//! impl Destination for Pool {
//!     fn send(&self, _exchange: Arc<dyn Exchange>) {}
//!     fn return_connection(&self, _connection: ConnectionId, _close: bool) {}
//! }
//!
//! struct Print;
//!
//! impl ExchangeListener for Print {
//!     fn on_response_content(&self, content: &[u8]) {
//!         println!("{}", String::from_utf8_lossy(content));
//!     }
//! }
//!
//! let config = Config::default();
//! let arena = Arc::new(BufferArena::new(config.max_pooled_buffers));
//!
//! // The "server" end of an in-memory transport.
//! let peer = MemoryEndpoint::new();
//! let endpoint: Arc<dyn Endpoint> = Arc::new(peer.clone());
//!
//! let mut conn = HttpConnection::http1(endpoint, Arc::new(Pool), arena, &config);
//!
//! let request = Request::get("http://example.test/hello").body(()).unwrap();
//! conn.slot().send(Arc::new(HttpExchange::new(request, Print))).unwrap();
//! conn.handle().unwrap();
//!
//! assert_eq!(
//!     peer.take_output(),
//!     b"GET /hello HTTP/1.1\r\nhost: example.test\r\n\r\n"
//! );
//!
//! peer.deliver(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
//! conn.handle().unwrap();
//! assert!(conn.is_idle());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
mod client;
mod close_reason;
pub mod codec;
mod config;
mod connection;
mod destination;
mod endpoint;
mod error;
mod exchange;
pub mod tls;
mod util;

pub use buffer::{Buffer, BufferArena};
pub use client::{ExchangeSlot, HttpConnection};
pub use close_reason::CloseReason;
pub use config::Config;
pub use connection::{Connection, ConnectionId, Handled};
pub use destination::Destination;
pub use endpoint::{Endpoint, Filled, MemoryEndpoint, TimeoutTask};
pub use error::Error;
pub use exchange::{Exchange, ExchangeListener, ExchangeStatus, HttpExchange};

pub use http;
