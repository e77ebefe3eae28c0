//! Wire codec: request generation and response parsing.
//!
//! The connection driver only talks to the [`Generator`] and [`Parser`]
//! traits. Both write to and read from whatever [`Endpoint`] they are handed,
//! raw or TLS adapted.

use http::{Method, Request, Response, StatusCode};

use crate::close_reason::CloseReason;
use crate::endpoint::Endpoint;
use crate::Error;

mod chunked;
mod generator;
mod parser;

pub use generator::Http1Generator;
pub use parser::{body_mode, BodyMode, Http1Parser};

/// Produces request bytes.
pub trait Generator: Send {
    /// Whether the request head has been generated.
    fn is_committed(&self) -> bool;

    /// Whether the whole request has been generated and flushed.
    fn is_complete(&self) -> bool;

    /// Whether no request is in progress.
    fn is_idle(&self) -> bool;

    /// Whether no generated bytes are waiting to be flushed.
    fn is_empty(&self) -> bool;

    /// Whether the generator accepts body content.
    fn is_sending_content(&self) -> bool;

    /// Why the connection can't be reused after this request, if so.
    fn close_reason(&self) -> Option<CloseReason>;

    fn is_persistent(&self) -> bool {
        self.close_reason().is_none()
    }

    /// Generate the request head. `has_content` tells whether body content follows.
    fn commit(&mut self, request: &Request<()>, has_content: bool) -> Result<(), Error>;

    /// Add a chunk of body. `last` marks the final one.
    fn add_content(&mut self, chunk: Vec<u8>, last: bool) -> Result<(), Error>;

    /// No more body content.
    fn complete(&mut self) -> Result<(), Error>;

    /// Write pending bytes to `endpoint`. Returns number of bytes written.
    fn flush_buffer(&mut self, endpoint: &dyn Endpoint) -> Result<usize, Error>;

    /// Prepare for the next request.
    fn reset(&mut self);

    /// Hand empty buffers back to their pool.
    fn return_buffers(&mut self);
}

/// Receives events from a [`Parser`].
pub trait ResponseHandler {
    fn on_head(&mut self, response: &Response<()>);

    fn on_content(&mut self, content: &[u8]);

    fn on_complete(&mut self);
}

/// Consumes response bytes.
pub trait Parser: Send {
    /// A request was sent and its response is to be parsed next.
    fn expect_response(&mut self, method: &Method);

    /// Fill from `endpoint` and parse what is available, reporting to
    /// `handler`. Returns whether any input was consumed or events fired.
    fn parse_available(
        &mut self,
        endpoint: &dyn Endpoint,
        handler: &mut dyn ResponseHandler,
    ) -> Result<bool, Error>;

    /// Whether the whole response has been parsed.
    fn is_complete(&self) -> bool;

    /// Whether buffered input can be parsed without reading more.
    fn is_more_in_buffer(&self) -> bool;

    /// Why the connection can't be reused after this response, if so.
    fn close_reason(&self) -> Option<CloseReason>;

    fn is_persistent(&self) -> bool {
        self.close_reason().is_none()
    }

    /// Status of the parsed response head.
    fn status(&self) -> Option<StatusCode>;

    /// Remove and return buffered input that was not parsed.
    fn take_buffered(&mut self) -> Vec<u8>;

    /// Prepare for the next response. Unparsed input is kept.
    fn reset(&mut self);

    /// Hand empty buffers back to their pool.
    fn return_buffers(&mut self);
}
