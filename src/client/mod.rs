//! HTTP/1.1 client connection driver.
//!
//! An [`HttpConnection`] runs exchanges over one [`Endpoint`]. The readiness
//! notifier calls [`Connection::handle()`] whenever the endpoint may have work,
//! and each call runs one drive cycle: it loops while something moves,
//! interleaving request generation and response parsing, and returns as soon
//! as nothing does. It never waits for I/O.
//!
//! ```text
//!                 ┌───────────────────┐
//!       send ────▶│   ExchangeSlot    │◀──── cancel
//!                 │ active, pipelined │
//!                 └───────────────────┘
//!                           │
//!                           ▼
//!                 ┌───────────────────┐   flush   ┌──────────┐
//!                 │  HttpConnection   │──────────▶│          │
//!                 │ Generator, Parser │◀──────────│ Endpoint │
//!                 └───────────────────┘   fill    └──────────┘
//!                           │
//!                           ▼
//!                 ┌───────────────────┐
//!                 │    Destination    │  pool / re-dispatch
//!                 └───────────────────┘
//! ```
//!
//! One pass of the cycle:
//!
//! 1. commit the active exchange when it is waiting for commit.
//! 2. flush generated bytes and feed request content, one chunk ahead so the
//!    last chunk can be flagged as such.
//! 3. signal request completion once.
//! 4. flush output the endpoint buffers itself.
//! 5. parse whatever response input is available.
//! 6. count transport progress the codec can't see, like TLS handshake records.
//!
//! A fault is routed to the active exchange, or returned when there is none.
//! When both codecs are complete, or after a fault, the cycle finishes: the
//! exchange is detached, a protocol switch hands the endpoint over, a
//! pipelined exchange is promoted or forwarded and the connection goes back
//! to the [`Destination`].

use std::fmt;
use std::sync::{Arc, Mutex};

use http::{Response, StatusCode};

use crate::buffer::BufferArena;
use crate::codec::{Generator, Http1Generator, Http1Parser, Parser, ResponseHandler};
use crate::config::Config;
use crate::connection::{Connection, ConnectionId, Handled};
use crate::destination::Destination;
use crate::endpoint::Endpoint;
use crate::exchange::{Exchange, ExchangeStatus};
use crate::util::lock;
use crate::Error;


/// The exchanges attached to a connection.
///
/// Cloned handles share the same state, which is how a canceller on another
/// thread reaches a running connection.
#[derive(Clone)]
pub struct ExchangeSlot {
    inner: Arc<Mutex<Slot>>,
    endpoint: Arc<dyn Endpoint>,
}

#[derive(Default)]
struct Slot {
    active: Option<Arc<dyn Exchange>>,
    pipelined: Option<Arc<dyn Exchange>>,
    reserved: bool,
}

impl ExchangeSlot {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        ExchangeSlot {
            inner: Arc::new(Mutex::new(Slot::default())),
            endpoint,
        }
    }

    /// Attach `exchange`, as the active one when free, otherwise pipelined.
    ///
    /// Errors with [`Error::PipelineOccupied`] when both are taken.
    pub fn send(&self, exchange: Arc<dyn Exchange>) -> Result<(), Error> {
        {
            let mut slot = lock(&self.inner);
            let place = if slot.active.is_none() {
                &mut slot.active
            } else if slot.pipelined.is_none() {
                &mut slot.pipelined
            } else {
                return Err(Error::PipelineOccupied);
            };
            exchange.set_status(ExchangeStatus::WaitingForCommit);
            *place = Some(exchange);
        }
        self.endpoint.schedule_write();
        Ok(())
    }

    /// Cancel `exchange`. Returns `false` when it was already done.
    ///
    /// An active exchange takes the endpoint down with it. The running
    /// cycle then sees a fault it does not report. A cancel is not an
    /// exception: the exchange hears about it once, through
    /// [`on_cancel`][Exchange::on_cancel].
    pub fn cancel(&self, exchange: &Arc<dyn Exchange>) -> bool {
        if !exchange.set_status(ExchangeStatus::Cancelling) {
            return false;
        }

        let was_active = {
            let mut slot = lock(&self.inner);
            if slot.pipelined.as_ref().is_some_and(|p| same(p, exchange)) {
                slot.pipelined = None;
                false
            } else if slot.active.as_ref().is_some_and(|a| same(a, exchange)) {
                slot.active = None;
                true
            } else {
                false
            }
        };

        if was_active {
            self.endpoint.close();
        }

        exchange.cancel_timeout();
        exchange.set_status(ExchangeStatus::Cancelled);
        debug!("Exchange cancelled (active: {})", was_active);
        exchange.on_cancel();

        true
    }

    /// A reserved connection is not returned to the destination when it
    /// runs out of exchanges.
    pub fn set_reserved(&self, reserved: bool) {
        lock(&self.inner).reserved = reserved;
    }

    pub fn is_reserved(&self) -> bool {
        lock(&self.inner).reserved
    }

    pub fn active(&self) -> Option<Arc<dyn Exchange>> {
        lock(&self.inner).active.clone()
    }

    pub fn has_pipelined(&self) -> bool {
        lock(&self.inner).pipelined.is_some()
    }
}

impl fmt::Debug for ExchangeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = lock(&self.inner);
        f.debug_struct("ExchangeSlot")
            .field("active", &slot.active.as_ref().map(|e| e.status()))
            .field("pipelined", &slot.pipelined.as_ref().map(|e| e.status()))
            .field("reserved", &slot.reserved)
            .finish()
    }
}

fn same(a: &Arc<dyn Exchange>, b: &Arc<dyn Exchange>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

/// Drives HTTP exchanges over an endpoint.
pub struct HttpConnection<G, P> {
    id: ConnectionId,
    endpoint: Arc<dyn Endpoint>,
    destination: Arc<dyn Destination>,
    slot: ExchangeSlot,
    config: Config,
    generator: G,
    parser: P,
    next_chunk: Option<Vec<u8>>,
    request_complete: bool,
}

impl HttpConnection<Http1Generator, Http1Parser> {
    /// Connection with the HTTP/1.1 codec, buffers from `arena`.
    pub fn http1(
        endpoint: Arc<dyn Endpoint>,
        destination: Arc<dyn Destination>,
        arena: Arc<BufferArena>,
        config: &Config,
    ) -> Self {
        let generator = Http1Generator::new(arena.clone(), config);
        let parser = Http1Parser::new(arena, config);
        Self::new(endpoint, destination, generator, parser, config)
    }
}

impl<G: Generator, P: Parser> HttpConnection<G, P> {
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        destination: Arc<dyn Destination>,
        generator: G,
        parser: P,
        config: &Config,
    ) -> Self {
        endpoint.set_max_idle_time(config.idle_timeout_ms());
        HttpConnection {
            id: ConnectionId::next(),
            slot: ExchangeSlot::new(endpoint.clone()),
            endpoint,
            destination,
            config: config.clone(),
            generator,
            parser,
            next_chunk: None,
            request_complete: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handle for attaching and cancelling exchanges.
    pub fn slot(&self) -> ExchangeSlot {
        self.slot.clone()
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    fn drive(&mut self) -> Result<Handled, Error> {
        let mut progress = true;
        let mut iterations = 0;

        while self.endpoint.is_open()
            && (progress
                || self.parser.is_more_in_buffer()
                || (!self.parser.is_complete() && self.endpoint.is_buffering_input()))
        {
            iterations += 1;
            if iterations > self.config.max_loop_iterations {
                error!(
                    "{} drive cycle still busy after {} iterations: {:?}",
                    self.id, self.config.max_loop_iterations, self.slot
                );
                debug_assert!(false, "drive cycle did not settle");
                break;
            }

            let exchange = self.slot.active();

            let failed = match self.step(exchange.as_ref()) {
                Ok(p) => {
                    progress = p;
                    false
                }
                Err(e) => {
                    let Some(exchange) = &exchange else {
                        warn!("{} fault without exchange: {}", self.id, e);
                        self.endpoint.close();
                        return Err(e);
                    };
                    self.fail_exchange(exchange, e);
                    progress = false;
                    true
                }
            };

            if failed || (self.generator.is_complete() && self.parser.is_complete()) {
                let (promoted, replacement) = self.finish_cycle(failed);
                if let Some(next) = replacement {
                    return Ok(Handled::Switched(next));
                }
                if promoted {
                    progress = true;
                }
            }
        }

        Ok(Handled::Continue)
    }

    fn step(&mut self, exchange: Option<&Arc<dyn Exchange>>) -> Result<bool, Error> {
        let mut progress = false;

        if let Some(exchange) = exchange {
            if !self.generator.is_committed()
                && exchange.status() == ExchangeStatus::WaitingForCommit
            {
                self.commit(exchange)?;
                progress = true;
            }
        }

        if self.generator.is_committed() && !self.generator.is_complete() {
            if self.generator.flush_buffer(&*self.endpoint)? > 0 {
                progress = true;
            }

            if self.generator.is_sending_content() {
                if let Some(exchange) = exchange {
                    if self.next_chunk.is_none() {
                        self.next_chunk = exchange.request_content_chunk();
                    }

                    match self.next_chunk.take() {
                        None => {
                            self.generator.complete()?;
                            progress = true;
                        }
                        Some(chunk) if self.generator.is_empty() => {
                            self.next_chunk = exchange.request_content_chunk();
                            let last = self.next_chunk.is_none();
                            self.generator.add_content(chunk, last)?;
                            progress = true;
                        }
                        Some(chunk) => self.next_chunk = Some(chunk),
                    }
                }
            }
        }

        if self.generator.is_complete() && !self.request_complete {
            self.request_complete = true;
            progress = true;
            if let Some(exchange) = exchange {
                exchange.on_request_complete();
            }
        }

        if self.endpoint.is_buffering_output() {
            self.endpoint.flush_buffered()?;
        }

        if !self.parser.is_complete() {
            let mut events = Events { exchange };
            if self.parser.parse_available(&*self.endpoint, &mut events)? {
                progress = true;
            }
        }

        if self.endpoint.has_progressed() {
            progress = true;
        }

        Ok(progress)
    }

    fn commit(&mut self, exchange: &Arc<dyn Exchange>) -> Result<(), Error> {
        let request = exchange.request();
        debug!("{} commit {} {}", self.id, request.method(), request.uri());

        self.generator
            .commit(request, exchange.has_request_content())?;
        self.parser.expect_response(request.method());
        self.next_chunk = None;
        self.request_complete = false;

        exchange.set_status(ExchangeStatus::SendingRequest);

        if let Some(timeout) = self.config.exchange_timeout {
            exchange.schedule_timeout(&self.endpoint, timeout);
        }

        Ok(())
    }

    fn fail_exchange(&self, exchange: &Arc<dyn Exchange>, error: Error) {
        let notify = {
            let _slot = lock(&self.slot.inner);
            exchange.set_status(ExchangeStatus::Excepted)
        };

        if notify {
            warn!("{} exchange failed: {}", self.id, error);
            exchange.on_exception(error);
        } else {
            // Expected when the exchange was cancelled or expired.
            debug!(
                "{} not reporting {} for {:?} exchange",
                self.id,
                error,
                exchange.status()
            );
        }
    }

    /// Returns whether a pipelined exchange was promoted, and the connection
    /// taking over after a protocol switch.
    fn finish_cycle(&mut self, failed: bool) -> (bool, Option<Box<dyn Connection>>) {
        let persistent = !failed && self.parser.is_persistent() && self.generator.is_persistent();
        let switching = !failed && self.parser.status() == Some(StatusCode::SWITCHING_PROTOCOLS);

        if !persistent {
            let reason = self
                .parser
                .close_reason()
                .or_else(|| self.generator.close_reason());
            match reason {
                Some(r) => debug!("{} not persistent: {}", self.id, r.explain()),
                None => debug!("{} not persistent: cycle failed", self.id),
            }
        }

        let buffered = if switching {
            self.parser.take_buffered()
        } else {
            Vec::new()
        };

        self.generator.reset();
        self.parser.reset();
        self.next_chunk = None;
        self.request_complete = false;

        if persistent {
            self.endpoint.set_max_idle_time(self.config.idle_timeout_ms());
        }

        let (detached, forward, promoted, keep) = {
            let mut slot = lock(&self.slot.inner);
            let detached = slot.active.take();
            let mut forward = None;
            let mut promoted = false;
            if let Some(next) = slot.pipelined.take() {
                if persistent {
                    slot.active = Some(next);
                    promoted = true;
                } else {
                    forward = Some(next);
                }
            }
            let keep = slot.active.is_some() || slot.reserved;
            (detached, forward, promoted, keep)
        };

        let mut replacement = None;

        if let Some(exchange) = detached {
            exchange.cancel_timeout();
            if switching {
                debug!("{} switching protocols", self.id);
                replacement = exchange.on_switch_protocol(self.endpoint.clone(), buffered);
            }
        }

        if let Some(next) = forward {
            debug!("{} forward pipelined exchange", self.id);
            self.destination.send(next);
        } else if promoted {
            debug!("{} promote pipelined exchange", self.id);
        }

        if failed {
            self.endpoint.close();
        }

        if !keep && replacement.is_none() {
            self.destination.return_connection(self.id, !persistent);
        }

        (promoted, replacement)
    }
}

impl<G: Generator, P: Parser> Connection for HttpConnection<G, P> {
    fn handle(&mut self) -> Result<Handled, Error> {
        let result = self.drive();
        self.parser.return_buffers();
        self.generator.return_buffers();
        result
    }

    fn is_idle(&self) -> bool {
        self.generator.is_idle() && self.slot.active().is_none()
    }

    fn on_input_shutdown(&mut self) -> Result<(), Error> {
        if self.generator.is_idle() {
            debug!("{} input shut down, shut down output", self.id);
            self.endpoint.shutdown_output()?;
        }
        Ok(())
    }

    fn on_close(&mut self) {
        let (failed, pipelined) = {
            let mut slot = lock(&self.slot.inner);
            let failed = slot
                .active
                .take()
                .filter(|e| e.set_status(ExchangeStatus::Excepted));
            (failed, slot.pipelined.take())
        };

        if let Some(exchange) = failed {
            debug!("{} closed under exchange", self.id);
            exchange.cancel_timeout();
            exchange.on_exception(Error::EndpointClosed);
        }

        if let Some(next) = pipelined {
            self.destination.send(next);
        }
    }
}

impl<G, P> fmt::Debug for HttpConnection<G, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("request_complete", &self.request_complete)
            .finish()
    }
}

/// Routes parser events to the exchange, if any.
struct Events<'a> {
    exchange: Option<&'a Arc<dyn Exchange>>,
}

impl ResponseHandler for Events<'_> {
    fn on_head(&mut self, response: &Response<()>) {
        let Some(exchange) = self.exchange else {
            return;
        };
        if exchange.set_status(ExchangeStatus::ParsingHeaders) {
            exchange.on_response_head(response);
            exchange.set_status(ExchangeStatus::ParsingContent);
        }
    }

    fn on_content(&mut self, content: &[u8]) {
        let Some(exchange) = self.exchange else {
            return;
        };
        if exchange.status() == ExchangeStatus::ParsingContent {
            exchange.on_response_content(content);
        }
    }

    fn on_complete(&mut self) {
        let Some(exchange) = self.exchange else {
            return;
        };
        if exchange.set_status(ExchangeStatus::Completed) {
            exchange.on_response_complete();
        }
    }
}
