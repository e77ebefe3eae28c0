//! One request/response transaction and its callbacks.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use http::{Request, Response};

use crate::connection::Connection;
use crate::endpoint::{Endpoint, TimeoutTask};
use crate::util::lock;
use crate::Error;

/// Lifecycle of an [`Exchange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    Start,
    WaitingForConnection,
    WaitingForCommit,
    SendingRequest,
    WaitingForResponse,
    ParsingHeaders,
    ParsingContent,
    Completed,
    Expired,
    Excepted,
    Cancelling,
    Cancelled,
}

impl ExchangeStatus {
    /// Whether the exchange has reached a final status.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            ExchangeStatus::Completed
                | ExchangeStatus::Expired
                | ExchangeStatus::Excepted
                | ExchangeStatus::Cancelled
        )
    }

    pub fn is_cancelling(&self) -> bool {
        matches!(self, ExchangeStatus::Cancelling | ExchangeStatus::Cancelled)
    }

    /// Whether moving from this status to `next` is allowed.
    ///
    /// Nothing leaves a final status, and a cancelling exchange can only
    /// become cancelled.
    pub fn can_move_to(&self, next: ExchangeStatus) -> bool {
        if self.is_done() {
            return false;
        }
        if *self == ExchangeStatus::Cancelling {
            return next == ExchangeStatus::Cancelled;
        }
        true
    }
}

/// A request/response transaction as seen by a connection.
///
/// Methods take `&self` since an exchange is shared between the connection
/// running it and whoever may cancel it.
pub trait Exchange: Send + Sync {
    fn status(&self) -> ExchangeStatus;

    /// Move to `status`. Returns `false`, leaving the status as is, when
    /// the move is not allowed. Check and update happen atomically.
    fn set_status(&self, status: ExchangeStatus) -> bool;

    /// The request head.
    fn request(&self) -> &Request<()>;

    /// Whether the request has a body.
    fn has_request_content(&self) -> bool;

    /// Next chunk of request body. `None` when there is no more.
    fn request_content_chunk(&self) -> Option<Vec<u8>>;

    /// The request went out in full.
    ///
    /// Ignored once the exchange is done or cancelling. The check and the
    /// move from SendingRequest to WaitingForResponse happen atomically with
    /// [`set_status`][Exchange::set_status], so a cancel either comes first
    /// and silences this, or comes after it.
    fn on_request_complete(&self);

    fn on_response_head(&self, response: &Response<()>);

    fn on_response_content(&self, content: &[u8]);

    fn on_response_complete(&self);

    fn on_exception(&self, error: Error);

    /// The exchange was cancelled. Called once, by the canceller.
    fn on_cancel(&self);

    /// The server switched protocols. `buffered` holds bytes received after
    /// the response head. Returns the connection taking over the endpoint.
    fn on_switch_protocol(
        &self,
        endpoint: Arc<dyn Endpoint>,
        buffered: Vec<u8>,
    ) -> Option<Box<dyn Connection>>;

    /// Arm a timeout for the whole exchange on `endpoint`.
    fn schedule_timeout(&self, _endpoint: &Arc<dyn Endpoint>, _timeout: Duration) {}

    fn cancel_timeout(&self);
}

/// Callbacks of an [`HttpExchange`].
#[allow(unused_variables)]
pub trait ExchangeListener: Send + Sync {
    fn on_request_complete(&self) {}

    fn on_response_head(&self, response: &Response<()>) {}

    fn on_response_content(&self, content: &[u8]) {}

    fn on_response_complete(&self) {}

    fn on_exception(&self, error: Error) {}

    fn on_cancel(&self) {}

    fn on_expire(&self) {}

    fn on_switch_protocol(
        &self,
        endpoint: Arc<dyn Endpoint>,
        buffered: Vec<u8>,
    ) -> Option<Box<dyn Connection>> {
        None
    }
}

impl<T: ExchangeListener + ?Sized> ExchangeListener for Arc<T> {
    fn on_request_complete(&self) {
        (**self).on_request_complete()
    }

    fn on_response_head(&self, response: &Response<()>) {
        (**self).on_response_head(response)
    }

    fn on_response_content(&self, content: &[u8]) {
        (**self).on_response_content(content)
    }

    fn on_response_complete(&self) {
        (**self).on_response_complete()
    }

    fn on_exception(&self, error: Error) {
        (**self).on_exception(error)
    }

    fn on_cancel(&self) {
        (**self).on_cancel()
    }

    fn on_expire(&self) {
        (**self).on_expire()
    }

    fn on_switch_protocol(
        &self,
        endpoint: Arc<dyn Endpoint>,
        buffered: Vec<u8>,
    ) -> Option<Box<dyn Connection>> {
        (**self).on_switch_protocol(endpoint, buffered)
    }
}

/// An [`Exchange`] with a fixed request and body handed out chunk by chunk.
pub struct HttpExchange {
    request: Request<()>,
    has_content: bool,
    content: Mutex<VecDeque<Vec<u8>>>,
    status: Arc<Mutex<ExchangeStatus>>,
    listener: Arc<dyn ExchangeListener>,
    timeout: Mutex<Option<(TimeoutTask, Weak<dyn Endpoint>)>>,
}

impl HttpExchange {
    /// Exchange without request body.
    pub fn new(request: Request<()>, listener: impl ExchangeListener + 'static) -> Self {
        Self::with_content(request, Vec::new(), listener)
    }

    /// Exchange sending `content` as request body, one chunk per element.
    pub fn with_content(
        request: Request<()>,
        content: Vec<Vec<u8>>,
        listener: impl ExchangeListener + 'static,
    ) -> Self {
        HttpExchange {
            request,
            has_content: !content.is_empty(),
            content: Mutex::new(content.into()),
            status: Arc::new(Mutex::new(ExchangeStatus::Start)),
            listener: Arc::new(listener),
            timeout: Mutex::new(None),
        }
    }
}

impl Exchange for HttpExchange {
    fn status(&self) -> ExchangeStatus {
        *lock(&self.status)
    }

    fn set_status(&self, status: ExchangeStatus) -> bool {
        let mut current = lock(&self.status);
        if !current.can_move_to(status) {
            trace!("Refuse status {:?} -> {:?}", *current, status);
            return false;
        }
        trace!("Status {:?} -> {:?}", *current, status);
        *current = status;
        true
    }

    fn request(&self) -> &Request<()> {
        &self.request
    }

    fn has_request_content(&self) -> bool {
        self.has_content
    }

    fn request_content_chunk(&self) -> Option<Vec<u8>> {
        lock(&self.content).pop_front()
    }

    fn on_request_complete(&self) {
        {
            let mut current = lock(&self.status);
            if current.is_done() || current.is_cancelling() {
                trace!("Not reporting request complete when {:?}", *current);
                return;
            }
            if *current == ExchangeStatus::SendingRequest {
                *current = ExchangeStatus::WaitingForResponse;
            }
        }
        self.listener.on_request_complete()
    }

    fn on_response_head(&self, response: &Response<()>) {
        self.listener.on_response_head(response)
    }

    fn on_response_content(&self, content: &[u8]) {
        self.listener.on_response_content(content)
    }

    fn on_response_complete(&self) {
        self.listener.on_response_complete()
    }

    fn on_exception(&self, error: Error) {
        self.listener.on_exception(error)
    }

    fn on_cancel(&self) {
        self.listener.on_cancel()
    }

    fn on_switch_protocol(
        &self,
        endpoint: Arc<dyn Endpoint>,
        buffered: Vec<u8>,
    ) -> Option<Box<dyn Connection>> {
        self.listener.on_switch_protocol(endpoint, buffered)
    }

    fn schedule_timeout(&self, endpoint: &Arc<dyn Endpoint>, timeout: Duration) {
        let status = self.status.clone();
        let listener = self.listener.clone();
        let weak = Arc::downgrade(endpoint);

        let task = TimeoutTask::new(move || {
            let expired = {
                let mut current = lock(&status);
                let allowed = current.can_move_to(ExchangeStatus::Expired);
                if allowed {
                    *current = ExchangeStatus::Expired;
                }
                allowed
            };
            if !expired {
                return;
            }
            debug!("Exchange expired");
            listener.on_expire();
            if let Some(endpoint) = weak.upgrade() {
                endpoint.close();
            }
        });

        let ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        endpoint.schedule_timeout(task.clone(), ms);

        if let Some((old, old_endpoint)) = lock(&self.timeout).replace((task, Arc::downgrade(endpoint))) {
            if let Some(e) = old_endpoint.upgrade() {
                e.cancel_timeout(&old);
            }
        }
    }

    fn cancel_timeout(&self) {
        let Some((task, endpoint)) = lock(&self.timeout).take() else {
            return;
        };
        if let Some(endpoint) = endpoint.upgrade() {
            endpoint.cancel_timeout(&task);
        }
    }
}

impl fmt::Debug for HttpExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExchange")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("status", &self.status())
            .finish()
    }
}
