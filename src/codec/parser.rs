use std::fmt;
use std::sync::Arc;

use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Version};

use super::chunked::Dechunker;
use crate::buffer::{Buffer, BufferArena};
use crate::close_reason::CloseReason;
use crate::codec::{Parser, ResponseHandler};
use crate::config::Config;
use crate::endpoint::{Endpoint, Filled};
use crate::util::{log_data, HeaderIterExt};
use crate::Error;

const MAX_RESPONSE_HEADERS: usize = 128;

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// No body, e.g. response to HEAD or a 204.
    NoBody,
    /// `content-length` header.
    LengthDelimited(u64),
    /// `transfer-encoding: chunked`.
    Chunked,
    /// Body ends when the server closes the connection.
    CloseDelimited,
}

/// Work out the [`BodyMode`] of a response.
pub fn body_mode(
    head_request: bool,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<BodyMode, Error> {
    if head_request
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyMode::NoBody);
    }

    if headers.iter().has(TRANSFER_ENCODING, "chunked") {
        return Ok(BodyMode::Chunked);
    }

    let mut lengths = headers.get_all(CONTENT_LENGTH).iter();
    if let Some(v) = lengths.next() {
        if lengths.next().is_some() {
            return Err(Error::TooManyContentLengthHeaders);
        }
        let len = v
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or(Error::BadContentLengthHeader)?;
        return Ok(BodyMode::LengthDelimited(len));
    }

    Ok(BodyMode::CloseDelimited)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Head,
    Body,
    End,
}

#[derive(Debug)]
enum BodyReader {
    NoBody,
    Length(u64),
    Chunked(Dechunker),
    Close,
}

/// HTTP/1.1 response parser.
///
/// Reads into a buffer from the arena. Input past the end of one response is
/// kept for the next, or handed over by
/// [`take_buffered`][Parser::take_buffered] after a protocol switch.
pub struct Http1Parser {
    arena: Arc<BufferArena>,
    buffer_size: usize,
    buffer: Buffer,
    state: State,
    expecting: bool,
    head_request: bool,
    reader: BodyReader,
    status: Option<StatusCode>,
    close_reason: Option<CloseReason>,
    // Buffered input can't be parsed until more arrives.
    stalled: bool,
    input_closed: bool,
}

impl Http1Parser {
    pub fn new(arena: Arc<BufferArena>, config: &Config) -> Self {
        Http1Parser {
            arena,
            buffer_size: config.response_buffer_size,
            buffer: Buffer::default(),
            state: State::Idle,
            expecting: false,
            head_request: false,
            reader: BodyReader::NoBody,
            status: None,
            close_reason: None,
            stalled: false,
            input_closed: false,
        }
    }

    fn set_close_reason(&mut self, reason: CloseReason) {
        if self.close_reason.is_none() {
            debug!("Close connection after response: {}", reason.explain());
            self.close_reason = Some(reason);
        }
    }

    fn fill(&mut self, endpoint: &dyn Endpoint) -> Result<bool, Error> {
        if self.input_closed {
            return Ok(false);
        }
        if self.buffer.capacity() == 0 {
            self.buffer = self.arena.acquire(self.buffer_size);
        }
        if self.buffer.space() == 0 {
            return Ok(false);
        }
        match endpoint.fill(&mut self.buffer)? {
            Filled::Bytes(0) => Ok(false),
            Filled::Bytes(n) => {
                trace!("Filled {} bytes", n);
                self.stalled = false;
                Ok(true)
            }
            Filled::Eof => {
                debug!("Input closed");
                self.input_closed = true;
                Ok(false)
            }
        }
    }

    fn on_head(&mut self, response: &Response<()>) -> Result<(), Error> {
        let status = response.status();
        let headers = response.headers();

        if response.version() == Version::HTTP_10 && !headers.iter().has(CONNECTION, "keep-alive")
        {
            self.set_close_reason(CloseReason::Http10);
        }
        if headers.iter().has(CONNECTION, "close") {
            self.set_close_reason(CloseReason::ServerConnectionClose);
        }
        if status == StatusCode::SWITCHING_PROTOCOLS {
            self.set_close_reason(CloseReason::SwitchingProtocols);
        }

        let mode = body_mode(self.head_request, status, headers)?;
        trace!("Body mode: {:?}", mode);

        self.reader = match mode {
            BodyMode::NoBody => BodyReader::NoBody,
            BodyMode::LengthDelimited(len) => BodyReader::Length(len),
            BodyMode::Chunked => BodyReader::Chunked(Dechunker::new()),
            BodyMode::CloseDelimited => {
                self.set_close_reason(CloseReason::CloseDelimitedBody);
                BodyReader::Close
            }
        };
        self.status = Some(status);

        Ok(())
    }

    fn body_ended(&self) -> bool {
        match &self.reader {
            BodyReader::NoBody => true,
            BodyReader::Length(remaining) => *remaining == 0,
            BodyReader::Chunked(d) => d.is_ended(),
            BodyReader::Close => self.input_closed && self.buffer.is_empty(),
        }
    }
}

impl fmt::Debug for Http1Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Http1Parser")
            .field("state", &self.state)
            .field("reader", &self.reader)
            .field("status", &self.status)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl Parser for Http1Parser {
    fn expect_response(&mut self, method: &Method) {
        self.expecting = true;
        self.head_request = method == Method::HEAD;
    }

    fn parse_available(
        &mut self,
        endpoint: &dyn Endpoint,
        handler: &mut dyn ResponseHandler,
    ) -> Result<bool, Error> {
        if self.state == State::End {
            return Ok(false);
        }

        let mut progress = self.fill(endpoint)?;

        loop {
            match self.state {
                State::Idle => {
                    if self.buffer.is_empty() {
                        if self.input_closed {
                            if self.expecting {
                                return Err(Error::UnexpectedEof);
                            }
                            self.set_close_reason(CloseReason::ServerEndOfStream);
                        }
                        break;
                    }
                    if !self.expecting {
                        return Err(Error::UnexpectedResponse);
                    }
                    self.state = State::Head;
                }

                State::Head => {
                    let Some((used, response)) = try_parse_response(self.buffer.as_slice())? else {
                        if self.buffer.space() == 0 {
                            return Err(Error::ResponseHeadTooLarge);
                        }
                        if self.input_closed {
                            return Err(Error::UnexpectedEof);
                        }
                        self.stalled = true;
                        break;
                    };

                    log_data(&self.buffer.as_slice()[..used]);
                    self.buffer.consume(used);
                    progress = true;

                    let status = response.status();
                    if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                        if status == StatusCode::CONTINUE && !response.headers().is_empty() {
                            return Err(Error::HeadersWith100);
                        }
                        debug!("Skip interim response: {}", status);
                        continue;
                    }

                    debug!("Response {:?} {}", response.version(), status);
                    self.on_head(&response)?;
                    handler.on_head(&response);
                    self.state = State::Body;
                }

                State::Body => {
                    let used = match &mut self.reader {
                        BodyReader::NoBody => 0,
                        BodyReader::Length(remaining) => {
                            let n = (*remaining).min(self.buffer.len() as u64) as usize;
                            if n > 0 {
                                handler.on_content(&self.buffer.as_slice()[..n]);
                                *remaining -= n as u64;
                            }
                            n
                        }
                        BodyReader::Chunked(d) => {
                            d.decode(self.buffer.as_slice(), &mut |data| handler.on_content(data))?
                        }
                        BodyReader::Close => {
                            let n = self.buffer.len();
                            if n > 0 {
                                handler.on_content(self.buffer.as_slice());
                            }
                            n
                        }
                    };

                    if used > 0 {
                        self.buffer.consume(used);
                        progress = true;
                    }

                    if self.body_ended() {
                        self.state = State::End;
                        self.expecting = false;
                        handler.on_complete();
                        progress = true;
                        break;
                    }

                    if used == 0 {
                        if self.input_closed {
                            return Err(Error::UnexpectedEof);
                        }
                        self.stalled = self.buffer.has_content();
                        break;
                    }
                }

                State::End => break,
            }
        }

        Ok(progress)
    }

    fn is_complete(&self) -> bool {
        self.state == State::End
    }

    fn is_more_in_buffer(&self) -> bool {
        self.state != State::End && self.buffer.has_content() && !self.stalled
    }

    fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn take_buffered(&mut self) -> Vec<u8> {
        let data = self.buffer.as_slice().to_vec();
        self.buffer.clear();
        data
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.expecting = false;
        self.head_request = false;
        self.reader = BodyReader::NoBody;
        self.status = None;
        self.stalled = false;
        self.close_reason = None;
        if self.input_closed {
            self.set_close_reason(CloseReason::ServerEndOfStream);
        }
    }

    fn return_buffers(&mut self) {
        if self.buffer.is_empty() && self.buffer.capacity() > 0 {
            self.arena.release(std::mem::take(&mut self.buffer));
        }
    }
}

fn try_parse_response(input: &[u8]) -> Result<Option<(usize, Response<()>)>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut res = httparse::Response::new(&mut headers);

    let used = match res.parse(input) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(Error::HttpParseTooManyHeaders),
        Err(e) => return Err(e.into()),
    };

    let version = match res.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::UnsupportedVersion),
    };

    let status = res
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| Error::HttpParseFail("invalid status code".into()))?;

    let mut builder = Response::builder().version(version).status(status);

    for h in res.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::BadHeader(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|e| Error::BadHeader(e.to_string()))?;
        builder = builder.header(name, value);
    }

    let response = builder
        .body(())
        .map_err(|e| Error::BadHeader(e.to_string()))?;

    Ok(Some((used, response)))
}
