use std::fmt;
use std::io;

/// Error type for hconn
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    Io(io::ErrorKind, String),
    EndpointClosed,
    UnexpectedEof,
    Tls(String),
    TlsWrapUnderflow,
    UnexpectedHandshakeFinished,
    BadHeader(String),
    UnsupportedVersion,
    TooManyHostHeaders,
    TooManyContentLengthHeaders,
    BadContentLengthHeader,
    OutputOverflow,
    ChunkLenNotAscii,
    ChunkLenNotANumber,
    ChunkExpectedCrLf,
    BodyContentAfterFinish,
    BodyLargerThanContentLength,
    BodySmallerThanContentLength,
    HttpParseFail(String),
    HttpParseTooManyHeaders,
    HeadersWith100,
    ResponseHeadTooLarge,
    UnexpectedResponse,
    NotCommitted,
    PipelineOccupied,
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::HttpParseFail(value.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value.kind(), value.to_string())
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(kind, v) => write!(f, "io error ({:?}): {}", kind, v),
            Error::EndpointClosed => write!(f, "endpoint is closed"),
            Error::UnexpectedEof => write!(f, "connection closed before response was complete"),
            Error::Tls(v) => write!(f, "tls engine: {}", v),
            Error::TlsWrapUnderflow => write!(f, "tls engine reported buffer underflow on wrap"),
            Error::UnexpectedHandshakeFinished => {
                write!(f, "tls engine reported FINISHED as handshake status")
            }
            Error::BadHeader(v) => write!(f, "bad header: {}", v),
            Error::UnsupportedVersion => write!(f, "unsupported http version"),
            Error::TooManyHostHeaders => write!(f, "more than one host header"),
            Error::TooManyContentLengthHeaders => write!(f, "more than one content-length header"),
            Error::BadContentLengthHeader => write!(f, "content-length header not a number"),
            Error::OutputOverflow => write!(f, "output too small to write output"),
            Error::ChunkLenNotAscii => write!(f, "chunk length is not ascii"),
            Error::ChunkLenNotANumber => write!(f, "chunk length cannot be read as a number"),
            Error::ChunkExpectedCrLf => write!(f, "chunk expected crlf as next character"),
            Error::BodyContentAfterFinish => {
                write!(f, "attempt to add body content after the last chunk")
            }
            Error::BodyLargerThanContentLength => {
                write!(f, "attempt to write larger body than content-length")
            }
            Error::BodySmallerThanContentLength => {
                write!(f, "request body ended before content-length was reached")
            }
            Error::HttpParseFail(v) => write!(f, "http parse fail: {}", v),
            Error::HttpParseTooManyHeaders => write!(f, "http parse resulted in too many headers"),
            Error::HeadersWith100 => write!(f, "received headers with 100-continue response"),
            Error::ResponseHeadTooLarge => write!(f, "response head does not fit the input buffer"),
            Error::UnexpectedResponse => write!(f, "received response data without a request"),
            Error::NotCommitted => write!(f, "request is not committed"),
            Error::PipelineOccupied => write!(f, "connection already has a pipelined exchange"),
        }
    }
}
