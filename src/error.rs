/*
src/error.rs

Unified engine error type. Bencoding/protocol/tracker failures are each
their own variant so callers (notably the coordinator, §7) can tell fatal
input errors apart from per-peer or per-announce failures that should be
logged and retried.
*/

use crate::bencode::DecodeError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bencoding error: {0}")]
    Encoding(#[from] DecodeError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tracker connection error: {0}")]
    Connection(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Error {
        Error::Protocol(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Error {
        Error::Connection(msg.into())
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        Error::Http(e.to_string())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MetainfoError {
    #[error("multi-file torrents are not supported")]
    MultiFileUnsupported,
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("invalid field {0:?}")]
    InvalidField(&'static str),
    #[error("expected {expected} piece hashes, found {actual}")]
    PieceCountMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
