use std::io;
use thiserror::Error;

use crate::buffer::BufferError;
use crate::platform::{FlashError, ScriptError, TransportError};

/// Everything that can end a connection early.
///
/// An error of this type escaping an event handler tears the connection down; the
/// server itself keeps running.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("request error: {source}")]
    Request {
        #[from]
        source: ParseError,
    },

    #[error("buffer error: {source}")]
    Buffer {
        #[from]
        source: BufferError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: TransportError,
    },

    #[error("file error: {source}")]
    File {
        #[from]
        source: io::Error,
    },

    #[error("flash error: {source}")]
    Flash {
        #[from]
        source: FlashError,
    },

    #[error("script error: {source}")]
    Script {
        #[from]
        source: ScriptError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing request line")]
    MissingRequestLine,

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid authorization header")]
    InvalidAuthorization,

    #[error("buffer error: {source}")]
    Buffer {
        #[from]
        source: BufferError,
    },
}

impl ParseError {
    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcceptError {
    #[error("out of memory for a new connection")]
    OutOfMemory,

    #[error("connection limit {max} reached")]
    TooManyConnections { max: usize },

    #[error("server is closed")]
    Closed,
}
