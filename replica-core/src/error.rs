// Error types for the Replica request pipeline

use http::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Writing a live response to the client failed (disconnect, broken pipe).
    #[error("Transport failure: {0}")]
    Transport(#[source] io::Error),

    /// Writing a cached response back to the client failed.
    #[error("Replay failure: {0}")]
    Replay(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) | Error::Deserialization(_) => StatusCode::BAD_REQUEST.as_u16(),
            Error::NotFound(_) => StatusCode::NOT_FOUND.as_u16(),
            Error::Transport(_)
            | Error::Replay(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// True for failures writing to the client connection, live or replayed.
    pub fn is_client_disconnect(&self) -> bool {
        match self {
            Error::Transport(e) | Error::Replay(e) | Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
