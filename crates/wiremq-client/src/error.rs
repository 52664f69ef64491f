//! Session error types.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use wiremq_core::packet::ConnectCode;

/// Session error type.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The underlying stream failed or reached end-of-stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the wire format.
    #[error("protocol error: {0}")]
    Protocol(#[from] wiremq_core::ProtocolError),

    /// The broker answered an operation with the wrong acknowledgement kind.
    #[error("unexpected {got} while waiting for {want}")]
    UnexpectedAck {
        want: &'static str,
        got: &'static str,
    },

    /// CONNACK carried a non-zero return code.
    #[error("connection refused: {0}")]
    ConnectionRefused(ConnectCode),

    /// The caller violated the API contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The session already terminated; carries the original failure.
    #[error("session terminated: {0}")]
    Terminated(Arc<ClientError>),

    /// The caller closed the session.
    #[error("session closed")]
    Closed,
}

impl From<wiremq_core::Error> for ClientError {
    fn from(err: wiremq_core::Error) -> Self {
        match err {
            wiremq_core::Error::Io(err) => ClientError::Io(err),
            wiremq_core::Error::Protocol(err) => ClientError::Protocol(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
