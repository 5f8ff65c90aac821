//! `pgq` error types.
use std::io;

use crate::ext::NumberError;
use crate::postgres::diagnostics::PgError;

/// A specialized [`Result`] type for driver operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible errors from the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket failure, including an exceeded read or write deadline.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something the client cannot handle.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A frontend message could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Structured server diagnostic (`ErrorResponse`). Recoverable: the
    /// next request drains the failed batch and continues.
    #[error(transparent)]
    Database(#[from] Box<PgError>),

    #[error("blank query string")]
    BlankQuery,

    /// The session was poisoned by an earlier transport or protocol
    /// failure, or closed; every operation keeps failing with it.
    #[error("connection unusable: {0}")]
    Fatal(String),
}

/// An error when translating the byte stream from postgres.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected message kind: expected {}, got {}", .expected.escape_ascii(), .got.escape_ascii())]
    UnexpectedKind { expected: u8, got: u8 },

    /// A field decode ran past the end of the current message.
    #[error("unexpected end of message")]
    UnexpectedEof,

    #[error("message string is missing its nul terminator")]
    MissingNulTerminator,

    #[error("integer conversion failed")]
    IntConversion,

    #[error("requested authentication method {0} not implemented")]
    UnknownAuthMethod(i32),

    #[error("server SASL authentication mechanisms not supported")]
    UnsupportedSaslMechanism,

    #[error("expected authentication code {expected}, got {got}")]
    UnexpectedAuthCode { expected: i32, got: i32 },

    #[error("SASL: {0}")]
    Sasl(String),

    #[error("malformed command tag")]
    MalformedCommandTag,

    #[error("unknown command type {0:?}")]
    UnknownCommand(String),

    #[error("expected {expected} columns, got {got}")]
    ColumnCountMismatch { expected: usize, got: i16 },

    #[error("invalid column type")]
    InvalidColumnType,

    #[error("NotificationResponse not implemented")]
    NotificationUnsupported,

    #[error(transparent)]
    Number(#[from] NumberError),
}

/// An error captured by the message builder.
///
/// The first failing append poisons the whole message; the error
/// surfaces at finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("string contains a nul byte")]
    NulByte,
    #[error("integer does not fit the protocol field width")]
    IntOverflow,
}

impl Error {
    /// Whether this is a server diagnostic rather than a client failure.
    pub fn is_database(&self) -> bool {
        matches!(self, Error::Database(_))
    }

    /// The decoded server diagnostic, if that is what this error is.
    pub fn as_database(&self) -> Option<&PgError> {
        match self {
            Error::Database(err) => Some(err),
            _ => None,
        }
    }
}
