//! Error taxonomy for parley operations
//!
//! The protocol defines a fixed table of numeric error codes that
//! the server may attach to a reply. The client-side failure modes (timeout,
//! decode failure, lost connection) are folded into the same enum so that
//! every outcome travels through one channel and callers can match
//! exhaustively on kind.

use thiserror::Error;

/// Server-assigned wire code for a generic server-side failure.
pub const CODE_SERVER: u16 = 400;
/// Server-assigned wire code for a generic authentication failure.
pub const CODE_AUTH: u16 = 406;
/// Server-assigned wire code: authentication is required for this call.
pub const CODE_AUTH_REQUIRED: u16 = 407;
/// Server-assigned wire code: the supplied credentials were wrong.
pub const CODE_AUTH_WRONG_CREDENTIALS: u16 = 411;
/// Server-assigned wire code: credentials were expected but missing.
pub const CODE_AUTH_MISSING_CREDENTIALS: u16 = 412;
/// Client-local code for a client usage error (e.g. not connected).
pub const CODE_CLIENT: u16 = 500;
/// Client-local code for a transport-level connection failure.
pub const CODE_CONNECTION: u16 = 501;
/// Client-local code for a connection dropped by the server.
pub const CODE_SERVER_DISCONNECT: u16 = 502;
/// Client-local code for the connection-wide idle timeout.
pub const CODE_TIMEOUT: u16 = 503;
/// Client-local code for a payload that could not be decoded.
pub const CODE_DECODE: u16 = 504;

/// Main error type for parley operations
///
/// Each variant carries a human-readable message; [`ParleyError::code`]
/// returns the stable numeric code. The enum is `Clone` because a single
/// disconnect error sweeps every pending request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParleyError {
    /// Generic server-side error attached to a reply.
    #[error("server error: {0}")]
    Server(String),

    /// Generic authentication failure.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The server requires authentication for the attempted call.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The supplied username/password pair was rejected.
    #[error("wrong credentials: {0}")]
    AuthWrongCredentials(String),

    /// The server expected credentials but none were supplied.
    #[error("missing credentials: {0}")]
    AuthMissingCredentials(String),

    /// Client usage error, e.g. sending while disconnected.
    #[error("client error: {0}")]
    Client(String),

    /// Transport-level connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server closed the connection.
    #[error("server disconnected: {0}")]
    ServerDisconnect(String),

    /// The connection-wide idle timeout fired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// An inbound payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ParleyError {
    /// Stable numeric code for this error kind
    pub fn code(&self) -> u16 {
        match self {
            Self::Server(_) => CODE_SERVER,
            Self::Auth(_) => CODE_AUTH,
            Self::AuthRequired(_) => CODE_AUTH_REQUIRED,
            Self::AuthWrongCredentials(_) => CODE_AUTH_WRONG_CREDENTIALS,
            Self::AuthMissingCredentials(_) => CODE_AUTH_MISSING_CREDENTIALS,
            Self::Client(_) => CODE_CLIENT,
            Self::Connection(_) => CODE_CONNECTION,
            Self::ServerDisconnect(_) => CODE_SERVER_DISCONNECT,
            Self::Timeout(_) => CODE_TIMEOUT,
            Self::Decode(_) => CODE_DECODE,
        }
    }

    /// Map a server-assigned wire code to the matching error kind
    ///
    /// Unknown codes fall back to [`ParleyError::Server`] with the code
    /// prepended to the message.
    pub fn from_wire(code: u16, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match code {
            CODE_AUTH => Self::Auth(msg),
            CODE_AUTH_REQUIRED => Self::AuthRequired(msg),
            CODE_AUTH_WRONG_CREDENTIALS => Self::AuthWrongCredentials(msg),
            CODE_AUTH_MISSING_CREDENTIALS => Self::AuthMissingCredentials(msg),
            CODE_CLIENT => Self::Client(msg),
            CODE_CONNECTION => Self::Connection(msg),
            CODE_SERVER_DISCONNECT => Self::ServerDisconnect(msg),
            CODE_SERVER => Self::Server(msg),
            other => Self::Server(format!("{}: {}", other, msg)),
        }
    }

    /// Check if this is an authentication error of any kind
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Auth(_)
                | Self::AuthRequired(_)
                | Self::AuthWrongCredentials(_)
                | Self::AuthMissingCredentials(_)
        )
    }

    /// Check if this error is fatal to the connection
    ///
    /// Fatal errors mean the caller must reconnect before issuing further
    /// requests; non-fatal errors (decode failures, server-side errors)
    /// leave the connection usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::ServerDisconnect(_) | Self::Timeout(_)
        )
    }
}

impl From<std::io::Error> for ParleyError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Result type alias for parley operations
pub type ParleyResult<T> = Result<T, ParleyError>;
