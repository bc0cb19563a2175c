//! Error types shared by the streaming client and server.
//!
//! [`Error`] separates failures the caller can act on (a connection that
//! could not be established) from lifecycle violations (pushing onto a stream
//! that is gone). It converts into [`tonic::Status`] so the server can reject
//! streams with a meaningful gRPC code.
//!
//! ## Error Cases
//! - `Connection`: the transport to the server could not be established.
//! - `Transport`: a Stream Channel was used after its RPC ended.
//! - `ServiceOverloaded`: the server is at its concurrent stream limit.
//! - `ServiceShutdown`: the server or session is shutting down.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the streaming session and handler.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Failed to establish or maintain the connection to `addr`.
    #[error("Connection error ({addr}): {reason}")]
    Connection { addr: String, reason: String },

    /// A stream was used after it had been torn down.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// Too many concurrent streams.
    #[error("Service is overloaded: {details}")]
    ServiceOverloaded { details: String },

    /// The service (or session) is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Builds a [`Error::Connection`] for `addr`.
    pub fn connection(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Connection { addr, reason } => {
                Status::unavailable(format!("Connection to {addr} failed: {reason}"))
            }
            Error::Transport { context } => Status::internal(format!("Transport error: {context}")),
            Error::ServiceOverloaded { details } => Status::resource_exhausted(details),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
