//! Error types for the SMB2 client.
//!
//! Every failure a caller can see is one `Error` variant. NT status codes
//! returned by the server are folded into the matching variant by
//! [`Error::from_status`]; codes without a dedicated variant are surfaced
//! as [`Error::UnexpectedStatus`].

use std::time::Duration;

use thiserror::Error;

use crate::smb2::status::NtStatus;
use crate::smb2::Smb2Command;

/// Top-level client error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport failed or the connection is closed. Fatal to the
    /// connection and to every session, share and handle on it.
    #[error("Connection error: {0}")]
    Connection(String),
    /// The server rejected the credentials. The connection stays usable.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Share not found: {0}")]
    ShareNotFound(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid path: {0}")]
    PathInvalid(String),
    #[error("Directory not empty: {0}")]
    NotEmpty(String),
    /// The handle was closed, or its share or session went away.
    #[error("Handle is closed")]
    HandleClosed,
    /// A response body could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    /// The server answered out of protocol (wrong command, missing header...).
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// No response within the per-call timeout. The effect on the server is unknown.
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("{command:?} failed with status {status}")]
    UnexpectedStatus { command: Smb2Command, status: NtStatus },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

impl Error {
    /// Map a failing NT status to the most appropriate error.
    /// `subject` names what the request was about (a path, a share, ...).
    pub fn from_status(command: Smb2Command, status: NtStatus, subject: &str) -> Self {
        match status {
            NtStatus::AccessDenied => Error::AccessDenied(subject.to_string()),
            NtStatus::BadNetworkName => Error::ShareNotFound(subject.to_string()),
            NtStatus::ObjectNameNotFound
            | NtStatus::ObjectPathNotFound
            | NtStatus::NoSuchFile => Error::NotFound(subject.to_string()),
            NtStatus::ObjectNameInvalid | NtStatus::ObjectPathSyntaxBad => {
                Error::PathInvalid(subject.to_string())
            }
            NtStatus::DirectoryNotEmpty => Error::NotEmpty(subject.to_string()),
            NtStatus::FileClosed
            | NtStatus::InvalidHandle
            | NtStatus::NetworkNameDeleted
            | NtStatus::UserSessionDeleted => Error::HandleClosed,
            NtStatus::LogonFailure => Error::AuthenticationFailed(subject.to_string()),
            status => Error::UnexpectedStatus { command, status },
        }
    }

    /// Whether this error leaves the connection unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}
