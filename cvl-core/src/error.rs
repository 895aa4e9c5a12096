//! Error types for the CVL workspace
//!
//! A single application-level error enum shared by the server and the client.
//! The HTTP surface intentionally collapses every failure to `404 Not found`
//! on the wire, so this type exists for logs and for programmatic callers of
//! the client crate, not for response bodies.

use thiserror::Error;

/// Result type used throughout the CVL crates
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for CVL operations
#[derive(Debug, Error)]
pub enum Error {
    /// Low-level I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A timeseries source could not be opened or queried
    #[error("timeseries error: {0}")]
    Timeseries(String),

    /// TLS credentials could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// An HTTP exchange failed below the application layer
    #[error("HTTP error: {0}")]
    Http(String),

    /// The server answered `404 Not found`
    ///
    /// Covers every rejection the server expresses that way: unknown keys,
    /// unknown paths, malformed bodies, and mutating requests against a
    /// read-only instance.
    #[error("not found")]
    NotFound,

    /// The peer is gone
    ///
    /// On the server this marks a subscriber whose event stream has been torn
    /// down; on the client it marks a server that closed the stream.
    #[error("connection closed")]
    ConnectionClosed,
}
