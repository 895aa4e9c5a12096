//! Shared types for the CVL object server
//!
//! This crate holds the pieces of the wire contract that both the server and
//! the client need to agree on:
//!
//! - **Notification frames**: the `{key, operation, meta}` JSON envelope the
//!   server pushes to every event-stream subscriber
//! - **Errors**: the application-level error type and `Result` alias used
//!   across the workspace
//!
//! Everything else (the object table, the coordinator, the HTTP surface)
//! lives in `cvl-server`; the programmatic client lives in `cvl-client`.

mod error;
mod frame;

pub use error::{Error, Result};
pub use frame::{Frame, Operation};
