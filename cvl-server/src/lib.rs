//! CVL object server
//!
//! A lightweight publish/subscribe and shared-object service used by a
//! visualization client and one or more producers to exchange geospatial
//! artifacts (vertex buffers, rasters, GeoJSON) and control messages.
//!
//! # What it does
//!
//! - **Objects**: producers `POST`/`PUT` structured metadata and opaque
//!   bytes under a client-chosen string key; readers fetch them back with
//!   `GET /object` and enumerate them with `GET /list`
//! - **Events**: subscribers attach with `GET /events` and receive a live
//!   SSE feed of updates, deletes, control messages and query broadcasts
//! - **Broadcast queries**: `POST /query` asks every current subscriber to
//!   report state and gathers the replies within a bounded window
//! - **Timeseries**: `GET /ts` and `GET /info` expose append-only records
//!   from one or more read-only on-disk tables
//! - **Persistence**: with a persist directory configured, every object
//!   survives a clean restart as a `<id>.meta`/`<id>.data` file pair
//!
//! # Architecture
//!
//! The heart of the service is the object coordinator: a single task that
//! drains a FIFO queue of tagged operations. HTTP handlers are pure
//! producers onto that queue; read paths take shared read access to the
//! object table. There is exactly one writer, so none of the core state
//! carries per-operation locking: the queue is the mutex.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use cvl_server::CvlServer;
//!
//! #[tokio::main]
//! async fn main() -> cvl_core::Result<()> {
//!     let server = CvlServer::builder()
//!         .port(3193)
//!         .persist("./objects")
//!         .build()
//!         .await?;
//!     server.run().await
//! }
//! ```

mod builder;
mod coordinator;
mod http;
mod query;
mod store;
mod subscriber;
mod timeseries;
pub mod tls;

pub use builder::{ServerBuilder, DEFAULT_PORT};
pub use coordinator::CoordinatorHandle;
pub use http::KEY_HEADER;
pub use query::{BroadcastQuery, MAX_WAIT};
pub use store::{ObjectRecord, ObjectStore};
pub use subscriber::{Subscriber, SubscriberRegistry};
pub use timeseries::{TimeseriesDb, TimeseriesEvent};

use axum_server::tls_rustls::RustlsConfig;
use cvl_core::{Error, Result};
use std::net::SocketAddr;

/// A configured, bound server ready to run.
///
/// Construct one through [`CvlServer::builder`]. The listener is already
/// bound, so [`CvlServer::local_addr`] reports the real port even when the
/// builder asked for port 0.
pub struct CvlServer {
    pub(crate) listener: std::net::TcpListener,
    pub(crate) local_addr: SocketAddr,
    pub(crate) tls: Option<RustlsConfig>,
    pub(crate) state: http::AppState,
    pub(crate) handle: CoordinatorHandle,
}

impl CvlServer {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Producer handle onto the coordinator, for embedding scenarios.
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.handle
    }

    /// Serve requests until the process exits.
    #[tracing::instrument(skip(self), name = "server.run", fields(addr = %self.local_addr))]
    pub async fn run(self) -> Result<()> {
        let app = http::router(self.state)
            .into_make_service_with_connect_info::<SocketAddr>();
        match self.tls {
            Some(config) => axum_server::from_tcp_rustls(self.listener, config)
                .serve(app)
                .await
                .map_err(Error::from),
            None => axum_server::from_tcp(self.listener)
                .serve(app)
                .await
                .map_err(Error::from),
        }
    }
}
