//! Server builder
//!
//! The builder carries the full CLI surface of the server: port and bind
//! scope, read-only mode, the persist directory, timeseries sources, and
//! TLS credentials. `build()` brings the subsystems up (persistence
//! bootstrap, store reload, timeseries handles, the coordinator task) and
//! binds the listener, so the chosen port is known before `run()`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cvl_server::CvlServer;
//!
//! # async fn example() -> cvl_core::Result<()> {
//! let server = CvlServer::builder()
//!     .port(3193)
//!     .persist("./objects")
//!     .timeseries("./lakes.db")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

use crate::coordinator::Coordinator;
use crate::http::AppState;
use crate::store::ObjectStore;
use crate::timeseries::TimeseriesDb;
use crate::tls;
use crate::CvlServer;
use cvl_core::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3193;

/// Builder for a [`CvlServer`].
pub struct ServerBuilder {
    port: u16,
    bind_any: bool,
    read_only: bool,
    persist: Option<PathBuf>,
    timeseries: Vec<PathBuf>,
    tls: Option<(PathBuf, PathBuf)>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_any: false,
            read_only: false,
            persist: None,
            timeseries: Vec::new(),
            tls: None,
        }
    }

    /// Listen port; 0 lets the OS pick one.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Accept connections on all interfaces instead of loopback only.
    pub fn bind_any(mut self, any: bool) -> Self {
        self.bind_any = any;
        self
    }

    /// Refuse every mutating request.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Persist objects under `dir`; without it the store is transient.
    pub fn persist(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist = Some(dir.into());
        self
    }

    /// Add a timeseries source to serve. May be called repeatedly.
    pub fn timeseries(mut self, path: impl Into<PathBuf>) -> Self {
        self.timeseries.push(path.into());
        self
    }

    /// Serve HTTPS with this PEM certificate/key pair.
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some((cert.into(), key.into()));
        self
    }

    /// Bring the subsystems up and bind the listener.
    pub async fn build(self) -> Result<CvlServer> {
        // A persist directory that cannot be created reverts the server to
        // transient mode rather than refusing to start.
        let persist = match self.persist {
            Some(dir) => match std::fs::create_dir_all(&dir) {
                Ok(()) => Some(dir),
                Err(err) => {
                    tracing::error!(
                        dir = %dir.display(),
                        error = %err,
                        "failed to create persist directory; continuing without persistence"
                    );
                    None
                }
            },
            None => {
                tracing::info!(
                    "running in transient mode: objects are lost when the server exits"
                );
                None
            }
        };

        let store = match persist {
            Some(dir) => ObjectStore::load(dir),
            None => ObjectStore::new(None),
        };
        let store = Arc::new(RwLock::new(store));

        let mut sources = Vec::new();
        for path in &self.timeseries {
            sources.push(TimeseriesDb::open(path)?);
        }

        let tls_config = match &self.tls {
            Some((cert, key)) => Some(tls::load(cert, key).await?),
            None => None,
        };

        let (coordinator, handle) = Coordinator::new(Arc::clone(&store));
        tokio::spawn(coordinator.run());

        let host = if self.bind_any {
            IpAddr::from(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::from(Ipv4Addr::LOCALHOST)
        };
        let listener = TcpListener::bind(SocketAddr::new(host, self.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            tls_enabled = tls_config.is_some(),
            read_only = self.read_only,
            "server listening"
        );

        let state = AppState {
            coordinator: handle.clone(),
            store,
            timeseries: Arc::new(sources),
            read_only: self.read_only,
        };

        Ok(CvlServer {
            listener,
            local_addr,
            tls: tls_config,
            state,
            handle,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
