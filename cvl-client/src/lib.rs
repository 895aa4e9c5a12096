//! Client for the CVL object server
//!
//! A thin, typed wrapper over the server's HTTP surface: publish metadata
//! and data, delete objects, broadcast control messages, run broadcast
//! queries, answer them, and read objects, listings and timeseries windows
//! back. [`CvlClient::subscribe`] attaches to the server's event stream and
//! yields decoded notification [`Frame`](cvl_core::Frame)s.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cvl_client::CvlClient;
//! use serde_json::json;
//!
//! # async fn example() -> cvl_core::Result<()> {
//! let client = CvlClient::new("http://127.0.0.1:3193");
//! let mut events = client.subscribe().await?;
//!
//! client.publish_metadata("bathymetry", &json!({"layer": "bed"})).await?;
//! let frame = events.next_frame().await?;
//! println!("server said: {:?}", frame.operation);
//! # Ok(())
//! # }
//! ```

mod client;
mod events;

pub use client::CvlClient;
pub use events::EventStream;
