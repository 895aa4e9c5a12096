//! HTTP client for the server's full endpoint surface.

use crate::events::EventStream;
use cvl_core::{Error, Result};
use reqwest::{Response, StatusCode};
use serde_json::Value;

/// Client for one CVL object server.
///
/// Cheaply cloneable; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct CvlClient {
    base: String,
    http: reqwest::Client,
}

impl CvlClient {
    /// Create a client for `base`, e.g. `http://127.0.0.1:3193`.
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Attach to `/events` and stream notification frames.
    ///
    /// The server answers with an identity frame first; it is delivered like
    /// any other frame.
    #[tracing::instrument(skip(self), fields(base = %self.base))]
    pub async fn subscribe(&self) -> Result<EventStream> {
        tracing::debug!("subscribing to event stream");
        let response = self
            .http
            .get(self.url("/events"))
            .send()
            .await
            .map_err(http_err)?;
        let response = check(response)?;
        Ok(EventStream::new(response.bytes_stream()))
    }

    /// Publish structured metadata under `key`.
    pub async fn publish_metadata(&self, key: &str, metadata: &Value) -> Result<()> {
        let response = self
            .http
            .post(self.url("/publish"))
            .query(&[("key", key)])
            .json(metadata)
            .send()
            .await
            .map_err(http_err)?;
        check(response).map(drop)
    }

    /// Publish opaque bytes under `key`.
    pub async fn publish_data(&self, key: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let response = self
            .http
            .put(self.url("/publish"))
            .query(&[("key", key)])
            .body(data.into())
            .send()
            .await
            .map_err(http_err)?;
        check(response).map(drop)
    }

    /// Delete the object at `key`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/delete"))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(http_err)?;
        check(response).map(drop)
    }

    /// Broadcast a control message to every subscriber.
    pub async fn control(&self, metadata: &Value) -> Result<()> {
        let response = self
            .http
            .post(self.url("/control"))
            .json(metadata)
            .send()
            .await
            .map_err(http_err)?;
        check(response).map(drop)
    }

    /// Ask every attached subscriber to report state.
    ///
    /// Blocks until every expected reply arrived or the server's reply
    /// window closed, and returns the replies gathered by then.
    pub async fn query(&self) -> Result<Vec<Value>> {
        let response = self
            .http
            .post(self.url("/query"))
            .send()
            .await
            .map_err(http_err)?;
        check(response)?.json().await.map_err(http_err)
    }

    /// Answer an outstanding broadcast query.
    pub async fn report_state(&self, payload: &Value) -> Result<()> {
        let response = self
            .http
            .post(self.url("/state"))
            .json(payload)
            .send()
            .await
            .map_err(http_err)?;
        check(response).map(drop)
    }

    /// Fetch the object's metadata document.
    pub async fn object_metadata(&self, key: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url("/object"))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(http_err)?;
        check(response)?.json().await.map_err(http_err)
    }

    /// Fetch the object's raw bytes.
    pub async fn object_data(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(self.url("/object"))
            .query(&[("key", key), ("data", "")])
            .send()
            .await
            .map_err(http_err)?;
        let bytes = check(response)?.bytes().await.map_err(http_err)?;
        Ok(bytes.to_vec())
    }

    /// Keys of every object that has metadata.
    pub async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .http
            .get(self.url("/list"))
            .send()
            .await
            .map_err(http_err)?;
        check(response)?.json().await.map_err(http_err)
    }

    /// Timeseries rows in the half-open window `(t0, t1]`.
    pub async fn timeseries(&self, t0: f64, t1: f64) -> Result<Vec<Value>> {
        let response = self
            .http
            .get(self.url("/ts"))
            .query(&[("t0", t0.to_string()), ("t1", t1.to_string())])
            .send()
            .await
            .map_err(http_err)?;
        check(response)?.json().await.map_err(http_err)
    }

    /// Properties documents of the configured timeseries sources.
    pub async fn info(&self) -> Result<Vec<Value>> {
        let response = self
            .http
            .get(self.url("/info"))
            .send()
            .await
            .map_err(http_err)?;
        check(response)?.json().await.map_err(http_err)
    }
}

fn http_err(err: reqwest::Error) -> Error {
    Error::Http(err.to_string())
}

fn check(response: Response) -> Result<Response> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(Error::NotFound),
        status if status.is_success() => Ok(response),
        status => Err(Error::Http(format!("unexpected status {status}"))),
    }
}
