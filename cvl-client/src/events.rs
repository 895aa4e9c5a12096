//! Event-stream parsing.
//!
//! The server frames every notification as SSE: one or more `data:` lines
//! followed by a blank line. This module buffers the raw byte stream, cuts
//! it at blank lines, joins the `data:` records of each event back together
//! and decodes the result as a [`Frame`].

use bytes::Bytes;
use cvl_core::{Error, Frame, Result};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

/// A live `/events` subscription yielding decoded notification frames.
///
/// Dropping the stream closes the subscription; the server notices on its
/// next send and drops the registration.
pub struct EventStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: String,
}

impl EventStream {
    pub(crate) fn new(
        stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    ) -> Self {
        Self {
            inner: stream.boxed(),
            buffer: String::new(),
        }
    }

    /// Next decoded frame.
    ///
    /// Fails with [`Error::ConnectionClosed`] once the server hangs up.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.take_buffered_frame()? {
                return Ok(frame);
            }
            match self.inner.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| Error::Http(e.to_string()))?;
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Pop one complete event off the buffer, if one is there.
    ///
    /// Events without any `data:` record (comments, keep-alives) are
    /// swallowed.
    fn take_buffered_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(end) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..end + 2).collect();
            let data = raw
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.strip_prefix(' ').unwrap_or(line))
                .collect::<Vec<_>>()
                .join("\n");
            if data.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(&data)?));
        }
        Ok(None)
    }
}
