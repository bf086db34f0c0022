//! Network capabilities consumed by the pipelines.
//!
//! Bodies are pushed into a [`ChunkSink`] as they arrive so no response is
//! ever buffered whole. Implementations enforce the deadlines from
//! [`crate::config::NetworkTimeouts`] on every request and every read.

use log::warn;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum NetError {
    #[error("operation timed out")]
    Timeout,
    #[error("connection failed")]
    Connect,
    #[error("dns lookup failed")]
    Dns,
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("transport error")]
    Io,
    #[error("body rejected by consumer")]
    Aborted,
    #[error("link is down")]
    NotConnected,
}

/// What a sink wants after seeing some bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    /// Enough data; close the stream without error.
    Stop,
    /// Reject the body; the request fails with [`NetError::Aborted`].
    Abort,
}

/// Consumer of a streamed response body.
pub trait ChunkSink {
    /// Called once with the response length header, before any body bytes.
    fn begin(&mut self, content_length: Option<u32>) -> Flow {
        let _ = content_length;
        Flow::Continue
    }

    fn chunk(&mut self, bytes: &[u8]) -> Flow;
}

/// Summary of a completed GET.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transfer {
    /// Body bytes handed to the sink.
    pub bytes: u32,
    pub content_length: Option<u32>,
    /// The sink returned [`Flow::Stop`] before the body ended.
    pub stopped_early: bool,
}

pub trait HttpClient {
    /// Streams the body of a successful (2xx) GET into `sink`.
    async fn get<S: ChunkSink>(&mut self, url: &str, sink: &mut S) -> Result<Transfer, NetError>;

    /// POSTs a JSON document and returns the response status.
    async fn post_json(&mut self, url: &str, body: &[u8]) -> Result<u16, NetError>;
}

/// Station link to the access point.
pub trait NetworkLink {
    /// Blocks until associated with an address, or `timeout_ms` elapses.
    async fn connect(&mut self, timeout_ms: u32) -> Result<(), NetError>;

    /// Signal strength of the current association in dBm.
    fn rssi(&mut self) -> Option<i8>;

    /// Tears the link down and stops the radio.
    async fn disconnect(&mut self);
}

/// Collects a small body into a caller buffer, rejecting anything larger.
pub struct BufferSink<'a> {
    buf: &'a mut [u8],
    len: usize,
    overflow: bool,
}

impl<'a> BufferSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            overflow: false,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl ChunkSink for BufferSink<'_> {
    fn begin(&mut self, content_length: Option<u32>) -> Flow {
        match content_length {
            Some(len) if len as usize > self.buf.len() => {
                warn!(
                    "http body too large content_length={} limit={}",
                    len,
                    self.buf.len()
                );
                self.overflow = true;
                Flow::Abort
            }
            _ => Flow::Continue,
        }
    }

    fn chunk(&mut self, bytes: &[u8]) -> Flow {
        let end = self.len + bytes.len();
        if end > self.buf.len() {
            self.overflow = true;
            return Flow::Abort;
        }

        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Flow::Continue
    }
}
