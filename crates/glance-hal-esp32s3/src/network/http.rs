use alloc::{vec, vec::Vec};

use embassy_net::{
    Stack,
    dns::DnsSocket,
    tcp::client::{TcpClient, TcpClientState},
};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::Read;
use glance_core::{
    config::NetworkTimeouts,
    net::{ChunkSink, Flow, HttpClient, NetError, Transfer},
};
use log::{debug, warn};
use reqwless::{
    client::HttpClient as ReqwlessClient, headers::ContentType, request::Method,
    request::RequestBuilder,
};

pub const TCP_BUFFER_SIZE: usize = 4096;
const HEADER_BUFFER_SIZE: usize = 2048;
const BODY_CHUNK_SIZE: usize = 16 * 1024;

pub type HttpTcpState = TcpClientState<1, TCP_BUFFER_SIZE, TCP_BUFFER_SIZE>;

/// Plain HTTP client over the embassy-net stack.
///
/// Every request carries the node identity headers. Each step runs under the
/// configured deadline.
pub struct ReqwlessHttp<'a> {
    tcp: TcpClient<'a, 1, TCP_BUFFER_SIZE, TCP_BUFFER_SIZE>,
    dns: DnsSocket<'a>,
    device_id: &'static str,
    user_agent: &'static str,
    timeouts: NetworkTimeouts,
    header_buf: [u8; HEADER_BUFFER_SIZE],
    chunk: Vec<u8>,
}

impl<'a> ReqwlessHttp<'a> {
    pub fn new(
        stack: Stack<'a>,
        state: &'a HttpTcpState,
        device_id: &'static str,
        user_agent: &'static str,
        timeouts: NetworkTimeouts,
    ) -> Self {
        Self {
            tcp: TcpClient::new(stack, state),
            dns: DnsSocket::new(stack),
            device_id,
            user_agent,
            timeouts,
            header_buf: [0u8; HEADER_BUFFER_SIZE],
            chunk: vec![0u8; BODY_CHUNK_SIZE],
        }
    }
}

fn request_error(err: reqwless::Error) -> NetError {
    match err {
        reqwless::Error::Dns => NetError::Dns,
        reqwless::Error::Network(_) => NetError::Connect,
        _ => NetError::Io,
    }
}

impl HttpClient for ReqwlessHttp<'_> {
    async fn get<S: ChunkSink>(&mut self, url: &str, sink: &mut S) -> Result<Transfer, NetError> {
        let request_timeout = Duration::from_millis(self.timeouts.request_ms as u64);
        let read_timeout = Duration::from_millis(self.timeouts.read_ms as u64);
        let headers = [("X-Device-ID", self.device_id), ("User-Agent", self.user_agent)];

        let mut client = ReqwlessClient::new(&self.tcp, &self.dns);
        let mut request = with_timeout(request_timeout, client.request(Method::GET, url))
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(request_error)?
            .headers(&headers);

        let response = with_timeout(request_timeout, request.send(&mut self.header_buf))
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(request_error)?;

        let status = response.status.0;
        if !(200..300).contains(&status) {
            warn!("http GET {} status={}", url, status);
            return Err(NetError::Status(status));
        }

        let content_length = response.content_length.map(|len| len as u32);
        let mut transfer = Transfer {
            bytes: 0,
            content_length,
            stopped_early: false,
        };

        match sink.begin(content_length) {
            Flow::Continue => {}
            Flow::Stop => {
                transfer.stopped_early = true;
                return Ok(transfer);
            }
            Flow::Abort => return Err(NetError::Aborted),
        }

        let mut reader = response.body().reader();
        loop {
            let read = with_timeout(read_timeout, reader.read(&mut self.chunk))
                .await
                .map_err(|_| NetError::Timeout)?
                .map_err(|err| {
                    warn!("http GET {} read failed: {:?}", url, err);
                    NetError::Io
                })?;
            if read == 0 {
                break;
            }

            transfer.bytes = transfer.bytes.saturating_add(read as u32);
            match sink.chunk(&self.chunk[..read]) {
                Flow::Continue => {}
                Flow::Stop => {
                    transfer.stopped_early = true;
                    break;
                }
                Flow::Abort => return Err(NetError::Aborted),
            }
        }

        debug!(
            "http GET {} bytes={} content_length={:?}",
            url, transfer.bytes, transfer.content_length
        );
        Ok(transfer)
    }

    async fn post_json(&mut self, url: &str, body: &[u8]) -> Result<u16, NetError> {
        let request_timeout = Duration::from_millis(self.timeouts.request_ms as u64);
        let headers = [("X-Device-ID", self.device_id), ("User-Agent", self.user_agent)];

        let mut client = ReqwlessClient::new(&self.tcp, &self.dns);
        let mut request = with_timeout(request_timeout, client.request(Method::POST, url))
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(request_error)?
            .headers(&headers)
            .content_type(ContentType::ApplicationJson)
            .body(body);

        let response = with_timeout(request_timeout, request.send(&mut self.header_buf))
            .await
            .map_err(|_| NetError::Timeout)?
            .map_err(request_error)?;

        Ok(response.status.0)
    }
}
