//! HTTP transport: one call envelope per `POST /rpc`, kept alive.
//!
//! Per the wire format, each logical `send`/`recv` pair on the [`Connection`]
//! trait corresponds to one HTTP/1.1 request/response transaction over a
//! persistent `TcpStream`; the interface handshake (the first call any
//! connection makes) is simply the first such transaction. This keeps the
//! uniform five-transport contract intact without pulling in an HTTP client
//! crate: parsing is hand-rolled against the minimal subset of HTTP/1.1 this
//! framework needs (fixed headers, `Content-Length`-delimited bodies, no
//! chunked encoding, no redirects).

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::{unavailable, Connection, Listener, TransportConfig};
use crate::error::RpcError;

const CONTENT_TYPE: &str = "application/octet-stream";

/// Client side: issues the POST, reads back the response body.
pub struct HttpConnection {
    stream: BufReader<TcpStream>,
    authority: String,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), RpcError> {
        let request = format!(
            "POST /rpc HTTP/1.1\r\nHost: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
            self.authority,
            CONTENT_TYPE,
            frame.len()
        );
        self.stream
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|e| unavailable("http send", e))?;
        self.stream
            .get_mut()
            .write_all(frame)
            .await
            .map_err(|e| unavailable("http send", e))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| unavailable("http send", e))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, RpcError> {
        let (_, content_length) = read_head(&mut self.stream).await?;
        read_body(&mut self.stream, content_length).await
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        let _ = self.stream.get_mut().shutdown().await;
        Ok(())
    }

    fn peer_description(&self) -> String {
        self.authority.clone()
    }
}

/// Server side: reads the request line + headers + body, hands the frame
/// back through `recv`, expects the server core to answer via `send`, which
/// writes a `200 OK` (or `400`/`503`) with the reply envelope as the body.
pub struct HttpServerConnection {
    stream: BufReader<TcpStream>,
    peer: String,
}

#[async_trait]
impl Connection for HttpServerConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), RpcError> {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
            CONTENT_TYPE,
            frame.len()
        );
        self.stream
            .get_mut()
            .write_all(response.as_bytes())
            .await
            .map_err(|e| unavailable("http send", e))?;
        self.stream
            .get_mut()
            .write_all(frame)
            .await
            .map_err(|e| unavailable("http send", e))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| unavailable("http send", e))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, RpcError> {
        let (request_line, content_length) = read_head(&mut self.stream).await?;
        if !request_line.starts_with("POST /rpc ") {
            return Err(RpcError::invalid(format!(
                "unsupported HTTP request line: {}",
                request_line
            )));
        }
        read_body(&mut self.stream, content_length).await
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        let _ = self.stream.get_mut().shutdown().await;
        Ok(())
    }

    fn peer_description(&self) -> String {
        self.peer.clone()
    }
}

/// Read the request/status line and headers, returning the line and the
/// declared `Content-Length` (0 if absent, matching a void body).
async fn read_head(stream: &mut BufReader<TcpStream>) -> Result<(String, usize), RpcError> {
    let mut line = String::new();
    stream
        .read_line(&mut line)
        .await
        .map_err(|e| unavailable("http recv", e))?;
    if line.is_empty() {
        return Err(unavailable("http recv", "peer closed connection"));
    }
    let first_line = line.trim_end().to_string();

    let mut content_length = 0usize;
    loop {
        let mut header_line = String::new();
        stream
            .read_line(&mut header_line)
            .await
            .map_err(|e| unavailable("http recv", e))?;
        let trimmed = header_line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| RpcError::invalid("malformed Content-Length header"))?;
            }
        }
    }
    Ok((first_line, content_length))
}

async fn read_body(
    stream: &mut BufReader<TcpStream>,
    content_length: usize,
) -> Result<Vec<u8>, RpcError> {
    if content_length as u32 > crate::envelope::DEFAULT_MAX_PAYLOAD {
        return Err(RpcError::invalid("payload too large"));
    }
    let mut body = vec![0u8; content_length];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| unavailable("http recv", e))?;
    Ok(body)
}

pub async fn connect(authority: &str, config: &TransportConfig) -> Result<Box<dyn Connection>, RpcError> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(authority))
        .await
        .map_err(|_| unavailable("http connect", "connection attempt timed out"))?
        .map_err(|e| unavailable("http connect", e))?;
    debug!("http connected to {}", authority);
    Ok(Box::new(HttpConnection {
        stream: BufReader::new(stream),
        authority: authority.to_string(),
    }))
}

pub struct HttpListenerHandle {
    listener: TcpListener,
    local: String,
}

#[async_trait]
impl Listener for HttpListenerHandle {
    async fn accept(&mut self) -> Result<Box<dyn Connection>, RpcError> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| unavailable("http accept", e))?;
        debug!("http accepted connection from {}", peer_addr);
        Ok(Box::new(HttpServerConnection {
            stream: BufReader::new(stream),
            peer: peer_addr.to_string(),
        }))
    }

    fn local_address(&self) -> String {
        self.local.clone()
    }
}

pub async fn bind(authority: &str, _config: &TransportConfig) -> Result<Box<dyn Listener>, RpcError> {
    let listener = TcpListener::bind(authority)
        .await
        .map_err(|e| unavailable("http bind", e))?;
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| authority.to_string());
    debug!("http listening on {}", local);
    Ok(Box::new(HttpListenerHandle { listener, local }))
}
