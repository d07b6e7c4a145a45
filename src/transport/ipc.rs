//! IPC transport: a length-prefixed frame over a Unix domain socket.
//!
//! Framing matches `tcp`: a 4-byte big-endian length prefix then the frame.
//! Socket file lifecycle follows the teacher's `unix_domain_socket.rs`: only
//! the listener that created the socket file unlinks it on close (tracked
//! via `owns_socket_file`), and permissions are relaxed to `0o666` after
//! bind so peers running as a different user can still connect.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use super::{unavailable, Connection, Listener, TransportConfig};
use crate::error::RpcError;

pub struct IpcConnection {
    stream: UnixStream,
    peer: String,
}

impl IpcConnection {
    async fn read_frame(&mut self) -> Result<Vec<u8>, RpcError> {
        let mut len_bytes = [0u8; 4];
        self.stream
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| unavailable("ipc recv", e))?;
        let len = u32::from_be_bytes(len_bytes);
        if len > crate::envelope::DEFAULT_MAX_PAYLOAD {
            return Err(RpcError::invalid("payload too large"));
        }
        let mut data = vec![0u8; len as usize];
        self.stream
            .read_exact(&mut data)
            .await
            .map_err(|e| unavailable("ipc recv", e))?;
        Ok(data)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), RpcError> {
        let len = frame.len() as u32;
        self.stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| unavailable("ipc send", e))?;
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| unavailable("ipc send", e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| unavailable("ipc send", e))
    }
}

#[async_trait]
impl Connection for IpcConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), RpcError> {
        self.write_frame(frame).await
    }

    async fn recv(&mut self) -> Result<Vec<u8>, RpcError> {
        self.read_frame().await
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    fn peer_description(&self) -> String {
        self.peer.clone()
    }
}

pub struct IpcListenerHandle {
    listener: UnixListener,
    socket_path: PathBuf,
    owns_socket_file: bool,
}

impl Drop for IpcListenerHandle {
    fn drop(&mut self) {
        if self.owns_socket_file {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove socket file {:?}: {}", self.socket_path, e);
                }
            }
        }
    }
}

#[async_trait]
impl Listener for IpcListenerHandle {
    async fn accept(&mut self) -> Result<Box<dyn Connection>, RpcError> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| unavailable("ipc accept", e))?;
        debug!("ipc accepted connection on {:?}", self.socket_path);
        Ok(Box::new(IpcConnection {
            stream,
            peer: self.socket_path.to_string_lossy().into_owned(),
        }))
    }

    fn local_address(&self) -> String {
        format!("ipc://{}", self.socket_path.to_string_lossy())
    }
}

pub async fn connect(authority: &str, config: &TransportConfig) -> Result<Box<dyn Connection>, RpcError> {
    let path = PathBuf::from(authority);
    let stream = tokio::time::timeout(config.connect_timeout, UnixStream::connect(&path))
        .await
        .map_err(|_| unavailable("ipc connect", "connection attempt timed out"))?
        .map_err(|e| unavailable("ipc connect", e))?;
    debug!("ipc connected to {:?}", path);
    Ok(Box::new(IpcConnection {
        stream,
        peer: path.to_string_lossy().into_owned(),
    }))
}

pub async fn bind(authority: &str, _config: &TransportConfig) -> Result<Box<dyn Listener>, RpcError> {
    let path = PathBuf::from(authority);
    if path.exists() {
        // A stale socket file from a previous, uncleanly terminated run.
        // Binding to it would fail with AddrInUse, so unlink first.
        let _ = std::fs::remove_file(&path);
    }
    let listener = UnixListener::bind(&path).map_err(|e| unavailable("ipc bind", e))?;
    if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)) {
        warn!("failed to relax permissions on {:?}: {}", path, e);
    }
    debug!("ipc listening on {:?}", path);
    Ok(Box::new(IpcListenerHandle {
        listener,
        socket_path: path,
        owns_socket_file: true,
    }))
}
