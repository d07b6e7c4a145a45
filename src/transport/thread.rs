//! In-process transport over a process-wide registry of named endpoints.
//!
//! `thread://<name>` addresses are opaque within one process: `bind` claims
//! a name in a static table, and `connect` looks it up to obtain a pair of
//! bounded channels emulating a socket pair. Per the design notes, these
//! addresses are never inherited across a fork -- the registry lives in
//! process memory only.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{unavailable, Connection, Listener};
use crate::error::RpcError;

const QUEUE_DEPTH: usize = 64;

type Frame = Vec<u8>;

struct PendingAccept {
    from_client: mpsc::Receiver<Frame>,
    to_client: mpsc::Sender<Frame>,
}

fn registry() -> &'static Mutex<HashMap<String, mpsc::Sender<PendingAccept>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, mpsc::Sender<PendingAccept>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct ThreadListener {
    name: String,
    accept_rx: mpsc::Receiver<PendingAccept>,
}

impl Drop for ThreadListener {
    fn drop(&mut self) {
        registry().lock().unwrap().remove(&self.name);
    }
}

#[async_trait]
impl Listener for ThreadListener {
    async fn accept(&mut self) -> Result<Box<dyn Connection>, RpcError> {
        let pending = self
            .accept_rx
            .recv()
            .await
            .ok_or_else(|| unavailable("thread accept", "listener closed"))?;
        Ok(Box::new(ThreadConnection {
            name: self.name.clone(),
            tx: pending.to_client,
            rx: pending.from_client,
        }))
    }

    fn local_address(&self) -> String {
        format!("thread://{}", self.name)
    }
}

pub struct ThreadConnection {
    name: String,
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl Connection for ThreadConnection {
    async fn send(&mut self, frame: &[u8]) -> Result<(), RpcError> {
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| unavailable("thread send", "peer disconnected"))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, RpcError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| unavailable("thread recv", "peer disconnected"))
    }

    async fn close(&mut self) -> Result<(), RpcError> {
        Ok(())
    }

    fn peer_description(&self) -> String {
        format!("thread://{}", self.name)
    }
}

pub async fn bind(name: &str) -> Result<Box<dyn Listener>, RpcError> {
    let (accept_tx, accept_rx) = mpsc::channel(QUEUE_DEPTH);
    let mut reg = registry().lock().unwrap();
    if reg.contains_key(name) {
        return Err(RpcError::invalid(format!(
            "thread address already bound: {}",
            name
        )));
    }
    debug!("thread transport bound at thread://{}", name);
    reg.insert(name.to_string(), accept_tx);
    Ok(Box::new(ThreadListener {
        name: name.to_string(),
        accept_rx,
    }))
}

pub async fn connect(name: &str) -> Result<Box<dyn Connection>, RpcError> {
    let accept_tx = {
        let reg = registry().lock().unwrap();
        reg.get(name).cloned().ok_or_else(|| {
            unavailable("thread connect", format!("no listener bound at thread://{}", name))
        })?
    };
    let (client_to_server, server_from_client) = mpsc::channel(QUEUE_DEPTH);
    let (server_to_client, client_from_server) = mpsc::channel(QUEUE_DEPTH);
    accept_tx
        .send(PendingAccept {
            from_client: server_from_client,
            to_client: server_to_client,
        })
        .await
        .map_err(|_| unavailable("thread connect", "listener closed"))?;
    Ok(Box::new(ThreadConnection {
        name: name.to_string(),
        tx: client_to_server,
        rx: client_from_server,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_and_server_exchange_one_frame() {
        let name = "test-thread-echo";
        let mut listener = bind(name).await.unwrap();

        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let frame = conn.recv().await.unwrap();
            conn.send(&frame).await.unwrap();
        });

        let mut client = connect(name).await.unwrap();
        client.send(b"hello").await.unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_without_listener_is_unavailable() {
        let err = connect("nobody-home").await.unwrap_err();
        assert_eq!(err.status, crate::error::Status::ErrorUnavailable);
    }

    #[tokio::test]
    async fn rebinding_the_same_name_fails() {
        let name = "test-thread-rebind";
        let _listener = bind(name).await.unwrap();
        let err = bind(name).await.unwrap_err();
        assert_eq!(err.status, crate::error::Status::ErrorInvalid);
    }
}
