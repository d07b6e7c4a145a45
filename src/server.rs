//! # Server Core
//!
//! Binds a transport listener, dispatches incoming call envelopes to a
//! [`CrmDispatch`] implementation, and manages the uniform lifecycle
//! (`CONSTRUCTED -> BOUND -> RUNNING -> STOPPING -> STOPPED`). One `Server`
//! owns exactly one CRM instance; the CRM receives exactly one termination
//! call, at the end of `stop()`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::envelope::{self, HANDSHAKE_METHOD_ID};
use crate::error::{RpcError, Status};
use crate::registry::InterfaceDescriptor;
use crate::transport::{self, Connection, Listener, TransportConfig};

/// Implemented by a Core Resource Model's generated (or hand-written)
/// dispatch glue: given a decoded `method_id` and raw argument blob, invoke
/// the matching method and return an encoded reply payload.
///
/// A CRM is not required to implement this directly -- it is the shape the
/// server core depends on, typically produced by a small per-CRM adapter
/// that matches on `method_id` and calls into the CRM's own methods.
#[async_trait::async_trait]
pub trait CrmDispatch: Send + Sync {
    /// Dispatch one already-decoded call. Returning `Err` produces an
    /// `ERROR_INVALID` reply carrying the error's message; the dispatch loop
    /// itself handles encoding the reply envelope.
    async fn dispatch(&self, method_id: u32, arg_blob: &[u8]) -> Result<Vec<u8>, RpcError>;

    /// Invoked exactly once, as the last step of `Server::stop`, regardless
    /// of whether the server is shutting down cleanly or due to an error.
    async fn terminate(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructed,
    Bound,
    Running,
    Stopping,
    Stopped,
}

/// Configuration for constructing a [`Server`].
pub struct ServerConfig<D> {
    pub name: String,
    pub crm: Arc<D>,
    pub interface: InterfaceDescriptor,
    pub bind_address: String,
    pub transport: TransportConfig,
    pub on_shutdown: Option<Box<dyn Fn() + Send + Sync>>,
}

/// A bound, running (or not-yet-started, or stopped) RPC server for one CRM.
pub struct Server<D: CrmDispatch + 'static> {
    name: String,
    crm: Arc<D>,
    interface: Arc<InterfaceDescriptor>,
    bind_address: String,
    transport_config: TransportConfig,
    on_shutdown: Option<Box<dyn Fn() + Send + Sync>>,
    state: watch::Sender<ServerState>,
    state_rx: watch::Receiver<ServerState>,
    in_flight: Arc<AtomicU32>,
    drain_notify: Arc<Notify>,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
    shutdown_signal: Arc<Notify>,
}

impl<D: CrmDispatch + 'static> Server<D> {
    pub fn new(config: ServerConfig<D>) -> Self {
        let (state, state_rx) = watch::channel(ServerState::Constructed);
        Self {
            name: config.name,
            crm: config.crm,
            interface: Arc::new(config.interface),
            bind_address: config.bind_address,
            transport_config: config.transport,
            on_shutdown: config.on_shutdown,
            state,
            state_rx,
            in_flight: Arc::new(AtomicU32::new(0)),
            drain_notify: Arc::new(Notify::new()),
            accept_loop: Mutex::new(None),
            shutdown_signal: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state_rx.borrow()
    }

    /// Bind the transport and start accepting connections. Moves
    /// `CONSTRUCTED -> BOUND -> RUNNING`.
    pub async fn start(&self) -> Result<(), RpcError> {
        if self.state() != ServerState::Constructed {
            return Err(RpcError::invalid("server already started"));
        }
        let mut listener = transport::bind(&self.bind_address, &self.transport_config).await?;
        self.state.send_replace(ServerState::Bound);
        debug!("server '{}' bound at {}", self.name, self.bind_address);

        let crm = self.crm.clone();
        let interface = self.interface.clone();
        let in_flight = self.in_flight.clone();
        let drain_notify = self.drain_notify.clone();
        let shutdown_signal = self.shutdown_signal.clone();
        let state_rx = self.state_rx.clone();
        let max_payload = self.transport_config.max_payload;
        let server_name = self.name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    conn = listener.accept() => conn,
                    _ = shutdown_signal.notified() => {
                        debug!("server '{}' accept loop stopping", server_name);
                        break;
                    }
                };
                let conn = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("server '{}' accept failed: {}", server_name, e);
                        continue;
                    }
                };
                let crm = crm.clone();
                let interface = interface.clone();
                let in_flight = in_flight.clone();
                let drain_notify = drain_notify.clone();
                let state_rx = state_rx.clone();
                tokio::spawn(async move {
                    serve_connection(conn, crm, interface, in_flight, drain_notify, max_payload, state_rx).await;
                });
            }
        });
        *self.accept_loop.lock().await = Some(handle);
        self.state.send_replace(ServerState::Running);
        debug!("server '{}' running", self.name);
        Ok(())
    }

    /// Stop accepting new connections, let in-flight calls finish (bounded
    /// by `timeout`), then invoke `on_shutdown` exactly once.
    pub async fn stop(&self, timeout: Duration) -> Result<(), RpcError> {
        if self.state() == ServerState::Stopped {
            return Ok(());
        }
        self.state.send_replace(ServerState::Stopping);
        debug!("server '{}' stopping", self.name);
        self.shutdown_signal.notify_waiters();

        if let Some(handle) = self.accept_loop.lock().await.take() {
            handle.abort();
        }

        let drain = async {
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                self.drain_notify.notified().await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                "server '{}' stop grace window elapsed with {} call(s) still in flight",
                self.name,
                self.in_flight.load(Ordering::SeqCst)
            );
        }

        self.crm.terminate().await;
        if let Some(cb) = &self.on_shutdown {
            cb();
        }
        self.state.send_replace(ServerState::Stopped);
        debug!("server '{}' stopped", self.name);
        Ok(())
    }

    /// Block until `STOPPED`, or until `timeout` elapses. A `timeout` of
    /// zero never blocks. Returning due to timeout does not itself stop the
    /// server -- the caller is expected to call `stop()`.
    pub async fn wait_for_termination(&self, timeout: Option<Duration>) {
        let mut rx = self.state_rx.clone();
        let wait = async {
            while *rx.borrow() != ServerState::Stopped {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        match timeout {
            Some(Duration::ZERO) => {}
            Some(d) => {
                let _ = tokio::time::timeout(d, wait).await;
            }
            None => wait.await,
        }
    }
}

async fn serve_connection(
    mut conn: Box<dyn Connection>,
    crm: Arc<dyn CrmDispatch>,
    interface: Arc<InterfaceDescriptor>,
    in_flight: Arc<AtomicU32>,
    drain_notify: Arc<Notify>,
    max_payload: u32,
    mut state_rx: watch::Receiver<ServerState>,
) {
    let peer = conn.peer_description();
    debug!("accepted connection from {}", peer);

    match perform_handshake(&mut conn, &interface, max_payload).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("interface mismatch from {}, closing connection", peer);
            let _ = conn.close().await;
            return;
        }
        Err(e) => {
            warn!("handshake failed from {}: {}", peer, e);
            let _ = conn.close().await;
            return;
        }
    }

    loop {
        let frame = tokio::select! {
            frame = conn.recv() => frame,
            _ = wait_for_stop(&mut state_rx) => {
                debug!("server stopping, closing connection from {}", peer);
                let _ = conn.close().await;
                break;
            }
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => {
                debug!("connection from {} closed", peer);
                break;
            }
        };

        let call = match envelope::decode_call(&frame, max_payload) {
            Ok(call) => call,
            Err(e) => {
                warn!("call decode failed from {}: {}", peer, e);
                let reply = envelope::encode_error_reply(e.status, &e.message);
                let _ = conn.send(&reply).await;
                continue;
            }
        };

        if call.method_id == HANDSHAKE_METHOD_ID {
            warn!("unexpected repeated handshake from {}", peer);
            let reply = envelope::encode_error_reply(Status::ErrorInvalid, "handshake already completed");
            let _ = conn.send(&reply).await;
            continue;
        }

        if interface.method_at(call.method_id).is_none() {
            let reply =
                envelope::encode_error_reply(Status::ErrorInvalid, "unknown method id");
            let _ = conn.send(&reply).await;
            continue;
        }

        in_flight.fetch_add(1, Ordering::SeqCst);
        let reply = match crm.dispatch(call.method_id, &call.arg_blob).await {
            Ok(payload) => envelope::encode_reply(Status::Success, &payload),
            Err(e) => {
                warn!(
                    "call to method_id {} from {} failed: {}",
                    call.method_id, peer, e.message
                );
                envelope::encode_error_reply(e.status, &e.message)
            }
        };
        let in_flight_after = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if in_flight_after == 0 {
            drain_notify.notify_waiters();
        }

        if let Err(e) = conn.send(&reply).await {
            error!("failed to send reply to {}: {}", peer, e);
            break;
        }
    }
}

/// Read and validate the mandatory first frame of a new connection.
/// Returns `Ok(true)` on a matching interface, `Ok(false)` on a well-formed
/// but mismatched handshake (caller should close the connection after the
/// mismatch reply has been sent).
async fn perform_handshake(
    conn: &mut Box<dyn Connection>,
    interface: &InterfaceDescriptor,
    max_payload: u32,
) -> Result<bool, RpcError> {
    let frame = conn.recv().await?;
    let call = envelope::decode_call(&frame, max_payload)?;
    if call.method_id != HANDSHAKE_METHOD_ID {
        let reply = envelope::encode_error_reply(Status::ErrorInvalid, "expected interface handshake");
        let _ = conn.send(&reply).await;
        return Ok(false);
    }
    let identity = envelope::decode_handshake(&call.arg_blob)?;
    let matches = identity.namespace == interface.namespace
        && identity.name == interface.name
        && identity.major == interface.major
        && identity.minor == interface.minor;
    let reply = if matches {
        envelope::encode_reply(Status::Success, &[])
    } else {
        envelope::encode_error_reply(Status::ErrorInvalid, "interface mismatch")
    };
    conn.send(&reply).await?;
    Ok(matches)
}

/// Resolve as soon as the server's state leaves `Running`. Checked against
/// the watch's currently-held value first, so a worker that enters this
/// after `stop()` already flipped the state (rather than concurrently with
/// it) still observes the transition -- a plain `Notify` would miss it.
async fn wait_for_stop(state_rx: &mut watch::Receiver<ServerState>) {
    loop {
        if *state_rx.borrow() != ServerState::Running {
            return;
        }
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}
