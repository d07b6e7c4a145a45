//! # Transport Drivers
//!
//! Five interchangeable request/response channels -- `thread`, `memory`,
//! `ipc`, `tcp`, `http` -- selected purely by the scheme of an address URI.
//! Every driver implements the same [`Connection`]/[`Listener`] contract so
//! the server core and client proxy never need to know which one they are
//! talking to.
//!
//! Each `recv` delivers exactly one framed message; drivers own framing.
//! Ordering is FIFO of replies within one connection; across connections no
//! ordering is promised.

pub mod http;
pub mod ipc;
pub mod memory;
pub mod tcp;
pub mod thread;

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RpcError, Status};

/// Opaque identifier for one accepted connection on a multi-client listener.
pub type ConnectionId = u64;

pub(crate) fn next_connection_id() -> ConnectionId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle state of one transport endpoint (connection or listener),
/// mirroring the teacher's `TransportState` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Initializing,
    Connected,
    Disconnected,
}

/// Tunables shared by every driver. Not every field applies to every
/// transport (e.g. `buffer_size` is TCP/IPC-only); unused fields are ignored
/// rather than rejected, matching the teacher's `TransportConfig`.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub buffer_size: usize,
    pub max_payload: u32,
    pub connect_timeout: std::time::Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            max_payload: env_var_parsed("CCRPC_MAX_PAYLOAD")
                .unwrap_or(crate::envelope::DEFAULT_MAX_PAYLOAD),
            connect_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// Read and parse an optional environment variable, matching the teacher's
/// `std::env::var(..).unwrap_or_else(..)` idiom but returning `None` (rather
/// than a hardcoded fallback) for an absent or unparseable value so each
/// call site supplies its own default.
pub(crate) fn env_var_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// A bidirectional, connection-oriented channel carrying one framed message
/// per `send`/`recv`. Implemented independently by each of the five
/// transports; the server and client code above this module is written
/// entirely against this trait.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: &[u8]) -> Result<(), RpcError>;
    async fn recv(&mut self) -> Result<Vec<u8>, RpcError>;
    async fn close(&mut self) -> Result<(), RpcError>;

    /// Human-readable remote endpoint, used in error context and logs.
    fn peer_description(&self) -> String;
}

/// A bound endpoint that accepts new connections. `bind(addr)` produces one
/// of these; `accept()` yields connections in arrival order.
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> Result<Box<dyn Connection>, RpcError>;
    fn local_address(&self) -> String;
}

/// A parsed `scheme://authority` address. Authority interpretation is
/// scheme-specific: `thread`/`memory` treat it as an opaque name, `ipc`
/// treats it as a filesystem path, `tcp`/`http` treat it as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub scheme: Scheme,
    pub authority: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Thread,
    Memory,
    Ipc,
    Tcp,
    Http,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scheme::Thread => "thread",
            Scheme::Memory => "memory",
            Scheme::Ipc => "ipc",
            Scheme::Tcp => "tcp",
            Scheme::Http => "http",
        };
        write!(f, "{}", s)
    }
}

impl Address {
    pub fn parse(uri: &str) -> Result<Self, RpcError> {
        let (scheme_str, authority) = uri
            .split_once("://")
            .ok_or_else(|| RpcError::invalid(format!("malformed address: {}", uri)))?;
        let scheme = match scheme_str {
            "thread" => Scheme::Thread,
            "memory" => Scheme::Memory,
            "ipc" => Scheme::Ipc,
            "tcp" => Scheme::Tcp,
            "http" => Scheme::Http,
            other => {
                return Err(RpcError::invalid(format!(
                    "unsupported address scheme: {}",
                    other
                )))
            }
        };
        if authority.is_empty() {
            return Err(RpcError::invalid(format!("empty authority: {}", uri)));
        }
        Ok(Self {
            scheme,
            authority: authority.to_string(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// Open a connection to `uri`, dispatching on scheme. This is the single
/// entry point the client proxy uses; it never touches a concrete transport
/// module directly.
pub async fn connect(uri: &str, config: &TransportConfig) -> Result<Box<dyn Connection>, RpcError> {
    let addr = Address::parse(uri)?;
    match addr.scheme {
        Scheme::Thread => thread::connect(&addr.authority).await,
        Scheme::Memory => memory::connect(&addr.authority).await,
        Scheme::Ipc => ipc::connect(&addr.authority, config).await,
        Scheme::Tcp => tcp::connect(&addr.authority, config).await,
        Scheme::Http => http::connect(&addr.authority, config).await,
    }
}

/// Bind a listener at `uri`, dispatching on scheme. Used by the server core.
pub async fn bind(uri: &str, config: &TransportConfig) -> Result<Box<dyn Listener>, RpcError> {
    let addr = Address::parse(uri)?;
    match addr.scheme {
        Scheme::Thread => thread::bind(&addr.authority).await,
        Scheme::Memory => memory::bind(&addr.authority).await,
        Scheme::Ipc => ipc::bind(&addr.authority, config).await,
        Scheme::Tcp => tcp::bind(&addr.authority, config).await,
        Scheme::Http => http::bind(&addr.authority, config).await,
    }
}

/// Shared helper: convert a transport-local I/O failure into the uniform
/// `ERROR_UNAVAILABLE` surfaced at the client/server boundary.
pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> RpcError {
    RpcError::new(Status::ErrorUnavailable, format!("{}: {}", context, err), "", "")
}
