//! A resource-oriented RPC core: an interface/type registry, a wire envelope
//! and dispatch engine, a multi-transport server/client abstraction, and a
//! task-scoped component runtime for ambient proxy injection.
//!
//! See the module-level docs of [`envelope`], [`registry`], [`transport`],
//! [`server`], [`client`], and [`runtime`] for the five layers; [`bridge`]
//! covers the external tool-hook contract.

pub mod bridge;
pub mod cli;
pub mod client;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod transport;

pub use client::{ClientConfig, ClientProxy};
pub use envelope::{CallEnvelope, CallFlags, ReplyEnvelope};
pub use error::{RpcError, Status};
pub use registry::{InterfaceDescriptor, MethodSignature, Transferable, TypeRegistry};
pub use runtime::{connect_crm, with_component};
pub use server::{CrmDispatch, Server, ServerConfig, ServerState};
pub use transport::{Address, Connection, Listener, Scheme, TransportConfig};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fallback values used by [`transport::TransportConfig::default`] and
/// [`client::ClientConfig::default`] when the corresponding environment
/// variable named below is unset or unparseable.
pub mod defaults {
    /// `CCRPC_MAX_PAYLOAD`
    pub const MAX_PAYLOAD: u32 = crate::envelope::DEFAULT_MAX_PAYLOAD;
    /// `CCRPC_POOL_SIZE`
    pub const POOL_SIZE: usize = crate::client::DEFAULT_POOL_SIZE;
    /// `CCRPC_DEFAULT_TIMEOUT_MS`
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
}
