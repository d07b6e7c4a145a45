//! # Client Proxy
//!
//! Given an interface descriptor and an address, synthesizes a callable
//! surface: each call marshals its arguments, draws a connection from a
//! bounded per-(address, interface) pool, sends the call envelope, and
//! decodes the reply. Connections are handshake-validated once, on first
//! use; the pool reconnects on the next acquire after any connection
//! observes a transport error.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::envelope::{self, CallFlags};
use crate::error::{RpcError, Status};
use crate::registry::InterfaceDescriptor;
use crate::transport::{self, Connection, TransportConfig};

pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_POOL_WAIT: Duration = Duration::from_secs(5);

/// Tunables for one [`ClientProxy`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub pool_size: usize,
    pub pool_wait: Duration,
    pub call_timeout: Duration,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_size: transport::env_var_parsed("CCRPC_POOL_SIZE").unwrap_or(DEFAULT_POOL_SIZE),
            pool_wait: DEFAULT_POOL_WAIT,
            call_timeout: transport::env_var_parsed::<u64>("CCRPC_DEFAULT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_millis(crate::defaults::DEFAULT_TIMEOUT_MS)),
            transport: TransportConfig::default(),
        }
    }
}

struct Pool {
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    permits: Semaphore,
}

/// A callable proxy bound to one `(address, interface)` pair. Reentrant:
/// concurrent calls draw independent connections from the pool.
pub struct ClientProxy {
    address: String,
    interface: InterfaceDescriptor,
    config: ClientConfig,
    pool: Arc<Pool>,
}

impl ClientProxy {
    pub async fn connect(
        address: impl Into<String>,
        interface: InterfaceDescriptor,
        config: ClientConfig,
    ) -> Result<Self, RpcError> {
        let pool = Arc::new(Pool {
            idle: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(config.pool_size),
        });
        Ok(Self {
            address: address.into(),
            interface,
            config,
            pool,
        })
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Encode and send one call, returning the decoded reply payload on
    /// success or a structured error carrying `(status, message, address,
    /// method_name)` on any non-success status.
    pub async fn call(&self, method_name: &str, arg_blob: &[u8]) -> Result<Vec<u8>, RpcError> {
        let method_id = self.interface.method_id(method_name).ok_or_else(|| {
            RpcError::invalid(format!("unknown method: {}", method_name))
                .with_context(&self.address, method_name)
        })?;

        let permit = tokio::time::timeout(self.config.pool_wait, self.pool.permits.acquire())
            .await
            .map_err(|_| {
                RpcError::timeout("connection pool wait exhausted", &self.address)
                    .with_context(&self.address, method_name)
            })?
            .map_err(|_| RpcError::unavailable("connection pool closed", &self.address))?;

        let mut conn = match self.acquire_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                drop(permit);
                return Err(e.with_context(&self.address, method_name));
            }
        };

        let call = envelope::encode_call(method_id, CallFlags::empty(), arg_blob);
        let result = self.round_trip(&mut conn, &call, method_name).await;

        match &result {
            Ok(_) => {
                self.pool.idle.lock().await.push_back(conn);
            }
            Err(e) if e.status == Status::ErrorUnavailable => {
                let _ = conn.close().await;
            }
            Err(_) => {
                self.pool.idle.lock().await.push_back(conn);
            }
        }
        drop(permit);
        result
    }

    async fn round_trip(
        &self,
        conn: &mut Box<dyn Connection>,
        call: &[u8],
        method_name: &str,
    ) -> Result<Vec<u8>, RpcError> {
        tokio::time::timeout(self.config.call_timeout, async {
            conn.send(call).await?;
            let frame = conn.recv().await?;
            let reply = envelope::decode_reply(&frame, self.config.transport.max_payload)?;
            if reply.status.is_success() {
                Ok(reply.payload)
            } else {
                let message = String::from_utf8_lossy(&reply.payload).into_owned();
                Err(RpcError::new(reply.status, message, &self.address, method_name))
            }
        })
        .await
        .map_err(|_| RpcError::timeout("call timed out", &self.address).with_context(&self.address, method_name))?
    }

    async fn acquire_connection(&self) -> Result<Box<dyn Connection>, RpcError> {
        if let Some(conn) = self.pool.idle.lock().await.pop_front() {
            return Ok(conn);
        }
        self.open_and_handshake().await
    }

    async fn open_and_handshake(&self) -> Result<Box<dyn Connection>, RpcError> {
        let mut conn = transport::connect(&self.address, &self.config.transport).await?;
        debug!("opened new connection to {}", self.address);
        let handshake = envelope::encode_handshake(
            &self.interface.namespace,
            &self.interface.name,
            self.interface.major,
            self.interface.minor,
        );
        conn.send(&handshake).await?;
        let frame = conn.recv().await?;
        let reply = envelope::decode_reply(&frame, self.config.transport.max_payload)?;
        if !reply.status.is_success() {
            let message = String::from_utf8_lossy(&reply.payload).into_owned();
            let _ = conn.close().await;
            warn!("interface handshake with {} failed: {}", self.address, message);
            return Err(RpcError::new(reply.status, message, &self.address, ""));
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MethodSignature;
    use crate::server::{CrmDispatch, Server, ServerConfig};
    use std::sync::Arc as StdArc;

    struct EchoCrm;

    #[async_trait::async_trait]
    impl CrmDispatch for EchoCrm {
        async fn dispatch(&self, method_id: u32, arg_blob: &[u8]) -> Result<Vec<u8>, RpcError> {
            if method_id == 0 {
                Ok(arg_blob.to_vec())
            } else {
                Err(RpcError::invalid("unknown method"))
            }
        }
    }

    fn echo_interface() -> InterfaceDescriptor {
        InterfaceDescriptor::new(
            "cc.test",
            "Echo",
            0,
            1,
            vec![MethodSignature::new("echo", &[("value", "string")], "string", false)],
        )
    }

    #[tokio::test]
    async fn call_round_trips_through_a_live_server() {
        let server = Server::new(ServerConfig {
            name: "echo".into(),
            crm: StdArc::new(EchoCrm),
            interface: echo_interface(),
            bind_address: "thread://client-round-trip".into(),
            transport: TransportConfig::default(),
            on_shutdown: None,
        });
        server.start().await.unwrap();

        let proxy = ClientProxy::connect(
            "thread://client-round-trip",
            echo_interface(),
            ClientConfig::default(),
        )
        .await
        .unwrap();

        use crate::registry::Transferable;
        let mut arg = Vec::new();
        "hello".to_string().serialize(&mut arg);
        let reply = proxy.call("echo", &arg).await.unwrap();
        assert_eq!(reply, arg);

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_fails_locally_without_a_round_trip() {
        let proxy = ClientProxy::connect(
            "thread://nonexistent-address-for-unknown-method-test",
            echo_interface(),
            ClientConfig::default(),
        )
        .await
        .unwrap();
        let err = proxy.call("does_not_exist", &[]).await.unwrap_err();
        assert_eq!(err.status, Status::ErrorInvalid);
    }
}
