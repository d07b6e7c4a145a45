//! # Component Runtime
//!
//! An ambient, task-scoped binding that makes a [`ClientProxy`] available to
//! component functions without threading it through every call explicitly.
//! Backed by [`tokio::task_local!`] rather than a process-global, so
//! parallel tasks bound to different addresses never observe each other's
//! proxy -- satisfying the "must not use unguarded process-globals" rule.
//!
//! Two entry points:
//!
//! - [`connect_crm`] opens a proxy, installs it as the ambient context for
//!   the duration of a scope, and closes it on exit (including on error
//!   exit, since the scope's future is simply dropped).
//! - [`with_component`] is the decorator equivalent: given an address and an
//!   interface, it reuses an already-ambient proxy for that interface if one
//!   is bound, or opens one scoped to just this call.

use std::sync::Arc;

use crate::client::{ClientConfig, ClientProxy};
use crate::error::RpcError;
use crate::registry::InterfaceDescriptor;

tokio::task_local! {
    static AMBIENT_PROXY: Arc<ClientProxy>;
}

/// Run `body` with `proxy` bound as the ambient context for its duration.
/// On return (success, error, or panic unwind), the ambient binding is torn
/// down and `body`'s own return value/error propagates unchanged; the
/// proxy's connections are returned to the OS/process only when `proxy`
/// itself is dropped by the caller.
pub async fn connect_crm<F, Fut, T>(
    address: impl Into<String>,
    interface: InterfaceDescriptor,
    config: ClientConfig,
    body: F,
) -> Result<T, RpcError>
where
    F: FnOnce(Arc<ClientProxy>) -> Fut,
    Fut: std::future::Future<Output = Result<T, RpcError>>,
{
    let proxy = Arc::new(ClientProxy::connect(address, interface, config).await?);
    AMBIENT_PROXY.scope(proxy.clone(), body(proxy)).await
}

/// Component-decoration equivalent. If an ambient proxy for `interface` is
/// already bound in the current task, it is reused (matched by descriptor
/// identity, no structural subtyping). Otherwise a proxy is opened scoped to
/// just this call, using `address`, and closed on return.
pub async fn with_component<F, Fut, T>(
    address: impl Into<String>,
    interface: InterfaceDescriptor,
    config: ClientConfig,
    body: F,
) -> Result<T, RpcError>
where
    F: FnOnce(Arc<ClientProxy>) -> Fut,
    Fut: std::future::Future<Output = Result<T, RpcError>>,
{
    if let Ok(ambient) = AMBIENT_PROXY.try_with(|p| p.clone()) {
        if ambient.interface().namespace == interface.namespace
            && ambient.interface().name == interface.name
            && ambient.interface().major == interface.major
            && ambient.interface().minor == interface.minor
        {
            return body(ambient).await;
        }
    }
    let proxy = Arc::new(ClientProxy::connect(address, interface, config).await?);
    body(proxy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::registry::{MethodSignature, Transferable};
    use crate::server::{CrmDispatch, Server, ServerConfig};
    use crate::transport::TransportConfig;
    use std::sync::Arc as StdArc;
    use std::time::Duration;

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
    async fn connect_crm_scopes_the_ambient_proxy_to_the_body() {
        let server = Server::new(ServerConfig {
            name: "echo".into(),
            crm: StdArc::new(EchoCrm),
            interface: echo_interface(),
            bind_address: "thread://runtime-scope-test".into(),
            transport: TransportConfig::default(),
            on_shutdown: None,
        });
        server.start().await.unwrap();

        let result = connect_crm(
            "thread://runtime-scope-test",
            echo_interface(),
            ClientConfig::default(),
            |proxy| async move {
                let mut arg = Vec::new();
                "hi".to_string().serialize(&mut arg);
                proxy.call("echo", &arg).await
            },
        )
        .await
        .unwrap();

        let (decoded, _) = String::deserialize(&result).unwrap();
        assert_eq!(decoded, "hi");

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn parallel_tasks_do_not_observe_each_others_ambient_binding() {
        let server_a = Server::new(ServerConfig {
            name: "a".into(),
            crm: StdArc::new(EchoCrm),
            interface: echo_interface(),
            bind_address: "thread://runtime-isolation-a".into(),
            transport: TransportConfig::default(),
            on_shutdown: None,
        });
        let server_b = Server::new(ServerConfig {
            name: "b".into(),
            crm: StdArc::new(EchoCrm),
            interface: echo_interface(),
            bind_address: "thread://runtime-isolation-b".into(),
            transport: TransportConfig::default(),
            on_shutdown: None,
        });
        server_a.start().await.unwrap();
        server_b.start().await.unwrap();

        let task_a = tokio::spawn(async move {
            connect_crm(
                "thread://runtime-isolation-a",
                echo_interface(),
                ClientConfig::default(),
                |proxy| async move {
                    let bound = AMBIENT_PROXY.try_with(|p| p.clone());
                    assert!(bound.is_ok());
                    let _ = proxy;
                    Ok::<(), RpcError>(())
                },
            )
            .await
        });
        let task_b = tokio::spawn(async move {
            // No ambient binding installed in this task: must not see task_a's.
            AMBIENT_PROXY.try_with(|p| p.clone()).is_err()
        });

        task_a.await.unwrap().unwrap();
        assert!(task_b.await.unwrap());

        server_a.stop(Duration::from_secs(1)).await.unwrap();
        server_b.stop(Duration::from_secs(1)).await.unwrap();
    }
}
