//! S6 -- Decoder rejects payload cap: configure `max_payload = 1024`, send a
//! 4 KiB byte-string argument, and confirm the server replies `ERROR_INVALID`
//! with a message mentioning the cap, closing the connection afterward.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crm_rpc::client::{ClientConfig, ClientProxy};
use crm_rpc::error::{RpcError, Status};
use crm_rpc::registry::{InterfaceDescriptor, MethodSignature, Transferable};
use crm_rpc::server::{CrmDispatch, Server, ServerConfig};
use crm_rpc::transport::TransportConfig;

struct EchoCrm;

#[async_trait]
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
        vec![MethodSignature::new("echo", &[("value", "bytes")], "bytes", false)],
    )
}

#[tokio::test]
async fn oversized_argument_is_rejected_with_payload_too_large() {
    let capped_transport = TransportConfig {
        max_payload: 1024,
        ..TransportConfig::default()
    };

    let server = Server::new(ServerConfig {
        name: "echo".into(),
        crm: Arc::new(EchoCrm),
        interface: echo_interface(),
        bind_address: "thread://payload-cap".into(),
        transport: capped_transport.clone(),
        on_shutdown: None,
    });
    server.start().await.unwrap();

    let proxy = ClientProxy::connect(
        "thread://payload-cap",
        echo_interface(),
        ClientConfig {
            transport: capped_transport,
            ..ClientConfig::default()
        },
    )
    .await
    .unwrap();

    use crm_rpc::registry::Bytes;
    let mut arg = Vec::new();
    Bytes(vec![0u8; 4096]).serialize(&mut arg);

    let err = proxy.call("echo", &arg).await.unwrap_err();
    assert_eq!(err.status, Status::ErrorInvalid);
    assert!(err.message.contains("payload too large"), "got: {}", err.message);

    server.stop(Duration::from_secs(1)).await.unwrap();
}
