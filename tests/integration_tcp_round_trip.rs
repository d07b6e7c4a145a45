//! S1 -- Echo over TCP: register the `Str` transferable, bind `Echo@{cc.test,
//! 0.1.0}` on a loopback TCP address, and confirm a client call returns the
//! same payload the CRM would return locally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crm_rpc::client::{ClientConfig, ClientProxy};
use crm_rpc::error::RpcError;
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
        vec![MethodSignature::new("echo", &[("value", "string")], "string", false)],
    )
}

#[tokio::test]
async fn tcp_round_trip_returns_the_same_value_the_crm_holds_locally() {
    let server = Server::new(ServerConfig {
        name: "echo".into(),
        crm: Arc::new(EchoCrm),
        interface: echo_interface(),
        bind_address: "tcp://127.0.0.1:17011".into(),
        transport: TransportConfig::default(),
        on_shutdown: None,
    });
    server.start().await.unwrap();

    let proxy = ClientProxy::connect("tcp://127.0.0.1:17011", echo_interface(), ClientConfig::default())
        .await
        .unwrap();

    let mut arg = Vec::new();
    "hello".to_string().serialize(&mut arg);
    let reply = proxy.call("echo", &arg).await.unwrap();
    let (decoded, _) = String::deserialize(&reply).unwrap();
    assert_eq!(decoded, "hello");

    server.stop(Duration::from_secs(1)).await.unwrap();
}
