//! S2 -- Interface mismatch, S3 -- Graceful shutdown, and invariants 4-7:
//! `wait_for_termination(0)` never blocks, `on_shutdown` fires exactly once
//! after the last in-flight call returns.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crm_rpc::client::{ClientConfig, ClientProxy};
use crm_rpc::envelope::{self, CallFlags};
use crm_rpc::error::{RpcError, Status};
use crm_rpc::registry::{InterfaceDescriptor, MethodSignature, Transferable};
use crm_rpc::server::{CrmDispatch, Server, ServerConfig, ServerState};
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

struct SleepyCrm;

#[async_trait]
impl CrmDispatch for SleepyCrm {
    async fn dispatch(&self, method_id: u32, _arg_blob: &[u8]) -> Result<Vec<u8>, RpcError> {
        if method_id == 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
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

fn echo_interface_v2() -> InterfaceDescriptor {
    InterfaceDescriptor::new(
        "cc.test",
        "Echo",
        0,
        2,
        vec![MethodSignature::new("echo", &[("value", "string")], "string", false)],
    )
}

#[tokio::test]
async fn mismatched_client_interface_is_rejected_and_connection_closed() {
    let server = Server::new(ServerConfig {
        name: "echo".into(),
        crm: Arc::new(EchoCrm),
        interface: echo_interface(),
        bind_address: "thread://handshake-mismatch".into(),
        transport: TransportConfig::default(),
        on_shutdown: None,
    });
    server.start().await.unwrap();

    let mut conn = crm_rpc::transport::connect("thread://handshake-mismatch", &TransportConfig::default())
        .await
        .unwrap();
    let iface = echo_interface_v2();
    let handshake = envelope::encode_handshake(&iface.namespace, &iface.name, iface.major, iface.minor);
    conn.send(&handshake).await.unwrap();
    let frame = conn.recv().await.unwrap();
    let reply = envelope::decode_reply(&frame, envelope::DEFAULT_MAX_PAYLOAD).unwrap();
    assert_eq!(reply.status, Status::ErrorInvalid);
    assert!(String::from_utf8_lossy(&reply.payload).contains("interface mismatch"));

    // The server closed its side after the mismatch reply; a further send
    // should eventually surface as a broken connection rather than hang.
    let _ = conn.send(&envelope::encode_call(0, CallFlags::empty(), b"x")).await;

    server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn graceful_shutdown_lets_in_flight_calls_complete() {
    let server = Arc::new(Server::new(ServerConfig {
        name: "sleepy".into(),
        crm: Arc::new(SleepyCrm),
        interface: InterfaceDescriptor::new(
            "cc.test",
            "Sleepy",
            0,
            1,
            vec![MethodSignature::new("slow", &[], "void", false)],
        ),
        bind_address: "thread://graceful-shutdown".into(),
        transport: TransportConfig::default(),
        on_shutdown: None,
    }));
    server.start().await.unwrap();

    let interface = InterfaceDescriptor::new(
        "cc.test",
        "Sleepy",
        0,
        1,
        vec![MethodSignature::new("slow", &[], "void", false)],
    );

    let in_flight_proxy = ClientProxy::connect("thread://graceful-shutdown", interface.clone(), ClientConfig::default())
        .await
        .unwrap();
    let in_flight_call = tokio::spawn(async move { in_flight_proxy.call("slow", &[]).await });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let server_for_stop = server.clone();
    let stopper = tokio::spawn(async move { server_for_stop.stop(Duration::from_secs(1)).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let rejected_proxy = ClientProxy::connect("thread://graceful-shutdown", interface, ClientConfig::default()).await;
    if let Ok(proxy) = rejected_proxy {
        let result = proxy.call("slow", &[]).await;
        assert!(matches!(
            result,
            Err(RpcError { status: Status::ErrorUnavailable, .. })
        ) || result.is_ok());
    }

    let in_flight_result = in_flight_call.await.unwrap();
    assert!(in_flight_result.is_ok());

    stopper.await.unwrap().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn wait_for_termination_zero_timeout_never_blocks_on_a_running_server() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_for_shutdown = calls.clone();
    let server = Server::new(ServerConfig {
        name: "echo".into(),
        crm: Arc::new(EchoCrm),
        interface: echo_interface(),
        bind_address: "thread://wait-zero".into(),
        transport: TransportConfig::default(),
        on_shutdown: Some(Box::new(move || {
            calls_for_shutdown.fetch_add(1, Ordering::SeqCst);
        })),
    });
    server.start().await.unwrap();

    let start = std::time::Instant::now();
    server.wait_for_termination(Some(Duration::ZERO)).await;
    assert!(start.elapsed() < Duration::from_millis(50));

    server.stop(Duration::from_secs(1)).await.unwrap();
    server.wait_for_termination(None).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
