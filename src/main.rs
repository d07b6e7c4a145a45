//! # `crm-rpc` - Demonstration Front-End
//!
//! A thin binary over the library crate, standing up or calling a sample
//! `Echo` CRM. Exists so a transport/address combination can be smoke-tested
//! by hand; it is not itself part of the core the library specifies.
//!
//! ## Logging
//!
//! Two layers, combined via `tracing_subscriber::registry()`: a detailed
//! layer (env-filter driven, non-blocking file writer) and an optional
//! colorized stdout layer for human-facing output, suppressed by `--quiet`.
//! Verbosity is controlled by repeating `-v`; `RUST_LOG` overrides both via
//! the env-filter layer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use crm_rpc::{
    cli::{Args, Command},
    client::{ClientConfig, ClientProxy},
    error::RpcError,
    logging::ColorizedFormatter,
    registry::{InterfaceDescriptor, MethodSignature, Transferable},
    server::{CrmDispatch, Server, ServerConfig},
    transport::TransportConfig,
};

/// Sample CRM implementing the one-method `Echo` interface used throughout
/// the testable-property scenarios: `echo(Str) -> Str`.
struct EchoCrm;

#[async_trait]
impl CrmDispatch for EchoCrm {
    async fn dispatch(&self, method_id: u32, arg_blob: &[u8]) -> Result<Vec<u8>, RpcError> {
        match method_id {
            0 => {
                let (value, _) = String::deserialize(arg_blob)?;
                let mut out = Vec::new();
                value.serialize(&mut out);
                Ok(out)
            }
            _ => Err(RpcError::invalid("unknown method id")),
        }
    }

    async fn terminate(&self) {
        info!("echo CRM terminated");
    }
}

fn echo_interface() -> InterfaceDescriptor {
    InterfaceDescriptor::new(
        "cc.demo",
        "Echo",
        0,
        1,
        vec![MethodSignature::new("echo", &[("value", "string")], "string", false)],
    )
}

fn init_logging(args: &Args) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let file_appender = tracing_appender::rolling::never(".", "crm-rpc.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let detailed_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()));

    let stdout_layer = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ColorizedFormatter)
                .with_filter(log_level),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(detailed_layer)
        .with(stdout_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    match args.command {
        Command::Serve { address, shutdown_timeout } => serve(&address, shutdown_timeout).await,
        Command::Call { address, value, timeout } => call(&address, &value, timeout).await,
    }
}

async fn serve(address: &str, shutdown_timeout: std::time::Duration) -> Result<()> {
    info!("starting echo CRM on {}", address);
    let server = Server::new(ServerConfig {
        name: "echo".to_string(),
        crm: Arc::new(EchoCrm),
        interface: echo_interface(),
        bind_address: address.to_string(),
        transport: TransportConfig::default(),
        on_shutdown: Some(Box::new(|| info!("echo CRM server stopped"))),
    });
    server.start().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!("serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested, draining in-flight calls");
    server
        .stop(shutdown_timeout)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}

async fn call(address: &str, value: &str, call_timeout: std::time::Duration) -> Result<()> {
    let config = ClientConfig {
        call_timeout,
        ..ClientConfig::default()
    };
    let proxy = ClientProxy::connect(address, echo_interface(), config)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut arg = Vec::new();
    value.to_string().serialize(&mut arg);

    match proxy.call("echo", &arg).await {
        Ok(payload) => {
            let (reply, _) = String::deserialize(&payload).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{}", reply);
            Ok(())
        }
        Err(e) => {
            error!("call failed: {}", e);
            Err(anyhow::anyhow!(e.to_string()))
        }
    }
}
