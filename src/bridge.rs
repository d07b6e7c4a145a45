//! # External Bridge Hooks (contract only)
//!
//! Registration types letting a component module be re-exported as
//! tool-style endpoints by an external host (e.g. a model-context-protocol
//! bridge). This module provides only the contract it consumes: a
//! [`ToolHandle`] describing one invocable tool, and a [`BridgeRegistry`]
//! collecting them. It does not run a server and has no transport of its
//! own -- the bridge host is expected to own that.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RpcError;

/// One component function published as a tool: a name, a JSON-ish argument
/// schema derived from its non-interface parameters, and the name of the
/// reserved parameter that carries the target CRM address at invocation
/// time.
///
/// `Serialize`/`Deserialize` let a bridge host hand a tool listing across its
/// own wire boundary (e.g. to a remote MCP client) without this crate needing
/// to know anything about that boundary's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHandle {
    pub name: String,
    pub arg_schema: Value,
    pub address_param: String,
}

impl ToolHandle {
    pub fn new(name: impl Into<String>, arg_schema: Value, address_param: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_schema,
            address_param: address_param.into(),
        }
    }
}

/// Implemented by a bridge host: given a tool name, a JSON argument map, and
/// the resolved CRM address, invoke the underlying component and return its
/// JSON-ish result.
#[async_trait]
pub trait BridgeComponent: Send + Sync {
    async fn invoke(&self, tool: &str, args: Value, address: &str) -> Result<Value, RpcError>;
}

/// In-process registry of published tool handles, keyed by name.
/// Registration is append-only for the lifetime of the registry, mirroring
/// the interface registry's "immutable once published" rule.
#[derive(Default)]
pub struct BridgeRegistry {
    handles: HashMap<String, ToolHandle>,
    component: Option<Arc<dyn BridgeComponent>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(component: Arc<dyn BridgeComponent>) -> Self {
        Self {
            handles: HashMap::new(),
            component: Some(component),
        }
    }

    pub fn publish(&mut self, handle: ToolHandle) -> Result<(), RpcError> {
        if self.handles.contains_key(&handle.name) {
            return Err(RpcError::invalid(format!(
                "tool handle already published: {}",
                handle.name
            )));
        }
        debug!("published bridge tool handle: {}", handle.name);
        self.handles.insert(handle.name.clone(), handle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolHandle> {
        self.handles.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ToolHandle> {
        self.handles.values()
    }

    /// Invoke a published tool by name through the registered bridge host.
    pub async fn invoke(&self, name: &str, args: Value, address: &str) -> Result<Value, RpcError> {
        let handle = self
            .get(name)
            .ok_or_else(|| RpcError::invalid(format!("unknown tool: {}", name)))?;
        let component = self
            .component
            .as_ref()
            .ok_or_else(|| RpcError::invalid("no bridge host registered"))?;
        component.invoke(&handle.name, args, address).await
    }
}
