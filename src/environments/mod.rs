pub mod console;
pub mod generic;
pub mod local;
pub mod ops_tools;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EnvironmentError, RegistryError};
use crate::registry::{
    EnvironmentEntry, EnvironmentType, GatewayEntry, PersistedRegistry, RegistryEntry,
};

pub use console::{ConsoleClient, ConsoleComponent, HttpConsoleClient};
pub use generic::GenericEnvironment;
pub use local::LocalSimulatedEnvironment;
pub use ops_tools::{ConsoleKind, OpsToolsEnvironment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "fabric-peer")]
    Peer,
    #[serde(rename = "fabric-orderer")]
    Orderer,
    #[serde(rename = "fabric-ca")]
    CertificateAuthority,
}

impl NodeType {
    pub fn from_component_type(value: &str) -> Option<Self> {
        match value {
            "fabric-peer" => Some(Self::Peer),
            "fabric-orderer" => Some(Self::Orderer),
            "fabric-ca" => Some(Self::CertificateAuthority),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "fabric-peer",
            Self::Orderer => "fabric-orderer",
            Self::CertificateAuthority => "fabric-ca",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

impl RegistryEntry for Node {
    const KIND: &'static str = "node";

    fn name(&self) -> &str {
        &self.name
    }
}

impl Node {
    pub fn new(name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            name: name.into(),
            node_type,
            cluster_name: None,
            msp_id: None,
            api_url: None,
            wallet: None,
            identity: None,
            hidden: false,
        }
    }

    pub fn with_identity(mut self, wallet: impl Into<String>, identity: impl Into<String>) -> Self {
        self.wallet = Some(wallet.into());
        self.identity = Some(identity.into());
        self
    }

    /// Orderers sharing a cluster are set up and shown as one unit.
    pub fn display_name(&self) -> &str {
        self.cluster_name.as_deref().unwrap_or(&self.name)
    }

    pub fn needs_identity(&self) -> bool {
        let missing = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());
        missing(&self.wallet) || missing(&self.identity)
    }
}

/// Display names of the nodes that still lack a wallet/identity association.
pub fn nodes_requiring_setup(nodes: &[Node]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    nodes
        .iter()
        .filter(|node| node.needs_identity())
        .map(|node| node.display_name().to_string())
        .filter(|label| seen.insert(label.clone()))
        .collect()
}

#[async_trait]
pub trait Environment: Send + Sync {
    fn entry(&self) -> &EnvironmentEntry;

    fn name(&self) -> &str {
        &self.entry().name
    }

    fn environment_type(&self) -> EnvironmentType {
        self.entry().environment_type.clone()
    }

    async fn get_nodes(&self, include_hidden: bool) -> Result<Vec<Node>, EnvironmentError>;

    /// Only simulated runtimes synthesize gateways.
    async fn get_gateways(&self) -> Result<Vec<GatewayEntry>, EnvironmentError> {
        Ok(Vec::new())
    }

    /// Never fails: an unreachable or slow environment is simply not alive.
    async fn is_alive(&self, timeout: Duration) -> bool;

    async fn update_node(&self, _node: &Node) -> Result<(), EnvironmentError> {
        Err(self.unsupported("updating nodes"))
    }

    async fn delete_node(&self, _name: &str) -> Result<(), EnvironmentError> {
        Err(self.unsupported("deleting nodes"))
    }

    fn unsupported(&self, operation: &'static str) -> EnvironmentError {
        EnvironmentError::Unsupported {
            operation,
            environment_type: self.environment_type().to_string(),
        }
    }
}

/// Seam between the registries/connection manager and the concrete
/// environment variants, so callers can substitute their own.
pub trait EnvironmentSource: Send + Sync {
    fn environment(&self, entry: &EnvironmentEntry) -> Result<Arc<dyn Environment>, RegistryError>;
}

#[derive(Clone)]
pub struct EnvironmentFactory {
    console: Arc<dyn ConsoleClient>,
}

impl EnvironmentFactory {
    pub fn new(console: Arc<dyn ConsoleClient>) -> Self {
        Self { console }
    }

    pub fn http(request_timeout: Duration) -> Self {
        Self::new(Arc::new(HttpConsoleClient::new(request_timeout)))
    }

    /// Picks the variant for `entry`. No I/O happens here.
    pub fn create(&self, entry: &EnvironmentEntry) -> Result<Arc<dyn Environment>, RegistryError> {
        let environment: Arc<dyn Environment> = match &entry.environment_type {
            EnvironmentType::LocalSimulated => Arc::new(LocalSimulatedEnvironment::new(
                entry.clone(),
                self.console.clone(),
            )),
            EnvironmentType::OpsTools => Arc::new(OpsToolsEnvironment::new(
                entry.clone(),
                ConsoleKind::SelfHosted,
                self.console.clone(),
            )),
            EnvironmentType::SaasOpsTools => Arc::new(OpsToolsEnvironment::new(
                entry.clone(),
                ConsoleKind::Saas,
                self.console.clone(),
            )),
            EnvironmentType::Generic => Arc::new(GenericEnvironment::new(entry.clone())?),
            EnvironmentType::Unrecognized(value) => {
                return Err(RegistryError::Configuration(format!(
                    "environment '{}' has unrecognized type '{value}'",
                    entry.name
                )));
            }
        };
        Ok(environment)
    }
}

impl EnvironmentSource for EnvironmentFactory {
    fn environment(&self, entry: &EnvironmentEntry) -> Result<Arc<dyn Environment>, RegistryError> {
        self.create(entry)
    }
}

pub(crate) fn node_store(directory: &Path) -> PersistedRegistry<Node> {
    PersistedRegistry::new(directory.join("nodes"))
}

/// Per-environment store for edits to synthesized gateways (for example
/// transaction data directories), kept next to the environment's nodes.
pub fn gateway_overlays(entry: &EnvironmentEntry) -> Option<PersistedRegistry<GatewayEntry>> {
    entry
        .directory()
        .map(|directory| PersistedRegistry::new(directory.join("gateways")))
}

pub(crate) fn filter_hidden(nodes: Vec<Node>, include_hidden: bool) -> Vec<Node> {
    if include_hidden {
        return nodes;
    }
    nodes.into_iter().filter(|node| !node.hidden).collect()
}

pub(crate) fn update_stored_node(
    store: &PersistedRegistry<Node>,
    environment: &str,
    node: &Node,
) -> Result<(), EnvironmentError> {
    store
        .update(node)
        .map_err(|err| node_error(err, environment, &node.name))
}

pub(crate) fn delete_stored_node(
    store: &PersistedRegistry<Node>,
    environment: &str,
    name: &str,
) -> Result<(), EnvironmentError> {
    store
        .delete(name)
        .map_err(|err| node_error(err, environment, name))
}

fn node_error(err: RegistryError, environment: &str, node: &str) -> EnvironmentError {
    if err.is_not_found() {
        EnvironmentError::NodeNotFound {
            environment: environment.to_string(),
            node: node.to_string(),
        }
    } else {
        err.into()
    }
}
