pub mod manager;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::environments::{Node, NodeType};
use crate::error::ConnectionError;
use crate::registry::EnvironmentEntry;

pub use manager::ConnectionManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    /// An environment is selected but some nodes lack an identity.
    Setup,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Setup => "setup",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Published on every transition into or out of `Connected`. Carries no
/// state; subscribers read it back from the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Display names of the nodes (or orderer clusters) that need a wallet
    /// and identity before the attempt can be retried.
    SetupRequired(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartContractDefinition {
    pub name: String,
    pub version: String,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorsement_policy: Option<String>,
}

/// The live view of a connected environment. Name queries are answered
/// from the node descriptors the connection was opened with; the rest go
/// to the network.
#[async_trait]
pub trait EnvironmentConnection: Send + Sync {
    fn environment_name(&self) -> &str;

    fn nodes(&self) -> &[Node];

    fn get_all_peer_names(&self) -> Vec<String> {
        names_of(self.nodes(), NodeType::Peer)
    }

    fn get_all_orderer_names(&self) -> Vec<String> {
        names_of(self.nodes(), NodeType::Orderer)
    }

    fn get_all_certificate_authority_names(&self) -> Vec<String> {
        names_of(self.nodes(), NodeType::CertificateAuthority)
    }

    /// MSP ids of the peers, sorted and de-duplicated.
    fn get_all_organization_names(&self) -> Vec<String> {
        self.nodes()
            .iter()
            .filter(|node| node.node_type == NodeType::Peer)
            .filter_map(|node| node.msp_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn get_node(&self, name: &str) -> Option<Node> {
        self.nodes().iter().find(|node| node.name == name).cloned()
    }

    /// Channel name to the peers that joined it.
    async fn create_channel_map(&self) -> Result<BTreeMap<String, Vec<String>>, ConnectionError>;

    async fn get_committed_smart_contract_definitions(
        &self,
        peers: &[String],
        channel: &str,
    ) -> Result<Vec<SmartContractDefinition>, ConnectionError>;

    async fn get_channel_capability_from_peer(
        &self,
        channel: &str,
        peer: &str,
    ) -> Result<Vec<String>, ConnectionError>;

    async fn disconnect(&self);
}

/// Performs the handshake with an environment whose nodes are all set up.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        entry: &EnvironmentEntry,
        nodes: Vec<Node>,
    ) -> Result<Arc<dyn EnvironmentConnection>, ConnectionError>;
}

fn names_of(nodes: &[Node], node_type: NodeType) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| node.node_type == node_type)
        .map(|node| node.name.clone())
        .collect()
}
