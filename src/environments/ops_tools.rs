use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::console::{self, ConsoleClient, ConsoleComponent};
use super::{
    Environment, Node, delete_stored_node, filter_hidden, node_store, update_stored_node,
};
use crate::error::{EnvironmentError, RegistryError};
use crate::operator_log;
use crate::registry::{EnvironmentEntry, EnvironmentType, PersistedRegistry};

pub const HEALTH_PATH: &str = "/ak/api/v2/health";
pub const COMPONENTS_PATH: &str = "/ak/api/v2/components";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleKind {
    /// Console installed by the user on their own cluster.
    SelfHosted,
    /// Console run as a hosted service.
    Saas,
}

impl ConsoleKind {
    pub fn environment_type(self) -> EnvironmentType {
        match self {
            Self::SelfHosted => EnvironmentType::OpsTools,
            Self::Saas => EnvironmentType::SaasOpsTools,
        }
    }
}

/// A network administered through an operations console. Imported nodes are
/// kept under `<environment dir>/nodes` so they can be hidden or edited.
pub struct OpsToolsEnvironment {
    entry: EnvironmentEntry,
    kind: ConsoleKind,
    console: Arc<dyn ConsoleClient>,
}

impl OpsToolsEnvironment {
    pub fn new(entry: EnvironmentEntry, kind: ConsoleKind, console: Arc<dyn ConsoleClient>) -> Self {
        Self {
            entry,
            kind,
            console,
        }
    }

    pub fn kind(&self) -> ConsoleKind {
        self.kind
    }

    fn endpoint(&self, path: &str) -> Option<String> {
        self.entry
            .console_url()
            .map(|base| console::endpoint(base, path))
    }

    fn store(&self) -> Option<PersistedRegistry<Node>> {
        self.entry.directory().map(node_store)
    }

    async fn console_nodes(&self) -> Result<Vec<Node>, EnvironmentError> {
        let url = self.endpoint(COMPONENTS_PATH).ok_or_else(|| {
            RegistryError::Configuration(format!(
                "environment '{}' has no console url",
                self.entry.name
            ))
        })?;
        Ok(self
            .console
            .components(&url)
            .await?
            .iter()
            .filter_map(ConsoleComponent::to_node)
            .collect())
    }

    /// Refreshes the stored nodes from the console. Nodes not named in
    /// `visible` are stored hidden; `None` keeps each node's earlier
    /// visibility and shows new ones. Identity
    /// associations made earlier are kept and nodes the console no longer
    /// lists are removed. Returns what was stored.
    pub async fn import_nodes(
        &self,
        visible: Option<&[String]>,
    ) -> Result<Vec<Node>, EnvironmentError> {
        let store = self.store().ok_or_else(|| {
            RegistryError::Configuration(format!(
                "environment '{}' has no directory to import nodes into",
                self.entry.name
            ))
        })?;
        let visible: Option<BTreeSet<&str>> =
            visible.map(|names| names.iter().map(String::as_str).collect());
        let previous = store.get_all()?;
        let mut imported = self.console_nodes().await?;
        for node in &mut imported {
            let old = previous.iter().find(|old| old.name == node.name);
            node.hidden = match &visible {
                Some(names) => !names.contains(node.name.as_str()),
                None => old.is_some_and(|old| old.hidden),
            };
            if node.needs_identity()
                && let Some(old) = old
            {
                node.wallet = old.wallet.clone();
                node.identity = old.identity.clone();
            }
            store.put(node)?;
        }
        for old in previous
            .iter()
            .filter(|old| !imported.iter().any(|node| node.name == old.name))
        {
            match store.delete(&old.name) {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        operator_log::info(
            module_path!(),
            format!(
                "imported {} node(s) into environment {}",
                imported.len(),
                self.entry.name
            ),
        );
        Ok(imported)
    }
}

#[async_trait]
impl Environment for OpsToolsEnvironment {
    fn entry(&self) -> &EnvironmentEntry {
        &self.entry
    }

    fn environment_type(&self) -> EnvironmentType {
        self.kind.environment_type()
    }

    /// Stored nodes when the environment has a directory, otherwise the
    /// console's live listing.
    async fn get_nodes(&self, include_hidden: bool) -> Result<Vec<Node>, EnvironmentError> {
        let nodes = match self.store() {
            Some(store) => store.get_all()?,
            None => self.console_nodes().await?,
        };
        Ok(filter_hidden(nodes, include_hidden))
    }

    async fn is_alive(&self, timeout: Duration) -> bool {
        console::probe(
            self.console.as_ref(),
            &self.entry.name,
            self.endpoint(HEALTH_PATH),
            timeout,
        )
        .await
    }

    async fn update_node(&self, node: &Node) -> Result<(), EnvironmentError> {
        match self.store() {
            Some(store) => update_stored_node(&store, &self.entry.name, node),
            None => Err(self.unsupported("updating nodes without an environment directory")),
        }
    }

    async fn delete_node(&self, name: &str) -> Result<(), EnvironmentError> {
        match self.store() {
            Some(store) => delete_stored_node(&store, &self.entry.name, name),
            None => Err(self.unsupported("deleting nodes without an environment directory")),
        }
    }
}
