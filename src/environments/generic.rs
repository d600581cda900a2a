use std::time::Duration;

use async_trait::async_trait;

use super::{Environment, Node, delete_stored_node, filter_hidden, node_store, update_stored_node};
use crate::error::{EnvironmentError, RegistryError};
use crate::registry::{EnvironmentEntry, PersistedRegistry};

/// Nodes described entirely by files the user imported. There is nothing
/// remote to probe, so it is always alive.
pub struct GenericEnvironment {
    entry: EnvironmentEntry,
    nodes: PersistedRegistry<Node>,
}

impl GenericEnvironment {
    pub fn new(entry: EnvironmentEntry) -> Result<Self, RegistryError> {
        let directory = entry.directory().ok_or_else(|| {
            RegistryError::Configuration(format!(
                "environment '{}' has no environment directory",
                entry.name
            ))
        })?;
        let nodes = node_store(directory);
        Ok(Self { entry, nodes })
    }

    /// Stores a node descriptor, replacing one with the same name.
    pub fn import_node(&self, node: &Node) -> Result<(), EnvironmentError> {
        self.nodes.put(node)?;
        Ok(())
    }
}

#[async_trait]
impl Environment for GenericEnvironment {
    fn entry(&self) -> &EnvironmentEntry {
        &self.entry
    }

    async fn get_nodes(&self, include_hidden: bool) -> Result<Vec<Node>, EnvironmentError> {
        Ok(filter_hidden(self.nodes.get_all()?, include_hidden))
    }

    async fn is_alive(&self, _timeout: Duration) -> bool {
        true
    }

    async fn update_node(&self, node: &Node) -> Result<(), EnvironmentError> {
        update_stored_node(&self.nodes, &self.entry.name, node)
    }

    async fn delete_node(&self, name: &str) -> Result<(), EnvironmentError> {
        delete_stored_node(&self.nodes, &self.entry.name, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environments::NodeType;
    use crate::registry::EnvironmentType;
    use tempfile::tempdir;

    #[tokio::test]
    async fn hidden_nodes_are_filtered_and_edits_persist() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let entry =
            EnvironmentEntry::new("imported", EnvironmentType::Generic).with_directory(dir.path());
        let environment = GenericEnvironment::new(entry)?;
        environment.import_node(&Node::new("peer0", NodeType::Peer))?;
        let mut ca = Node::new("ca", NodeType::CertificateAuthority);
        ca.hidden = true;
        environment.import_node(&ca)?;

        assert!(environment.is_alive(Duration::from_millis(1)).await);
        assert_eq!(environment.get_nodes(false).await?.len(), 1);
        assert_eq!(environment.get_nodes(true).await?.len(), 2);

        ca.hidden = false;
        environment.update_node(&ca).await?;
        assert_eq!(environment.get_nodes(false).await?.len(), 2);

        environment.delete_node("peer0").await?;
        assert!(matches!(
            environment.delete_node("peer0").await,
            Err(EnvironmentError::NodeNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn needs_a_directory() {
        let entry = EnvironmentEntry::new("imported", EnvironmentType::Generic);
        assert!(matches!(
            GenericEnvironment::new(entry),
            Err(RegistryError::Configuration(_))
        ));
    }
}
