use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::console::{self, ConsoleClient, ConsoleComponent};
use super::{Environment, Node, filter_hidden, gateway_overlays};
use crate::error::{EnvironmentError, RegistryError};
use crate::operator_log;
use crate::registry::{EnvironmentEntry, GatewayEntry};
use crate::runtime_state::{self, entry_file_stem};

pub const HEALTH_PATH: &str = "/ak/api/v1/health";
pub const COMPONENTS_PATH: &str = "/ak/api/v1/components";

/// A simulated network on this machine, described by the component listing
/// its console serves.
pub struct LocalSimulatedEnvironment {
    entry: EnvironmentEntry,
    console: Arc<dyn ConsoleClient>,
}

impl LocalSimulatedEnvironment {
    pub fn new(entry: EnvironmentEntry, console: Arc<dyn ConsoleClient>) -> Self {
        Self { entry, console }
    }

    fn endpoint(&self, path: &str) -> Option<String> {
        self.entry
            .console_url()
            .map(|base| console::endpoint(base, path))
    }

    async fn components(&self) -> Result<Vec<ConsoleComponent>, EnvironmentError> {
        let url = self.endpoint(COMPONENTS_PATH).ok_or_else(|| {
            RegistryError::Configuration(format!(
                "environment '{}' has no console url",
                self.entry.name
            ))
        })?;
        self.console.components(&url).await
    }

    fn wallet_name(&self, wallet: &str) -> String {
        format!("{} - {wallet}", self.entry.name)
    }

    /// Stores the gateway's connection profile under the environment
    /// directory and returns its path. The path stays empty when there is no
    /// directory or the profile cannot be written; the gateway is still
    /// listed.
    fn write_profile(&self, gateway_name: &str, component: &ConsoleComponent) -> PathBuf {
        let Some(directory) = self.entry.directory() else {
            operator_log::debug(
                module_path!(),
                format!(
                    "environment {} has no directory; not writing profile for {gateway_name}",
                    self.entry.name
                ),
            );
            return PathBuf::new();
        };
        let path = directory
            .join("profiles")
            .join(format!("{}.json", entry_file_stem(gateway_name)));
        if let Ok(Some(stored)) = runtime_state::read_json::<ConsoleComponent>(&path)
            && &stored == component
        {
            return path;
        }
        match runtime_state::write_json(&path, component) {
            Ok(()) => path,
            Err(err) => {
                operator_log::warn(
                    module_path!(),
                    format!(
                        "could not write connection profile for gateway {gateway_name} at {}: {err}",
                        path.display()
                    ),
                );
                PathBuf::new()
            }
        }
    }
}

#[async_trait]
impl Environment for LocalSimulatedEnvironment {
    fn entry(&self) -> &EnvironmentEntry {
        &self.entry
    }

    async fn get_nodes(&self, include_hidden: bool) -> Result<Vec<Node>, EnvironmentError> {
        let nodes = self
            .components()
            .await?
            .iter()
            .filter_map(ConsoleComponent::to_node)
            .map(|mut node| {
                node.wallet = node.wallet.as_deref().map(|wallet| self.wallet_name(wallet));
                node
            })
            .collect();
        Ok(filter_hidden(nodes, include_hidden))
    }

    /// One gateway per gateway component. A network with a single gateway
    /// names it after the environment; otherwise the component label is
    /// appended.
    async fn get_gateways(&self) -> Result<Vec<GatewayEntry>, EnvironmentError> {
        let components = self.components().await?;
        let gateways: Vec<&ConsoleComponent> =
            components.iter().filter(|component| component.is_gateway()).collect();
        let single = gateways.len() == 1;
        let overlays = gateway_overlays(&self.entry);

        let mut entries = Vec::with_capacity(gateways.len());
        for component in gateways {
            let name = if single {
                self.entry.name.clone()
            } else {
                format!("{} - {}", self.entry.name, component.label())
            };
            let profile = self.write_profile(&name, component);
            let mut gateway = GatewayEntry::new(&name, profile);
            gateway.associated_wallet = component
                .wallet
                .as_deref()
                .map(|wallet| self.wallet_name(wallet))
                .unwrap_or_default();
            gateway.from_environment = Some(self.entry.name.clone());
            gateway.display_name = Some(component.label().to_string());

            if let Some(overlays) = &overlays {
                match overlays.get(&name) {
                    Ok(saved) => {
                        gateway.transaction_data_directories = saved.transaction_data_directories
                    }
                    Err(err) if err.is_not_found() => {}
                    Err(err) => operator_log::warn(
                        module_path!(),
                        format!("ignoring saved settings for gateway {name}: {err}"),
                    ),
                }
            }
            entries.push(gateway);
        }
        Ok(entries)
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
}
