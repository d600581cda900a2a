use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use super::{EnvironmentEntry, EnvironmentRegistry, PersistedRegistry, RegistryEntry};
use crate::environments::{Environment, EnvironmentSource, gateway_overlays};
use crate::error::RegistryError;
use crate::operator_log;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDataDirectory {
    pub chaincode_name: String,
    pub channel_name: String,
    pub transaction_data_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEntry {
    pub name: String,
    #[serde(default)]
    pub associated_wallet: String,
    pub connection_profile_path: PathBuf,
    /// Name of the environment that produced this gateway. Looked up by
    /// name, never followed as ownership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transaction_data_directories: Vec<TransactionDataDirectory>,
}

impl RegistryEntry for GatewayEntry {
    const KIND: &'static str = "gateway";

    fn name(&self) -> &str {
        &self.name
    }
}

impl GatewayEntry {
    pub fn new(name: impl Into<String>, connection_profile_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            associated_wallet: String::new(),
            connection_profile_path: connection_profile_path.into(),
            from_environment: None,
            display_name: None,
            transaction_data_directories: Vec::new(),
        }
    }

    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.associated_wallet = wallet.into();
        self
    }

    pub fn from_environment(mut self, environment: impl Into<String>) -> Self {
        self.from_environment = Some(environment.into());
        self
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    fn sourced_from_any(&self, environments: &[EnvironmentEntry]) -> bool {
        self.from_environment
            .as_deref()
            .is_some_and(|source| environments.iter().any(|entry| entry.name == source))
    }
}

/// Persisted gateways merged with the gateways live local networks expose.
#[derive(Clone)]
pub struct GatewayRegistry {
    store: PersistedRegistry<GatewayEntry>,
    environments: EnvironmentRegistry,
    source: Arc<dyn EnvironmentSource>,
    probe_timeout: Duration,
}

impl GatewayRegistry {
    pub fn new(
        root: impl Into<PathBuf>,
        environments: EnvironmentRegistry,
        source: Arc<dyn EnvironmentSource>,
    ) -> Self {
        Self {
            store: PersistedRegistry::new(root),
            environments,
            source,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Bounds both the liveness probe and the gateway fetch of each local
    /// environment during [`GatewayRegistry::get_all`].
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn get(&self, name: &str) -> Result<GatewayEntry, RegistryError> {
        self.store.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.store.exists(name)
    }

    pub fn add(&self, entry: &GatewayEntry) -> Result<(), RegistryError> {
        self.store.add(entry)
    }

    /// Persisted gateways are replaced in place. A gateway that only exists
    /// because an environment synthesizes it is saved as an overlay inside
    /// that environment's directory.
    pub fn update(&self, entry: &GatewayEntry) -> Result<(), RegistryError> {
        if self.store.exists(&entry.name) {
            return self.store.update(entry);
        }
        let Some(environment_name) = entry.from_environment.as_deref() else {
            return self.store.update(entry);
        };
        let environment = self.environments.get(environment_name)?;
        let overlays = gateway_overlays(&environment).ok_or_else(|| RegistryError::NotFound {
            kind: GatewayEntry::KIND,
            name: entry.name.clone(),
        })?;
        operator_log::debug(
            module_path!(),
            format!(
                "saving gateway {} into environment {}",
                entry.name, environment.name
            ),
        );
        overlays.put(entry)
    }

    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        self.store.delete(name)
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        self.store.clear()
    }

    /// Removes persisted gateways that name `environment` as their source.
    /// Returns how many were removed.
    pub fn delete_from_environment(&self, environment: &str) -> Result<usize, RegistryError> {
        let mut removed = 0;
        for gateway in self.store.get_all()? {
            if gateway.from_environment.as_deref() != Some(environment) {
                continue;
            }
            match self.store.delete(&gateway.name) {
                Ok(()) => removed += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    /// The merged gateway view.
    ///
    /// Without environment gateways only user-added entries are returned;
    /// anything sourced from a local simulated environment is hidden. With
    /// them, every live local environment contributes its gateways, and the
    /// result lists the primary environment's gateways first, then the other
    /// local environments', then the rest. Order inside each band is kept.
    pub async fn get_all(
        &self,
        include_environment_gateways: bool,
    ) -> Result<Vec<GatewayEntry>, RegistryError> {
        let persisted = self.store.get_all()?;
        let locals = self.environments.local_environments()?;
        if !include_environment_gateways {
            return Ok(persisted
                .into_iter()
                .filter(|gateway| !gateway.sourced_from_any(&locals))
                .collect());
        }

        let mut merged = persisted;
        for gateway in self.discover(&locals).await {
            if merged.iter().any(|existing| existing.name == gateway.name) {
                operator_log::debug(
                    module_path!(),
                    format!(
                        "gateway {} is already registered; ignoring the copy from {}",
                        gateway.name,
                        gateway.from_environment.as_deref().unwrap_or("an environment")
                    ),
                );
                continue;
            }
            merged.push(gateway);
        }

        let primary = locals
            .iter()
            .find(|entry| entry.primary)
            .map(|entry| entry.name.as_str());
        merged.sort_by_key(|gateway| {
            match gateway.from_environment.as_deref() {
                Some(source) if Some(source) == primary => 0,
                _ if gateway.sourced_from_any(&locals) => 1,
                _ => 2,
            }
        });
        Ok(merged)
    }

    /// Gateways of every live environment in `locals`, in `locals` order.
    /// Environments are probed concurrently; a failure anywhere only removes
    /// that environment's contribution.
    async fn discover(&self, locals: &[EnvironmentEntry]) -> Vec<GatewayEntry> {
        let mut tasks = JoinSet::new();
        for (index, entry) in locals.iter().enumerate() {
            let environment = match self.source.environment(entry) {
                Ok(environment) => environment,
                Err(err) => {
                    operator_log::warn(
                        module_path!(),
                        format!("skipping gateways of environment {}: {err}", entry.name),
                    );
                    continue;
                }
            };
            let timeout = self.probe_timeout;
            tasks.spawn(async move { (index, environment_gateways(environment, timeout).await) });
        }

        let mut found: Vec<(usize, Vec<GatewayEntry>)> = Vec::with_capacity(locals.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => found.push(result),
                Err(err) => operator_log::warn(
                    module_path!(),
                    format!("gateway discovery task failed: {err}"),
                ),
            }
        }
        found.sort_by_key(|(index, _)| *index);
        found.into_iter().flat_map(|(_, gateways)| gateways).collect()
    }
}

async fn environment_gateways(
    environment: Arc<dyn Environment>,
    timeout: Duration,
) -> Vec<GatewayEntry> {
    let alive = tokio::time::timeout(timeout, environment.is_alive(timeout))
        .await
        .unwrap_or(false);
    if !alive {
        operator_log::debug(
            module_path!(),
            format!(
                "environment {} is not running; no gateways",
                environment.name()
            ),
        );
        return Vec::new();
    }
    match tokio::time::timeout(timeout, environment.get_gateways()).await {
        Ok(Ok(gateways)) => gateways,
        Ok(Err(err)) => {
            operator_log::warn(
                module_path!(),
                format!(
                    "failed to read gateways of environment {}: {err}",
                    environment.name()
                ),
            );
            Vec::new()
        }
        Err(_) => {
            operator_log::warn(
                module_path!(),
                format!(
                    "reading gateways of environment {} took longer than {}ms",
                    environment.name(),
                    timeout.as_millis()
                ),
            );
            Vec::new()
        }
    }
}
