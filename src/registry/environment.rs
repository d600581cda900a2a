use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{PersistedRegistry, RegistryEntry};
use crate::error::RegistryError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvironmentType {
    LocalSimulated,
    OpsTools,
    SaasOpsTools,
    Generic,
    /// Written by a newer or foreign tool; kept so the entry still lists.
    Unrecognized(String),
}

impl EnvironmentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::LocalSimulated => "local_simulated",
            Self::OpsTools => "ops_tools",
            Self::SaasOpsTools => "saas_ops_tools",
            Self::Generic => "generic",
            Self::Unrecognized(value) => value,
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::OpsTools | Self::SaasOpsTools)
    }
}

impl From<String> for EnvironmentType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "local_simulated" | "local_microfab" | "local" => Self::LocalSimulated,
            "ops_tools" => Self::OpsTools,
            "saas_ops_tools" => Self::SaasOpsTools,
            "generic" | "environment" => Self::Generic,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<EnvironmentType> for String {
    fn from(value: EnvironmentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentEntry {
    pub name: String,
    pub environment_type: EnvironmentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_directory: Option<PathBuf>,
    #[serde(default)]
    pub managed_runtime: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_orgs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fabric_capabilities: Option<String>,
    /// Marks the default local network; its gateways always sort first.
    #[serde(default)]
    pub primary: bool,
}

impl RegistryEntry for EnvironmentEntry {
    const KIND: &'static str = "environment";

    fn name(&self) -> &str {
        &self.name
    }
}

impl EnvironmentEntry {
    pub fn new(name: impl Into<String>, environment_type: EnvironmentType) -> Self {
        Self {
            name: name.into(),
            environment_type,
            environment_directory: None,
            managed_runtime: false,
            url: None,
            number_of_orgs: None,
            fabric_capabilities: None,
            primary: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.environment_directory = Some(directory.into());
        self
    }

    pub fn managed(mut self) -> Self {
        self.managed_runtime = true;
        self
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn is_local(&self) -> bool {
        self.environment_type == EnvironmentType::LocalSimulated
    }

    pub fn directory(&self) -> Option<&Path> {
        self.environment_directory
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }

    pub fn console_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        let problem = if self.name.trim().is_empty() {
            Some("environment name cannot be empty".to_string())
        } else if let EnvironmentType::Unrecognized(value) = &self.environment_type {
            Some(format!("unrecognized environment type '{value}'"))
        } else if self.managed_runtime && !self.is_local() {
            Some("only local simulated environments can have a managed runtime".to_string())
        } else if self.primary && !self.is_local() {
            Some("only local simulated environments can be primary".to_string())
        } else if (self.is_local() || self.environment_type.is_cloud())
            && self.console_url().is_none()
        {
            Some(format!(
                "{} environments need a console url",
                self.environment_type
            ))
        } else if self.environment_type == EnvironmentType::Generic && self.directory().is_none()
        {
            Some("generic environments need an environment directory".to_string())
        } else {
            None
        };
        match problem {
            Some(message) => Err(RegistryError::Configuration(format!(
                "{message} (environment '{}')",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvironmentGroupKind {
    LocalNetworks,
    CloudConsoles,
    Other,
}

impl EnvironmentGroupKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::LocalNetworks => "Simple local networks",
            Self::CloudConsoles => "Cloud consoles",
            Self::Other => "Other networks",
        }
    }

    fn of(environment_type: &EnvironmentType) -> Self {
        match environment_type {
            EnvironmentType::LocalSimulated => Self::LocalNetworks,
            EnvironmentType::OpsTools | EnvironmentType::SaasOpsTools => Self::CloudConsoles,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentGroup {
    pub kind: EnvironmentGroupKind,
    pub environments: Vec<EnvironmentEntry>,
}

/// Local networks, then cloud consoles, then everything else. Empty groups
/// are dropped; order inside a group follows `entries`.
pub fn group_environments(entries: &[EnvironmentEntry]) -> Vec<EnvironmentGroup> {
    let mut groups: Vec<EnvironmentGroup> = Vec::new();
    for entry in entries {
        let kind = EnvironmentGroupKind::of(&entry.environment_type);
        match groups.iter_mut().find(|group| group.kind == kind) {
            Some(group) => group.environments.push(entry.clone()),
            None => groups.push(EnvironmentGroup {
                kind,
                environments: vec![entry.clone()],
            }),
        }
    }
    groups.sort_by_key(|group| group.kind);
    groups
}

#[derive(Clone)]
pub struct EnvironmentRegistry {
    store: PersistedRegistry<EnvironmentEntry>,
}

impl EnvironmentRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: PersistedRegistry::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn get_all(&self) -> Result<Vec<EnvironmentEntry>, RegistryError> {
        self.store.get_all()
    }

    pub fn get(&self, name: &str) -> Result<EnvironmentEntry, RegistryError> {
        self.store.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.store.exists(name)
    }

    pub fn add(&self, entry: &EnvironmentEntry) -> Result<(), RegistryError> {
        entry.validate()?;
        self.ensure_single_primary(entry)?;
        self.store.add(entry)
    }

    pub fn update(&self, entry: &EnvironmentEntry) -> Result<(), RegistryError> {
        entry.validate()?;
        self.ensure_single_primary(entry)?;
        self.store.update(entry)
    }

    pub fn delete(&self, name: &str) -> Result<(), RegistryError> {
        self.store.delete(name)
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        self.store.clear()
    }

    /// The local environment flagged `primary`. If several units carry the
    /// flag (written by racing processes), the first by name wins.
    pub fn primary(&self) -> Result<Option<EnvironmentEntry>, RegistryError> {
        Ok(self
            .get_all()?
            .into_iter()
            .find(|entry| entry.primary && entry.is_local()))
    }

    pub fn local_environments(&self) -> Result<Vec<EnvironmentEntry>, RegistryError> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(EnvironmentEntry::is_local)
            .collect())
    }

    pub fn groups(&self) -> Result<Vec<EnvironmentGroup>, RegistryError> {
        Ok(group_environments(&self.get_all()?))
    }

    fn ensure_single_primary(&self, entry: &EnvironmentEntry) -> Result<(), RegistryError> {
        if !entry.primary {
            return Ok(());
        }
        if let Some(existing) = self.primary()?
            && existing.name != entry.name
        {
            return Err(RegistryError::Configuration(format!(
                "environment '{}' is already the primary local environment",
                existing.name
            )));
        }
        Ok(())
    }
}
