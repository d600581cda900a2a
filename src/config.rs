use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use directories_next::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::operator_log::Level;
use crate::runtime_state::{OperatorPaths, atomic_write};

pub const CONFIG_DIR_ENV: &str = "LEDGER_OPERATOR_CONFIG_DIR";
pub const HOME_ENV: &str = "LEDGER_OPERATOR_HOME";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperatorSettings {
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_console_timeout_ms")]
    pub console_timeout_ms: u64,
    #[serde(default)]
    pub log_level: Level,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            home: None,
            liveness_timeout_ms: default_liveness_timeout_ms(),
            console_timeout_ms: default_console_timeout_ms(),
            log_level: Level::default(),
        }
    }
}

impl OperatorSettings {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn console_timeout(&self) -> Duration {
        Duration::from_millis(self.console_timeout_ms)
    }

    /// Storage root: explicit override, then `LEDGER_OPERATOR_HOME`, then the
    /// settings file, then the platform data directory.
    pub fn resolve_paths(&self, override_home: Option<&Path>) -> anyhow::Result<OperatorPaths> {
        if let Some(home) = override_home {
            return Ok(OperatorPaths::new(home));
        }
        if let Ok(value) = std::env::var(HOME_ENV)
            && !value.trim().is_empty()
        {
            return Ok(OperatorPaths::new(value));
        }
        if let Some(home) = &self.home {
            return Ok(OperatorPaths::new(home));
        }
        let dirs = project_dirs()?;
        Ok(OperatorPaths::new(dirs.data_dir()))
    }
}

pub fn load_settings() -> anyhow::Result<OperatorSettings> {
    load_settings_from(&settings_path()?)
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<OperatorSettings> {
    if !path.exists() {
        return Ok(OperatorSettings::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings at {}", path.display()))?;
    if contents
        .lines()
        .all(|line| line.trim().is_empty() || line.trim().starts_with('#'))
    {
        return Ok(OperatorSettings::default());
    }
    let settings: OperatorSettings = serde_yaml_bw::from_str(&contents)
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings_to(path: &Path, settings: &OperatorSettings) -> anyhow::Result<()> {
    let contents = serde_yaml_bw::to_string(settings)?;
    atomic_write(path, contents.as_bytes())
        .with_context(|| format!("failed to write settings to {}", path.display()))
}

pub fn settings_path() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(Path::new(&value).join("settings.yaml"));
    }
    Ok(project_dirs()?.config_dir().join("settings.yaml"))
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("", "ledger", "operator")
        .ok_or_else(|| anyhow::anyhow!("unable to determine operator directories"))
}

fn default_liveness_timeout_ms() -> u64 {
    2_000
}

fn default_console_timeout_ms() -> u64 {
    10_000
}
