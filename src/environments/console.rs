use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Node, NodeType};
use crate::error::EnvironmentError;
use crate::operator_log;

/// One entry of a console's component listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsoleComponent {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConsoleComponent {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.id)
    }

    pub fn is_gateway(&self) -> bool {
        self.component_type == "gateway"
    }

    /// `None` for gateways and anything else that is not a ledger node.
    pub fn to_node(&self) -> Option<Node> {
        let node_type = NodeType::from_component_type(&self.component_type)?;
        Some(Node {
            name: self.label().to_string(),
            node_type,
            cluster_name: self.cluster_name.clone(),
            msp_id: self.msp_id.clone(),
            api_url: self.api_url.clone(),
            wallet: self.wallet.clone(),
            identity: self.identity.clone(),
            hidden: false,
        })
    }
}

#[async_trait]
pub trait ConsoleClient: Send + Sync {
    async fn health(&self, url: &str) -> Result<(), EnvironmentError>;

    async fn components(&self, url: &str) -> Result<Vec<ConsoleComponent>, EnvironmentError>;
}

/// Blocking `ureq` calls moved onto the blocking pool so callers can bound
/// them with `tokio::time::timeout`.
#[derive(Clone)]
pub struct HttpConsoleClient {
    agent: ureq::Agent,
}

impl HttpConsoleClient {
    pub fn new(request_timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(request_timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    async fn fetch<T, F>(&self, url: &str, read: F) -> Result<T, EnvironmentError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ureq::Body) -> Result<T, ureq::Error> + Send + 'static,
    {
        let agent = self.agent.clone();
        let target = url.to_string();
        operator_log::trace(module_path!(), format!("GET {target}"));
        let joined = tokio::task::spawn_blocking(move || -> Result<T, ureq::Error> {
            let mut response = agent
                .get(&target)
                .header("Accept", "application/json")
                .call()?;
            read(response.body_mut())
        })
        .await;
        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(console_error(url, err)),
            Err(err) => Err(console_error(url, err)),
        }
    }
}

#[async_trait]
impl ConsoleClient for HttpConsoleClient {
    async fn health(&self, url: &str) -> Result<(), EnvironmentError> {
        self.fetch(url, |_| Ok(())).await
    }

    async fn components(&self, url: &str) -> Result<Vec<ConsoleComponent>, EnvironmentError> {
        self.fetch(url, |body| body.read_json::<Vec<ConsoleComponent>>())
            .await
    }
}

fn console_error(url: &str, err: impl std::fmt::Display) -> EnvironmentError {
    EnvironmentError::Console {
        url: url.to_string(),
        message: err.to_string(),
    }
}

/// Joins a console base url and an api path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Health check bounded by `timeout`. Failures are logged and read as "not
/// alive".
pub(crate) async fn probe(
    console: &dyn ConsoleClient,
    environment: &str,
    url: Option<String>,
    timeout: Duration,
) -> bool {
    let Some(url) = url else {
        operator_log::debug(
            module_path!(),
            format!("environment {environment} has no console url; treating as not alive"),
        );
        return false;
    };
    match tokio::time::timeout(timeout, console.health(&url)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            operator_log::debug(
                module_path!(),
                format!("environment {environment} is not alive: {err}"),
            );
            false
        }
        Err(_) => {
            let err = EnvironmentError::LivenessTimeout {
                environment: environment.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            };
            operator_log::debug(module_path!(), err.to_string());
            false
        }
    }
}
