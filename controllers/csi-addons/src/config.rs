//! Controller configuration
//!
//! Built once in `main` and passed to every component. Values come from an
//! optional YAML file named by `CSI_ADDONS_CONFIG`, then environment
//! variables override individual settings.

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use agent_client::{AgentClientConfig, RetryPolicy};
use serde::Deserialize;

use crate::error::ControllerError;

/// Environment variable naming the optional YAML config file
pub const CONFIG_FILE_ENV: &str = "CSI_ADDONS_CONFIG";

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Agent endpoint for drivers without an entry in `agent_endpoints`
    pub agent_endpoint: Option<String>,
    /// Driver name to agent endpoint
    pub agent_endpoints: BTreeMap<String, String>,
    /// Requeue interval after a successful pass
    pub resync_interval: Duration,
    /// Concurrent reconciles per resource kind
    pub reconcile_concurrency: u16,
    /// Attempts per agent call
    pub rpc_max_attempts: u32,
    /// Timeout of one agent call attempt
    pub rpc_timeout: Duration,
    /// Budget for all attempts of one agent call
    pub rpc_deadline: Duration,
    /// First requeue delay after a failed agent call
    pub backoff_min: Duration,
    /// Cap on the requeue delay after failed agent calls
    pub backoff_max: Duration,
    /// Listen address of the probe and metrics server
    pub probe_addr: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            agent_endpoint: None,
            agent_endpoints: BTreeMap::new(),
            resync_interval: Duration::from_secs(60),
            reconcile_concurrency: 3,
            rpc_max_attempts: 3,
            rpc_timeout: Duration::from_secs(30),
            rpc_deadline: Duration::from_secs(60),
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Settings accepted in the YAML config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FileConfig {
    /// Namespace to watch
    pub watch_namespace: Option<String>,
    /// Default agent endpoint
    pub agent_endpoint: Option<String>,
    /// Driver name to agent endpoint
    pub agent_endpoints: BTreeMap<String, String>,
    /// Resync interval in seconds
    pub resync_interval_secs: Option<u64>,
    /// Concurrent reconciles per kind
    pub reconcile_concurrency: Option<u16>,
    /// Attempts per agent call
    pub rpc_max_attempts: Option<u32>,
    /// Per-attempt timeout in seconds
    pub rpc_timeout_secs: Option<u64>,
    /// Per-call deadline in seconds
    pub rpc_deadline_secs: Option<u64>,
    /// Minimum failure backoff in seconds
    pub backoff_min_secs: Option<u64>,
    /// Maximum failure backoff in seconds
    pub backoff_max_secs: Option<u64>,
    /// Probe server listen address
    pub probe_addr: Option<String>,
}

impl FileConfig {
    /// Parses a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ControllerError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ControllerError::InvalidConfig(format!("config file: {e}")))
    }

    fn load(path: &str) -> Result<Self, ControllerError> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::InvalidConfig(format!("reading {path}: {e}")))?;
        Self::from_yaml(&yaml)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}")))
}

/// Parses `driver=uri,driver=uri`
fn parse_endpoints(raw: &str) -> Result<BTreeMap<String, String>, ControllerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((driver, uri)) if !driver.trim().is_empty() && !uri.trim().is_empty() => {
                Ok((driver.trim().to_string(), uri.trim().to_string()))
            }
            _ => Err(ControllerError::InvalidConfig(format!(
                "AGENT_ENDPOINTS entry {entry:?} is not driver=uri"
            ))),
        })
        .collect()
}

impl ControllerConfig {
    /// Loads the configuration from `CSI_ADDONS_CONFIG` and the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        let file = match env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => FileConfig::load(&path)?,
            _ => FileConfig::default(),
        };
        Self::from_sources(file, |key| env::var(key).ok())
    }

    /// Builds the configuration from a parsed file and an environment lookup
    pub fn from_sources(
        file: FileConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let env_value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, file_value: Option<u64>, default: Duration| -> Result<Duration, ControllerError> {
            match env_value(key) {
                Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_secs),
                None => Ok(file_value.map_or(default, Duration::from_secs)),
            }
        };

        let mut agent_endpoints = file.agent_endpoints;
        if let Some(raw) = env_value("AGENT_ENDPOINTS") {
            agent_endpoints.extend(parse_endpoints(&raw)?);
        }

        let probe_addr = match env_value("PROBE_ADDR").or(file.probe_addr) {
            Some(raw) => parse_value::<SocketAddr>("PROBE_ADDR", &raw)?,
            None => defaults.probe_addr,
        };

        let config = Self {
            namespace: env_value("WATCH_NAMESPACE").or(file.watch_namespace),
            agent_endpoint: env_value("AGENT_ENDPOINT").or(file.agent_endpoint),
            agent_endpoints,
            resync_interval: secs("RESYNC_INTERVAL_SECS", file.resync_interval_secs, defaults.resync_interval)?,
            reconcile_concurrency: match env_value("RECONCILE_CONCURRENCY") {
                Some(raw) => parse_value("RECONCILE_CONCURRENCY", &raw)?,
                None => file.reconcile_concurrency.unwrap_or(defaults.reconcile_concurrency),
            },
            rpc_max_attempts: match env_value("RPC_MAX_ATTEMPTS") {
                Some(raw) => parse_value("RPC_MAX_ATTEMPTS", &raw)?,
                None => file.rpc_max_attempts.unwrap_or(defaults.rpc_max_attempts),
            },
            rpc_timeout: secs("RPC_TIMEOUT_SECS", file.rpc_timeout_secs, defaults.rpc_timeout)?,
            rpc_deadline: secs("RPC_DEADLINE_SECS", file.rpc_deadline_secs, defaults.rpc_deadline)?,
            backoff_min: secs("BACKOFF_MIN_SECS", file.backoff_min_secs, defaults.backoff_min)?,
            backoff_max: secs("BACKOFF_MAX_SECS", file.backoff_max_secs, defaults.backoff_max)?,
            probe_addr,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.resync_interval.is_zero() {
            return Err(ControllerError::InvalidConfig("resync interval must be positive".to_string()));
        }
        if self.reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig("reconcile concurrency must be at least 1".to_string()));
        }
        if self.rpc_max_attempts == 0 {
            return Err(ControllerError::InvalidConfig("RPC attempts must be at least 1".to_string()));
        }
        if self.rpc_timeout.is_zero() || self.rpc_deadline < self.rpc_timeout {
            return Err(ControllerError::InvalidConfig(format!(
                "RPC timeout {:?} must be positive and within the deadline {:?}",
                self.rpc_timeout, self.rpc_deadline
            )));
        }
        if self.backoff_min.is_zero() || self.backoff_min > self.backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff range {:?}..{:?} is empty",
                self.backoff_min, self.backoff_max
            )));
        }
        if self.agent_endpoint.is_none() && self.agent_endpoints.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "AGENT_ENDPOINT or AGENT_ENDPOINTS must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy applied to every agent call
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.rpc_max_attempts,
            call_timeout: self.rpc_timeout,
            deadline: self.rpc_deadline,
            ..Default::default()
        }
    }

    /// Endpoint table for the agent client
    pub fn agent_client_config(&self) -> AgentClientConfig {
        AgentClientConfig {
            default_endpoint: self.agent_endpoint.clone(),
            endpoints: self.agent_endpoints.clone(),
            call_timeout: self.rpc_timeout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_only() {
        let config = ControllerConfig::from_sources(
            FileConfig::default(),
            lookup(&[
                ("AGENT_ENDPOINT", "http://agent:9070"),
                ("WATCH_NAMESPACE", "storage"),
                ("RESYNC_INTERVAL_SECS", "30"),
            ]),
        )
        .unwrap();

        assert_eq!(config.namespace.as_deref(), Some("storage"));
        assert_eq!(config.resync_interval, Duration::from_secs(30));
        assert_eq!(config.rpc_max_attempts, 3);
        assert_eq!(config.retry_policy().deadline, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig::from_yaml(
            "agentEndpoint: http://file-agent:9070\n\
             agentEndpoints:\n  rbd.csi.ceph.com: http://rbd-agent:9070\n\
             rpcMaxAttempts: 5\n\
             probeAddr: 127.0.0.1:9090\n",
        )
        .unwrap();

        let config = ControllerConfig::from_sources(
            file,
            lookup(&[
                ("RPC_MAX_ATTEMPTS", "2"),
                ("AGENT_ENDPOINTS", "cephfs.csi.ceph.com=http://cephfs-agent:9070"),
            ]),
        )
        .unwrap();

        assert_eq!(config.rpc_max_attempts, 2);
        assert_eq!(config.agent_endpoint.as_deref(), Some("http://file-agent:9070"));
        assert_eq!(config.agent_endpoints.len(), 2);
        assert_eq!(config.probe_addr, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ControllerConfig::from_sources(
            FileConfig::default(),
            lookup(&[("AGENT_ENDPOINT", "http://agent:9070"), ("RPC_MAX_ATTEMPTS", "many")]),
        )
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let err = ControllerConfig::from_sources(
            FileConfig::default(),
            lookup(&[("AGENT_ENDPOINTS", "rbd.csi.ceph.com")]),
        )
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_agent_endpoint_required() {
        let err = ControllerConfig::from_sources(FileConfig::default(), lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("AGENT_ENDPOINT"));
    }

    #[test]
    fn test_unknown_file_keys_are_rejected() {
        assert!(FileConfig::from_yaml("resyncIntervall: 10\n").is_err());
    }
}
