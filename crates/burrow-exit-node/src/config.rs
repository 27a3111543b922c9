//! Relay configuration file: tunnel clients and the hosts they own
//!
//! ```yaml
//! clients:
//!   - id: 1
//!     remark: staging
//!     flow_limit_mb: 1024
//!     basic_username: admin
//!     basic_password: secret
//!     local_agent: true
//! hosts:
//!   - client_id: 1
//!     domain: app.example.com
//!     targets: ["127.0.0.1:8080"]
//!     header_change: |
//!       X-Env:staging
//! ```

use anyhow::{bail, Context, Result};
use burrow_proto::CompressMode;
use burrow_router::{Client, ClientConfig, Host, HostConfig, HostRegistry};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientEntry {
    pub id: u32,
    #[serde(default)]
    pub remark: String,
    /// Traffic quota in MB, 0 for unlimited
    #[serde(default)]
    pub flow_limit_mb: u64,
    /// Relay bandwidth in KB/s, 0 for unlimited
    #[serde(default)]
    pub rate_limit_kb: u32,
    #[serde(default)]
    pub compress: CompressMode,
    #[serde(default)]
    pub crypt: bool,
    pub basic_username: Option<String>,
    pub basic_password: Option<String>,
    /// Serve this client from the relay itself by dialing its targets directly
    #[serde(default)]
    pub local_agent: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEntry {
    pub client_id: u32,
    pub domain: String,
    #[serde(default)]
    pub location: String,
    pub targets: Vec<String>,
    #[serde(default)]
    pub host_change: String,
    #[serde(default)]
    pub header_change: String,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for host in &self.hosts {
            if !self.clients.iter().any(|c| c.id == host.client_id) {
                bail!(
                    "Host {} references unknown client {}",
                    host.domain,
                    host.client_id
                );
            }
        }
        Ok(())
    }

    /// Build the routing table described by this config
    pub fn build_registry(&self) -> Result<HostRegistry> {
        let registry = HostRegistry::new();

        for entry in &self.clients {
            let config = ClientConfig {
                compress: entry.compress,
                crypt: entry.crypt,
                basic_username: entry.basic_username.clone(),
                basic_password: entry.basic_password.clone(),
            };
            let client = Client::new(entry.id, config)
                .with_remark(entry.remark.clone())
                .with_flow_limit(entry.flow_limit_mb)
                .with_rate_limit(entry.rate_limit_kb);
            registry.register_client(client)?;
        }

        for entry in &self.hosts {
            let client = registry
                .client(entry.client_id)
                .with_context(|| format!("Unknown client {}", entry.client_id))?;
            let host = Host::new(
                HostConfig {
                    domain: entry.domain.clone(),
                    location: entry.location.clone(),
                    targets: entry.targets.clone(),
                    host_change: entry.host_change.clone(),
                    header_change: entry.header_change.clone(),
                },
                client,
            )?;
            registry.register_host(host)?;
        }

        Ok(registry)
    }
}
