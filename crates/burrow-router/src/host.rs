//! Virtual host records

use crate::client::Client;
use crate::registry::RouteError;
use crate::wildcard::{is_wildcard_pattern, validate_wildcard};
use burrow_proto::Flow;
use rand::Rng;
use std::sync::Arc;

/// Settings a host is built from
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Exact domain or `*.domain.tld` pattern
    pub domain: String,
    /// Path prefix this host is scoped to, empty or `/` for all paths
    pub location: String,
    /// Backend addresses on the client's side, picked at random per link
    pub targets: Vec<String>,
    /// Replacement Host header, empty to keep the original
    pub host_change: String,
    /// Header overrides, one `Name:value` per line
    pub header_change: String,
}

/// A virtual host routed to one client
#[derive(Debug)]
pub struct Host {
    domain: String,
    location: String,
    client: Arc<Client>,
    targets: Vec<String>,
    host_change: String,
    header_change: Vec<(String, String)>,
    flow: Arc<Flow>,
}

impl Host {
    pub fn new(config: HostConfig, client: Arc<Client>) -> Result<Self, RouteError> {
        let domain = config.domain.trim().to_ascii_lowercase();
        if domain.is_empty() {
            return Err(RouteError::InvalidHost("empty domain".to_string()));
        }
        if is_wildcard_pattern(&domain) {
            validate_wildcard(&domain)
                .map_err(|e| RouteError::InvalidWildcardPattern(e.to_string()))?;
        }

        let targets: Vec<String> = config
            .targets
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if targets.is_empty() {
            return Err(RouteError::InvalidHost(format!("{} has no targets", domain)));
        }

        let location = match config.location.trim() {
            "" => "/".to_string(),
            loc if loc.starts_with('/') => loc.to_string(),
            loc => format!("/{}", loc),
        };

        Ok(Self {
            domain,
            location,
            client,
            targets,
            host_change: config.host_change.trim().to_string(),
            header_change: parse_header_rules(&config.header_change),
            flow: Arc::new(Flow::new()),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Pick a backend uniformly at random; drawn fresh on every call
    pub fn random_target(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.targets.len());
        &self.targets[index]
    }

    pub fn host_change(&self) -> Option<&str> {
        Some(self.host_change.as_str()).filter(|h| !h.is_empty())
    }

    pub fn header_change(&self) -> &[(String, String)] {
        &self.header_change
    }

    /// Traffic relayed through this host
    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub(crate) fn matches_location(&self, path: &str) -> bool {
        path.starts_with(&self.location)
    }
}

/// Parse `Name:value` lines; lines without exactly one colon are skipped
pub fn parse_header_rules(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split(':');
            let (name, value) = (parts.next()?, parts.next()?);
            if parts.next().is_some() {
                return None;
            }
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
