//! Host registry shared by every listener
//!
//! Lookup priority:
//! 1. Exact domain, longest matching location
//! 2. Parent wildcard (`*.example.com`), longest matching location
//! 3. Not found

use crate::client::Client;
use crate::host::Host;
use crate::wildcard::{extract_parent_wildcard, is_wildcard_pattern};
use crate::HostResolver;
use burrow_proto::HttpRequest;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Host not found: {host}{path}")]
    HostNotFound { host: String, path: String },

    #[error("Host already exists: {domain}{location}")]
    HostAlreadyExists { domain: String, location: String },

    #[error("Client already exists: {0}")]
    ClientAlreadyExists(u32),

    #[error("Client not found: {0}")]
    ClientNotFound(u32),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Invalid wildcard pattern: {0}")]
    InvalidWildcardPattern(String),
}

/// Registry of clients and their hosts
pub struct HostRegistry {
    clients: DashMap<u32, Arc<Client>>,
    /// Exact domains, each with its hosts sorted by descending location length
    hosts: DashMap<String, Vec<Arc<Host>>>,
    /// Wildcard patterns stored separately for fallback lookup
    wildcard_hosts: DashMap<String, Vec<Arc<Host>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            hosts: DashMap::new(),
            wildcard_hosts: DashMap::new(),
        }
    }

    pub fn register_client(&self, client: Client) -> Result<Arc<Client>, RouteError> {
        let id = client.id();
        if self.clients.contains_key(&id) {
            return Err(RouteError::ClientAlreadyExists(id));
        }
        let client = Arc::new(client);
        self.clients.insert(id, client.clone());
        debug!("Registered client {}", id);
        Ok(client)
    }

    pub fn client(&self, id: u32) -> Option<Arc<Client>> {
        self.clients.get(&id).map(|c| c.value().clone())
    }

    /// Register a host; its client must already be registered
    pub fn register_host(&self, host: Host) -> Result<Arc<Host>, RouteError> {
        let client_id = host.client().id();
        match self.clients.get(&client_id) {
            Some(client) if Arc::ptr_eq(client.value(), host.client()) => {}
            _ => return Err(RouteError::ClientNotFound(client_id)),
        }

        let table = if is_wildcard_pattern(host.domain()) {
            &self.wildcard_hosts
        } else {
            &self.hosts
        };

        let host = Arc::new(host);
        let mut entry = table.entry(host.domain().to_string()).or_default();
        if entry.iter().any(|h| h.location() == host.location()) {
            return Err(RouteError::HostAlreadyExists {
                domain: host.domain().to_string(),
                location: host.location().to_string(),
            });
        }
        entry.push(host.clone());
        entry.sort_by(|a, b| b.location().len().cmp(&a.location().len()));

        debug!(
            "Registered host {}{} -> client {} ({} targets)",
            host.domain(),
            host.location(),
            client_id,
            host.targets().len()
        );
        Ok(host)
    }

    pub fn unregister_host(&self, domain: &str, location: &str) -> Result<Arc<Host>, RouteError> {
        let domain = domain.to_ascii_lowercase();
        let table = if is_wildcard_pattern(&domain) {
            &self.wildcard_hosts
        } else {
            &self.hosts
        };
        let not_found = || RouteError::HostNotFound {
            host: domain.clone(),
            path: location.to_string(),
        };

        let mut entry = table.get_mut(&domain).ok_or_else(not_found)?;
        let index = entry
            .iter()
            .position(|h| h.location() == location)
            .ok_or_else(not_found)?;
        let removed = entry.remove(index);
        let now_empty = entry.is_empty();
        drop(entry);
        if now_empty {
            table.remove_if(&domain, |_, hosts| hosts.is_empty());
        }
        Ok(removed)
    }

    /// Find the host serving `host_header` and `path`
    pub fn lookup(&self, host_header: &str, path: &str) -> Result<Arc<Host>, RouteError> {
        let hostname = normalize_host(host_header);
        trace!("Looking up host {} {}", hostname, path);

        if let Some(host) = Self::best_location(&self.hosts, &hostname, path) {
            return Ok(host);
        }

        if let Some(wildcard) = extract_parent_wildcard(&hostname) {
            if let Some(host) = Self::best_location(&self.wildcard_hosts, &wildcard, path) {
                trace!("Found wildcard host match for {}", hostname);
                return Ok(host);
            }
        }

        Err(RouteError::HostNotFound {
            host: hostname,
            path: path.to_string(),
        })
    }

    fn best_location(
        table: &DashMap<String, Vec<Arc<Host>>>,
        domain: &str,
        path: &str,
    ) -> Option<Arc<Host>> {
        table
            .get(domain)?
            .iter()
            .find(|h| h.matches_location(path))
            .cloned()
    }

    /// All registered hosts
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts
            .iter()
            .chain(self.wildcard_hosts.iter())
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.iter().map(|e| e.value().len()).sum::<usize>()
            + self.wildcard_hosts.iter().map(|e| e.value().len()).sum::<usize>()
    }

    /// Fold every host's traffic into its client's usage counters
    pub fn sync_client_flow(&self) {
        let hosts = self.hosts();
        for client in self.clients.iter() {
            let (export, inlet) = hosts
                .iter()
                .filter(|h| h.client().id() == client.id())
                .fold((0u64, 0u64), |(e, i), h| {
                    (
                        e.saturating_add(h.flow().export_flow()),
                        i.saturating_add(h.flow().inlet_flow()),
                    )
                });
            client.flow().store(export, inlet);
        }
    }

    /// Reset a client's usage, including the host counters it is derived from
    pub fn reset_client_flow(&self, client_id: u32) -> Result<(), RouteError> {
        let client = self
            .client(client_id)
            .ok_or(RouteError::ClientNotFound(client_id))?;
        for host in self.hosts() {
            if host.client().id() == client_id {
                host.flow().reset();
            }
        }
        client.flow().reset();
        Ok(())
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostResolver for HostRegistry {
    fn resolve(&self, host: &str, request: &HttpRequest) -> Result<Arc<Host>, RouteError> {
        self.lookup(host, request.path())
    }
}

/// Lowercase and strip the port (`Example.com:8080` -> `example.com`, `[::1]:80` -> `[::1]`)
fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let host = if host.starts_with('[') {
        host.find(']').map(|end| &host[..=end]).unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    host.to_ascii_lowercase()
}
