//! Tunnel clients: the operators owning hosts and a bridge connection

use burrow_proto::{CompressMode, Flow, RateLimiter};
use std::sync::Arc;

/// Per-client settings applied to every link it receives
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub compress: CompressMode,
    pub crypt: bool,
    pub basic_username: Option<String>,
    pub basic_password: Option<String>,
}

impl ClientConfig {
    /// Basic auth credentials, only when both username and password are set
    pub fn basic_credentials(&self) -> Option<(&str, &str)> {
        match (
            self.basic_username.as_deref(),
            self.basic_password.as_deref(),
        ) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }
}

/// A registered tunnel client
#[derive(Debug)]
pub struct Client {
    id: u32,
    remark: String,
    config: ClientConfig,
    /// Usage and quota, shared by all sessions of this client
    flow: Arc<Flow>,
    rate: Option<Arc<RateLimiter>>,
}

impl Client {
    pub fn new(id: u32, config: ClientConfig) -> Self {
        Self {
            id,
            remark: String::new(),
            config,
            flow: Arc::new(Flow::new()),
            rate: None,
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    /// Set the quota in MB (0 = unlimited)
    pub fn with_flow_limit(self, limit_mb: u64) -> Self {
        self.flow.set_limit_mb(limit_mb);
        self
    }

    /// Limit relayed bandwidth in KB/s (0 = unlimited)
    pub fn with_rate_limit(mut self, kb_per_sec: u32) -> Self {
        self.rate = RateLimiter::new(kb_per_sec).map(Arc::new);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn remark(&self) -> &str {
        &self.remark
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn rate(&self) -> Option<&Arc<RateLimiter>> {
        self.rate.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credentials_require_both() {
        let mut config = ClientConfig {
            basic_username: Some("admin".to_string()),
            ..Default::default()
        };
        assert!(config.basic_credentials().is_none());

        config.basic_password = Some(String::new());
        assert!(config.basic_credentials().is_none());

        config.basic_password = Some("secret".to_string());
        assert_eq!(config.basic_credentials(), Some(("admin", "secret")));
    }

    #[test]
    fn test_builder() {
        let client = Client::new(3, ClientConfig::default())
            .with_remark("office")
            .with_flow_limit(10)
            .with_rate_limit(128);
        assert_eq!(client.id(), 3);
        assert_eq!(client.remark(), "office");
        assert_eq!(client.flow().limit_mb(), 10);
        assert_eq!(client.rate().unwrap().bytes_per_sec(), 128 * 1024);
    }
}
