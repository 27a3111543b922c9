//! HTTP authentication for client hosts
//!
//! A client may protect all of its hosts with a single Basic username and
//! password. The relay challenges requests that do not carry them before any
//! link to the client is opened.
//!
//! # Usage
//!
//! ```
//! use burrow_http_auth::{AuthResult, HttpAuthenticator};
//!
//! let authenticator = HttpAuthenticator::basic("user", "password");
//! let headers = vec![("Authorization".to_string(), b"Basic dXNlcjpwYXNzd29yZA==".to_vec())];
//!
//! match authenticator.authenticate(&headers) {
//!     AuthResult::Authenticated => { /* proceed */ }
//!     AuthResult::Unauthorized(response) => { /* write 401 */ }
//! }
//! ```

mod basic;

pub use basic::BasicAuthProvider;

/// Authentication result
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// Request is authenticated (no auth required or valid credentials)
    Authenticated,
    /// Request requires authentication - includes the 401 response bytes
    Unauthorized(Vec<u8>),
}

/// Trait for HTTP authentication providers
pub trait HttpAuthProvider: Send + Sync {
    /// Authenticate the request based on its (name, raw value) header pairs
    fn authenticate(&self, headers: &[(String, Vec<u8>)]) -> AuthResult;

    /// Generate the 401 Unauthorized response for this auth type
    fn unauthorized_response(&self) -> Vec<u8>;

    /// Return the authentication type name (for logging)
    fn auth_type(&self) -> &'static str;
}

/// No-op authentication provider (always allows requests)
pub struct NoAuthProvider;

impl HttpAuthProvider for NoAuthProvider {
    fn authenticate(&self, _headers: &[(String, Vec<u8>)]) -> AuthResult {
        AuthResult::Authenticated
    }

    fn unauthorized_response(&self) -> Vec<u8> {
        b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 12\r\nConnection: close\r\n\r\nUnauthorized"
            .to_vec()
    }

    fn auth_type(&self) -> &'static str {
        "none"
    }
}

/// Authenticator wrapping whichever provider a client is configured with
pub struct HttpAuthenticator {
    provider: Box<dyn HttpAuthProvider>,
}

impl HttpAuthenticator {
    /// Authenticator for a client's optional (username, password) pair
    pub fn from_credentials(credentials: Option<(&str, &str)>) -> Self {
        match credentials {
            Some((username, password)) => Self::basic(username, password),
            None => Self::none(),
        }
    }

    pub fn basic(username: &str, password: &str) -> Self {
        Self::with_provider(Box::new(BasicAuthProvider::new(username, password)))
    }

    pub fn none() -> Self {
        Self::with_provider(Box::new(NoAuthProvider))
    }

    pub fn with_provider(provider: Box<dyn HttpAuthProvider>) -> Self {
        Self { provider }
    }

    pub fn authenticate(&self, headers: &[(String, Vec<u8>)]) -> AuthResult {
        self.provider.authenticate(headers)
    }

    pub fn auth_type(&self) -> &'static str {
        self.provider.auth_type()
    }
}

impl Default for HttpAuthenticator {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_auth_provider_always_authenticates() {
        let headers = vec![("Host".to_string(), b"example.com".to_vec())];
        assert!(matches!(
            NoAuthProvider.authenticate(&headers),
            AuthResult::Authenticated
        ));
    }

    #[test]
    fn test_from_credentials() {
        let auth = HttpAuthenticator::from_credentials(None);
        assert_eq!(auth.auth_type(), "none");

        let auth = HttpAuthenticator::from_credentials(Some(("u", "p")));
        assert_eq!(auth.auth_type(), "basic");
        assert!(matches!(auth.authenticate(&[]), AuthResult::Unauthorized(_)));
    }
}
