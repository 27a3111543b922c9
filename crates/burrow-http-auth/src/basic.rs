//! HTTP Basic Authentication provider (RFC 7617)
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```
//!
//! Basic credentials are only encoded, not encrypted; clients that enable it
//! should be reached over the TLS listener.

use crate::{AuthResult, HttpAuthProvider};
use base64::Engine;
use tracing::debug;

/// Validates requests against one configured `username:password` pair
pub struct BasicAuthProvider {
    /// Expected decoded credentials in "username:password" format
    credentials: String,
    /// Realm for the WWW-Authenticate header
    realm: String,
}

impl BasicAuthProvider {
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_realm(username, password, "burrow")
    }

    pub fn with_realm(username: &str, password: &str, realm: &str) -> Self {
        Self {
            credentials: format!("{}:{}", username, password),
            realm: realm.to_string(),
        }
    }

    /// Decode the credentials of a `Basic` Authorization value
    fn extract_credentials(auth_header: &[u8]) -> Option<Vec<u8>> {
        let auth_header = std::str::from_utf8(auth_header).ok()?;
        let (scheme, encoded) = auth_header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()
    }
}

impl HttpAuthProvider for BasicAuthProvider {
    fn authenticate(&self, headers: &[(String, Vec<u8>)]) -> AuthResult {
        for (name, value) in headers {
            if !name.eq_ignore_ascii_case("authorization") {
                continue;
            }
            match Self::extract_credentials(value) {
                Some(credentials) if credentials == self.credentials.as_bytes() => {
                    debug!("Basic auth: valid credentials");
                    return AuthResult::Authenticated;
                }
                Some(_) => debug!("Basic auth: invalid credentials"),
                None => debug!("Basic auth: could not decode credentials"),
            }
        }

        AuthResult::Unauthorized(self.unauthorized_response())
    }

    fn unauthorized_response(&self) -> Vec<u8> {
        let realm_escaped = self.realm.replace('"', "\\\"");
        format!(
            "HTTP/1.1 401 Unauthorized\r\n\
             WWW-Authenticate: Basic realm=\"{}\"\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: 16\r\n\
             Connection: close\r\n\
             \r\n\
             401 Unauthorized",
            realm_escaped
        )
        .into_bytes()
    }

    fn auth_type(&self) -> &'static str {
        "basic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_basic_auth_header(username: &str, password: &str) -> String {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
        format!("Basic {}", encoded)
    }

    fn authorization(value: String) -> Vec<(String, Vec<u8>)> {
        vec![("Authorization".to_string(), value.into_bytes())]
    }

    #[test]
    fn test_valid_credentials() {
        let provider = BasicAuthProvider::new("user", "password");
        assert!(matches!(
            provider.authenticate(&authorization(make_basic_auth_header("user", "password"))),
            AuthResult::Authenticated
        ));
    }

    #[test]
    fn test_invalid_credentials() {
        let provider = BasicAuthProvider::new("user", "password");
        assert!(matches!(
            provider.authenticate(&authorization(make_basic_auth_header("user", "wrong"))),
            AuthResult::Unauthorized(_)
        ));
    }

    #[test]
    fn test_missing_authorization_header() {
        let provider = BasicAuthProvider::new("user", "password");
        let headers = vec![("Host".to_string(), b"example.com".to_vec())];
        assert!(matches!(
            provider.authenticate(&headers),
            AuthResult::Unauthorized(_)
        ));
    }

    #[test]
    fn test_wrong_auth_scheme() {
        let provider = BasicAuthProvider::new("user", "password");
        assert!(matches!(
            provider.authenticate(&authorization("Bearer sometoken".to_string())),
            AuthResult::Unauthorized(_)
        ));
    }

    #[test]
    fn test_scheme_and_header_name_case_insensitive() {
        let provider = BasicAuthProvider::new("user", "password");
        let value = make_basic_auth_header("user", "password").replacen("Basic", "basic", 1);
        let headers = vec![("AUTHORIZATION".to_string(), value.into_bytes())];
        assert!(matches!(
            provider.authenticate(&headers),
            AuthResult::Authenticated
        ));
    }

    #[test]
    fn test_password_containing_colon() {
        let provider = BasicAuthProvider::new("user", "pa:ss");
        assert!(matches!(
            provider.authenticate(&authorization(make_basic_auth_header("user", "pa:ss"))),
            AuthResult::Authenticated
        ));
    }

    #[test]
    fn test_malformed_base64() {
        let provider = BasicAuthProvider::new("user", "password");
        assert!(matches!(
            provider.authenticate(&authorization("Basic !!!invalid!!!".to_string())),
            AuthResult::Unauthorized(_)
        ));
    }

    #[test]
    fn test_non_utf8_header_values_do_not_block_valid_credentials() {
        let provider = BasicAuthProvider::new("user", "password");
        let mut headers = vec![
            ("Authorization".to_string(), b"Basic \xe9\xe9".to_vec()),
            ("X-Note".to_string(), b"caf\xe9".to_vec()),
        ];
        assert!(matches!(
            provider.authenticate(&headers),
            AuthResult::Unauthorized(_)
        ));

        headers.extend(authorization(make_basic_auth_header("user", "password")));
        assert!(matches!(
            provider.authenticate(&headers),
            AuthResult::Authenticated
        ));
    }

    #[test]
    fn test_unauthorized_response_format() {
        let provider = BasicAuthProvider::with_realm("u", "p", "My \"App\"");
        let response = String::from_utf8(provider.unauthorized_response()).unwrap();

        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(response.contains("WWW-Authenticate: Basic realm=\"My \\\"App\\\"\""));
        assert!(response.ends_with("\r\n\r\n401 Unauthorized"));
    }
}
