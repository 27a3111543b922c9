//! Wildcard virtual host patterns
//!
//! Only a single leftmost label may be a wildcard: `*.example.com` matches
//! `api.example.com` but neither `example.com` nor `a.api.example.com`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WildcardError {
    #[error("Empty pattern")]
    EmptyPattern,

    #[error("Wildcard must be the leftmost label only (*.domain.tld): {0}")]
    Misplaced(String),

    #[error("Pattern must have at least two domain parts after the wildcard: {0}")]
    InsufficientDomainParts(String),
}

/// Check that `pattern` has the `*.domain.tld` shape
pub fn validate_wildcard(pattern: &str) -> Result<(), WildcardError> {
    if pattern.is_empty() {
        return Err(WildcardError::EmptyPattern);
    }

    let base_domain = pattern
        .strip_prefix("*.")
        .filter(|base| !base.contains('*'))
        .ok_or_else(|| WildcardError::Misplaced(pattern.to_string()))?;

    if !base_domain.contains('.') || base_domain.split('.').any(str::is_empty) {
        return Err(WildcardError::InsufficientDomainParts(pattern.to_string()));
    }
    Ok(())
}

pub fn is_wildcard_pattern(domain: &str) -> bool {
    domain.starts_with("*.")
}

/// Wildcard pattern one level above a hostname (`api.example.com` -> `*.example.com`)
pub fn extract_parent_wildcard(hostname: &str) -> Option<String> {
    let (_, parent) = hostname.split_once('.')?;
    if !parent.contains('.') {
        return None;
    }
    Some(format!("*.{}", parent))
}
