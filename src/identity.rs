//! Connection identity and credential resolution.
//!
//! The host application decides who is on the other end of a socket. The
//! server hands it a [`ConnectRequest`] (request URI and headers captured
//! during the WebSocket handshake) and gets back an [`Identity`] or a
//! rejection.
//!
//! # Example
//!
//! ```ignore
//! use cable_mux::{ConnectRequest, Error, Identity, Result};
//!
//! fn resolve(request: &ConnectRequest) -> Result<Identity> {
//!     let user = request
//!         .query_param("user")
//!         .ok_or_else(|| Error::rejected("missing user"))?;
//!     Ok(Identity::new().with("current_user", user))
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::error::Result;

// ============================================================================
// Identity
// ============================================================================

/// Immutable identifier-name → value mapping resolved once per connection.
///
/// Values are opaque to the server; they are used for lookup
/// (administrative disconnect) and are visible to channel handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    entries: BTreeMap<String, String>,
}

impl Identity {
    /// Creates an empty identity.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of an unauthenticated connection.
    #[inline]
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Adds an identifier. Only usable while building the identity.
    #[inline]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    /// Returns the value for an identifier name.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns `true` if no identifiers are set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("anonymous");
        }
        let mut first = true;
        for (name, value) in &self.entries {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

// ============================================================================
// ConnectRequest
// ============================================================================

/// Credentials presented by a connecting client.
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    /// Request URI (path and query).
    pub uri: String,
    /// Handshake headers, keys lowercased.
    pub headers: FxHashMap<String, String>,
}

impl ConnectRequest {
    /// Creates a request for the given URI with no headers.
    #[inline]
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: FxHashMap::default(),
        }
    }

    /// Adds a header. The name is stored lowercased.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Returns the percent-decoded value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.uri.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| {
                urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string())
            })
    }
}

// ============================================================================
// IdentityResolver
// ============================================================================

/// Resolves connection credentials into an [`Identity`].
///
/// Any `Err` rejects the connection: the transport is closed without a
/// welcome frame.
///
/// Plain closures `Fn(&ConnectRequest) -> Result<Identity>` implement this
/// trait.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// Resolves `request` or rejects it.
    async fn resolve(&self, request: &ConnectRequest) -> Result<Identity>;
}

#[async_trait]
impl<F> IdentityResolver for F
where
    F: Fn(&ConnectRequest) -> Result<Identity> + Send + Sync + 'static,
{
    async fn resolve(&self, request: &ConnectRequest) -> Result<Identity> {
        self(request)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_identity_builder() {
        let identity = Identity::new()
            .with("current_user", "1")
            .with("org", "acme");
        assert_eq!(identity.get("current_user"), Some("1"));
        assert_eq!(identity.get("missing"), None);
        assert_eq!(identity.to_string(), "current_user=1,org=acme");
    }

    #[test]
    fn test_anonymous_display() {
        let identity = Identity::anonymous();
        assert!(identity.is_empty());
        assert_eq!(identity.to_string(), "anonymous");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = ConnectRequest::new("/cable").with_header("Authorization", "Bearer t");
        assert_eq!(request.header("authorization"), Some("Bearer t"));
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer t"));
    }

    #[test]
    fn test_query_param() {
        let request = ConnectRequest::new("/cable?user=jane%20doe&flag");
        assert_eq!(request.query_param("user").as_deref(), Some("jane doe"));
        assert_eq!(request.query_param("flag").as_deref(), Some(""));
        assert_eq!(request.query_param("other"), None);
        assert_eq!(ConnectRequest::new("/cable").query_param("user"), None);
    }

    #[tokio::test]
    async fn test_closure_resolver() {
        let resolver = |request: &ConnectRequest| -> Result<Identity> {
            match request.query_param("user") {
                Some(user) => Ok(Identity::new().with("current_user", user)),
                None => Err(Error::rejected("no user")),
            }
        };

        let ok = resolver
            .resolve(&ConnectRequest::new("/cable?user=1"))
            .await
            .expect("resolves");
        assert_eq!(ok.get("current_user"), Some("1"));

        let err = resolver.resolve(&ConnectRequest::new("/cable")).await;
        assert!(matches!(err, Err(Error::Rejected { .. })));
    }
}
