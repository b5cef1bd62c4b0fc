//! Identities: who a connection belongs to, and which connection it is.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum accepted user id length.
pub const MAX_USER_ID_LENGTH: usize = 256;

/// Query parameter the browser client puts its user id in.
pub const DEFAULT_IDENTITY_PARAM: &str = "userId";

/// Parameters supplied by the client when the connection was established.
pub type HandshakeParams = HashMap<String, String>;

/// Stable, opaque identifier of an authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validate and create a user id.
    ///
    /// Returns `None` for empty ids, over-long ids, and the placeholder strings
    /// browsers produce when interpolating a missing value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.trim();
        if id.is_empty() || id.len() > MAX_USER_ID_LENGTH {
            return None;
        }
        if id == "undefined" || id == "null" {
            return None;
        }
        if id.chars().any(char::is_control) {
            return None;
        }
        Some(Self(id.to_string()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for UserId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live connection.
///
/// Generated ids come from a process-wide counter and are never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{n:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Maps connection handshake metadata to an authenticated user.
///
/// Called once per connection, synchronously, before the connection is
/// registered. Returning `None` leaves the connection anonymous.
pub trait IdentityResolver: Send + Sync {
    /// Resolve the user a connection belongs to.
    fn resolve(&self, params: &HandshakeParams) -> Option<UserId>;
}

/// Reads the user id from a single handshake query parameter.
#[derive(Debug, Clone)]
pub struct QueryParamResolver {
    param: String,
}

impl QueryParamResolver {
    /// Resolve identities from the given query parameter.
    #[must_use]
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }

    /// The query parameter this resolver reads.
    #[must_use]
    pub fn param(&self) -> &str {
        &self.param
    }
}

impl Default for QueryParamResolver {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_PARAM)
    }
}

impl IdentityResolver for QueryParamResolver {
    fn resolve(&self, params: &HandshakeParams) -> Option<UserId> {
        params.get(&self.param).and_then(|raw| UserId::parse(raw))
    }
}

impl<F> IdentityResolver for F
where
    F: Fn(&HandshakeParams) -> Option<UserId> + Send + Sync,
{
    fn resolve(&self, params: &HandshakeParams) -> Option<UserId> {
        self(params)
    }
}
