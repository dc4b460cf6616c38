//! Session token storage and its injection into outgoing requests.
//!
//! # Design
//! The session is either signed out or holds one opaque token. Requests read
//! a snapshot of the token when they are built; a sign-out that happens
//! afterwards does not touch requests already in flight. How the token is
//! written onto a request is delegated to an [`AuthorizationSerializer`],
//! so switching from a query parameter to a header needs no change in the
//! repository.

use std::fmt;

use parking_lot::RwLock;
use url::Url;

use crate::error::RepositoryError;
use crate::http::HttpRequest;

/// Query parameter carrying the token under the default serializer.
pub const DEFAULT_AUTHORIZATION_KEY: &str = "authorization";

/// Opaque session token. Its content is never inspected, only forwarded.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Authorization state shared by every operation of one repository.
#[derive(Debug, Default)]
pub struct Session {
    token: RwLock<Option<AuthToken>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.token.read().is_some()
    }

    /// Copy of the current token.
    pub fn token(&self) -> Option<AuthToken> {
        self.token.read().clone()
    }

    pub fn set(&self, token: AuthToken) {
        *self.token.write() = Some(token);
    }

    /// Sign out locally, returning the token that was held.
    pub fn take(&self) -> Option<AuthToken> {
        self.token.write().take()
    }
}

/// Request parameters a serializer wants written onto a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedAuthorization {
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

/// Strategy turning a token into request parameters.
pub trait AuthorizationSerializer: Send + Sync {
    fn serialize(&self, token: &AuthToken) -> SerializedAuthorization;
}

/// Sends the token as one query parameter (`?authorization=<token>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAuthorization {
    key: String,
}

impl QueryAuthorization {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for QueryAuthorization {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHORIZATION_KEY)
    }
}

impl AuthorizationSerializer for QueryAuthorization {
    fn serialize(&self, token: &AuthToken) -> SerializedAuthorization {
        SerializedAuthorization {
            query: vec![(self.key.clone(), token.as_str().to_string())],
            headers: Vec::new(),
        }
    }
}

/// Sends the token as `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BearerAuthorization;

impl AuthorizationSerializer for BearerAuthorization {
    fn serialize(&self, token: &AuthToken) -> SerializedAuthorization {
        SerializedAuthorization {
            query: Vec::new(),
            headers: vec![("authorization".to_string(), format!("Bearer {}", token.as_str()))],
        }
    }
}

/// Apply `token` to `request` through `serializer`. Signed out is a no-op.
///
/// Serialized query parameters replace any existing parameter of the same
/// name; the rest of the query string is preserved in order.
pub fn write_authorization(
    request: &mut HttpRequest,
    token: Option<&AuthToken>,
    serializer: &dyn AuthorizationSerializer,
) -> Result<(), RepositoryError> {
    let Some(token) = token else {
        return Ok(());
    };
    let serialized = serializer.serialize(token);

    if !serialized.query.is_empty() {
        let mut url = Url::parse(&request.url)
            .map_err(|e| RepositoryError::InvalidArgument(format!("request URL {:?}: {e}", request.url)))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !serialized.query.iter().any(|(key, _)| key == name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .extend_pairs(serialized.query);
        request.url = url.into();
    }

    for (name, value) in serialized.headers {
        request.set_header(&name, value);
    }
    Ok(())
}
