//! Endpoint URL construction.
//!
//! # Design
//! URLs are assembled from a parsed [`BaseUrl`] by pushing path segments and
//! query pairs through the `url` crate, which owns percent-encoding. Names
//! (collection, action) are kebab-cased; keys and options go through a
//! [`ValueEncoder`]. The same inputs always produce the same string.
//!
//! The `url` crate leaves `%` untouched inside a pushed segment and silently
//! drops `.` and `..` segments. Key text therefore has its `%` escaped first,
//! and dot-only keys are refused, so two distinct keys never share a URL.

use std::fmt;

use convert_case::{Case, Casing};
use serde_json::Value;
use url::Url;

use crate::encode::ValueEncoder;
use crate::error::RepositoryError;
use crate::options::QueryOptions;

/// A hierarchical (`scheme://host/...`) base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl(Url);

impl BaseUrl {
    pub fn parse(input: &str) -> Result<Self, RepositoryError> {
        let url = Url::parse(input)
            .map_err(|e| RepositoryError::Configuration(format!("invalid base URL {input:?}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(RepositoryError::Configuration(format!(
                "base URL {input:?} cannot carry path segments"
            )));
        }
        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything past the base URL that identifies one request target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Endpoint {
    pub collection: Option<String>,
    pub key: Option<Value>,
    pub action: Option<String>,
    pub options: QueryOptions,
}

impl Endpoint {
    /// The base URL itself.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn key(mut self, key: impl Into<Value>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// Kebab-case form used for collection and action path segments.
pub fn kebab(name: &str) -> String {
    name.to_case(Case::Kebab)
}

/// Path segment text for an encoded key.
///
/// Fails for `.` and `..`, which no URL can carry as a literal segment.
pub fn key_segment(text: &str) -> Result<String, RepositoryError> {
    if matches!(text, "." | "..") {
        return Err(RepositoryError::InvalidArgument(format!(
            "item key {text:?} cannot be addressed as a path segment"
        )));
    }
    Ok(text.replace('%', "%25"))
}

/// Build the URL for `endpoint` under `base`.
///
/// One trailing `/` on the base is dropped before segments are appended. A
/// `null` key is treated as no key. The only failure is a key that
/// [`key_segment`] refuses.
pub fn build_url(base: &BaseUrl, endpoint: &Endpoint, encoder: &dyn ValueEncoder) -> Result<Url, RepositoryError> {
    let key = match endpoint.key.as_ref().filter(|k| !k.is_null()) {
        Some(key) => Some(key_segment(&encoder.encode_key(key))?),
        None => None,
    };
    let mut url = base.as_url().clone();

    // BaseUrl guarantees a hierarchical URL, so path_segments_mut succeeds.
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        if let Some(collection) = &endpoint.collection {
            segments.push(&kebab(collection));
        }
        if let Some(key) = &key {
            segments.push(key);
        }
        if let Some(action) = &endpoint.action {
            segments.push(&kebab(action));
        }
    }

    let pairs = encoder.encode_query(&endpoint.options);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}
