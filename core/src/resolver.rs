//! Rebuilding local records from server envelopes.
//!
//! # Design
//! The server's type tag is authoritative: an envelope is always rebuilt as
//! the type its tag names, whatever type the caller asked for. When the tag
//! matches the record the caller passed in, that same record is updated in
//! place and handed back.
//!
//! Batch responses share one [`ResolutionCache`], so each distinct tag costs
//! one registry lookup per batch. The cache lives for a single call only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RepositoryError;
use crate::record::{Envelope, Model, Record};

/// Builds a record of one concrete type from its field values.
pub type RecordFactory = Arc<dyn Fn(Value) -> Result<Box<dyn Record>, RepositoryError> + Send + Sync>;

/// Type tag → factory table.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: HashMap<String, RecordFactory>,
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.factories.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` under `M::TYPE_TAG`, replacing any previous factory.
    pub fn register<M: Model>(&mut self) {
        self.register_factory(M::TYPE_TAG, |value| {
            let record: M = serde_json::from_value(value).map_err(|e| {
                RepositoryError::DeserializationError(format!("{}: {e}", M::TYPE_TAG))
            })?;
            Ok(Box::new(record) as Box<dyn Record>)
        });
    }

    pub fn register_factory<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> Result<Box<dyn Record>, RepositoryError> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    pub fn unregister(&mut self, tag: &str) -> bool {
        self.factories.remove(tag).is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn lookup(&self, tag: &str) -> Option<RecordFactory> {
        self.factories.get(tag).cloned()
    }
}

/// Factories already looked up during one batch response.
#[derive(Default)]
pub struct ResolutionCache {
    entries: HashMap<String, RecordFactory>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Factory for `tag`, consulting `lookup` only on the first request.
    pub fn factory_for<L>(&mut self, tag: &str, lookup: L) -> Result<RecordFactory, RepositoryError>
    where
        L: FnOnce(&str) -> Option<RecordFactory>,
    {
        if let Some(factory) = self.entries.get(tag) {
            return Ok(factory.clone());
        }
        let factory = lookup(tag).ok_or_else(|| unknown_type(tag))?;
        self.entries.insert(tag.to_string(), factory.clone());
        Ok(factory)
    }
}

fn unknown_type(tag: &str) -> RepositoryError {
    tracing::warn!(type_tag = tag, "no record type registered for tag");
    RepositoryError::UnknownType(tag.to_string())
}

/// Rebuild one envelope.
///
/// `requested` is returned updated in place when its tag matches the
/// envelope's; otherwise a fresh record is built from the factory `lookup`
/// provides, memoized through `cache` when one is given.
pub fn resolve<L>(
    envelope: Envelope,
    requested: Option<Box<dyn Record>>,
    cache: Option<&mut ResolutionCache>,
    lookup: L,
) -> Result<Box<dyn Record>, RepositoryError>
where
    L: FnOnce(&str) -> Option<RecordFactory>,
{
    if let Some(mut record) = requested {
        if record.type_tag() == envelope.type_tag {
            record.replace_value(envelope.value)?;
            return Ok(record);
        }
    }

    let factory = match cache {
        Some(cache) => cache.factory_for(&envelope.type_tag, lookup)?,
        None => lookup(&envelope.type_tag).ok_or_else(|| unknown_type(&envelope.type_tag))?,
    };
    factory(envelope.value)
}

/// Rebuild every envelope of a batch with one shared cache.
pub fn resolve_batch<L>(envelopes: Vec<Envelope>, lookup: L) -> Result<Vec<Box<dyn Record>>, RepositoryError>
where
    L: Fn(&str) -> Option<RecordFactory>,
{
    let mut cache = ResolutionCache::new();
    envelopes
        .into_iter()
        .map(|envelope| resolve(envelope, None, Some(&mut cache), &lookup))
        .collect()
}
