//! Interface between the repository and the local record model.
//!
//! # Design
//! The repository never looks inside a record. It only needs a type tag, the
//! collection the record is stored in, the primary key once persisted, and
//! a way to move field values in and out as JSON. [`Model`] supplies all of
//! that for plain serde structs through a blanket [`Record`] impl.

use std::any::Any;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RepositoryError;

/// Wire form of a record: its type tag plus its field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "class")]
    pub type_tag: String,
    pub value: Value,
}

/// A local record the repository can store, fetch, and rebuild.
pub trait Record: Any + Send + Sync + fmt::Debug {
    /// Tag identifying the concrete record type on the wire.
    fn type_tag(&self) -> &str;

    /// Collection the record lives in.
    fn collection_name(&self) -> &str;

    /// Primary key, present once the record has been stored.
    fn primary_key(&self) -> Option<Value>;

    fn is_new(&self) -> bool {
        self.primary_key().is_none()
    }

    /// Field values as sent to the server.
    fn serialize(&self) -> Result<Value, RepositoryError>;

    /// Overwrite all field values in place with what the server returned.
    fn replace_value(&mut self, value: Value) -> Result<(), RepositoryError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Record {
    pub fn is<T: Record>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Record>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Record>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// A serde struct usable as a record.
///
/// ```
/// use remote_repository::Model;
/// use serde::{Deserialize, Serialize};
/// use serde_json::Value;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User {
///     #[serde(default, skip_serializing_if = "Option::is_none")]
///     id: Option<String>,
///     name: String,
/// }
///
/// impl Model for User {
///     const TYPE_TAG: &'static str = "User";
///     const COLLECTION: &'static str = "Users";
///
///     fn primary_key(&self) -> Option<Value> {
///         self.id.clone().map(Value::String)
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const TYPE_TAG: &'static str;
    const COLLECTION: &'static str;

    fn primary_key(&self) -> Option<Value>;
}

impl<M: Model> Record for M {
    fn type_tag(&self) -> &str {
        M::TYPE_TAG
    }

    fn collection_name(&self) -> &str {
        M::COLLECTION
    }

    fn primary_key(&self) -> Option<Value> {
        Model::primary_key(self)
    }

    fn serialize(&self) -> Result<Value, RepositoryError> {
        serde_json::to_value(self).map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }

    fn replace_value(&mut self, value: Value) -> Result<(), RepositoryError> {
        *self = serde_json::from_value(value).map_err(|e| {
            RepositoryError::DeserializationError(format!("{}: {e}", M::TYPE_TAG))
        })?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Reference to a persisted record: its collection and primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRef {
    pub collection: String,
    pub key: Value,
}

impl ItemRef {
    pub fn new(collection: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Reference an existing record. New records have no key and are rejected.
    pub fn of(record: &dyn Record) -> Result<Self, RepositoryError> {
        let key = record.primary_key().ok_or_else(|| {
            RepositoryError::InvalidArgument(format!(
                "{} record has no primary key",
                record.type_tag()
            ))
        })?;
        Ok(Self::new(record.collection_name(), key))
    }
}

/// Target of a custom operation: a whole collection or one item in it.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Collection(String),
    Item(ItemRef),
}

impl CallTarget {
    pub fn collection(name: impl Into<String>) -> Self {
        CallTarget::Collection(name.into())
    }

    pub fn item(item: ItemRef) -> Self {
        CallTarget::Item(item)
    }
}
