//! Client-side repository that stores and queries typed records through a
//! remote HTTP service.
//!
//! # Overview
//! Every repository operation becomes one HTTP exchange. The URL is derived
//! from the collection, item key, and action. A session token, when present,
//! is attached to each request. Responses carry records wrapped in a
//! `{ "class", "value" }` envelope, and the `class` tag picks the concrete
//! type to rebuild.
//!
//! # Design
//! - Each operation is split into `build_*` (produces an [`HttpRequest`]) and
//!   `parse_*` (consumes an [`HttpResponse`]). The async method in between
//!   awaits a [`Transport`] exactly once.
//! - [`ReqwestTransport`] is the default transport. Tests plug in scripted or
//!   blocking ones.
//! - Records are plain serde structs implementing [`Model`]. The repository
//!   hands them back as `Box<dyn Record>`, and callers downcast.
//! - The session token is the only mutable protocol state. Requests
//!   snapshot it when they are built.

pub mod auth;
pub mod config;
pub mod encode;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod http;
pub mod options;
pub mod record;
pub mod repository;
pub mod resolver;
pub mod transport;

pub use auth::{AuthToken, AuthorizationSerializer, BearerAuthorization, QueryAuthorization, SerializedAuthorization};
pub use config::RepositoryConfig;
pub use encode::{QsEncoder, ValueEncoder};
pub use endpoint::{build_url, kebab, BaseUrl, Endpoint};
pub use error::{map_error, RepositoryError, Result, TransportError};
pub use events::RepositoryListener;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use options::QueryOptions;
pub use record::{CallTarget, Envelope, ItemRef, Model, Record};
pub use repository::RemoteRepository;
pub use resolver::{RecordFactory, TypeRegistry};
pub use transport::{ReqwestTransport, Transport};
