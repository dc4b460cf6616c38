//! Repository operations over a remote HTTP service.
//!
//! # Design
//! Each operation is split into a `build_*` method that produces an
//! `HttpRequest` (URL built, token applied) and a `parse_*` method that
//! interprets the `HttpResponse`. The async operation method runs
//! `build_*`, awaits the transport once, then runs `parse_*`. Callers with
//! their own I/O can drive the `build_*`/`parse_*` pairs directly.
//!
//! The only state shared between operations is the session token, the type
//! registry, and the listener list. None of them is held across the network
//! call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{write_authorization, AuthToken, AuthorizationSerializer, QueryAuthorization, Session};
use crate::config::RepositoryConfig;
use crate::encode::{QsEncoder, ValueEncoder};
use crate::error::{map_error, RepositoryError, Result};
use crate::events::RepositoryListener;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::options::QueryOptions;
use crate::record::{CallTarget, Envelope, ItemRef, Model, Record};
use crate::resolver::{self, RecordFactory, TypeRegistry};
use crate::transport::{ReqwestTransport, Transport};
use crate::endpoint::{build_url, BaseUrl, Endpoint};

const AUTHORIZATIONS: &str = "authorizations";
const GET_ITEMS: &str = "getItems";
const COUNT: &str = "count";

#[derive(Deserialize)]
struct RepositoryIdBody {
    #[serde(rename = "repositoryId")]
    repository_id: String,
}

/// Client-side repository backed by a remote service.
pub struct RemoteRepository<T> {
    base_url: BaseUrl,
    transport: T,
    session: Session,
    serializer: Arc<dyn AuthorizationSerializer>,
    encoder: Arc<dyn ValueEncoder>,
    registry: RwLock<TypeRegistry>,
    listeners: RwLock<Vec<Arc<dyn RepositoryListener>>>,
    repository_id: Mutex<Option<String>>,
    request_timeout: Option<Duration>,
    call_timeout: Duration,
}

impl RemoteRepository<ReqwestTransport> {
    /// Repository over a `reqwest` transport configured from `config`.
    pub fn connect(config: RepositoryConfig) -> Result<Self> {
        let transport = match config.request_timeout {
            Some(timeout) => ReqwestTransport::with_timeout(timeout)?,
            None => ReqwestTransport::new(),
        };
        Self::new(config, transport)
    }
}

impl<T: Transport> RemoteRepository<T> {
    pub fn new(config: RepositoryConfig, transport: T) -> Result<Self> {
        Ok(Self {
            base_url: BaseUrl::parse(&config.base_url)?,
            transport,
            session: Session::new(),
            serializer: Arc::new(QueryAuthorization::default()),
            encoder: Arc::new(QsEncoder),
            registry: RwLock::new(TypeRegistry::new()),
            listeners: RwLock::new(Vec::new()),
            repository_id: Mutex::new(None),
            request_timeout: config.request_timeout,
            call_timeout: config.call_timeout,
        })
    }

    pub fn with_authorization_serializer(mut self, serializer: impl AuthorizationSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn with_value_encoder(mut self, encoder: impl ValueEncoder + 'static) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn base_url(&self) -> &BaseUrl {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // -----------------------------------------------------------------------
    // Type registry and listeners
    // -----------------------------------------------------------------------

    pub fn register<M: Model>(&self) {
        self.registry.write().register::<M>();
    }

    pub fn register_factory<F>(&self, tag: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> Result<Box<dyn Record>> + Send + Sync + 'static,
    {
        self.registry.write().register_factory(tag, factory);
    }

    pub fn unregister(&self, tag: &str) -> bool {
        self.registry.write().unregister(tag)
    }

    pub fn add_listener(&self, listener: Arc<dyn RepositoryListener>) {
        self.listeners.write().push(listener);
    }

    fn lookup(&self, tag: &str) -> Option<RecordFactory> {
        self.registry.read().lookup(tag)
    }

    fn notify(&self, event: impl Fn(&dyn RepositoryListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }

    // -----------------------------------------------------------------------
    // Request plumbing
    // -----------------------------------------------------------------------

    /// URL for `endpoint` under this repository's base URL.
    pub fn make_url(&self, endpoint: &Endpoint) -> Result<String> {
        Ok(build_url(&self.base_url, endpoint, self.encoder.as_ref())?.into())
    }

    fn request(&self, method: HttpMethod, endpoint: &Endpoint) -> Result<HttpRequest> {
        Ok(HttpRequest::new(method, self.make_url(endpoint)?).with_timeout(self.request_timeout))
    }

    /// Apply the session token as it is right now.
    fn authorize(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        let token = self.session.token();
        write_authorization(&mut request, token.as_ref(), self.serializer.as_ref())?;
        Ok(request)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let path = log_path(&request.url);
        debug!(method = %request.method, path = %path, "sending request");
        let response = self.transport.send(request).await?;
        debug!(path = %path, status = response.status, "received response");
        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    pub fn is_signed_in(&self) -> bool {
        self.session.is_signed_in()
    }

    pub fn authorization(&self) -> Option<AuthToken> {
        self.session.token()
    }

    /// Replace the session token without contacting the server.
    pub fn set_authorization(&self, token: Option<AuthToken>) {
        match token {
            Some(token) => self.session.set(token),
            None => {
                self.session.take();
            }
        }
    }

    pub fn build_sign_in_with_credentials<C>(&self, credentials: &C) -> Result<HttpRequest>
    where
        C: Serialize + ?Sized,
    {
        let body =
            serde_json::to_value(credentials).map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
        if body.is_null() {
            return Err(RepositoryError::InvalidArgument("credentials are missing".to_string()));
        }
        self.request(HttpMethod::Post, &Endpoint::collection(AUTHORIZATIONS))?
            .with_json(&body)
    }

    /// `Some(token)` on 201, `None` when the server rejects the credentials.
    pub fn parse_sign_in_with_credentials(&self, response: HttpResponse) -> Result<Option<AuthToken>> {
        match response.status {
            201 => match response.json()? {
                Value::String(token) if !token.is_empty() => Ok(Some(AuthToken::new(token))),
                other => Err(RepositoryError::DeserializationError(format!(
                    "expected an authorization token, got {other}"
                ))),
            },
            403 => Ok(None),
            _ => Err(map_error(&response)),
        }
    }

    /// Create a new authorization. A rejected sign-in is `Ok(None)`.
    pub async fn sign_in_with_credentials<C>(&self, credentials: &C) -> Result<Option<AuthToken>>
    where
        C: Serialize + ?Sized + Sync,
    {
        let request = self.build_sign_in_with_credentials(credentials)?;
        let response = self.send(request).await?;
        let token = self.parse_sign_in_with_credentials(response)?;
        match &token {
            Some(token) => {
                self.session.set(token.clone());
                info!("signed in with credentials");
            }
            None => info!("sign-in with credentials rejected"),
        }
        Ok(token)
    }

    pub fn build_sign_in_with_authorization(&self, token: &AuthToken) -> Result<HttpRequest> {
        if token.as_str().is_empty() {
            return Err(RepositoryError::InvalidArgument("authorization is missing".to_string()));
        }
        let endpoint = Endpoint::collection(AUTHORIZATIONS).key(token.as_str());
        self.request(HttpMethod::Get, &endpoint)
    }

    pub fn parse_sign_in_with_authorization(&self, response: HttpResponse) -> Result<bool> {
        match response.status {
            204 => Ok(true),
            403 => Ok(false),
            _ => Err(map_error(&response)),
        }
    }

    /// Adopt an existing token after the server confirms it is still valid.
    pub async fn sign_in_with_authorization(&self, token: AuthToken) -> Result<bool> {
        let request = self.build_sign_in_with_authorization(&token)?;
        let response = self.send(request).await?;
        let valid = self.parse_sign_in_with_authorization(response)?;
        if valid {
            self.session.set(token);
            info!("signed in with existing authorization");
        } else {
            info!("existing authorization rejected");
        }
        Ok(valid)
    }

    pub fn build_sign_out(&self, token: &AuthToken) -> Result<HttpRequest> {
        let endpoint = Endpoint::collection(AUTHORIZATIONS).key(token.as_str());
        self.request(HttpMethod::Delete, &endpoint)
    }

    pub fn parse_sign_out(&self, response: HttpResponse) -> Result<()> {
        match response.status {
            204 => Ok(()),
            _ => Err(map_error(&response)),
        }
    }

    /// Revoke the current token. No-op when signed out.
    ///
    /// The session is cleared before the revoke request is sent, so it ends
    /// signed out even if the request fails.
    pub async fn sign_out(&self) -> Result<()> {
        let Some(token) = self.session.take() else {
            return Ok(());
        };
        info!("signed out");
        let response = self.send(self.build_sign_out(&token)?).await?;
        self.parse_sign_out(response)
    }

    // -----------------------------------------------------------------------
    // Repository identity and transactions
    // -----------------------------------------------------------------------

    pub fn build_get_repository_id(&self) -> Result<HttpRequest> {
        self.authorize(self.request(HttpMethod::Get, &Endpoint::root())?)
    }

    pub fn parse_get_repository_id(&self, response: HttpResponse) -> Result<String> {
        check_status(&response, 200)?;
        let body: RepositoryIdBody = parse_body(&response)?;
        Ok(body.repository_id)
    }

    /// Server-assigned repository id, fetched once and then cached.
    pub async fn repository_id(&self) -> Result<String> {
        if let Some(id) = self.repository_id.lock().clone() {
            return Ok(id);
        }
        let response = self.send(self.build_get_repository_id()?).await?;
        let id = self.parse_get_repository_id(response)?;
        *self.repository_id.lock() = Some(id.clone());
        Ok(id)
    }

    /// Run `f` against this repository. Remote transactions are not
    /// supported: nothing is rolled back if `f` fails halfway.
    pub async fn transaction<'a, F, Fut, R>(&'a self, f: F) -> Result<R>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = Result<R>> + 'a,
    {
        f(self).await
    }

    pub fn is_inside_transaction(&self) -> bool {
        false
    }

    // -----------------------------------------------------------------------
    // Single items
    // -----------------------------------------------------------------------

    pub fn build_get_item(&self, item: &ItemRef, options: &QueryOptions) -> Result<HttpRequest> {
        let endpoint = Endpoint::collection(&item.collection)
            .key(item.key.clone())
            .options(options.clone());
        self.authorize(self.request(HttpMethod::Get, &endpoint)?)
    }

    /// `None` on 204 (soft miss). `requested`, when its type matches the
    /// returned tag, is updated in place and returned.
    pub fn parse_get_item(
        &self,
        response: HttpResponse,
        requested: Option<Box<dyn Record>>,
    ) -> Result<Option<Box<dyn Record>>> {
        if response.status == 204 {
            return Ok(None);
        }
        check_status(&response, 200)?;
        let envelope: Envelope = parse_body(&response)?;
        resolver::resolve(envelope, requested, None, |tag| self.lookup(tag)).map(Some)
    }

    /// Fetch `item` again from the server.
    ///
    /// The result may be a different type than `item` when the server
    /// reports a subtype.
    pub async fn get_item(&self, item: Box<dyn Record>, options: &QueryOptions) -> Result<Option<Box<dyn Record>>> {
        let item_ref = ItemRef::of(item.as_ref())?;
        let request = self.build_get_item(&item_ref, options)?;
        let response = self.send(request).await?;
        self.parse_get_item(response, Some(item))
    }

    pub async fn get_item_by_ref(&self, item: &ItemRef, options: &QueryOptions) -> Result<Option<Box<dyn Record>>> {
        let request = self.build_get_item(item, options)?;
        let response = self.send(request).await?;
        self.parse_get_item(response, None)
    }

    /// POST for a new record, PUT for an existing one.
    pub fn build_put_item(&self, item: &dyn Record, options: &QueryOptions) -> Result<HttpRequest> {
        let (method, endpoint) = if item.is_new() {
            (HttpMethod::Post, Endpoint::collection(item.collection_name()))
        } else {
            let item_ref = ItemRef::of(item)?;
            (HttpMethod::Put, Endpoint::collection(item_ref.collection).key(item_ref.key))
        };
        let body = item.serialize()?;
        let request = self
            .request(method, &endpoint.options(options.clone()))?
            .with_json(&body)?;
        self.authorize(request)
    }

    /// Copy the stored values the server returned into `item`.
    pub fn parse_put_item(&self, response: HttpResponse, item: &mut dyn Record, created: bool) -> Result<()> {
        check_status(&response, if created { 201 } else { 200 })?;
        let envelope: Envelope = parse_body(&response)?;
        item.replace_value(envelope.value)
    }

    /// Store `item`, then fire `did_put_item`.
    pub async fn put_item(&self, item: &mut dyn Record, options: &QueryOptions) -> Result<()> {
        let created = item.is_new();
        let request = self.build_put_item(item, options)?;
        let response = self.send(request).await?;
        self.parse_put_item(response, item, created)?;
        self.notify(|listener| listener.did_put_item(&*item, options));
        Ok(())
    }

    pub fn build_delete_item(&self, item: &ItemRef, options: &QueryOptions) -> Result<HttpRequest> {
        let endpoint = Endpoint::collection(&item.collection)
            .key(item.key.clone())
            .options(options.clone());
        self.authorize(self.request(HttpMethod::Delete, &endpoint)?)
    }

    /// `true` when the server reports something was removed.
    ///
    /// A 200 body may be a boolean or a count. 204 is the soft-miss answer
    /// (`errorIfMissing=false` on a missing item) and reads as `false`.
    pub fn parse_delete_item(&self, response: HttpResponse) -> Result<bool> {
        match response.status {
            204 => Ok(false),
            200 => match response.json()? {
                Value::Bool(deleted) => Ok(deleted),
                Value::Number(count) => Ok(count.as_u64().is_some_and(|n| n > 0)),
                Value::Null => Ok(false),
                other => Err(RepositoryError::DeserializationError(format!(
                    "expected a boolean or count, got {other}"
                ))),
            },
            _ => Err(map_error(&response)),
        }
    }

    /// Delete one item, firing `did_delete_item` if it was removed.
    pub async fn delete_item(&self, item: &ItemRef, options: &QueryOptions) -> Result<bool> {
        let request = self.build_delete_item(item, options)?;
        let response = self.send(request).await?;
        let deleted = self.parse_delete_item(response)?;
        if deleted {
            self.notify(|listener| listener.did_delete_item(item, options));
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Batches and queries
    // -----------------------------------------------------------------------

    /// Batch fetch. All refs must name the same collection.
    pub fn build_get_items(&self, items: &[ItemRef], options: &QueryOptions) -> Result<HttpRequest> {
        let Some((first, rest)) = items.split_first() else {
            return Err(RepositoryError::InvalidArgument("no items to fetch".to_string()));
        };
        if let Some(other) = rest.iter().find(|item| item.collection != first.collection) {
            return Err(RepositoryError::InvalidArgument(format!(
                "items span collections {:?} and {:?}",
                first.collection, other.collection
            )));
        }
        let keys: Vec<Value> = items.iter().map(|item| item.key.clone()).collect();
        let endpoint = Endpoint::collection(&first.collection)
            .action(GET_ITEMS)
            .options(options.clone());
        let request = self
            .request(HttpMethod::Post, &endpoint)?
            .with_json(&Value::Array(keys))?;
        self.authorize(request)
    }

    pub fn parse_get_items(&self, response: HttpResponse) -> Result<Vec<Box<dyn Record>>> {
        check_status(&response, 201)?;
        self.resolve_envelopes(&response)
    }

    /// Fetch several items of one collection in a single request. An empty
    /// slice returns an empty result without contacting the server.
    pub async fn get_items(&self, items: &[ItemRef], options: &QueryOptions) -> Result<Vec<Box<dyn Record>>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.build_get_items(items, options)?;
        let response = self.send(request).await?;
        self.parse_get_items(response)
    }

    pub fn build_find_items(&self, collection: &str, options: &QueryOptions) -> Result<HttpRequest> {
        let endpoint = Endpoint::collection(collection).options(options.clone());
        self.authorize(self.request(HttpMethod::Get, &endpoint)?)
    }

    pub fn parse_find_items(&self, response: HttpResponse) -> Result<Vec<Box<dyn Record>>> {
        check_status(&response, 200)?;
        self.resolve_envelopes(&response)
    }

    pub async fn find_items(&self, collection: &str, options: &QueryOptions) -> Result<Vec<Box<dyn Record>>> {
        let request = self.build_find_items(collection, options)?;
        let response = self.send(request).await?;
        self.parse_find_items(response)
    }

    fn resolve_envelopes(&self, response: &HttpResponse) -> Result<Vec<Box<dyn Record>>> {
        let envelopes: Vec<Envelope> = parse_body(response)?;
        let records = resolver::resolve_batch(envelopes, |tag| self.lookup(tag))?;
        debug!(count = records.len(), "resolved records");
        Ok(records)
    }

    pub fn build_count_items(&self, collection: &str, options: &QueryOptions) -> Result<HttpRequest> {
        let endpoint = Endpoint::collection(collection)
            .action(COUNT)
            .options(options.clone());
        self.authorize(self.request(HttpMethod::Get, &endpoint)?)
    }

    pub fn parse_count_items(&self, response: HttpResponse) -> Result<u64> {
        check_status(&response, 200)?;
        parse_body(&response)
    }

    pub async fn count_items(&self, collection: &str, options: &QueryOptions) -> Result<u64> {
        let request = self.build_count_items(collection, options)?;
        let response = self.send(request).await?;
        self.parse_count_items(response)
    }

    /// Streaming iteration is not available over this protocol.
    pub async fn for_each_items<F>(&self, _collection: &str, _options: &QueryOptions, _f: F) -> Result<()>
    where
        F: FnMut(Box<dyn Record>) + Send,
    {
        Err(RepositoryError::Unsupported("for_each_items"))
    }

    pub fn build_find_and_delete_items(&self, collection: &str, options: &QueryOptions) -> Result<HttpRequest> {
        let endpoint = Endpoint::collection(collection).options(options.clone());
        let request = self
            .request(HttpMethod::Delete, &endpoint)?
            .with_timeout(Some(self.call_timeout));
        self.authorize(request)
    }

    /// Number of records the server deleted.
    pub fn parse_find_and_delete_items(&self, response: HttpResponse) -> Result<u64> {
        check_status(&response, 200)?;
        parse_body(&response)
    }

    pub async fn find_and_delete_items(&self, collection: &str, options: &QueryOptions) -> Result<u64> {
        let request = self.build_find_and_delete_items(collection, options)?;
        let response = self.send(request).await?;
        self.parse_find_and_delete_items(response)
    }

    // -----------------------------------------------------------------------
    // Custom operations
    // -----------------------------------------------------------------------

    /// GET without a body, POST with one. Uses the long call timeout.
    pub fn build_call(
        &self,
        target: &CallTarget,
        method: &str,
        options: &QueryOptions,
        body: Option<&Value>,
    ) -> Result<HttpRequest> {
        let endpoint = match target {
            CallTarget::Collection(collection) => Endpoint::collection(collection),
            CallTarget::Item(item) => Endpoint::collection(&item.collection).key(item.key.clone()),
        }
        .action(method)
        .options(options.clone());

        let request = match body.filter(|body| !body.is_null()) {
            None => self.request(HttpMethod::Get, &endpoint)?,
            Some(body) => self.request(HttpMethod::Post, &endpoint)?.with_json(body)?,
        };
        self.authorize(request.with_timeout(Some(self.call_timeout)))
    }

    /// Response body on 200 (GET) / 201 (POST), `None` on 204.
    pub fn parse_call(&self, response: HttpResponse, with_body: bool) -> Result<Option<Value>> {
        let expected = if with_body { 201 } else { 200 };
        match response.status {
            status if status == expected => response.json().map(Some),
            204 => Ok(None),
            _ => Err(map_error(&response)),
        }
    }

    /// Invoke a server-side operation named `method` on `target`.
    pub async fn call(
        &self,
        target: &CallTarget,
        method: &str,
        options: &QueryOptions,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let with_body = body.is_some_and(|body| !body.is_null());
        let request = self.build_call(target, method, options, body)?;
        let response = self.send(request).await?;
        self.parse_call(response, with_body)
    }
}

/// Pass when `response.status == expected`, otherwise map the response to
/// the matching error.
/// Request URL for logs: no query string, and no token in the path of an
/// authorization endpoint.
fn log_path(url: &str) -> String {
    let path = url.split('?').next().unwrap_or_default();
    match path.rsplit_once('/') {
        Some((head, _)) if head.ends_with(&format!("/{AUTHORIZATIONS}")) => format!("{head}/<redacted>"),
        _ => path.to_string(),
    }
}

fn check_status(response: &HttpResponse, expected: u16) -> Result<()> {
    if response.status == expected {
        return Ok(());
    }
    Err(map_error(response))
}

fn parse_body<D: DeserializeOwned>(response: &HttpResponse) -> Result<D> {
    serde_json::from_str(&response.body).map_err(|e| RepositoryError::DeserializationError(e.to_string()))
}
