//! In-memory backend speaking the remote repository HTTP protocol.
//!
//! # Design
//! Records are stored per collection as `{ "class", "value" }` envelopes,
//! keyed by their `id` field and kept sorted so range filters are a plain
//! ordered scan. The `agents` collection requires a valid token. Everything
//! else is open. Error responses carry `{ "message", "type" }`.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const REPOSITORY_ID: &str = "a1b2c3d4e5";
pub const SEEDED_TOKEN: &str = "12345678";
pub const USERNAME: &str = "alice@example.com";
pub const PASSWORD: &str = "password";

const AUTHORIZATION_PARAM: &str = "authorization";
const PROTECTED: &[&str] = &["agents"];

static EMPTY: BTreeMap<String, Envelope> = BTreeMap::new();

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub class: String,
    pub value: Value,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Default)]
pub struct Store {
    collections: HashMap<String, BTreeMap<String, Envelope>>,
    tokens: HashSet<String>,
}

impl Store {
    /// Fixture data shared by the test suites.
    pub fn seeded() -> Self {
        let mut store = Self::default();
        store.insert(
            "users",
            "Superuser",
            json!({"id": "aaa", "firstName": "Manu", "age": 42, "superpower": "telepathy"}),
        );
        store.insert("users", "User", json!({"id": "bbb", "firstName": "Vince", "age": 43}));
        store.insert(
            "users",
            "User",
            json!({"id": "ccc", "firstName": "Ada", "age": 67, "retired": true}),
        );
        store.insert("agents", "Agent", json!({"id": "007", "firstName": "James", "age": 39}));
        store.tokens.insert(SEEDED_TOKEN.to_string());
        store
    }

    fn insert(&mut self, collection: &str, class: &str, value: Value) {
        let Some(key) = value.get("id").map(key_string) else {
            return;
        };
        let envelope = Envelope {
            class: class.to_string(),
            value,
        };
        self.items_mut(collection).insert(key, envelope);
    }

    pub fn items(&self, collection: &str) -> &BTreeMap<String, Envelope> {
        self.collections.get(collection).unwrap_or(&EMPTY)
    }

    fn items_mut(&mut self, collection: &str) -> &mut BTreeMap<String, Envelope> {
        self.collections.entry(collection.to_string()).or_default()
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

pub type Db = Arc<RwLock<Store>>;

type Params = HashMap<String, String>;

pub fn app() -> Router {
    app_with(Store::seeded())
}

pub fn app_with(store: Store) -> Router {
    let db: Db = Arc::new(RwLock::new(store));
    Router::new()
        .route("/", get(repository_info))
        .route("/authorizations", post(create_authorization))
        .route(
            "/authorizations/{token}",
            get(check_authorization).delete(revoke_authorization),
        )
        .route(
            "/{collection}",
            get(find_items).post(create_item).delete(find_and_delete_items),
        )
        .route(
            "/{collection}/{key}",
            get(get_item_or_action)
                .post(collection_action)
                .put(update_item)
                .delete(delete_item),
        )
        .route("/{collection}/{key}/{action}", get(item_action))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

fn error(status: StatusCode, message: impl Into<String>, kind: &'static str) -> Response {
    let body = ErrorBody {
        message: message.into(),
        kind,
    };
    (status, Json(body)).into_response()
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(key) => key.clone(),
        other => other.to_string(),
    }
}

/// Class given to records created through `POST /{collection}`.
pub fn default_class(collection: &str) -> String {
    let singular = collection.strip_suffix('s').unwrap_or(collection);
    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn error_if_missing(params: &Params) -> bool {
    params.get("errorIfMissing").map_or(true, |value| value != "false")
}

fn missing(params: &Params, collection: &str, key: &str) -> Response {
    if error_if_missing(params) {
        error(
            StatusCode::NOT_FOUND,
            format!("item '{key}' not found in '{collection}'"),
            "NotFound",
        )
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

fn unknown_action(action: &str) -> Response {
    error(StatusCode::NOT_FOUND, format!("unknown action '{action}'"), "NotFound")
}

fn presented_token<'a>(params: &'a Params, headers: &'a HeaderMap) -> Option<&'a str> {
    params.get(AUTHORIZATION_PARAM).map(String::as_str).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    })
}

fn guard(store: &Store, collection: &str, params: &Params, headers: &HeaderMap) -> Result<(), Response> {
    if !PROTECTED.contains(&collection) {
        return Ok(());
    }
    match presented_token(params, headers) {
        Some(token) if store.has_token(token) => Ok(()),
        _ => Err(error(
            StatusCode::FORBIDDEN,
            format!("'{collection}' requires a valid authorization"),
            "AuthorizationDenied",
        )),
    }
}

/// `start` (inclusive), `end` (exclusive) and `limit` over sorted keys.
#[derive(Debug, Default, PartialEq)]
pub struct Range {
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
}

impl Range {
    pub fn from_params(params: &Params) -> Result<Self, Response> {
        let limit = match params.get("limit") {
            None => None,
            Some(limit) => Some(limit.parse().map_err(|_| {
                error(
                    StatusCode::BAD_REQUEST,
                    format!("invalid limit '{limit}'"),
                    "InvalidRequest",
                )
            })?),
        };
        Ok(Self {
            start: params.get("start").cloned(),
            end: params.get("end").cloned(),
            limit,
        })
    }

    pub fn select<'a>(
        &'a self,
        items: &'a BTreeMap<String, Envelope>,
    ) -> impl Iterator<Item = (&'a String, &'a Envelope)> + 'a {
        items
            .iter()
            .filter(|(key, _)| self.start.as_deref().map_or(true, |start| key.as_str() >= start))
            .filter(|(key, _)| self.end.as_deref().map_or(true, |end| key.as_str() < end))
            .take(self.limit.unwrap_or(usize::MAX))
    }
}

// ---------------------------------------------------------------------------
// Repository and authorizations
// ---------------------------------------------------------------------------

async fn repository_info() -> Json<Value> {
    Json(json!({ "repositoryId": REPOSITORY_ID }))
}

async fn create_authorization(State(db): State<Db>, body: String) -> Response {
    match serde_json::from_str::<Credentials>(&body) {
        Ok(credentials) if credentials.username == USERNAME && credentials.password == PASSWORD => {
            let token = Uuid::new_v4().simple().to_string();
            db.write().await.tokens.insert(token.clone());
            info!("issued authorization");
            json_response(StatusCode::CREATED, token)
        }
        _ => error(StatusCode::FORBIDDEN, "invalid credentials", "AuthorizationDenied"),
    }
}

async fn check_authorization(State(db): State<Db>, Path(token): Path<String>) -> Response {
    if db.read().await.has_token(&token) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error(StatusCode::FORBIDDEN, "unknown authorization", "AuthorizationDenied")
    }
}

async fn revoke_authorization(State(db): State<Db>, Path(token): Path<String>) -> Response {
    if db.write().await.tokens.remove(&token) {
        info!("revoked authorization");
        StatusCode::NO_CONTENT.into_response()
    } else {
        error(StatusCode::NOT_FOUND, "unknown authorization", "NotFound")
    }
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

async fn find_items(
    State(db): State<Db>,
    Path(collection): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let store = db.read().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    let range = match Range::from_params(&params) {
        Ok(range) => range,
        Err(invalid) => return invalid,
    };
    let found: Vec<&Envelope> = range.select(store.items(&collection)).map(|(_, e)| e).collect();
    debug!(%collection, count = found.len(), "find items");
    json_response(StatusCode::OK, found)
}

async fn create_item(
    State(db): State<Db>,
    Path(collection): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    Json(mut value): Json<Value>,
) -> Response {
    let mut store = db.write().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    let Some(fields) = value.as_object_mut() else {
        return error(StatusCode::BAD_REQUEST, "expected a JSON object", "InvalidRequest");
    };
    let existing = fields.get("id").map(key_string);
    let key = match existing {
        Some(key) => key,
        None => {
            let key = Uuid::new_v4().simple().to_string();
            fields.insert("id".to_string(), Value::String(key.clone()));
            key
        }
    };
    let envelope = Envelope {
        class: default_class(&collection),
        value,
    };
    store.items_mut(&collection).insert(key, envelope.clone());
    json_response(StatusCode::CREATED, envelope)
}

async fn find_and_delete_items(
    State(db): State<Db>,
    Path(collection): Path<String>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let mut store = db.write().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    let range = match Range::from_params(&params) {
        Ok(range) => range,
        Err(invalid) => return invalid,
    };
    let keys: Vec<String> = range
        .select(store.items(&collection))
        .map(|(key, _)| key.clone())
        .collect();
    let items = store.items_mut(&collection);
    for key in &keys {
        items.remove(key);
    }
    debug!(%collection, count = keys.len(), "find and delete items");
    json_response(StatusCode::OK, keys.len())
}

/// Collection-level POST actions share the `/{collection}/{key}` route.
async fn collection_action(
    State(db): State<Db>,
    Path((collection, action)): Path<(String, String)>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let store = db.read().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    match action.as_str() {
        "get-items" => {
            let Some(keys) = body.as_array() else {
                return error(StatusCode::BAD_REQUEST, "expected an array of keys", "InvalidRequest");
            };
            let items = store.items(&collection);
            let mut found = Vec::with_capacity(keys.len());
            for key in keys.iter().map(key_string) {
                match items.get(&key) {
                    Some(envelope) => found.push(envelope),
                    None => return missing(&Params::new(), &collection, &key),
                }
            }
            json_response(StatusCode::CREATED, found)
        }
        "restore" => json_response(StatusCode::CREATED, body),
        _ => unknown_action(&action),
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Item fetch, or one of the collection-level GET actions.
async fn get_item_or_action(
    State(db): State<Db>,
    Path((collection, key)): Path<(String, String)>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let store = db.read().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    let items = store.items(&collection);
    match key.as_str() {
        "count" => match Range::from_params(&params) {
            Ok(range) => json_response(StatusCode::OK, range.select(items).count()),
            Err(invalid) => invalid,
        },
        "count-retired" => {
            let retired = items
                .values()
                .filter(|envelope| envelope.value.get("retired") == Some(&Value::Bool(true)))
                .count();
            json_response(StatusCode::OK, retired)
        }
        "ping" => StatusCode::NO_CONTENT.into_response(),
        _ => match items.get(&key) {
            Some(envelope) => json_response(StatusCode::OK, envelope),
            None => missing(&params, &collection, &key),
        },
    }
}

async fn update_item(
    State(db): State<Db>,
    Path((collection, key)): Path<(String, String)>,
    Query(params): Query<Params>,
    headers: HeaderMap,
    Json(mut value): Json<Value>,
) -> Response {
    let mut store = db.write().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    let Some(fields) = value.as_object_mut() else {
        return error(StatusCode::BAD_REQUEST, "expected a JSON object", "InvalidRequest");
    };
    fields.insert("id".to_string(), Value::String(key.clone()));
    match store.items_mut(&collection).get_mut(&key) {
        Some(envelope) => {
            envelope.value = value;
            json_response(StatusCode::OK, &*envelope)
        }
        None => missing(&Params::new(), &collection, &key),
    }
}

async fn delete_item(
    State(db): State<Db>,
    Path((collection, key)): Path<(String, String)>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let mut store = db.write().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    match store.items_mut(&collection).remove(&key) {
        Some(_) => json_response(StatusCode::OK, true),
        None => missing(&params, &collection, &key),
    }
}

async fn item_action(
    State(db): State<Db>,
    Path((collection, key, action)): Path<(String, String, String)>,
    Query(params): Query<Params>,
    headers: HeaderMap,
) -> Response {
    let mut store = db.write().await;
    if let Err(denied) = guard(&store, &collection, &params, &headers) {
        return denied;
    }
    if action != "archive" {
        return unknown_action(&action);
    }
    match store.items_mut(&collection).get_mut(&key) {
        Some(envelope) => {
            if let Some(fields) = envelope.value.as_object_mut() {
                fields.insert("archived".to_string(), Value::Bool(true));
            }
            json_response(StatusCode::OK, json!({ "ok": true }))
        }
        None => missing(&Params::new(), &collection, &key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn keys(range: &Range, store: &Store) -> Vec<String> {
        range.select(store.items("users")).map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn seeded_store_contents() {
        let store = Store::seeded();
        assert_eq!(store.items("users").len(), 3);
        assert_eq!(store.items("users")["aaa"].class, "Superuser");
        assert_eq!(store.items("agents")["007"].value["firstName"], "James");
        assert!(store.has_token(SEEDED_TOKEN));
        assert!(store.items("nothing").is_empty());
    }

    #[test]
    fn range_is_start_inclusive_end_exclusive() {
        let store = Store::seeded();
        let range = Range::from_params(&params(&[("start", "bbb"), ("end", "ccc")])).unwrap();
        assert_eq!(keys(&range, &store), vec!["bbb"]);
    }

    #[test]
    fn range_limit_truncates() {
        let store = Store::seeded();
        let range = Range::from_params(&params(&[("limit", "2")])).unwrap();
        assert_eq!(keys(&range, &store), vec!["aaa", "bbb"]);
        assert!(Range::from_params(&params(&[("limit", "many")])).is_err());
    }

    #[test]
    fn default_class_singularizes_and_capitalizes() {
        assert_eq!(default_class("users"), "User");
        assert_eq!(default_class("agents"), "Agent");
        assert_eq!(default_class("news"), "New");
        assert_eq!(default_class(""), "");
    }

    #[test]
    fn error_if_missing_defaults_to_true() {
        assert!(error_if_missing(&params(&[])));
        assert!(error_if_missing(&params(&[("errorIfMissing", "true")])));
        assert!(!error_if_missing(&params(&[("errorIfMissing", "false")])));
    }

    #[test]
    fn token_from_query_or_bearer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_token(&params(&[("authorization", "q")]), &headers), Some("q"));
        headers.insert(header::AUTHORIZATION, "Bearer h".parse().unwrap());
        assert_eq!(presented_token(&params(&[]), &headers), Some("h"));
    }
}
