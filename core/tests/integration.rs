//! Repository lifecycle against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port, so state changes
//! never leak between tests. Requests go through a blocking ureq agent run
//! on tokio's blocking pool, which proves the repository works with any
//! `Transport`, not just the bundled reqwest one.

mod common;

use async_trait::async_trait;
use common::{start_server, Agent, Superuser, User};
use remote_repository::{
    AuthToken, CallTarget, HttpMethod, HttpRequest, HttpResponse, ItemRef, QueryOptions, Record, RemoteRepository,
    RepositoryConfig, RepositoryError, Transport, TransportError,
};
use serde_json::json;

/// [`Transport`] over a blocking ureq agent.
///
/// ureq's status-as-error behavior is disabled so 4xx/5xx responses come
/// back as data for the repository to interpret.
#[derive(Clone)]
struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || execute(&agent, request))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?
    }
}

fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, headers: &[(String, String)]) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn execute(agent: &ureq::Agent, req: HttpRequest) -> Result<HttpResponse, TransportError> {
    let url = req.url.as_str();
    let headers = req.headers.as_slice();
    let result = match (req.method, req.body.as_deref()) {
        (HttpMethod::Get, _) => with_headers(agent.get(url), headers).call(),
        (HttpMethod::Delete, _) => with_headers(agent.delete(url), headers).call(),
        (HttpMethod::Post, Some(body)) => with_headers(agent.post(url), headers).send(body.as_bytes()),
        (HttpMethod::Post, None) => with_headers(agent.post(url), headers).send_empty(),
        (HttpMethod::Put, Some(body)) => with_headers(agent.put(url), headers).send(body.as_bytes()),
        (HttpMethod::Put, None) => with_headers(agent.put(url), headers).send_empty(),
    };

    let mut response = result.map_err(|err| match err {
        ureq::Error::Timeout(_) => TransportError::Timeout(err.to_string()),
        ureq::Error::Io(_) => TransportError::Connect(err.to_string()),
        other => TransportError::Other(other.to_string()),
    })?;

    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| TransportError::Other(e.to_string()))?;

    Ok(HttpResponse {
        status,
        headers: Vec::new(),
        body,
    })
}

fn repository() -> RemoteRepository<UreqTransport> {
    let repo = RemoteRepository::new(RepositoryConfig::new(start_server()), UreqTransport::new()).unwrap();
    repo.register::<User>();
    repo.register::<Superuser>();
    repo.register::<Agent>();
    repo
}

fn no_options() -> QueryOptions {
    QueryOptions::new()
}

#[tokio::test]
async fn authorization_lifecycle() {
    let repo = repository();
    let agent_007 = ItemRef::new("Agents", "007");

    // Step 1: wrong password is a soft rejection.
    assert!(!repo.is_signed_in());
    let credentials = json!({"username": mock_server::USERNAME, "password": "wrongpass"});
    assert_eq!(repo.sign_in_with_credentials(&credentials).await.unwrap(), None);
    assert!(!repo.is_signed_in());

    // Step 2: protected item is denied while signed out.
    let err = repo.get_item_by_ref(&agent_007, &no_options()).await.unwrap_err();
    assert_eq!(err.status(), Some(403));

    // Step 3: valid credentials sign in.
    let credentials = json!({"username": mock_server::USERNAME, "password": mock_server::PASSWORD});
    let token = repo.sign_in_with_credentials(&credentials).await.unwrap();
    assert!(token.is_some());
    assert!(repo.is_signed_in());

    // Step 4: protected item is readable.
    let item = repo
        .get_item_by_ref(&agent_007, &no_options())
        .await
        .unwrap()
        .unwrap();
    let agent = item.downcast_ref::<Agent>().unwrap();
    assert_eq!(agent.id.as_deref(), Some("007"));
    assert_eq!(agent.first_name, "James");
    assert_eq!(agent.age, 39);

    // Step 5: sign out revokes the token.
    repo.sign_out().await.unwrap();
    assert!(!repo.is_signed_in());
    let err = repo.get_item_by_ref(&agent_007, &no_options()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::AuthorizationDenied { .. }));

    // Step 6: the revoked token is no longer accepted.
    let revoked = token.unwrap();
    assert!(!repo.sign_in_with_authorization(revoked).await.unwrap());
    assert!(!repo.is_signed_in());

    // Step 7: an existing token signs in.
    assert!(repo
        .sign_in_with_authorization(AuthToken::new(mock_server::SEEDED_TOKEN))
        .await
        .unwrap());
    assert!(repo.is_signed_in());
    assert!(repo.get_item_by_ref(&agent_007, &no_options()).await.unwrap().is_some());

    repo.sign_out().await.unwrap();
}

#[tokio::test]
async fn repository_id() {
    let repo = repository();
    assert_eq!(repo.repository_id().await.unwrap(), mock_server::REPOSITORY_ID);
}

#[tokio::test]
async fn get_an_item() {
    let repo = repository();

    let item = repo
        .get_item_by_ref(&ItemRef::new("Users", "aaa"), &no_options())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.type_tag(), "Superuser");
    let superuser = item.downcast_ref::<Superuser>().unwrap();
    assert_eq!(superuser.first_name, "Manu");
    assert_eq!(superuser.age, 42);
    assert_eq!(superuser.superpower, "telepathy");

    let err = repo
        .get_item_by_ref(&ItemRef::new("Users", "xyz"), &no_options())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { .. }));
    assert_eq!(err.kind(), Some("NotFound"));

    let item = repo
        .get_item_by_ref(&ItemRef::new("Users", "xyz"), &QueryOptions::new().error_if_missing(false))
        .await
        .unwrap();
    assert!(item.is_none());
}

#[tokio::test]
async fn awkward_keys_reach_the_server_intact() {
    let repo = repository();

    let err = repo
        .get_item_by_ref(&ItemRef::new("Users", "a%2Fb"), &no_options())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { ref message, .. } if message == "item 'a%2Fb' not found in 'users'"));

    let err = repo
        .get_item_by_ref(&ItemRef::new("Users", "a/b"), &no_options())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { ref message, .. } if message == "item 'a/b' not found in 'users'"));

    let err = repo.delete_item(&ItemRef::new("Users", "."), &no_options()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::InvalidArgument(_)));
    assert_eq!(repo.count_items("Users", &no_options()).await.unwrap(), 3);
}

#[tokio::test]
async fn put_an_item() {
    let repo = repository();

    let mut user = User {
        id: None,
        first_name: "Vince".to_string(),
        age: 43,
    };
    repo.put_item(&mut user, &no_options()).await.unwrap();
    let id = user.id.clone().unwrap();
    assert!(!id.is_empty());
    assert_eq!(user.first_name, "Vince");

    user.age += 1;
    repo.put_item(&mut user, &no_options()).await.unwrap();
    assert_eq!(user.id.as_deref(), Some(id.as_str()));
    assert_eq!(user.age, 44);

    let fetched = repo
        .get_item(Box::new(user.clone()), &no_options())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.downcast_ref::<User>(), Some(&user));
}

#[tokio::test]
async fn delete_an_item() {
    let repo = repository();

    assert!(repo.delete_item(&ItemRef::new("Users", "ccc"), &no_options()).await.unwrap());

    let err = repo
        .delete_item(&ItemRef::new("Users", "xyz"), &no_options())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));

    let soft = QueryOptions::new().error_if_missing(false);
    assert!(!repo.delete_item(&ItemRef::new("Users", "xyz"), &soft).await.unwrap());
}

#[tokio::test]
async fn get_several_items_at_once() {
    let repo = repository();
    let items = repo
        .get_items(&[ItemRef::new("Users", "aaa"), ItemRef::new("Users", "bbb")], &no_options())
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].type_tag(), "Superuser");
    assert_eq!(items[0].downcast_ref::<Superuser>().unwrap().superpower, "telepathy");
    assert_eq!(items[1].type_tag(), "User");
    let vince = items[1].downcast_ref::<User>().unwrap();
    assert_eq!(vince.id.as_deref(), Some("bbb"));
    assert_eq!(vince.age, 43);
}

#[tokio::test]
async fn find_count_and_delete_items() {
    let repo = repository();

    let items = repo.find_items("Users", &no_options()).await.unwrap();
    let tags: Vec<&str> = items.iter().map(|item| item.type_tag()).collect();
    assert_eq!(tags, vec!["Superuser", "User", "User"]);

    let limited = repo
        .find_items("Users", &QueryOptions::new().with("limit", 1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    assert_eq!(repo.count_items("Users", &no_options()).await.unwrap(), 3);

    let range = QueryOptions::new().with("start", "bbb").with("end", "ddd");
    assert_eq!(repo.find_and_delete_items("Users", &range).await.unwrap(), 2);
    assert_eq!(repo.count_items("Users", &no_options()).await.unwrap(), 1);
}

#[tokio::test]
async fn custom_operations() {
    let repo = repository();

    let retired = repo
        .call(&CallTarget::collection("Users"), "countRetired", &no_options(), None)
        .await
        .unwrap();
    assert_eq!(retired, Some(json!(1)));

    let item = repo
        .get_item_by_ref(&ItemRef::new("Users", "aaa"), &no_options())
        .await
        .unwrap()
        .unwrap();
    let target = CallTarget::item(ItemRef::of(item.as_ref()).unwrap());
    let result = repo.call(&target, "archive", &no_options(), None).await.unwrap();
    assert_eq!(result, Some(json!({"ok": true})));

    let archive = json!([{"id": "aaa", "firstName": "Manu", "age": 42}]);
    let restored = repo
        .call(&CallTarget::collection("Users"), "restore", &no_options(), Some(&archive))
        .await
        .unwrap();
    assert_eq!(restored, Some(archive));

    let pong = repo
        .call(&CallTarget::collection("Users"), "ping", &no_options(), None)
        .await
        .unwrap();
    assert_eq!(pong, None);
}
