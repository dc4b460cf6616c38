//! Property tests for URL construction and token injection.

use proptest::prelude::*;
use remote_repository::auth::write_authorization;
use remote_repository::{
    build_url, AuthToken, BaseUrl, Endpoint, HttpMethod, HttpRequest, QsEncoder, QueryAuthorization, QueryOptions,
};

fn base() -> BaseUrl {
    BaseUrl::parse("http://localhost:3000").unwrap()
}

fn users_url(options: QueryOptions) -> String {
    build_url(&base(), &Endpoint::collection("users").options(options), &QsEncoder)
        .unwrap()
        .into()
}

proptest! {
    #[test]
    fn option_order_never_matters(
        entries in prop::collection::btree_map("[a-z]{1,6}", "[a-zA-Z0-9 ]{0,6}", 0..6)
    ) {
        let forward: QueryOptions = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let backward: QueryOptions = entries.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();
        prop_assert_eq!(users_url(forward), users_url(backward));
    }

    #[test]
    fn same_inputs_same_url(key in "[a-zA-Z0-9_-]{1,12}", limit in 0u32..1000) {
        let endpoint = Endpoint::collection("Users")
            .key(key.as_str())
            .options(QueryOptions::new().with("limit", limit));
        let first = build_url(&base(), &endpoint, &QsEncoder).unwrap();
        let second = build_url(&base(), &endpoint.clone(), &QsEncoder).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn key_is_always_one_path_segment(key in "[a-zA-Z0-9 ._/?#%&=-]{1,16}") {
        prop_assume!(key != "." && key != "..");
        let url = build_url(&base(), &Endpoint::collection("users").key(key.as_str()), &QsEncoder).unwrap();
        prop_assert_eq!(url.path_segments().map(|s| s.count()), Some(2));
        prop_assert!(url.query().is_none());
        prop_assert!(url.fragment().is_none());
    }

    #[test]
    fn distinct_keys_never_share_a_url(a in "[a-z%./2EeF]{1,6}", b in "[a-z%./2EeF]{1,6}") {
        prop_assume!(a != b);
        let url = |key: &str| build_url(&base(), &Endpoint::collection("users").key(key), &QsEncoder);
        if let (Ok(left), Ok(right)) = (url(&a), url(&b)) {
            prop_assert_ne!(left, right);
        }
    }

    #[test]
    fn token_replaces_any_existing_authorization(
        stale in prop::option::of("[a-z0-9]{1,8}"),
        token in "[a-zA-Z0-9]{1,16}",
    ) {
        let mut options = QueryOptions::new().with("limit", 5);
        if let Some(stale) = stale {
            options.insert("authorization", stale);
        }
        let mut request = HttpRequest::new(HttpMethod::Get, users_url(options));
        write_authorization(&mut request, Some(&AuthToken::new(token.clone())), &QueryAuthorization::default())
            .unwrap();

        let url = url::Url::parse(&request.url).unwrap();
        let values: Vec<String> = url
            .query_pairs()
            .filter(|(name, _)| name == "authorization")
            .map(|(_, value)| value.into_owned())
            .collect();
        prop_assert_eq!(values, vec![token]);
    }
}
