//! Symbol resolution integration tests.
//!
//! Drives the resolver through all three tiers against a mock REST API and
//! verifies the cache suppresses repeat traffic.

use std::time::Duration;

use chrono::Utc;
use questrade_gateway::infrastructure::questrade::{
    Credential, RateLimitConfig, RateLimitedClient, SymbolResolver, SymbolResolverConfig,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credential_for(server: &MockServer) -> Credential {
    Credential {
        access_token: "token".to_string(),
        refresh_token: "refresh".to_string(),
        api_server: format!("{}/", server.uri()),
        token_type: "Bearer".to_string(),
        expires_in: 1800,
        expires_at: Utc::now() + chrono::Duration::seconds(1800),
    }
}

fn resolver() -> SymbolResolver {
    let http = RateLimitedClient::new(Duration::from_secs(5), RateLimitConfig::default()).unwrap();
    SymbolResolver::new(http, SymbolResolverConfig::default())
}

async fn mount_empty_search(server: &MockServer, prefix: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/symbols/search"))
        .and(query_param("prefix", prefix))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"symbols":[]}"#))
        .mount(server)
        .await;
}

#[tokio::test]
async fn tier_one_hit_needs_a_single_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/symbols/search"))
        .and(query_param("prefix", "MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"symbols":[{"symbol":"MSFT","symbolId":27426,"securityType":"Stock"}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver();
    let id = resolver
        .resolve(&credential_for(&server), "MSFT")
        .await
        .unwrap();
    assert_eq!(id, Some(27426));
}

#[tokio::test]
async fn tier_three_walks_the_chain_end_to_end() {
    let server = MockServer::start().await;
    mount_empty_search(&server, "AAPL250117C00170000").await;
    mount_empty_search(&server, "AAPL17Jan25C170.00").await;
    Mock::given(method("GET"))
        .and(path("/v1/symbols/search"))
        .and(query_param("prefix", "AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"symbols":[{"symbol":"AAPL","symbolId":8049,"securityType":"Stock"}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/symbols/8049/options"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"optionChain":[
                {
                    "expiryDate":"2024-12-20T00:00:00.000000-05:00",
                    "chainPerRoot":[{"optionRoot":"AAPL","chainPerStrikePrice":[
                        {"strikePrice":170,"callSymbolId":900,"putSymbolId":901}
                    ]}]
                },
                {
                    "expiryDate":"2025-01-17T00:00:00.000000-05:00",
                    "chainPerRoot":[{"optionRoot":"AAPL","chainPerStrikePrice":[
                        {"strikePrice":165,"callSymbolId":910,"putSymbolId":911},
                        {"strikePrice":170,"callSymbolId":912,"putSymbolId":913}
                    ]}]
                }
            ]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver();
    let id = resolver
        .resolve(&credential_for(&server), "AAPL250117C00170000")
        .await
        .unwrap();
    // Correct expiry and strike, call side.
    assert_eq!(id, Some(912));
}

#[tokio::test]
async fn cache_suppresses_repeat_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/symbols/search"))
        .and(query_param("prefix", "MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"symbols":[{"symbol":"MSFT","symbolId":27426,"securityType":"Stock"}]}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver();
    let credential = credential_for(&server);

    for _ in 0..5 {
        let id = resolver.resolve(&credential, "MSFT").await.unwrap();
        assert_eq!(id, Some(27426));
    }
}

#[tokio::test]
async fn full_miss_is_none_not_an_error() {
    let server = MockServer::start().await;
    mount_empty_search(&server, "ZZZZ250117C00010000").await;
    mount_empty_search(&server, "ZZZZ17Jan25C10.00").await;
    mount_empty_search(&server, "ZZZZ").await;

    let resolver = resolver();
    let id = resolver
        .resolve(&credential_for(&server), "ZZZZ250117C00010000")
        .await
        .unwrap();
    assert_eq!(id, None);
}

#[tokio::test]
async fn upstream_failure_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/symbols/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
        .mount(&server)
        .await;

    let resolver = resolver();
    let result = resolver.resolve(&credential_for(&server), "MSFT").await;
    assert!(result.is_err());
}
