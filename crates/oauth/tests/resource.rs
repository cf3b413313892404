use std::sync::Arc;

use {
    jcard_oauth::{Error, ResourceClient, SessionQuery, TokenStore},
    serde_json::json,
    wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, method, path},
    },
};

#[tokio::test]
async fn test_get_json_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/me/playlists"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "total": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(TokenStore::in_memory("spotify"));
    store.save("tok", None, 3600).unwrap();
    let client = ResourceClient::new(format!("{}/v1", server.uri()), SessionQuery::new(store));

    let body = client.get_json("me/playlists").await.unwrap();
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_unauthorized_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"status": 401, "message": "expired"}})),
        )
        .mount(&server)
        .await;

    let store = Arc::new(TokenStore::in_memory("spotify"));
    store.save("tok", None, 3600).unwrap();
    let client = ResourceClient::new(server.uri(), SessionQuery::new(store));

    match client.get_json("/me").await {
        Err(Error::ResourceRequestFailed { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("expired"));
        },
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_no_session_means_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(TokenStore::in_memory("spotify"));
    let client = ResourceClient::new(server.uri(), SessionQuery::new(store));
    assert!(matches!(
        client.get_json("/me").await,
        Err(Error::NoAccessToken)
    ));
}
