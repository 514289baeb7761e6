//! Hazelcast REST cursor store against a mocked member

use tributary_core::config::HazelcastStoreConfig;
use tributary_core::ports::ICursorStore;
use tributary_cursor::HazelcastCursorStore;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENTRY: &str = "/hazelcast/rest/maps/metaData/a.log";

fn store_for(server: &MockServer) -> HazelcastCursorStore {
    HazelcastCursorStore::new(&HazelcastStoreConfig {
        url: server.uri(),
        map: "metaData".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_get_present_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENTRY))
        .respond_with(ResponseTemplate::new(200).set_body_string("1700000000000"))
        .expect(1)
        .mount(&server)
        .await;

    let value = store_for(&server).get("a.log").await.unwrap();
    assert_eq!(value.as_deref(), Some("1700000000000"));
}

#[tokio::test]
async fn test_get_absent_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENTRY))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert!(store_for(&server).get("a.log").await.unwrap().is_none());
}

#[tokio::test]
async fn test_put_posts_value() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENTRY))
        .and(body_string("42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    store_for(&server).put("a.log", "42").await.unwrap();
}

#[tokio::test]
async fn test_server_error_fails_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENTRY))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(store_for(&server).get("a.log").await.is_err());
}

#[tokio::test]
async fn test_remove_reads_then_deletes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENTRY))
        .respond_with(ResponseTemplate::new(200).set_body_string("7"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(ENTRY))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let previous = store_for(&server).remove("a.log").await.unwrap();
    assert_eq!(previous.as_deref(), Some("7"));
}
