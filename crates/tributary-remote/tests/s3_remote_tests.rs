//! S3 adapter against a mocked, path-style S3 endpoint
#![cfg(feature = "s3")]

use tributary_core::config::S3ConnectionConfig;
use tributary_core::ports::{IEntryLister, IRemoteTransfer};
use tributary_remote::S3Remote;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>feeds</Name>
  <Prefix>incoming/</Prefix>
  <Delimiter>/</Delimiter>
  <KeyCount>3</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>incoming/</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <ETag>"d41d8cd98f00b204e9800998ecf8427e"</ETag>
    <Size>0</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>incoming/a.txt</Key>
    <LastModified>2024-01-02T03:04:05.000Z</LastModified>
    <ETag>"5d41402abc4b2a76b9719d911017c592"</ETag>
    <Size>5</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <CommonPrefixes>
    <Prefix>incoming/nested/</Prefix>
  </CommonPrefixes>
</ListBucketResult>"#;

async fn remote_for(server: &MockServer) -> S3Remote {
    S3Remote::connect(&S3ConnectionConfig {
        region: Some("us-east-1".into()),
        endpoint: Some(server.uri()),
        path_style: true,
        access_key: Some("test".into()),
        secret_key: Some("test".into()),
    })
    .await
}

#[tokio::test]
async fn test_list_skips_placeholders_and_prefixes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feeds"))
        .and(query_param("list-type", "2"))
        .and(query_param("prefix", "incoming/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(LISTING),
        )
        .mount(&server)
        .await;

    let remote = remote_for(&server).await;
    let entries = remote.list("feeds/incoming").await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path(), "a.txt");
    assert_eq!(entries[0].size_bytes(), 5);
    assert_eq!(entries[0].marker(), "1704164645000");
}

#[tokio::test]
async fn test_download_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feeds/incoming/a.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_bytes(b"hello".to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/feeds/incoming/a.txt"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server).await;
    let entry = tributary_core::domain::SourceEntry::file("a.txt", chrono::Utc::now(), 5).unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let dest = dir.path().join("a.txt.writing");
    let written = remote.download("feeds/incoming", &entry, &dest).await.unwrap();

    assert_eq!(written, 5);
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

    remote.delete("feeds/incoming", &entry).await.unwrap();
}
