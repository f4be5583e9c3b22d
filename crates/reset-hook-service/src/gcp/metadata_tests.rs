//! Tests for the metadata server client.

use super::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> MetadataClient {
    MetadataClient::new(reqwest::Client::new(), server.uri())
}

#[tokio::test]
async fn test_project_id_sends_metadata_flavor_header() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_string("proj-1\n"))
        .expect(1)
        .mount(&server)
        .await;

    // Act
    let project_id = client(&server).project_id().await;

    // Assert
    assert_eq!(project_id.unwrap(), "proj-1");
}

#[tokio::test]
async fn test_project_id_failure_status_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let result = client(&server).project_id().await;

    assert!(matches!(result, Err(MetadataError::Status { status: 404, .. })));
}

#[tokio::test]
async fn test_empty_project_id_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let result = client(&server).project_id().await;

    assert!(matches!(result, Err(MetadataError::InvalidResponse { .. })));
}

#[tokio::test]
async fn test_access_token_is_cached_until_expiry() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let client = client(&server);

    // Act
    let first = client.access_token().await.unwrap();
    let second = client.access_token().await.unwrap();

    // Assert
    assert_eq!(first.secret(), "ya29.token");
    assert_eq!(second.secret(), "ya29.token");
}

#[tokio::test]
async fn test_nearly_expired_token_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "short-lived",
            "expires_in": 10,
            "token_type": "Bearer"
        })))
        .expect(2)
        .mount(&server)
        .await;
    let client = client(&server);

    client.access_token().await.unwrap();
    client.access_token().await.unwrap();
}

#[tokio::test]
async fn test_malformed_token_response_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let result = client(&server).access_token().await;

    assert!(matches!(result, Err(MetadataError::InvalidResponse { .. })));
}
