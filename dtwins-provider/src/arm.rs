//! Azure Resource Manager transport for [`DigitalTwinsApi`].
//!
//! Token acquisition and retries belong to the caller; this client sends one
//! request per call with the supplied bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::api::{AsyncOperation, DigitalTwinsApi, OperationKind, OperationStatus, PatchOutcome};
use crate::config::ProviderConfig;
use crate::error::ApiError;
use crate::id::DigitalTwinsId;
use crate::model::{Description, PatchDescription};

const ASYNC_OPERATION: &str = "azure-asyncoperation";
const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Body of an operation status poll. Azure-AsyncOperation endpoints report
/// `status`; polling the resource itself reports `properties.provisioningState`.
#[derive(Debug, Deserialize)]
struct PollBody {
    status: Option<String>,
    error: Option<ErrorDetail>,
    properties: Option<PollProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollProperties {
    provisioning_state: Option<String>,
}

/// HTTPS client for `Microsoft.DigitalTwins/digitalTwinsInstances`.
pub struct ArmClient {
    http: Client,
    endpoint: String,
    api_version: String,
    token: String,
}

impl ArmClient {
    pub fn new(config: &ProviderConfig, token: impl Into<String>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("dtwins-provider/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            token: token.into(),
        })
    }

    fn url(&self, id: &DigitalTwinsId) -> String {
        format!("{}{}?api-version={}", self.endpoint, id, self.api_version)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        request
            .bearer_auth(&self.token)
            .header(CLIENT_REQUEST_ID, Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))
    }
}

/// Map a non-success response to an [`ApiError`].
async fn error_for(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or(body);

    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::CONFLICT => ApiError::Conflict(message),
        _ => ApiError::Status {
            code: status.as_u16(),
            message,
        },
    }
}

/// Decode a JSON body. An empty body is `None`; anything else that does not
/// decode is an error.
async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| ApiError::Decode(e.to_string()))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Operation URL from `Azure-AsyncOperation`, falling back to `Location`.
fn operation_url(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ASYNC_OPERATION)
        .or_else(|| headers.get(LOCATION))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map an ARM status or provisioning state to an [`OperationStatus`].
fn status_from_state(state: &str, error: Option<ErrorDetail>) -> OperationStatus {
    match state.to_ascii_lowercase().as_str() {
        "succeeded" | "deleted" => OperationStatus::Succeeded,
        "failed" => OperationStatus::Failed {
            reason: error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "operation failed".to_string()),
        },
        "canceled" | "cancelled" => OperationStatus::Failed {
            reason: "operation was canceled".to_string(),
        },
        _ => OperationStatus::InProgress { retry_after: None },
    }
}

fn pending_from(kind: OperationKind, headers: &HeaderMap, fallback: String) -> AsyncOperation {
    let reference = operation_url(headers).unwrap_or(fallback);
    AsyncOperation::pending(kind, reference).with_retry_after(retry_after(headers))
}

#[async_trait]
impl DigitalTwinsApi for ArmClient {
    async fn get(&self, id: &DigitalTwinsId) -> Result<Description, ApiError> {
        let response = self.send(self.http.get(self.url(id))).await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        response
            .json::<Description>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn create_or_update(
        &self,
        id: &DigitalTwinsId,
        description: &Description,
    ) -> Result<AsyncOperation, ApiError> {
        let url = self.url(id);
        let response = self
            .send(self.http.put(url.as_str()).json(description))
            .await?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }

        let headers = response.headers().clone();
        if operation_url(&headers).is_some() {
            return Ok(pending_from(OperationKind::Create, &headers, url));
        }
        let state = decode_body::<Description>(response)
            .await?
            .and_then(|d| d.properties)
            .and_then(|p| p.provisioning_state)
            .unwrap_or_default();
        debug!(%id, state = %state, "PUT returned without an operation header");
        match status_from_state(&state, None) {
            OperationStatus::Succeeded => Ok(AsyncOperation::completed(OperationKind::Create)),
            // Poll the resource until provisioning settles
            _ => Ok(pending_from(OperationKind::Create, &headers, url)),
        }
    }

    async fn update(
        &self,
        id: &DigitalTwinsId,
        patch: &PatchDescription,
    ) -> Result<PatchOutcome, ApiError> {
        let url = self.url(id);
        let response = self.send(self.http.patch(url.as_str()).json(patch)).await?;
        match response.status() {
            StatusCode::ACCEPTED => Ok(PatchOutcome::Accepted(pending_from(
                OperationKind::Update,
                response.headers(),
                url,
            ))),
            s if s.is_success() => Ok(PatchOutcome::Applied),
            _ => Err(error_for(response).await),
        }
    }

    async fn delete(&self, id: &DigitalTwinsId) -> Result<AsyncOperation, ApiError> {
        let url = self.url(id);
        let response = self.send(self.http.delete(url.as_str())).await?;
        match response.status() {
            StatusCode::ACCEPTED => Ok(pending_from(
                OperationKind::Delete,
                response.headers(),
                url,
            )),
            s if s.is_success() => Ok(AsyncOperation::completed(OperationKind::Delete)),
            _ => Err(error_for(response).await),
        }
    }

    async fn poll(&self, operation: &AsyncOperation) -> Result<OperationStatus, ApiError> {
        let response = self
            .send(self.http.get(operation.reference()))
            .await?;
        let status = response.status();
        let hint = retry_after(response.headers());

        // Polling the resource URL of a delete: gone means done
        if status == StatusCode::NOT_FOUND && operation.kind() == OperationKind::Delete {
            return Ok(OperationStatus::Succeeded);
        }
        if status == StatusCode::ACCEPTED {
            return Ok(OperationStatus::InProgress { retry_after: hint });
        }
        if !status.is_success() {
            return Err(error_for(response).await);
        }

        // Location-style polling finishes with an empty 200/204
        let Some(body) = decode_body::<PollBody>(response).await? else {
            return Ok(OperationStatus::Succeeded);
        };
        let state = body
            .status
            .or_else(|| body.properties.and_then(|p| p.provisioning_state))
            .ok_or_else(|| ApiError::Decode("poll response carries no status".to_string()))?;
        Ok(match status_from_state(&state, body.error) {
            OperationStatus::InProgress { .. } => OperationStatus::InProgress { retry_after: hint },
            terminal => terminal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url() {
        let mut config = ProviderConfig::new("sub");
        config.endpoint = "https://management.example.com/".to_string();
        let client = ArmClient::new(&config, "token").unwrap();
        let id = DigitalTwinsId::new("sub", "rg1", "dt1").unwrap();
        assert_eq!(
            client.url(&id),
            "https://management.example.com/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.DigitalTwins/digitalTwinsInstances/dt1?api-version=2020-10-31"
        );
    }

    #[test]
    fn test_operation_url_prefers_async_operation_header() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://loc"));
        assert_eq!(operation_url(&headers).as_deref(), Some("https://loc"));

        headers.insert(ASYNC_OPERATION, HeaderValue::from_static("https://async"));
        assert_eq!(operation_url(&headers).as_deref(), Some("https://async"));

        assert_eq!(operation_url(&HeaderMap::new()), None);
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("15"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(15)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_status_from_state() {
        assert_eq!(
            status_from_state("Succeeded", None),
            OperationStatus::Succeeded
        );
        assert_eq!(
            status_from_state("Provisioning", None),
            OperationStatus::InProgress { retry_after: None }
        );
        assert_eq!(
            status_from_state("Canceled", None),
            OperationStatus::Failed {
                reason: "operation was canceled".to_string()
            }
        );
        assert_eq!(
            status_from_state(
                "Failed",
                Some(ErrorDetail {
                    code: "QuotaExceeded".to_string(),
                    message: "too many instances".to_string(),
                })
            ),
            OperationStatus::Failed {
                reason: "QuotaExceeded: too many instances".to_string()
            }
        );
    }

    // =========================================================================
    // Request-level mapping against a mock Resource Manager
    // =========================================================================

    const INSTANCE_PATH: &str =
        "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.DigitalTwins/digitalTwinsInstances/dt1";

    fn client(server: &MockServer) -> ArmClient {
        let mut config = ProviderConfig::new("sub");
        config.endpoint = server.uri();
        ArmClient::new(&config, "token").unwrap()
    }

    fn instance() -> DigitalTwinsId {
        DigitalTwinsId::new("sub", "rg1", "dt1").unwrap()
    }

    async fn mount(server: &MockServer, verb: &str, route: &str, response: ResponseTemplate) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    /// Poll an operation whose status URL answers with `response`.
    async fn poll_with(kind: OperationKind, response: ResponseTemplate) -> Result<OperationStatus, ApiError> {
        let server = MockServer::start().await;
        mount(&server, "GET", "/operations/op1", response).await;
        let op = AsyncOperation::pending(kind, format!("{}/operations/op1", server.uri()));
        client(&server).poll(&op).await
    }

    #[tokio::test]
    async fn test_get_sends_token_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTANCE_PATH))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": INSTANCE_PATH,
                "name": "dt1",
                "location": "westus",
                "properties": { "provisioningState": "Succeeded" }
            })))
            .mount(&server)
            .await;

        let description = client(&server).get(&instance()).await.unwrap();
        assert_eq!(description.id.as_deref(), Some(INSTANCE_PATH));
        assert_eq!(description.location.as_deref(), Some("westus"));
    }

    #[tokio::test]
    async fn test_get_maps_error_statuses() {
        let server = MockServer::start().await;
        assert_eq!(
            client(&server).get(&instance()).await.unwrap_err(),
            ApiError::NotFound
        );

        let server = MockServer::start().await;
        mount(
            &server,
            "GET",
            INSTANCE_PATH,
            ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": { "code": "AuthorizationFailed", "message": "no access" }
            })),
        )
        .await;
        assert_eq!(
            client(&server).get(&instance()).await.unwrap_err(),
            ApiError::Status {
                code: 403,
                message: "AuthorizationFailed: no access".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_put_with_terminal_body_is_completed() {
        let server = MockServer::start().await;
        mount(
            &server,
            "PUT",
            INSTANCE_PATH,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "properties": { "provisioningState": "Succeeded" }
            })),
        )
        .await;

        let op = client(&server)
            .create_or_update(&instance(), &Description::default())
            .await
            .unwrap();
        assert_eq!(op.status(), &OperationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_put_with_operation_header_is_pending() {
        let server = MockServer::start().await;
        let status_url = format!("{}/operations/op1", server.uri());
        mount(
            &server,
            "PUT",
            INSTANCE_PATH,
            ResponseTemplate::new(201)
                .insert_header("azure-asyncoperation", status_url.as_str())
                .insert_header("retry-after", "7"),
        )
        .await;

        let op = client(&server)
            .create_or_update(&instance(), &Description::default())
            .await
            .unwrap();
        assert_eq!(op.kind(), OperationKind::Create);
        assert_eq!(op.reference(), status_url);
        assert_eq!(
            op.status(),
            &OperationStatus::InProgress {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn test_put_provisioning_without_header_polls_resource() {
        let server = MockServer::start().await;
        mount(
            &server,
            "PUT",
            INSTANCE_PATH,
            ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "properties": { "provisioningState": "Provisioning" }
            })),
        )
        .await;

        let op = client(&server)
            .create_or_update(&instance(), &Description::default())
            .await
            .unwrap();
        assert!(!op.is_terminal());
        assert!(op.reference().contains(INSTANCE_PATH));
    }

    #[tokio::test]
    async fn test_put_conflict_and_undecodable_body() {
        let server = MockServer::start().await;
        mount(
            &server,
            "PUT",
            INSTANCE_PATH,
            ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "error": { "code": "Conflict", "message": "create in progress" }
            })),
        )
        .await;
        assert_eq!(
            client(&server)
                .create_or_update(&instance(), &Description::default())
                .await
                .unwrap_err(),
            ApiError::Conflict("Conflict: create in progress".to_string())
        );

        let server = MockServer::start().await;
        mount(
            &server,
            "PUT",
            INSTANCE_PATH,
            ResponseTemplate::new(200).set_body_string("<html>gateway error</html>"),
        )
        .await;
        let err = client(&server)
            .create_or_update(&instance(), &Description::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_patch_sync_and_accepted() {
        let patch = PatchDescription::default();

        let server = MockServer::start().await;
        mount(&server, "PATCH", INSTANCE_PATH, ResponseTemplate::new(200)).await;
        assert_eq!(
            client(&server).update(&instance(), &patch).await.unwrap(),
            PatchOutcome::Applied
        );

        let server = MockServer::start().await;
        let status_url = format!("{}/operations/op1", server.uri());
        mount(
            &server,
            "PATCH",
            INSTANCE_PATH,
            ResponseTemplate::new(202).insert_header("location", status_url.as_str()),
        )
        .await;
        match client(&server).update(&instance(), &patch).await.unwrap() {
            PatchOutcome::Accepted(op) => {
                assert_eq!(op.kind(), OperationKind::Update);
                assert_eq!(op.reference(), status_url);
                assert!(!op.is_terminal());
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_status_mapping() {
        for code in [200u16, 204] {
            let server = MockServer::start().await;
            mount(&server, "DELETE", INSTANCE_PATH, ResponseTemplate::new(code)).await;
            let op = client(&server).delete(&instance()).await.unwrap();
            assert_eq!(op.status(), &OperationStatus::Succeeded, "status {}", code);
        }

        let server = MockServer::start().await;
        let status_url = format!("{}/operations/op1", server.uri());
        mount(
            &server,
            "DELETE",
            INSTANCE_PATH,
            ResponseTemplate::new(202).insert_header("azure-asyncoperation", status_url.as_str()),
        )
        .await;
        let op = client(&server).delete(&instance()).await.unwrap();
        assert_eq!(op.kind(), OperationKind::Delete);
        assert_eq!(op.reference(), status_url);

        let server = MockServer::start().await;
        mount(&server, "DELETE", INSTANCE_PATH, ResponseTemplate::new(404)).await;
        assert_eq!(
            client(&server).delete(&instance()).await.unwrap_err(),
            ApiError::NotFound
        );
    }

    #[tokio::test]
    async fn test_poll_in_progress() {
        assert_eq!(
            poll_with(
                OperationKind::Create,
                ResponseTemplate::new(202).insert_header("retry-after", "3"),
            )
            .await
            .unwrap(),
            OperationStatus::InProgress {
                retry_after: Some(Duration::from_secs(3))
            }
        );
        assert_eq!(
            poll_with(
                OperationKind::Create,
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "InProgress" })),
            )
            .await
            .unwrap(),
            OperationStatus::InProgress { retry_after: None }
        );
    }

    #[tokio::test]
    async fn test_poll_terminal_statuses() {
        assert_eq!(
            poll_with(
                OperationKind::Create,
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "Succeeded" })),
            )
            .await
            .unwrap(),
            OperationStatus::Succeeded
        );
        assert_eq!(
            poll_with(
                OperationKind::Create,
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "status": "Failed",
                    "error": { "code": "QuotaExceeded", "message": "too many instances" }
                })),
            )
            .await
            .unwrap(),
            OperationStatus::Failed {
                reason: "QuotaExceeded: too many instances".to_string()
            }
        );
        // Resource-style polling reports the provisioning state
        assert_eq!(
            poll_with(
                OperationKind::Create,
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "properties": { "provisioningState": "Succeeded" }
                })),
            )
            .await
            .unwrap(),
            OperationStatus::Succeeded
        );
        // Location-style polling ends with an empty body
        assert_eq!(
            poll_with(OperationKind::Delete, ResponseTemplate::new(204))
                .await
                .unwrap(),
            OperationStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_poll_not_found() {
        assert_eq!(
            poll_with(OperationKind::Delete, ResponseTemplate::new(404))
                .await
                .unwrap(),
            OperationStatus::Succeeded
        );
        assert_eq!(
            poll_with(OperationKind::Create, ResponseTemplate::new(404))
                .await
                .unwrap_err(),
            ApiError::NotFound
        );
    }

    #[tokio::test]
    async fn test_poll_undecodable_body_is_an_error() {
        for body in ["<html>gateway error</html>", r#"{"status": 5}"#, "{}"] {
            let err = poll_with(
                OperationKind::Delete,
                ResponseTemplate::new(200).set_body_string(body),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, ApiError::Decode(_)), "body {:?} gave {:?}", body, err);
        }
    }
}
