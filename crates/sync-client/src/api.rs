//! Thin REST client: base URL, bearer injection and uniform error translation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use url::Url;
use utils::{
    auth::{LoginRequest, LoginResponse, UserProfile},
    progress::{SyncKind, SyncStatus},
    response::ApiResponse,
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("not logged in or session expired")]
    Unauthorized,
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    Url(String),
}

/// Sync run as reported by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRunSummary {
    pub id: Uuid,
    pub kind: SyncKind,
    pub status: SyncStatus,
    pub processed: i64,
    pub created: i64,
    pub updated: i64,
    pub deactivated: i64,
    pub skipped: i64,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: &str) -> Result<Self, ApiClientError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiClientError::Url(e.to_string()))?;
        // No client-wide timeout: the progress channel stays open for the whole sync
        let http = Client::builder()
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// `{base}/api/{path}`, keeping any path prefix of the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiClientError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    /// Event-stream URL carrying the access token as a query parameter
    pub fn progress_channel_url(&self) -> Result<Url, ApiClientError> {
        let token = self.token.as_deref().ok_or(ApiClientError::Unauthorized)?;
        let mut url = self.endpoint("sync/events")?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiClientError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let res = request
            .timeout(Self::REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ApiClientError::Transport(e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ApiClientError::Transport(e.to_string()))?;

        translate_response(status, &body)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.send(self.http.post(self.endpoint("auth/login")?).json(&body))
            .await
    }

    pub async fn me(&self) -> Result<UserProfile, ApiClientError> {
        self.send(self.http.get(self.endpoint("auth/me")?)).await
    }

    pub async fn trigger_sync(&self, kind: SyncKind) -> Result<SyncRunSummary, ApiClientError> {
        let path = format!("sync/{kind}");
        self.send(self.http.post(self.endpoint(&path)?)).await
    }

    pub async fn list_runs(&self, limit: i64) -> Result<Vec<SyncRunSummary>, ApiClientError> {
        let mut url = self.endpoint("sync/runs")?;
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        self.send(self.http.get(url)).await
    }
}

/// Map a status and raw body to the envelope payload or a typed error
pub fn translate_response<T: DeserializeOwned>(
    status: StatusCode,
    body: &str,
) -> Result<T, ApiClientError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiClientError::Unauthorized);
    }

    if !status.is_success() {
        let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
            .ok()
            .and_then(|envelope| envelope.message().map(str::to_string))
            .unwrap_or_else(|| {
                let text = body.trim();
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    text.chars().take(200).collect()
                }
            });
        return Err(ApiClientError::Http {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: ApiResponse<T> =
        serde_json::from_str(body).map_err(|e| ApiClientError::Decode(e.to_string()))?;

    if !envelope.is_success() {
        return Err(ApiClientError::Http {
            status: status.as_u16(),
            message: envelope.message().unwrap_or("request failed").to_string(),
        });
    }

    envelope
        .into_data()
        .ok_or_else(|| ApiClientError::Decode("response has no data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_api_prefix() {
        let client = ApiClient::new("https://shop.example.com/backend/").unwrap();
        assert_eq!(
            client.endpoint("sync/full").unwrap().as_str(),
            "https://shop.example.com/backend/api/sync/full"
        );
    }

    #[test]
    fn progress_url_needs_token() {
        let client = ApiClient::new("http://localhost:8080").unwrap();
        assert!(matches!(
            client.progress_channel_url(),
            Err(ApiClientError::Unauthorized)
        ));

        let client = client.with_token("abc.def");
        assert_eq!(
            client.progress_channel_url().unwrap().as_str(),
            "http://localhost:8080/api/sync/events?token=abc.def"
        );
    }

    #[test]
    fn success_envelope_yields_data() {
        let value: Vec<u8> =
            translate_response(StatusCode::OK, r#"{"success":true,"data":[1],"message":null}"#)
                .unwrap();
        assert_eq!(value, vec![1]);
    }

    #[test]
    fn server_error_uses_envelope_message() {
        let err = translate_response::<()>(
            StatusCode::CONFLICT,
            r#"{"success":false,"data":null,"message":"a catalog sync is already running"}"#,
        )
        .unwrap_err();
        match err {
            ApiClientError::Http { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "a catalog sync is already running");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_text_error_body_is_kept() {
        let err = translate_response::<()>(StatusCode::BAD_GATEWAY, "upstream down").unwrap_err();
        assert!(matches!(err, ApiClientError::Http { status: 502, ref message } if message == "upstream down"));
    }

    #[test]
    fn unauthorized_is_its_own_error() {
        let err = translate_response::<()>(StatusCode::UNAUTHORIZED, "").unwrap_err();
        assert!(matches!(err, ApiClientError::Unauthorized));
    }
}
