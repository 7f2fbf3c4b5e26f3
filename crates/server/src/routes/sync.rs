//! Routes for triggering catalog syncs and streaming their progress.

use std::{convert::Infallible, time::Duration};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        Json as ResponseJson,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use db::models::sync_run::SyncRun;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};
use utils::{progress::SyncKind, response::ApiResponse};

use crate::{DeploymentImpl, error::ApiError, extract::AdminUser};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

async fn trigger(
    deployment: &DeploymentImpl,
    claims: &utils::jwt::Claims,
    kind: SyncKind,
) -> Result<(StatusCode, ResponseJson<ApiResponse<SyncRun>>), ApiError> {
    let triggered_by = claims.user_id().ok();
    let run = deployment.catalog_sync().start(kind, triggered_by).await?;
    Ok((StatusCode::ACCEPTED, ResponseJson(ApiResponse::success(run))))
}

/// POST /api/sync/manual
/// Start a partial sync refreshing price and stock of known products
pub async fn trigger_manual_sync(
    State(deployment): State<DeploymentImpl>,
    AdminUser(claims): AdminUser,
) -> Result<(StatusCode, ResponseJson<ApiResponse<SyncRun>>), ApiError> {
    trigger(&deployment, &claims, SyncKind::Manual).await
}

/// POST /api/sync/full
/// Start a full reconciliation of the catalog against the ERP
pub async fn trigger_full_sync(
    State(deployment): State<DeploymentImpl>,
    AdminUser(claims): AdminUser,
) -> Result<(StatusCode, ResponseJson<ApiResponse<SyncRun>>), ApiError> {
    trigger(&deployment, &claims, SyncKind::Full).await
}

/// GET /api/sync/events?token=...
/// Event streams cannot carry headers, so the access token travels in the query string.
pub async fn stream_sync_events(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let token = query
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)?;
    let claims = deployment
        .auth()
        .authenticate(token)
        .map_err(|_| ApiError::Unauthorized)?;

    let hub = deployment.catalog_sync().progress();
    info!(
        subject = %claims.sub,
        subscribers = hub.subscriber_count() + 1,
        "Progress channel opened"
    );

    let stream = hub.subscribe().filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(frame) => Some(Ok(frame)),
            Err(e) => {
                warn!(error = %e, "Failed to encode progress event");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// GET /api/sync/runs
pub async fn list_sync_runs(
    State(deployment): State<DeploymentImpl>,
    AdminUser(_claims): AdminUser,
    Query(query): Query<RunsQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<SyncRun>>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let runs = deployment.catalog_sync().recent_runs(limit).await?;
    Ok(ResponseJson(ApiResponse::success(runs)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/sync",
        Router::new()
            .route("/manual", post(trigger_manual_sync))
            .route("/full", post(trigger_full_sync))
            .route("/events", get(stream_sync_events))
            .route("/runs", get(list_sync_runs)),
    )
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::http::{StatusCode, header::CONTENT_TYPE};
    use futures_util::StreamExt;
    use tokio::sync::Notify;
    use tower::ServiceExt;
    use utils::{auth::Role, progress::ProgressEvent};

    use crate::routes::{
        router,
        test_support::{deployment, json_body, request, token_for},
    };

    #[tokio::test]
    async fn trigger_requires_admin() {
        let deployment = deployment(Arc::new(Notify::new())).await;
        let client_token = token_for(&deployment, "client@example.com", Role::Client).await;
        let app = router(deployment);

        let anonymous = app
            .clone()
            .oneshot(request("POST", "/api/sync/full", None, None))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let client = app
            .oneshot(request("POST", "/api/sync/full", Some(&client_token), None))
            .await
            .unwrap();
        assert_eq!(client.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn second_trigger_while_running_conflicts() {
        let gate = Arc::new(Notify::new());
        let deployment = deployment(gate.clone()).await;
        let token = token_for(&deployment, "admin@example.com", Role::Admin).await;
        let app = router(deployment.clone());

        let first = app
            .clone()
            .oneshot(request("POST", "/api/sync/manual", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let body = json_body(first).await;
        assert_eq!(body["data"]["kind"], "manual");
        assert_eq!(body["data"]["status"], "running");

        let second = app
            .oneshot(request("POST", "/api/sync/full", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        gate.notify_one();
    }

    #[tokio::test]
    async fn events_require_query_token() {
        let deployment = deployment(Arc::new(Notify::new())).await;
        let token = token_for(&deployment, "admin@example.com", Role::Admin).await;
        let app = router(deployment);

        let missing = app
            .clone()
            .oneshot(request("GET", "/api/sync/events", None, None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let bogus = app
            .clone()
            .oneshot(request("GET", "/api/sync/events?token=bogus", None, None))
            .await
            .unwrap();
        assert_eq!(bogus.status(), StatusCode::UNAUTHORIZED);

        let ok = app
            .oneshot(request("GET", &format!("/api/sync/events?token={token}"), None, None))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[CONTENT_TYPE], "text/event-stream");
    }

    #[tokio::test]
    async fn events_stream_progress_frames() {
        let deployment = deployment(Arc::new(Notify::new())).await;
        let token = token_for(&deployment, "client@example.com", Role::Client).await;
        let app = router(deployment.clone());

        let response = app
            .oneshot(request("GET", &format!("/api/sync/events?token={token}"), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        deployment
            .catalog_sync()
            .progress()
            .publish(ProgressEvent::running(None, "Paso 1"));

        let mut body = response.into_body().into_data_stream();
        let mut buffer = String::new();
        let frame = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(end) = buffer.find("\n\n") {
                    let frame = buffer[..end].to_string();
                    buffer.drain(..end + 2);
                    if frame.starts_with("data: ") {
                        return frame;
                    }
                    continue;
                }
                let chunk = body.next().await.unwrap().unwrap();
                buffer.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        })
        .await
        .unwrap();

        let event: ProgressEvent = serde_json::from_str(&frame["data: ".len()..]).unwrap();
        assert_eq!(event, ProgressEvent::running(None, "Paso 1"));
        let raw: serde_json::Value = serde_json::from_str(&frame["data: ".len()..]).unwrap();
        assert_eq!(raw["type"], "progress");
        assert_eq!(raw["status"], "running");
        assert!(raw["percent"].is_null());
    }

    #[tokio::test]
    async fn runs_are_listed_for_admins() {
        let gate = Arc::new(Notify::new());
        let deployment = deployment(gate.clone()).await;
        let token = token_for(&deployment, "admin@example.com", Role::Admin).await;
        let app = router(deployment);

        app.clone()
            .oneshot(request("POST", "/api/sync/full", Some(&token), None))
            .await
            .unwrap();

        let response = app
            .oneshot(request("GET", "/api/sync/runs?limit=5", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        gate.notify_one();
    }
}
