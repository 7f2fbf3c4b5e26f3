use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use serde::{Deserialize, Serialize};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, extract::AuthUser};

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct RateResponse {
    pub from: String,
    pub to: String,
    pub rate: f64,
}

/// GET /api/exchange-rate?from=USD&to=ARS
pub async fn get_exchange_rate(
    State(deployment): State<DeploymentImpl>,
    AuthUser(_claims): AuthUser,
    Query(query): Query<RateQuery>,
) -> Result<ResponseJson<ApiResponse<RateResponse>>, ApiError> {
    let is_code = |code: &str| code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic());
    if !is_code(&query.from) || !is_code(&query.to) {
        return Err(ApiError::BadRequest("currencies must be 3-letter codes".to_string()));
    }

    let rate = deployment
        .exchange_rates()
        .rate(&query.from, &query.to)
        .await?;

    Ok(ResponseJson(ApiResponse::success(RateResponse {
        from: query.from.to_uppercase(),
        to: query.to.to_uppercase(),
        rate,
    })))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/exchange-rate", get(get_exchange_rate))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use tokio::sync::Notify;
    use tower::ServiceExt;
    use utils::auth::Role;

    use crate::routes::{
        router,
        test_support::{deployment, json_body, request, token_for},
    };

    #[tokio::test]
    async fn returns_rate_for_valid_codes() {
        let deployment = deployment(Arc::new(Notify::new())).await;
        let token = token_for(&deployment, "seller@example.com", Role::Seller).await;
        let app = router(deployment);

        let ok = app
            .clone()
            .oneshot(request("GET", "/api/exchange-rate?from=usd&to=ars", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let body = json_body(ok).await;
        assert_eq!(body["data"]["rate"], 1000.0);
        assert_eq!(body["data"]["from"], "USD");

        let bad = app
            .oneshot(request("GET", "/api/exchange-rate?from=dollar&to=ars", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }
}
