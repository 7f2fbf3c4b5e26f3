use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::product::Product;
use serde::Deserialize;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, extract::AuthUser};

#[derive(Debug, Deserialize)]
pub struct ProductsQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/products
/// Active catalog products, optionally filtered by name or SKU
pub async fn list_products(
    State(deployment): State<DeploymentImpl>,
    AuthUser(_claims): AuthUser,
    Query(query): Query<ProductsQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Product>>>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let products =
        Product::list_active(&deployment.db().pool, query.search.as_deref(), limit).await?;
    Ok(ResponseJson(ApiResponse::success(products)))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().route("/products", get(list_products))
}
