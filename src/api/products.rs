use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::domain::aggregates::{Category, NewProduct, Product};
use crate::InventoryService;

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub name: String,
    pub category: Category,
    pub price: Decimal,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub description: String,
}

impl From<ProductRequest> for NewProduct {
    fn from(r: ProductRequest) -> Self {
        Self { name: r.name, category: r.category, price: r.price, stock: r.stock, description: r.description }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub category_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct StockCheck {
    pub product_id: String,
    pub quantity: u32,
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub stock: u32,
}

pub fn router(service: Arc<InventoryService>) -> Router {
    Router::new()
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/search", get(search_products))
        .route("/api/v1/products/:id", get(get_product).put(update_product).delete(delete_product))
        .route("/api/v1/products/:id/stock", get(check_stock).put(set_stock))
        .with_state(service)
}

async fn create_product(
    State(s): State<Arc<InventoryService>>,
    Json(r): Json<ProductRequest>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    Ok((StatusCode::CREATED, Json(s.create_product(r.into()).await?)))
}

async fn get_product(State(s): State<Arc<InventoryService>>, Path(id): Path<String>) -> ApiResult<Json<Product>> {
    Ok(Json(s.get_product(&id).await?))
}

async fn list_products(State(s): State<Arc<InventoryService>>) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(s.list_products().await?))
}

async fn update_product(
    State(s): State<Arc<InventoryService>>,
    Path(id): Path<String>,
    Json(r): Json<ProductRequest>,
) -> ApiResult<Json<Product>> {
    Ok(Json(s.update_product(&id, r.into()).await?))
}

async fn delete_product(State(s): State<Arc<InventoryService>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    s.delete_product(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_products(
    State(s): State<Arc<InventoryService>>,
    Query(p): Query<SearchParams>,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(s.search_products(&p.q, p.category_id.as_deref()).await?))
}

async fn check_stock(
    State(s): State<Arc<InventoryService>>,
    Path(id): Path<String>,
    Query(q): Query<StockQuery>,
) -> ApiResult<Json<StockCheck>> {
    let available = s.check_stock(&id, q.quantity).await?;
    Ok(Json(StockCheck { product_id: id, quantity: q.quantity, available }))
}

async fn set_stock(
    State(s): State<Arc<InventoryService>>,
    Path(id): Path<String>,
    Json(r): Json<SetStockRequest>,
) -> ApiResult<Json<Product>> {
    Ok(Json(s.set_stock(&id, r.stock).await?))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Method;
    use serde_json::{json, Value};

    use super::*;
    use crate::api::test_support::{json_body, send};
    use crate::infrastructure::memory::{InMemoryCache, InMemoryStore};
    use crate::CacheAside;

    fn app() -> Router {
        let cache = CacheAside::new(Arc::new(InMemoryCache::new(Duration::from_secs(300))), true);
        router(Arc::new(InventoryService::new(Arc::new(InMemoryStore::<Product>::new()), cache)))
    }

    fn product(name: &str) -> Value {
        json!({
            "name": name,
            "category": {"id": "C1", "name": "Books"},
            "price": "12.50",
            "stock": 4,
            "description": "Hardcover edition"
        })
    }

    #[tokio::test]
    async fn create_and_conflict() {
        let app = app();
        let response = send(&app, Method::POST, "/api/v1/products", Some(product("Dune"))).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(&app, Method::POST, "/api/v1/products", Some(product("Dune"))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["error"], "conflict");
    }

    #[tokio::test]
    async fn search_and_stock_routes() {
        let app = app();
        let created = json_body(send(&app, Method::POST, "/api/v1/products", Some(product("Dune"))).await).await;
        send(&app, Method::POST, "/api/v1/products", Some(product("Emma"))).await;
        let id = created["id"].as_str().unwrap();

        let hits = json_body(send(&app, Method::GET, "/api/v1/products/search?q=dun&category_id=C1", None).await).await;
        assert_eq!(hits.as_array().unwrap().len(), 1);

        let check = json_body(send(&app, Method::GET, &format!("/api/v1/products/{id}/stock?quantity=5"), None).await).await;
        assert_eq!(check["available"], false);

        let response = send(&app, Method::PUT, &format!("/api/v1/products/{id}/stock"), Some(json!({"stock": 9}))).await;
        assert_eq!(json_body(response).await["stock"], 9);

        let check = json_body(send(&app, Method::GET, &format!("/api/v1/products/{id}/stock?quantity=5"), None).await).await;
        assert_eq!(check["available"], true);
    }

    #[tokio::test]
    async fn missing_product_is_not_found() {
        let app = app();
        let response = send(&app, Method::GET, "/api/v1/products/nope", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&app, Method::PUT, "/api/v1/products/nope", Some(product("Dune"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
