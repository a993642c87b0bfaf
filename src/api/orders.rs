use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::ApiResult;
use crate::domain::aggregates::{NewOrder, Order, OrderItem, OrderStatus, OrderUpdate};
use crate::OrderService;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    /// Absent keeps the current status.
    pub status: Option<OrderStatus>,
}

pub fn router(service: Arc<OrderService>) -> Router {
    Router::new()
        .route("/api/v1/orders", get(list_orders).post(create_order))
        .route("/api/v1/orders/:id", get(get_order).put(update_order).delete(delete_order))
        .with_state(service)
}

async fn create_order(
    State(s): State<Arc<OrderService>>,
    Json(r): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = s
        .create_order(NewOrder { user_id: r.user_id, items: r.items, total_price: r.total_price })
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(State(s): State<Arc<OrderService>>, Path(id): Path<String>) -> ApiResult<Json<Order>> {
    Ok(Json(s.get_order(&id).await?))
}

async fn list_orders(State(s): State<Arc<OrderService>>) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.list_orders().await?))
}

async fn update_order(
    State(s): State<Arc<OrderService>>,
    Path(id): Path<String>,
    Json(r): Json<UpdateOrderRequest>,
) -> ApiResult<Json<Order>> {
    let update = OrderUpdate { user_id: r.user_id, items: r.items, total_price: r.total_price, status: r.status };
    Ok(Json(s.update_order(&id, update).await?))
}

async fn delete_order(State(s): State<Arc<OrderService>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    s.delete_order(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Method;
    use serde_json::json;

    use super::*;
    use crate::api::test_support::{json_body, send};
    use crate::infrastructure::memory::{InMemoryCache, InMemoryQueue, InMemoryStore};
    use crate::CacheAside;

    fn app(queue: &InMemoryQueue) -> Router {
        let cache = CacheAside::new(Arc::new(InMemoryCache::new(Duration::from_secs(300))), true);
        let service = OrderService::new(Arc::new(InMemoryStore::<Order>::new()), cache, Arc::new(queue.clone()));
        router(Arc::new(service))
    }

    fn body() -> serde_json::Value {
        json!({"user_id": "U1", "items": [{"product_id": "P1", "quantity": 2}], "total_price": "19.98"})
    }

    #[tokio::test]
    async fn create_then_fetch() {
        let queue = InMemoryQueue::new();
        let app = app(&queue);

        let response = send(&app, Method::POST, "/api/v1/orders", Some(body())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["status"], "pending");
        assert_eq!(queue.len(), 1);

        let id = created["id"].as_str().unwrap();
        let response = send(&app, Method::GET, &format!("/api/v1/orders/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["user_id"], "U1");
    }

    #[tokio::test]
    async fn invalid_order_is_bad_request() {
        let queue = InMemoryQueue::new();
        let app = app(&queue);
        let response = send(&app, Method::POST, "/api/v1/orders", Some(json!({"user_id": "U1", "items": [], "total_price": 1}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn publish_outage_is_bad_gateway_with_order_id() {
        let queue = InMemoryQueue::new();
        queue.set_publish_offline(true);
        let app = app(&queue);

        let response = send(&app, Method::POST, "/api/v1/orders", Some(body())).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let order_id = json_body(response).await["order_id"].as_str().unwrap().to_string();

        let response = send(&app, Method::GET, &format!("/api/v1/orders/{order_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn update_and_delete() {
        let queue = InMemoryQueue::new();
        let app = app(&queue);
        let created = json_body(send(&app, Method::POST, "/api/v1/orders", Some(body())).await).await;
        let uri = format!("/api/v1/orders/{}", created["id"].as_str().unwrap());

        let mut update = body();
        update["status"] = json!("cancelled");
        let response = send(&app, Method::PUT, &uri, Some(update)).await;
        assert_eq!(json_body(response).await["status"], "cancelled");

        // Omitting status leaves it as it was.
        let response = send(&app, Method::PUT, &uri, Some(body())).await;
        assert_eq!(json_body(response).await["status"], "cancelled");

        assert_eq!(send(&app, Method::DELETE, &uri, None).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(send(&app, Method::GET, &uri, None).await.status(), StatusCode::NOT_FOUND);
    }
}
