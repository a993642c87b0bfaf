//! HTTP surface
//!
//! Thin axum adapters over the application services. Each enabled service
//! contributes its own router; they are merged under one server.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::metrics::{metrics_handler, track_requests};
use crate::{InventoryService, OrderService, ServiceError, UserService};

pub mod orders;
pub mod products;
pub mod users;

/// Services mounted on the HTTP server. `None` leaves a service's routes out.
#[derive(Default, Clone)]
pub struct Services {
    pub orders: Option<Arc<OrderService>>,
    pub inventory: Option<Arc<InventoryService>>,
    pub users: Option<Arc<UserService>>,
}

pub fn router(services: &Services) -> Router {
    let mut app = Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront"})) }))
        .route("/metrics", get(metrics_handler));
    if let Some(service) = &services.orders {
        app = app.merge(orders::router(Arc::clone(service)));
    }
    if let Some(service) = &services.inventory {
        app = app.merge(products::router(Arc::clone(service)));
    }
    if let Some(service) = &services.users {
        app = app.merge(users::router(Arc::clone(service)));
    }
    app.layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// `ServiceError` rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, code) = match &self.0 {
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            ServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ServiceError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock"),
            ServiceError::PublishFailed { .. } => (StatusCode::BAD_GATEWAY, "publish_failed"),
            ServiceError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };

        let mut body = json!({"error": code, "message": message});
        if let ServiceError::PublishFailed { order_id, .. } = &self.0 {
            body["order_id"] = json!(order_id);
        }
        if status.is_server_error() {
            error!(error = ?self.0, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::response::Response;
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    pub async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    pub async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
