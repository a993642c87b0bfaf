use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::domain::aggregates::{NewUser, User, UserStatus, UserUpdate};
use crate::UserService;

#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
}

impl From<UserRequest> for NewUser {
    fn from(r: UserRequest) -> Self {
        Self { username: r.username, email: r.email, password_hash: r.password_hash, full_name: r.full_name }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(flatten)]
    pub profile: UserRequest,
    pub status: Option<UserStatus>,
}

/// A user as returned to callers; the password hash never leaves the service.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            full_name: u.full_name,
            status: u.status,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

pub fn router(service: Arc<UserService>) -> Router {
    Router::new()
        .route("/api/v1/users", get(list_users).post(create_user))
        .route("/api/v1/users/:id", get(get_user).put(update_user).delete(delete_user))
        .with_state(service)
}

async fn create_user(
    State(s): State<Arc<UserService>>,
    Json(r): Json<UserRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    let user = s.create_user(r.into()).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn get_user(State(s): State<Arc<UserService>>, Path(id): Path<String>) -> ApiResult<Json<UserProfile>> {
    Ok(Json(s.get_user(&id).await?.into()))
}

async fn list_users(State(s): State<Arc<UserService>>) -> ApiResult<Json<Vec<UserProfile>>> {
    Ok(Json(s.list_users().await?.into_iter().map(UserProfile::from).collect()))
}

async fn update_user(
    State(s): State<Arc<UserService>>,
    Path(id): Path<String>,
    Json(r): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserProfile>> {
    let update = UserUpdate { profile: r.profile.into(), status: r.status };
    Ok(Json(s.update_user(&id, update).await?.into()))
}

async fn delete_user(State(s): State<Arc<UserService>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    s.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
