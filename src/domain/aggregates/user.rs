//! User Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::ports::store::Document;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub full_name: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus { #[default] Active, Inactive, Banned }

#[derive(Clone, Debug, PartialEq, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, message = "username cannot be empty"))]
    pub username: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 1, message = "password hash cannot be empty"))]
    pub password_hash: String,
    #[validate(length(min = 1, message = "full name cannot be empty"))]
    pub full_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserUpdate { pub profile: NewUser, pub status: Option<UserStatus> }

impl User {
    /// New accounts start `active`.
    pub fn create(new: NewUser) -> Result<Self, UserError> {
        new.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            username: new.username,
            password_hash: new.password_hash,
            email: new.email,
            full_name: new.full_name,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, update: UserUpdate) -> Result<(), UserError> {
        update.profile.validate()?;
        let profile = update.profile;
        self.username = profile.username;
        self.email = profile.email;
        self.password_hash = profile.password_hash;
        self.full_name = profile.full_name;
        if let Some(status) = update.status { self.status = status; }
        self.updated_at = Utc::now();
        Ok(())
    }
}

impl Document for User {
    const COLLECTION: &'static str = "users";
    const UNIQUE_FIELD: &'static str = "username";
    fn id(&self) -> &str { &self.id }
    fn unique_key(&self) -> Option<&str> { Some(&self.username) }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid user: {0}")]
    Invalid(#[from] ValidationErrors),
}

impl From<UserError> for crate::ServiceError {
    fn from(err: UserError) -> Self { Self::Validation(err.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(username: &str, email: &str) -> NewUser {
        NewUser { username: username.into(), email: email.into(), password_hash: "hash".into(), full_name: "Ada Lovelace".into() }
    }

    #[test]
    fn test_create_user_is_active() {
        let user = User::create(profile("ada", "ada@example.com")).unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.username, "ada");
    }

    #[test]
    fn test_create_user_validation() {
        assert!(User::create(profile("", "ada@example.com")).is_err());
        assert!(User::create(profile("ada", "not-an-email")).is_err());
        assert!(User::create(profile("ada", "")).is_err());
    }

    #[test]
    fn test_apply_optional_status() {
        let mut user = User::create(profile("ada", "ada@example.com")).unwrap();
        user.apply(UserUpdate { profile: profile("ada", "ada@new.example.com"), status: None }).unwrap();
        assert_eq!(user.status, UserStatus::Active);
        user.apply(UserUpdate { profile: profile("ada", "ada@new.example.com"), status: Some(UserStatus::Banned) }).unwrap();
        assert_eq!(user.status, UserStatus::Banned);
        assert_eq!(user.email, "ada@new.example.com");
    }
}
