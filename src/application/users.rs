//! User account use cases.

use std::sync::Arc;

use tracing::{info, warn};

use super::CacheAside;
use crate::domain::aggregates::{NewUser, User, UserUpdate};
use crate::ports::cache::keys;
use crate::ports::notify::WelcomeNotifier;
use crate::ports::store::DocumentStore;
use crate::{Result, ServiceError};

pub struct UserService {
    store: Arc<dyn DocumentStore<User>>,
    cache: CacheAside,
    notifier: Arc<dyn WelcomeNotifier>,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore<User>>, cache: CacheAside, notifier: Arc<dyn WelcomeNotifier>) -> Self {
        Self { store, cache, notifier }
    }

    /// Creates an `active` account. The welcome notification runs in the
    /// background and its outcome never reaches the caller.
    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        let user = User::create(new)?;
        self.ensure_username_free(&user).await?;
        self.store
            .insert(&user)
            .await
            .map_err(|e| ServiceError::from_store(e, "user", &user.id))?;
        self.invalidate(&user.id).await;
        info!(user_id = %user.id, username = %user.username, "User created");

        let notifier = Arc::clone(&self.notifier);
        let welcomed = user.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_welcome(&welcomed).await {
                warn!(user_id = %welcomed.id, error = %e, "Welcome notification failed");
            }
        });

        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        self.cache
            .get_or_load(&keys::user(id), || async { self.fetch(id).await })
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.cache
            .get_or_load(keys::ALL_USERS, || async { self.store.list().await.map_err(ServiceError::Store) })
            .await
    }

    pub async fn update_user(&self, id: &str, update: UserUpdate) -> Result<User> {
        let mut user = self.fetch(id).await?;
        user.apply(update)?;
        self.ensure_username_free(&user).await?;
        self.store
            .update(&user)
            .await
            .map_err(|e| ServiceError::from_store(e, "user", id))?;
        self.invalidate(id).await;

        info!(user_id = %id, status = ?user.status, "User updated");
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        if !self.store.delete(id).await.map_err(ServiceError::Store)? {
            return Err(ServiceError::not_found("user", id));
        }
        self.invalidate(id).await;

        info!(user_id = %id, "User deleted");
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<User> {
        self.store
            .get(id)
            .await
            .map_err(ServiceError::Store)?
            .ok_or_else(|| ServiceError::not_found("user", id))
    }

    async fn ensure_username_free(&self, user: &User) -> Result<()> {
        match self.store.find_by_unique(&user.username).await.map_err(ServiceError::Store)? {
            Some(existing) if existing.id != user.id => {
                Err(ServiceError::Conflict(format!("username '{}' is taken", user.username)))
            }
            _ => Ok(()),
        }
    }

    async fn invalidate(&self, id: &str) {
        self.cache.invalidate(&[&keys::user(id), keys::ALL_USERS]).await;
    }
}
