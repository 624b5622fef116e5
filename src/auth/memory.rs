use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo::UserStore;
use crate::auth::repo_types::{NewUser, ProfileChanges, User};
use crate::error::{IdentityError, Result};

/// Process-local user store, used with `STORE_BACKEND=memory` and in tests.
///
/// Uniqueness is checked and the row inserted under one write lock.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: Uuid, f: F) -> Result<User>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| IdentityError::NotFound(format!("User with ID {id} not found")))?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .any(|u| u.username == username || u.email == email))
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.username == new_user.username || u.email == new_user.email)
        {
            return Err(IdentityError::Conflict(
                "Username or email already in use".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            phone_number: new_user.phone_number,
            company: new_user.company,
            shipping_addresses: new_user.shipping_addresses,
            is_email_verified: false,
            password_reset_token: None,
            password_reset_expires: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.modify(id, |u| {
            u.password_hash = password_hash.to_string();
            u.password_reset_token = None;
            u.password_reset_expires = None;
        })
        .await
        .map(|_| ())
    }

    async fn set_reset_token(&self, id: Uuid, token: &str, expires: OffsetDateTime) -> Result<()> {
        self.modify(id, |u| {
            u.password_reset_token = Some(token.to_string());
            u.password_reset_expires = Some(expires);
        })
        .await
        .map(|_| ())
    }

    async fn complete_reset(&self, id: Uuid, token: &str, password_hash: &str) -> Result<bool> {
        let mut users = self.users.write().await;
        let now = OffsetDateTime::now_utc();
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        if !user.reset_pending(now) || user.password_reset_token.as_deref() != Some(token) {
            return Ok(false);
        }
        user.password_hash = password_hash.to_string();
        user.password_reset_token = None;
        user.password_reset_expires = None;
        user.updated_at = now;
        Ok(true)
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<User> {
        let mut users = self.users.write().await;
        if let Some(email) = &changes.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(IdentityError::Conflict("Email already in use".into()));
            }
        }
        let user = users
            .get_mut(&id)
            .ok_or_else(|| IdentityError::NotFound(format!("User with ID {id} not found")))?;

        let ProfileChanges {
            first_name,
            last_name,
            email,
            phone_number,
            company,
            shipping_addresses,
        } = changes;
        if first_name.is_some() {
            user.first_name = first_name;
        }
        if last_name.is_some() {
            user.last_name = last_name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        if phone_number.is_some() {
            user.phone_number = phone_number;
        }
        if company.is_some() {
            user.company = company;
        }
        if let Some(addresses) = shipping_addresses {
            user.shipping_addresses = addresses;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}
