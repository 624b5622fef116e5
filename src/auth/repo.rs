use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, ProfileChanges, User};
use crate::error::{IdentityError, Result};

/// Persistence boundary for user records.
///
/// Implementations must enforce username and email uniqueness themselves and
/// report a violation as [`IdentityError::Conflict`], so that two racing
/// registrations cannot both succeed.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    /// True if any user has this username or this email.
    async fn exists(&self, username: &str, email: &str) -> Result<bool>;
    async fn create(&self, new_user: NewUser) -> Result<User>;
    /// Stores a new hash and drops any pending reset token.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()>;
    async fn set_reset_token(&self, id: Uuid, token: &str, expires: OffsetDateTime) -> Result<()>;
    /// Stores the new hash and clears the reset token in a single write, but
    /// only while `token` is still the stored, unexpired reset token.
    ///
    /// Returns `false` when nothing was written.
    async fn complete_reset(&self, id: Uuid, token: &str, password_hash: &str) -> Result<bool>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<User>;
}

const USER_COLUMNS: &str = r#"id, username, email, password_hash, first_name, last_name,
    phone_number, company, shipping_addresses, is_email_verified,
    password_reset_token, password_reset_expires, created_at, updated_at"#;

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_error(err: sqlx::Error) -> IdentityError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return IdentityError::Conflict("Username or email already in use".into());
        }
    }
    IdentityError::Database(err)
}

fn user_not_found(id: Uuid) -> IdentityError {
    IdentityError::NotFound(format!("User with ID {id} not found"))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 OR email = $2)"#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.db)
        .await?;
        Ok(found)
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, first_name, last_name,
                               phone_number, company, shipping_addresses)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.password_hash)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.phone_number)
        .bind(&new_user.company)
        .bind(&new_user.shipping_addresses)
        .fetch_one(&self.db)
        .await
        .map_err(map_write_error)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_reset_token = NULL,
                password_reset_expires = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(user_not_found(id));
        }
        Ok(())
    }

    async fn set_reset_token(&self, id: Uuid, token: &str, expires: OffsetDateTime) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_reset_token = $2, password_reset_expires = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(user_not_found(id));
        }
        Ok(())
    }

    async fn complete_reset(&self, id: Uuid, token: &str, password_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                password_reset_token = NULL,
                password_reset_expires = NULL,
                updated_at = now()
            WHERE id = $1
              AND password_reset_token = $3
              AND password_reset_expires > now()
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(token)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> Result<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                phone_number = COALESCE($5, phone_number),
                company = COALESCE($6, company),
                shipping_addresses = COALESCE($7, shipping_addresses),
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.email)
        .bind(&changes.phone_number)
        .bind(&changes.company)
        .bind(&changes.shipping_addresses)
        .fetch_optional(&self.db)
        .await
        .map_err(map_write_error)?
        .ok_or_else(|| user_not_found(id))
    }
}
