use std::sync::Arc;

use anyhow::anyhow;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::{
    dto::{
        check_password, normalize_email, GuestTokenResponse, LoginRequest, LoginResponse,
        PublicUser, RegisterRequest, ResetPasswordRequest, UpdatePasswordRequest,
        UpdateProfileRequest,
    },
    jwt::TokenIssuer,
    password::CredentialVerifier,
    repo::UserStore,
    repo_types::{NewUser, ProfileChanges, User},
};
use crate::error::{IdentityError, Result};
use crate::events::{EventPublisher, IdentityEvent};

/// Registration, login, password and profile flows over the injected collaborators.
pub struct IdentityService {
    users: Arc<dyn UserStore>,
    credentials: Arc<dyn CredentialVerifier>,
    tokens: Arc<dyn TokenIssuer>,
    events: Arc<dyn EventPublisher>,
    frontend_url: Url,
}

impl IdentityService {
    pub fn new(
        users: Arc<dyn UserStore>,
        credentials: Arc<dyn CredentialVerifier>,
        tokens: Arc<dyn TokenIssuer>,
        events: Arc<dyn EventPublisher>,
        frontend_url: Url,
    ) -> Self {
        Self {
            users,
            credentials,
            tokens,
            events,
            frontend_url,
        }
    }

    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn register(&self, request: RegisterRequest) -> Result<User> {
        let request = request.normalized()?;

        if self.users.exists(&request.username, &request.email).await? {
            warn!(email = %request.email, "registration rejected: username or email taken");
            return Err(IdentityError::Conflict(
                "User with this username or email already exists".into(),
            ));
        }

        let password_hash = self.credentials.hash(&request.password).await?;
        let user = self
            .users
            .create(NewUser {
                username: request.username,
                email: request.email,
                password_hash,
                first_name: request.first_name,
                last_name: request.last_name,
                phone_number: request.phone_number,
                company: request.company,
                shipping_addresses: request.shipping_addresses,
            })
            .await?;

        info!(user_id = %user.id, "user registered");
        self.events
            .publish(IdentityEvent::UserRegistered { user_id: user.id });
        Ok(user)
    }

    /// Checks credentials. Unknown username and wrong password both yield `None`.
    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn validate_user(&self, request: &LoginRequest) -> Result<Option<PublicUser>> {
        let Some(user) = self.users.find_by_username(request.username.trim()).await? else {
            warn!("login failed: unknown username");
            return Ok(None);
        };

        if !self
            .credentials
            .verify(&request.password, &user.password_hash)
            .await?
        {
            warn!(user_id = %user.id, "login failed: incorrect password");
            return Ok(None);
        }

        debug!(user_id = %user.id, "user authenticated");
        Ok(Some(PublicUser::from(&user)))
    }

    #[instrument(skip_all, fields(username = %request.username))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        let Some(user) = self.validate_user(&request).await? else {
            return Ok(LoginResponse::failed());
        };

        let token = self.tokens.issue_session(&user)?;
        info!(user_id = %user.id, "user logged in");
        self.events.publish(IdentityEvent::UserLoggedIn {
            user_id: user.id,
            user_details: user,
            token: token.clone(),
        });
        Ok(LoginResponse::succeeded(token))
    }

    #[instrument(skip(self, request))]
    pub async fn update_password(
        &self,
        user_id: Uuid,
        request: UpdatePasswordRequest,
    ) -> Result<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound(format!("User with ID {user_id} not found")))?;

        if !self
            .credentials
            .verify(&request.old_password, &user.password_hash)
            .await?
        {
            return Err(IdentityError::Unauthorized(
                "Old password is incorrect".into(),
            ));
        }

        if self
            .credentials
            .verify(&request.new_password, &user.password_hash)
            .await?
        {
            return Err(IdentityError::Conflict(
                "The new password cannot be the same as the old password".into(),
            ));
        }
        check_password(&request.new_password)?;

        let password_hash = self.credentials.hash(&request.new_password).await?;
        self.users.update_password(user_id, &password_hash).await?;
        debug!("password updated");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(%email, "password reset requested for unknown email");
            return Err(IdentityError::NotFound("User not found".into()));
        };

        let issued = self.tokens.issue_reset(user.id)?;
        self.users
            .set_reset_token(user.id, &issued.token, issued.expires_at)
            .await?;

        let reset_url = self.reset_url(&issued.token)?;
        self.events.publish(IdentityEvent::PasswordResetRequest {
            user_id: user.id,
            email: user.email,
            reset_url: reset_url.into(),
        });
        debug!(user_id = %user.id, "password reset token issued");
        Ok(())
    }

    /// Consumes a reset token. The store re-checks the token in the password
    /// write, so two requests racing on one token cannot both succeed.
    #[instrument(skip_all)]
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<()> {
        let invalid = || IdentityError::Unauthorized("Invalid or expired reset token".into());

        let claims = self.tokens.verify_reset(&request.token).map_err(|e| {
            warn!(error = %e, "reset token rejected");
            invalid()
        })?;
        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(invalid)?;

        let now = OffsetDateTime::now_utc();
        if !user.reset_pending(now)
            || user.password_reset_token.as_deref() != Some(request.token.as_str())
        {
            warn!(user_id = %user.id, "reset token not pending for user");
            return Err(invalid());
        }
        check_password(&request.new_password)?;

        let password_hash = self.credentials.hash(&request.new_password).await?;
        if !self
            .users
            .complete_reset(user.id, &request.token, &password_hash)
            .await?
        {
            warn!(user_id = %user.id, "reset token consumed concurrently");
            return Err(invalid());
        }
        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn create_guest_token(&self) -> Result<GuestTokenResponse> {
        let access_token = self.tokens.issue_guest().map_err(|e| {
            error!(error = %e, "failed to sign guest token");
            IdentityError::Internal(anyhow!("Failed to create guest user"))
        })?;
        debug!("guest token issued");
        Ok(GuestTokenResponse { access_token })
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<PublicUser>> {
        let user = self.users.find_by_username(username.trim()).await?;
        Ok(user.as_ref().map(PublicUser::from))
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<PublicUser> {
        self.users
            .find_by_id(user_id)
            .await?
            .as_ref()
            .map(PublicUser::from)
            .ok_or_else(|| IdentityError::NotFound(format!("User with ID {user_id} not found")))
    }

    #[instrument(skip(self, request))]
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        request: UpdateProfileRequest,
    ) -> Result<PublicUser> {
        let request = request.normalized()?;
        let user = self
            .users
            .update_profile(
                user_id,
                ProfileChanges {
                    first_name: request.first_name,
                    last_name: request.last_name,
                    email: request.email,
                    phone_number: request.phone_number,
                    company: request.company,
                    shipping_addresses: request.shipping_addresses,
                },
            )
            .await?;
        debug!("profile updated");
        Ok(PublicUser::from(&user))
    }

    fn reset_url(&self, token: &str) -> Result<Url> {
        let mut url = self.frontend_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("frontend URL cannot be a base"))?
            .pop_if_empty()
            .push("reset-password");
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }
}
