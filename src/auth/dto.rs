use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::error::{IdentityError, Result};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str) -> Result<()> {
    if !is_valid_email(email) {
        return Err(IdentityError::BadRequest("Invalid email".into()));
    }
    Ok(())
}

pub fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(IdentityError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn check_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(3..=30).contains(&len) || username.chars().any(char::is_whitespace) {
        return Err(IdentityError::BadRequest(
            "Username must be 3-30 characters without spaces".into(),
        ));
    }
    Ok(())
}

fn check_name(field: &str, value: &Option<String>) -> Result<()> {
    if let Some(name) = value {
        let len = name.trim().chars().count();
        if !(2..=30).contains(&len) {
            return Err(IdentityError::BadRequest(format!(
                "{field} must be 2-30 characters"
            )));
        }
    }
    Ok(())
}

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub shipping_addresses: Vec<String>,
}

impl RegisterRequest {
    /// Trims identifiers, lower-cases the email and validates the input.
    pub fn normalized(mut self) -> Result<Self> {
        self.username = self.username.trim().to_string();
        self.email = normalize_email(&self.email);
        check_username(&self.username)?;
        check_email(&self.email)?;
        check_password(&self.password)?;
        check_name("First name", &self.first_name)?;
        check_name("Last name", &self.last_name)?;
        Ok(self)
    }
}

/// Request body for login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login outcome. A failed login carries neither token nor reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl LoginResponse {
    pub fn failed() -> Self {
        Self {
            success: false,
            access_token: None,
        }
    }

    pub fn succeeded(access_token: String) -> Self {
        Self {
            success: true,
            access_token: Some(access_token),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub shipping_addresses: Option<Vec<String>>,
}

impl UpdateProfileRequest {
    pub fn normalized(mut self) -> Result<Self> {
        self.email = self.email.as_deref().map(normalize_email);
        if let Some(email) = &self.email {
            check_email(email)?;
        }
        check_name("First name", &self.first_name)?;
        check_name("Last name", &self.last_name)?;
        Ok(self)
    }
}

/// A request made on behalf of an authenticated user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScoped<T> {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub request: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsernameRef {
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Sanitized user profile: no password hash, no reset token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub shipping_addresses: Vec<String>,
    pub is_email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone_number: user.phone_number.clone(),
            company: user.company.clone(),
            shipping_addresses: user.shipping_addresses.clone(),
            is_email_verified: user.is_email_verified,
            created_at: user.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            first_name: None,
            last_name: None,
            phone_number: None,
            company: None,
            shipping_addresses: vec![],
        }
    }

    #[test]
    fn register_normalizes_identifiers() {
        let req = register("  ada  ", " Ada@Example.COM ", "long-enough")
            .normalized()
            .expect("valid");
        assert_eq!(req.username, "ada");
        assert_eq!(req.email, "ada@example.com");
    }

    #[test]
    fn register_rejects_bad_input() {
        for req in [
            register("ada", "not-an-email", "long-enough"),
            register("ada", "ada@example.com", "short"),
            register("a", "ada@example.com", "long-enough"),
            register("ada lovelace", "ada@example.com", "long-enough"),
        ] {
            assert!(matches!(req.normalized(), Err(IdentityError::BadRequest(_))));
        }
    }

    #[test]
    fn register_accepts_camel_case_body() {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "username": "ada",
            "email": "ada@example.com",
            "password": "long-enough",
            "firstName": "Ada",
            "shippingAddresses": ["1 Dock Road"]
        }))
        .expect("deserialize");
        assert_eq!(req.first_name.as_deref(), Some("Ada"));
        assert_eq!(req.shipping_addresses, vec!["1 Dock Road".to_string()]);
    }

    #[test]
    fn failed_login_serializes_without_token() {
        let json = serde_json::to_value(LoginResponse::failed()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": false }));

        let json = serde_json::to_value(LoginResponse::succeeded("t".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "accessToken": "t" }));
    }

    #[test]
    fn user_scoped_reads_user_id_next_to_fields() {
        let id = Uuid::new_v4();
        let scoped: UserScoped<UpdatePasswordRequest> =
            serde_json::from_value(serde_json::json!({
                "userId": id,
                "oldPassword": "old-password",
                "newPassword": "new-password"
            }))
            .unwrap();
        assert_eq!(scoped.user_id, id);
        assert_eq!(scoped.request.new_password, "new-password");
    }

    #[test]
    fn profile_update_validates_names_and_email() {
        let bad_name = UpdateProfileRequest {
            first_name: Some("A".into()),
            ..Default::default()
        };
        assert!(bad_name.normalized().is_err());

        let ok = UpdateProfileRequest {
            email: Some(" Bob@Example.com".into()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(ok.email.as_deref(), Some("bob@example.com"));
    }
}
