use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of JWT: user session, anonymous guest, or password reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Guest,
    Reset,
}

/// Registered claims shared by every token the service signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub iat: usize,      // issued at (unix timestamp)
    pub exp: usize,      // expires at (unix timestamp)
    pub iss: String,     // issuer
    pub aud: String,     // audience
    pub kind: TokenKind, // token type
}

/// Snapshot of the user profile taken at login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub id: Uuid,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub shipping_addresses: Vec<String>,
    pub is_email_verified: bool,
    #[serde(flatten)]
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestClaims {
    pub role: String,
    #[serde(flatten)]
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetClaims {
    pub sub: Uuid, // user ID
    #[serde(flatten)]
    pub envelope: Envelope,
}
