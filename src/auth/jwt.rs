use std::time::Duration;

use anyhow::bail;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::claims::{Envelope, GuestClaims, ResetClaims, SessionClaims, TokenKind};
use crate::auth::dto::PublicUser;
use crate::config::{JwtConfig, MAX_TTL_MINUTES};

pub const GUEST_ROLE: &str = "guest";

/// A signed token together with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// Signs and verifies bearer tokens.
pub trait TokenIssuer: Send + Sync {
    fn issue_session(&self, user: &PublicUser) -> anyhow::Result<String>;
    fn issue_guest(&self) -> anyhow::Result<String>;
    fn issue_reset(&self, user_id: Uuid) -> anyhow::Result<IssuedToken>;
    fn verify_session(&self, token: &str) -> anyhow::Result<SessionClaims>;
    fn verify_reset(&self, token: &str) -> anyhow::Result<ResetClaims>;
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub session_ttl: Duration,
    pub guest_ttl: Duration,
    pub reset_ttl: Duration,
}

fn minutes(value: i64) -> Duration {
    Duration::from_secs(value.clamp(0, MAX_TTL_MINUTES) as u64 * 60)
}

impl From<&JwtConfig> for JwtKeys {
    fn from(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: minutes(cfg.ttl_minutes),
            guest_ttl: minutes(cfg.guest_ttl_minutes),
            reset_ttl: minutes(cfg.reset_ttl_minutes),
        }
    }
}

impl JwtKeys {
    fn envelope(&self, kind: TokenKind) -> (Envelope, OffsetDateTime) {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.session_ttl,
            TokenKind::Guest => self.guest_ttl,
            TokenKind::Reset => self.reset_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let envelope = Envelope {
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        (envelope, exp)
    }

    fn sign<T: Serialize>(&self, claims: &T, kind: TokenKind) -> anyhow::Result<String> {
        let token = encode(&Header::default(), claims, &self.encoding)?;
        debug!(kind = ?kind, "jwt signed");
        Ok(token)
    }

    fn decode<T: DeserializeOwned>(&self, token: &str) -> anyhow::Result<T> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<T>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

fn expect_kind(envelope: &Envelope, kind: TokenKind) -> anyhow::Result<()> {
    if envelope.kind != kind {
        bail!("expected a {:?} token, got {:?}", kind, envelope.kind);
    }
    Ok(())
}

impl TokenIssuer for JwtKeys {
    fn issue_session(&self, user: &PublicUser) -> anyhow::Result<String> {
        let (envelope, _) = self.envelope(TokenKind::Access);
        let claims = SessionClaims {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            company: user.company.clone(),
            shipping_addresses: user.shipping_addresses.clone(),
            is_email_verified: user.is_email_verified,
            envelope,
        };
        self.sign(&claims, TokenKind::Access)
    }

    fn issue_guest(&self) -> anyhow::Result<String> {
        let (envelope, _) = self.envelope(TokenKind::Guest);
        let claims = GuestClaims {
            role: GUEST_ROLE.to_string(),
            envelope,
        };
        self.sign(&claims, TokenKind::Guest)
    }

    fn issue_reset(&self, user_id: Uuid) -> anyhow::Result<IssuedToken> {
        let (envelope, expires_at) = self.envelope(TokenKind::Reset);
        let claims = ResetClaims {
            sub: user_id,
            envelope,
        };
        let token = self.sign(&claims, TokenKind::Reset)?;
        Ok(IssuedToken { token, expires_at })
    }

    fn verify_session(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let claims: SessionClaims = self.decode(token)?;
        expect_kind(&claims.envelope, TokenKind::Access)?;
        debug!(user_id = %claims.id, "session jwt verified");
        Ok(claims)
    }

    fn verify_reset(&self, token: &str) -> anyhow::Result<ResetClaims> {
        let claims: ResetClaims = self.decode(token)?;
        expect_kind(&claims.envelope, TokenKind::Reset)?;
        debug!(user_id = %claims.sub, "reset jwt verified");
        Ok(claims)
    }
}
