use std::net::SocketAddr;

use anyhow::{bail, Context};
use argon2::Params;
use serde::Deserialize;
use url::Url;

/// Upper bound for any token lifetime: one year.
pub const MAX_TTL_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub guest_ttl_minutes: i64,
    pub reset_ttl_minutes: i64,
}

/// Argon2 work factor used for new password hashes.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    pub nats_url: Option<String>,
    pub subject_prefix: Option<String>,
    pub buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreBackend,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub frontend_url: Url,
    pub events: EventsConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the configuration against an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = format!(
            "{}:{}",
            lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            lookup("APP_PORT").unwrap_or_else(|| "8080".into())
        )
        .parse()
        .context("APP_HOST/APP_PORT do not form a socket address")?;

        let store = match lookup("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: lookup("DATABASE_URL")
                    .context("DATABASE_URL is required for the postgres store")?,
            },
            "memory" => StoreBackend::Memory,
            other => bail!("unknown STORE_BACKEND {other:?}"),
        };

        let secret = lookup("JWT_SECRET").context("JWT_SECRET is required")?;
        if secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        let jwt = JwtConfig {
            secret,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "account-service".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "plastic-pallets".into()),
            ttl_minutes: parse_ttl(&lookup, "JWT_TTL_MINUTES")?,
            guest_ttl_minutes: parse_ttl(&lookup, "JWT_GUEST_TTL_MINUTES")?,
            reset_ttl_minutes: parse_ttl(&lookup, "JWT_RESET_TTL_MINUTES")?,
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parse_or(&lookup, "PASSWORD_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&lookup, "PASSWORD_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&lookup, "PASSWORD_PARALLELISM", defaults.parallelism)?,
        };

        let raw_frontend = lookup("FRONTEND_URL").context("FRONTEND_URL is required")?;
        let frontend_url = Url::parse(&raw_frontend)
            .with_context(|| format!("FRONTEND_URL {raw_frontend:?} is not a valid URL"))?;
        if !matches!(frontend_url.scheme(), "http" | "https") {
            bail!("FRONTEND_URL must be an http(s) URL");
        }

        let events = EventsConfig {
            nats_url: lookup("EVENTS_NATS_URL").filter(|v| !v.is_empty()),
            subject_prefix: lookup("EVENTS_SUBJECT_PREFIX").filter(|v| !v.is_empty()),
            buffer: parse_or(&lookup, "EVENTS_BUFFER", 1024)?,
        };

        Ok(Self {
            listen_addr,
            store,
            jwt,
            password,
            frontend_url,
            events,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}

fn parse_ttl<F>(lookup: &F, key: &str) -> anyhow::Result<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let minutes: i64 = parse_or(lookup, key, 60)?;
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        bail!("{key} must be between 1 and {MAX_TTL_MINUTES} minutes, got {minutes}");
    }
    Ok(minutes)
}

#[cfg(test)]
impl AppConfig {
    pub fn fake() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".parse().expect("static addr"),
            store: StoreBackend::Memory,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60,
                guest_ttl_minutes: 60,
                reset_ttl_minutes: 60,
            },
            // Minimal argon2 cost so tests stay fast.
            password: PasswordConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            frontend_url: Url::parse("https://shop.example.com").expect("static url"),
            events: EventsConfig {
                nats_url: None,
                subject_prefix: None,
                buffer: 16,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("JWT_SECRET", "s3cr3t"),
        ("FRONTEND_URL", "https://shop.example.com"),
        ("STORE_BACKEND", "memory"),
    ];

    #[test]
    fn applies_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(MINIMAL)).expect("config");
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.jwt.ttl_minutes, 60);
        assert_eq!(cfg.jwt.reset_ttl_minutes, 60);
        assert_eq!(cfg.jwt.issuer, "account-service");
        assert_eq!(cfg.password.memory_kib, Params::DEFAULT_M_COST);
        assert!(cfg.events.nats_url.is_none());
        assert_eq!(cfg.events.buffer, 1024);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("FRONTEND_URL", "https://shop.example.com"),
            ("STORE_BACKEND", "memory"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn blank_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "   "),
            ("FRONTEND_URL", "https://shop.example.com"),
            ("STORE_BACKEND", "memory"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cr3t"),
            ("FRONTEND_URL", "https://shop.example.com"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cr3t"),
            ("FRONTEND_URL", "https://shop.example.com"),
            ("DATABASE_URL", "postgres://localhost/accounts"),
        ]))
        .expect("config");
        assert_eq!(
            cfg.store,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/accounts".into()
            }
        );
    }

    #[test]
    fn rejects_non_http_frontend_url() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s3cr3t"),
            ("FRONTEND_URL", "mailto:someone@example.com"),
            ("STORE_BACKEND", "memory"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FRONTEND_URL"));
    }

    #[test]
    fn invalid_number_is_not_silently_defaulted() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("JWT_TTL_MINUTES", "an hour"));
        let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("JWT_TTL_MINUTES"));
    }

    #[test]
    fn token_lifetimes_are_bounded() {
        for bad in ["0", "-5", "9223372036854775807"] {
            let mut pairs = MINIMAL.to_vec();
            pairs.push(("JWT_RESET_TTL_MINUTES", bad));
            let err = AppConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(err.to_string().contains("JWT_RESET_TTL_MINUTES"), "{bad}");
        }

        let mut pairs = MINIMAL.to_vec();
        pairs.push(("JWT_GUEST_TTL_MINUTES", "1440"));
        let cfg = AppConfig::from_lookup(lookup_from(&pairs)).expect("config");
        assert_eq!(cfg.jwt.guest_ttl_minutes, 1440);
    }
}
