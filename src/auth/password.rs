use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use rand::rngs::OsRng;
use tracing::error;

use crate::config::PasswordConfig;

/// One-way password hashing and comparison.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn hash(&self, plain: &str) -> anyhow::Result<String>;
    async fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool>;
}

/// Argon2id with a configurable work factor.
///
/// Hashing runs on the blocking pool so slow parameters do not stall the runtime.
#[derive(Clone)]
pub struct Argon2Verifier {
    params: Params,
}

impl Argon2Verifier {
    pub fn new(config: PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self { params })
    }
}

#[async_trait]
impl CredentialVerifier for Argon2Verifier {
    async fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let params = self.params.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hash_password_with(&plain, params)).await?
    }

    async fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let plain = plain.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&plain, &hash)).await?
    }
}

fn hash_password_with(plain: &str, params: Params) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Parameters are read back from the PHC string, so hashes made with an older
/// work factor still verify.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
