use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::{debug, error};
use zeroize::Zeroizing;

use crate::config::PasswordConfig;

#[derive(Debug, Error)]
pub enum HashingError {
    #[error("salt generation failed: {0}")]
    SaltGeneration(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("password comparison failed: {0}")]
    Compare(String),
    #[error("hashing service did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("hashing task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Salt produced by a [`PasswordHashing`] backend, tagged with the work factor
/// it was generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt {
    rounds: u32,
    encoded: String,
}

impl Salt {
    pub fn new(rounds: u32, encoded: impl Into<String>) -> Self {
        Self {
            rounds,
            encoded: encoded.into(),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

/// Salt generation, hashing and comparison of passwords.
///
/// A failed comparison is `Ok(false)`; `Err` is reserved for the backend
/// itself misbehaving.
#[async_trait]
pub trait PasswordHashing: Send + Sync {
    async fn generate_salt(&self, rounds: u32) -> Result<Salt, HashingError>;
    async fn hash(&self, plaintext: &str, salt: &Salt) -> Result<String, HashingError>;
    async fn compare(&self, plaintext: &str, hashed: &str) -> Result<bool, HashingError>;
}

/// Argon2id backend. `rounds` is the Argon2 time cost.
#[derive(Debug, Clone)]
pub struct Argon2Hashing {
    memory_kib: u32,
    parallelism: u32,
}

impl Argon2Hashing {
    pub fn new(memory_kib: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            parallelism,
        }
    }

    pub fn from_config(cfg: &PasswordConfig) -> Self {
        Self::new(cfg.memory_kib, cfg.parallelism)
    }

    fn hasher(&self, rounds: u32) -> Result<Argon2<'static>, HashingError> {
        let params = Params::new(self.memory_kib, rounds, self.parallelism, None)
            .map_err(|e| HashingError::Hash(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

#[async_trait]
impl PasswordHashing for Argon2Hashing {
    async fn generate_salt(&self, rounds: u32) -> Result<Salt, HashingError> {
        if rounds == 0 {
            return Err(HashingError::SaltGeneration(
                "work factor must be at least 1".into(),
            ));
        }
        let salt = SaltString::generate(&mut OsRng);
        Ok(Salt::new(rounds, salt.as_str()))
    }

    async fn hash(&self, plaintext: &str, salt: &Salt) -> Result<String, HashingError> {
        let argon2 = self.hasher(salt.rounds())?;
        let salt = SaltString::from_b64(salt.as_str())
            .map_err(|e| HashingError::SaltGeneration(e.to_string()))?;
        let plain = Zeroizing::new(plaintext.to_owned());

        let hashed = tokio::task::spawn_blocking(move || {
            argon2
                .hash_password(plain.as_bytes(), &salt)
                .map(|h| h.to_string())
        })
        .await?
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            HashingError::Hash(e.to_string())
        })?;

        debug!("password hashed");
        Ok(hashed)
    }

    async fn compare(&self, plaintext: &str, hashed: &str) -> Result<bool, HashingError> {
        let plain = Zeroizing::new(plaintext.to_owned());
        let hashed = hashed.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hashed).map_err(|e| {
                error!(error = %e, "argon2 parse hash error");
                HashingError::Compare(e.to_string())
            })?;
            // Params come from the PHC string, not from this instance.
            match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(password_hash::Error::Password) => Ok(false),
                Err(e) => Err(HashingError::Compare(e.to_string())),
            }
        })
        .await?
    }
}
