//! Password credential lifecycle of a user record.
//!
//! Plaintext only lives in the transient slot between [`Credentials::set_password`]
//! and [`Credentials::encrypt_before_persist`]; the stored value is always a
//! hash produced by a [`PasswordHashing`] backend.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::password::{HashingError, PasswordHashing};
use crate::config::PasswordConfig;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid credential: {}", .0.join("; "))]
    InvalidCredential(Vec<&'static str>),
    #[error("hashing failure: {0}")]
    HashingFailure(#[source] HashingError),
    #[error("comparison failure: {0}")]
    ComparisonFailure(#[source] HashingError),
}

/// Where a record's credentials stand relative to the next persist.
///
/// There is no rejected state: a record that fails validation stays
/// `PendingHash` with its plaintext kept for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Uninitialized,
    PendingHash,
    Hashed,
}

/// Work factor and time budget for hashing calls.
#[derive(Debug, Clone, Copy)]
pub struct HashPolicy {
    pub rounds: u32,
    pub timeout: Duration,
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self::from(&PasswordConfig::default())
    }
}

impl From<&PasswordConfig> for HashPolicy {
    fn from(cfg: &PasswordConfig) -> Self {
        Self {
            rounds: cfg.rounds,
            timeout: cfg.hash_timeout(),
        }
    }
}

#[derive(Default)]
pub struct Credentials {
    hashed_password: String,
    transient_password: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("state", &self.state())
            .finish()
    }
}

impl Clone for Credentials {
    // A pending plaintext stays with the instance it was set on.
    fn clone(&self) -> Self {
        Self {
            hashed_password: self.hashed_password.clone(),
            transient_password: None,
        }
    }
}

impl Credentials {
    pub(crate) fn from_hash(hashed_password: String) -> Self {
        Self {
            hashed_password,
            transient_password: None,
        }
    }

    pub(crate) fn hashed_password(&self) -> &str {
        &self.hashed_password
    }

    /// An empty plaintext counts as no password supplied.
    pub fn set_password(&mut self, plaintext: impl Into<String>) {
        let plaintext = Zeroizing::new(plaintext.into());
        self.transient_password = (!plaintext.is_empty()).then_some(plaintext);
    }

    pub fn has_pending_password(&self) -> bool {
        self.transient_password.is_some()
    }

    pub fn state(&self) -> CredentialState {
        if self.transient_password.is_some() {
            CredentialState::PendingHash
        } else if self.hashed_password.is_empty() {
            CredentialState::Uninitialized
        } else {
            CredentialState::Hashed
        }
    }

    /// Password policy checks run before every write. Both rules are always
    /// evaluated and every violation is reported.
    pub fn validate_before_persist(&self, is_new: bool) -> Result<(), CredentialError> {
        let mut problems = Vec::new();

        let too_short = self
            .transient_password
            .as_ref()
            .map(|p| p.chars().count() < MIN_PASSWORD_LEN)
            .unwrap_or(false);
        if too_short {
            problems.push("password must be at least 6 characters");
        }

        if is_new && self.transient_password.is_none() {
            problems.push("password is required");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CredentialError::InvalidCredential(problems))
        }
    }

    /// Hashes the pending plaintext, if any, and clears it.
    ///
    /// Returns `Ok(false)` when there was nothing to hash. On failure the
    /// stored hash is untouched and the plaintext stays pending.
    pub async fn encrypt_before_persist(
        &mut self,
        hasher: &dyn PasswordHashing,
        policy: HashPolicy,
    ) -> Result<bool, CredentialError> {
        let Some(hashed) = self.hash_pending(hasher, policy).await? else {
            return Ok(false);
        };
        self.swap_hash(hashed);
        self.clear_pending();
        Ok(true)
    }

    /// Hashes the pending plaintext without touching the record.
    pub(crate) async fn hash_pending(
        &self,
        hasher: &dyn PasswordHashing,
        policy: HashPolicy,
    ) -> Result<Option<String>, CredentialError> {
        let Some(plain) = self.transient_password.as_ref() else {
            return Ok(None);
        };

        let work = async {
            let salt = hasher.generate_salt(policy.rounds).await?;
            hasher.hash(plain, &salt).await
        };
        let hashed = tokio::time::timeout(policy.timeout, work)
            .await
            .map_err(|_| HashingError::Timeout(policy.timeout))
            .and_then(|r| r)
            .map_err(CredentialError::HashingFailure)?;

        debug!(rounds = policy.rounds, "pending password hashed");
        Ok(Some(hashed))
    }

    /// Installs `hashed` and returns the hash it replaced. The plaintext
    /// stays pending until [`Credentials::clear_pending`].
    pub(crate) fn swap_hash(&mut self, hashed: String) -> String {
        std::mem::replace(&mut self.hashed_password, hashed)
    }

    pub(crate) fn clear_pending(&mut self) {
        self.transient_password = None;
    }

    /// Compares `candidate` against the stored hash, reporting backend
    /// failures separately from a mismatch.
    pub async fn try_authenticate(
        &self,
        hasher: &dyn PasswordHashing,
        candidate: &str,
        timeout: Duration,
    ) -> Result<bool, CredentialError> {
        tokio::time::timeout(timeout, hasher.compare(candidate, &self.hashed_password))
            .await
            .map_err(|_| HashingError::Timeout(timeout))
            .and_then(|r| r)
            .map_err(CredentialError::ComparisonFailure)
    }

    /// Like [`Credentials::try_authenticate`], but any comparison failure
    /// counts as a mismatch.
    pub async fn authenticate(
        &self,
        hasher: &dyn PasswordHashing,
        candidate: &str,
        timeout: Duration,
    ) -> bool {
        match self.try_authenticate(hasher, candidate, timeout).await {
            Ok(matched) => matched,
            Err(e) => {
                warn!(error = %e, "password comparison failed; treating as mismatch");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::users::password::{Argon2Hashing, Salt};

    pub(crate) fn cheap_hasher() -> Argon2Hashing {
        Argon2Hashing::new(64, 1)
    }

    pub(crate) fn cheap_policy() -> HashPolicy {
        HashPolicy {
            rounds: 1,
            timeout: Duration::from_secs(30),
        }
    }

    /// Fails every call and counts how often it was asked to hash.
    #[derive(Default)]
    pub(crate) struct BrokenHasher {
        pub(crate) hash_calls: AtomicUsize,
    }

    #[async_trait]
    impl PasswordHashing for BrokenHasher {
        async fn generate_salt(&self, rounds: u32) -> Result<Salt, HashingError> {
            Ok(Salt::new(rounds, "c2FsdHNhbHRzYWx0"))
        }
        async fn hash(&self, _plaintext: &str, _salt: &Salt) -> Result<String, HashingError> {
            self.hash_calls.fetch_add(1, Ordering::SeqCst);
            Err(HashingError::Hash("backend unavailable".into()))
        }
        async fn compare(&self, _plaintext: &str, _hashed: &str) -> Result<bool, HashingError> {
            Err(HashingError::Compare("backend unavailable".into()))
        }
    }

    /// Never answers.
    pub(crate) struct StuckHasher;

    #[async_trait]
    impl PasswordHashing for StuckHasher {
        async fn generate_salt(&self, _rounds: u32) -> Result<Salt, HashingError> {
            std::future::pending().await
        }
        async fn hash(&self, _plaintext: &str, _salt: &Salt) -> Result<String, HashingError> {
            std::future::pending().await
        }
        async fn compare(&self, _plaintext: &str, _hashed: &str) -> Result<bool, HashingError> {
            std::future::pending().await
        }
    }

    async fn hashed(password: &str) -> Credentials {
        let mut creds = Credentials::default();
        creds.set_password(password);
        creds
            .encrypt_before_persist(&cheap_hasher(), cheap_policy())
            .await
            .expect("hashing should succeed");
        creds
    }

    #[tokio::test]
    async fn hashed_password_authenticates_and_differs_from_plaintext() {
        let creds = hashed("hunter22").await;
        assert_ne!(creds.hashed_password(), "hunter22");
        assert!(
            creds
                .authenticate(&cheap_hasher(), "hunter22", cheap_policy().timeout)
                .await
        );
    }

    #[test]
    fn short_password_is_rejected() {
        let mut creds = Credentials::default();
        creds.set_password("abc12");
        let err = creds.validate_before_persist(true).unwrap_err();
        match err {
            CredentialError::InvalidCredential(reasons) => {
                assert_eq!(reasons, vec!["password must be at least 6 characters"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(creds.state(), CredentialState::PendingHash);
    }

    #[test]
    fn empty_password_counts_as_missing() {
        let mut creds = Credentials::default();
        creds.set_password("");
        assert!(!creds.has_pending_password());
        let err = creds.validate_before_persist(true).unwrap_err();
        assert!(matches!(err, CredentialError::InvalidCredential(r) if r == vec!["password is required"]));
        assert!(creds.validate_before_persist(false).is_ok());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let mut creds = Credentials::default();
        creds.set_password("pässwö");
        assert!(creds.validate_before_persist(true).is_ok());
    }

    #[test]
    fn new_record_requires_password() {
        let creds = Credentials::default();
        let err = creds.validate_before_persist(true).unwrap_err();
        assert_eq!(err.to_string(), "invalid credential: password is required");
        assert_eq!(creds.state(), CredentialState::Uninitialized);
    }

    #[tokio::test]
    async fn existing_record_without_new_password_passes_unchanged() {
        let mut creds = hashed("original-secret").await;
        let before = creds.hashed_password().to_owned();

        creds.validate_before_persist(false).expect("update passes");
        let hashed_again = creds
            .encrypt_before_persist(&cheap_hasher(), cheap_policy())
            .await
            .expect("no-op");

        assert!(!hashed_again);
        assert_eq!(creds.hashed_password(), before);
        assert_eq!(creds.state(), CredentialState::Hashed);
    }

    #[tokio::test]
    async fn transient_is_cleared_after_hashing() {
        let mut creds = Credentials::default();
        creds.set_password("long-enough");
        assert_eq!(creds.state(), CredentialState::PendingHash);
        creds
            .encrypt_before_persist(&cheap_hasher(), cheap_policy())
            .await
            .expect("hash");
        assert!(creds.transient_password.is_none());
        assert!(!creds.has_pending_password());
        assert_eq!(creds.state(), CredentialState::Hashed);
    }

    #[tokio::test]
    async fn authenticate_is_idempotent() {
        let creds = hashed("right-password").await;
        let hasher = cheap_hasher();
        let timeout = cheap_policy().timeout;
        let before = creds.hashed_password().to_owned();
        for _ in 0..3 {
            assert!(!creds.authenticate(&hasher, "wrong-password", timeout).await);
            assert!(creds.authenticate(&hasher, "right-password", timeout).await);
        }
        assert_eq!(creds.hashed_password(), before);
    }

    #[tokio::test]
    async fn same_plaintext_hashes_differently() {
        let a = hashed("same-password").await;
        let b = hashed("same-password").await;
        assert_ne!(a.hashed_password(), b.hashed_password());
        let hasher = cheap_hasher();
        let timeout = cheap_policy().timeout;
        assert!(a.authenticate(&hasher, "same-password", timeout).await);
        assert!(b.authenticate(&hasher, "same-password", timeout).await);
    }

    #[tokio::test]
    async fn hashing_failure_keeps_record_unchanged() {
        let mut creds = hashed("first-secret").await;
        let before = creds.hashed_password().to_owned();
        creds.set_password("second-secret");

        let broken = BrokenHasher::default();
        let err = creds
            .encrypt_before_persist(&broken, cheap_policy())
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::HashingFailure(HashingError::Hash(_))));
        assert_eq!(creds.hashed_password(), before);
        assert!(creds.has_pending_password());
    }

    #[tokio::test]
    async fn stuck_hasher_times_out() {
        let mut creds = Credentials::default();
        creds.set_password("waiting-forever");
        let policy = HashPolicy {
            rounds: 1,
            timeout: Duration::from_millis(20),
        };
        let err = creds
            .encrypt_before_persist(&StuckHasher, policy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::HashingFailure(HashingError::Timeout(_))
        ));
        assert_eq!(creds.state(), CredentialState::PendingHash);
    }

    #[tokio::test]
    async fn comparison_failure_is_a_mismatch() {
        let creds = hashed("whatever-secret").await;
        let timeout = cheap_policy().timeout;

        let err = creds
            .try_authenticate(&BrokenHasher::default(), "whatever-secret", timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ComparisonFailure(_)));
        assert!(
            !creds
                .authenticate(&BrokenHasher::default(), "whatever-secret", timeout)
                .await
        );
    }

    #[tokio::test]
    async fn never_hashed_record_does_not_authenticate() {
        let creds = Credentials::default();
        assert!(
            !creds
                .authenticate(&cheap_hasher(), "", cheap_policy().timeout)
                .await
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut creds = Credentials::from_hash("$argon2id$stored".into());
        creds.set_password("plain-secret");
        let shown = format!("{creds:?}");
        assert!(!shown.contains("plain-secret"));
        assert!(!shown.contains("argon2id"));
    }
}
