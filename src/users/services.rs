use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::credentials::{CredentialError, HashPolicy};
use super::model::{FieldViolation, User};
use super::password::{HashingError, PasswordHashing};
use super::repo::{StoreError, UserStore};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("invalid credential: {}", .0.join("; "))]
    InvalidCredential(Vec<&'static str>),
    #[error("invalid record: {}", join_violations(.0))]
    InvalidRecord(Vec<FieldViolation>),
    #[error("hashing failure: {0}")]
    HashingFailure(#[source] HashingError),
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
    #[error("user {0} not found")]
    NotFound(Uuid),
    #[error("a user cannot follow themselves")]
    SelfFollow,
    #[error(transparent)]
    Store(anyhow::Error),
}

fn join_violations(v: &[FieldViolation]) -> String {
    v.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<CredentialError> for UserError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::InvalidCredential(reasons) => UserError::InvalidCredential(reasons),
            CredentialError::HashingFailure(h) | CredentialError::ComparisonFailure(h) => {
                UserError::HashingFailure(h)
            }
        }
    }
}

impl From<StoreError> for UserError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail(email) => UserError::DuplicateEmail(email),
            StoreError::NotFound(id) => UserError::NotFound(id),
            StoreError::Backend(e) => UserError::Store(e),
        }
    }
}

/// Persist and query user records.
///
/// Saving is two-phase: [`UserService::validate`] runs every field and
/// password rule, and the returned [`PendingSave`] hashes the staged
/// password (if any) and then writes. Both phases hold the record's `&mut`
/// borrow, so one record handle never has two saves in flight.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHashing>,
    policy: HashPolicy,
}

/// A record that passed validation and is ready to be written.
#[must_use = "nothing is written until commit() is awaited"]
pub struct PendingSave<'a> {
    service: &'a UserService,
    user: &'a mut User,
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHashing>,
        policy: HashPolicy,
    ) -> Self {
        Self {
            store,
            hasher,
            policy,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            state.hasher.clone(),
            HashPolicy::from(&state.config.password),
        )
    }

    /// Runs every pre-persist rule. Credential problems win over field
    /// problems in the returned error.
    pub fn validate<'a>(&'a self, user: &'a mut User) -> Result<PendingSave<'a>, UserError> {
        let violations = user.validate_fields();
        let credentials = user.credentials().validate_before_persist(user.is_new());

        if let Err(e) = credentials {
            warn!(user_id = %user.id(), error = %e, "credential validation failed");
            return Err(e.into());
        }
        if !violations.is_empty() {
            warn!(user_id = %user.id(), count = violations.len(), "record validation failed");
            return Err(UserError::InvalidRecord(violations));
        }
        Ok(PendingSave {
            service: self,
            user,
        })
    }

    pub async fn save(&self, user: &mut User) -> Result<(), UserError> {
        self.validate(user)?.commit().await
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserError> {
        Ok(self.store.find_by_id(id).await?)
    }

    #[instrument(skip(self))]
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserError> {
        Ok(self.store.find_by_email(email.trim()).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<bool, UserError> {
        let removed = self.store.delete(id).await?;
        if removed {
            info!(user_id = %id, "user deleted");
        }
        Ok(removed)
    }

    pub async fn authenticate(&self, user: &User, candidate: &str) -> bool {
        user.credentials()
            .authenticate(self.hasher.as_ref(), candidate, self.policy.timeout)
            .await
    }

    /// Looks up `email` and checks `password`; an unknown email and a wrong
    /// password are indistinguishable to the caller.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<User>, UserError> {
        let Some(user) = self.find_by_email(email).await? else {
            warn!(email = %email.trim(), "login unknown email");
            return Ok(None);
        };
        if self.authenticate(&user, password).await {
            info!(user_id = %user.id(), "user authenticated");
            Ok(Some(user))
        } else {
            warn!(user_id = %user.id(), "login invalid password");
            Ok(None)
        }
    }

    #[instrument(skip_all, fields(follower = %follower.id(), followed = %followed.id()))]
    pub async fn follow(&self, follower: &mut User, followed: &mut User) -> Result<(), UserError> {
        if follower.id() == followed.id() {
            return Err(UserError::SelfFollow);
        }
        self.store.add_follow(follower.id(), followed.id()).await?;
        follower.following_mut().insert(followed.id());
        followed.followers_mut().insert(follower.id());
        debug!("follow recorded");
        Ok(())
    }

    #[instrument(skip_all, fields(follower = %follower.id(), followed = %followed.id()))]
    pub async fn unfollow(&self, follower: &mut User, followed: &mut User) -> Result<(), UserError> {
        self.store
            .remove_follow(follower.id(), followed.id())
            .await?;
        follower.following_mut().remove(&followed.id());
        followed.followers_mut().remove(&follower.id());
        debug!("follow removed");
        Ok(())
    }
}

impl PendingSave<'_> {
    /// Hashes the staged password, then writes the record. A hashing failure
    /// aborts before anything reaches the store. The plaintext is only
    /// dropped once the write succeeded; a failed write restores the previous
    /// hash so the record can be saved again.
    #[instrument(skip_all, fields(user_id = %self.user.id(), is_new = self.user.is_new()))]
    pub async fn commit(self) -> Result<(), UserError> {
        let PendingSave { service, user } = self;

        let staged = user
            .credentials()
            .hash_pending(service.hasher.as_ref(), service.policy)
            .await?;
        let previous = staged.map(|hashed| user.credentials_mut().swap_hash(hashed));

        let written = if user.is_new() {
            service.store.insert(user).await
        } else {
            service.store.update(user).await
        };

        if let Err(e) = written {
            if let Some(previous) = previous {
                user.credentials_mut().swap_hash(previous);
            }
            warn!(user_id = %user.id(), error = %e, "user write failed");
            return Err(e.into());
        }

        let rehashed = previous.is_some();
        if rehashed {
            user.credentials_mut().clear_pending();
        }
        if user.is_new() {
            user.mark_persisted();
            info!(user_id = %user.id(), "user created");
        } else {
            info!(user_id = %user.id(), password_changed = rehashed, "user updated");
        }
        Ok(())
    }
}
