use std::collections::BTreeSet;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::credentials::{CredentialState, Credentials};

pub const NAME_MAX_LEN: usize = 10;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// One failed field rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Input for a brand new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub about: Option<String>,
    pub password: String,
}

/// User record. Serializing it yields the public view: neither the stored
/// hash nor a pending plaintext is ever part of it.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    id: Uuid,
    email: String,
    name: String,
    about: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    updated: Option<OffsetDateTime>,
    following: BTreeSet<Uuid>,
    followers: BTreeSet<Uuid>,
    #[serde(skip)]
    credentials: Credentials,
    #[serde(skip)]
    persisted: bool,
}

impl User {
    pub fn new(input: NewUser) -> Self {
        let mut user = Self {
            id: Uuid::new_v4(),
            email: String::new(),
            name: String::new(),
            about: None,
            created: OffsetDateTime::now_utc(),
            updated: None,
            following: BTreeSet::new(),
            followers: BTreeSet::new(),
            credentials: Credentials::default(),
            persisted: false,
        };
        user.set_email(input.email);
        user.set_name(input.name);
        user.set_about(input.about);
        user.set_password(input.password);
        user
    }

    /// Rebuilds a record that already exists in a store.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_stored(
        id: Uuid,
        email: String,
        name: String,
        about: Option<String>,
        created: OffsetDateTime,
        updated: Option<OffsetDateTime>,
        hashed_password: String,
        following: BTreeSet<Uuid>,
        followers: BTreeSet<Uuid>,
    ) -> Self {
        Self {
            id,
            email,
            name,
            about,
            created,
            updated,
            following,
            followers,
            credentials: Credentials::from_hash(hashed_password),
            persisted: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn about(&self) -> Option<&str> {
        self.about.as_deref()
    }

    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    pub fn updated(&self) -> Option<OffsetDateTime> {
        self.updated
    }

    pub fn following(&self) -> &BTreeSet<Uuid> {
        &self.following
    }

    pub fn followers(&self) -> &BTreeSet<Uuid> {
        &self.followers
    }

    /// True until the record has been written to (or loaded from) a store.
    pub fn is_new(&self) -> bool {
        !self.persisted
    }

    pub fn credential_state(&self) -> CredentialState {
        self.credentials.state()
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into().trim().to_owned();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into().trim().to_owned();
    }

    pub fn set_about(&mut self, about: Option<String>) {
        self.about = about
            .map(|a| a.trim().to_owned())
            .filter(|a| !a.is_empty());
    }

    pub fn set_updated(&mut self, at: OffsetDateTime) {
        self.updated = Some(at);
    }

    /// Stages a new password. It is hashed on the next save.
    pub fn set_password(&mut self, plaintext: impl Into<String>) {
        self.credentials.set_password(plaintext);
    }

    /// Checks the non-credential field rules; every violation is collected.
    pub fn validate_fields(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        if self.email.is_empty() {
            violations.push(FieldViolation {
                field: "email",
                message: "email is required".into(),
            });
        } else if !is_valid_email(&self.email) {
            violations.push(FieldViolation {
                field: "email",
                message: "please fill a valid email address".into(),
            });
        }

        if self.name.is_empty() {
            violations.push(FieldViolation {
                field: "name",
                message: "name is required".into(),
            });
        } else if self.name.chars().count() > NAME_MAX_LEN {
            violations.push(FieldViolation {
                field: "name",
                message: format!("name must be at most {NAME_MAX_LEN} characters"),
            });
        }

        violations
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub(crate) fn credentials_mut(&mut self) -> &mut Credentials {
        &mut self.credentials
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    pub(crate) fn following_mut(&mut self) -> &mut BTreeSet<Uuid> {
        &mut self.following
    }

    pub(crate) fn followers_mut(&mut self) -> &mut BTreeSet<Uuid> {
        &mut self.followers
    }
}
