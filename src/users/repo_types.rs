use std::collections::BTreeSet;

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::User;

/// Row of the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,                          // unique user ID
    pub email: String,                     // unique, trimmed
    pub name: String,
    pub about: Option<String>,
    pub created: OffsetDateTime,
    pub updated: Option<OffsetDateTime>,
    pub hashed_password: String,           // Argon2 PHC string
}

impl UserRow {
    pub fn into_user(self, following: BTreeSet<Uuid>, followers: BTreeSet<Uuid>) -> User {
        User::from_stored(
            self.id,
            self.email,
            self.name,
            self.about,
            self.created,
            self.updated,
            self.hashed_password,
            following,
            followers,
        )
    }
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        Self {
            id: u.id(),
            email: u.email().to_owned(),
            name: u.name().to_owned(),
            about: u.about().map(str::to_owned),
            created: u.created(),
            updated: u.updated(),
            hashed_password: u.credentials().hashed_password().to_owned(),
        }
    }
}
