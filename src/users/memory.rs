use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::User;
use super::repo::{StoreError, UserStore};
use super::repo_types::UserRow;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserRow>,
    follows: BTreeSet<(Uuid, Uuid)>,
}

impl Inner {
    fn hydrate(&self, row: &UserRow) -> User {
        let following = self
            .follows
            .iter()
            .filter(|(from, _)| *from == row.id)
            .map(|(_, to)| *to)
            .collect();
        let followers = self
            .follows
            .iter()
            .filter(|(_, to)| *to == row.id)
            .map(|(from, _)| *from)
            .collect();
        row.clone().into_user(following, followers)
    }

    fn email_taken(&self, email: &str, except: Uuid) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && u.id != except)
    }
}

/// Process-local [`UserStore`] with the same constraints as the SQL schema.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = UserRow::from(user);
        if inner.email_taken(&row.email, row.id) || inner.users.contains_key(&row.id) {
            return Err(StoreError::DuplicateEmail(row.email));
        }
        inner.users.insert(row.id, row);
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = UserRow::from(user);
        if !inner.users.contains_key(&row.id) {
            return Err(StoreError::NotFound(row.id));
        }
        if inner.email_taken(&row.email, row.id) {
            return Err(StoreError::DuplicateEmail(row.email));
        }
        if let Some(existing) = inner.users.get_mut(&row.id) {
            // `created` is immutable once written.
            *existing = UserRow {
                created: existing.created,
                ..row
            };
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&id).map(|row| inner.hydrate(row)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email == email)
            .map(|row| inner.hydrate(row)))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.users.remove(&id).is_some();
        if removed {
            inner.follows.retain(|(from, to)| *from != id && *to != id);
        }
        Ok(removed)
    }

    async fn add_follow(&self, follower: Uuid, followed: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for id in [follower, followed] {
            if !inner.users.contains_key(&id) {
                return Err(StoreError::NotFound(id));
            }
        }
        inner.follows.insert((follower, followed));
        Ok(())
    }

    async fn remove_follow(&self, follower: Uuid, followed: Uuid) -> Result<(), StoreError> {
        self.inner.write().await.follows.remove(&(follower, followed));
        Ok(())
    }
}
