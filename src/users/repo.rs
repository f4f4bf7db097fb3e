use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::model::User;
use super::repo_types::UserRow;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
    #[error("user {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Durable storage for user records and follow edges.
///
/// `update` writes profile fields and the password hash only; the follow
/// graph changes through `add_follow` / `remove_follow`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &User) -> Result<(), StoreError>;
    async fn update(&self, user: &User) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn add_follow(&self, follower: Uuid, followed: Uuid) -> Result<(), StoreError>;
    async fn remove_follow(&self, follower: Uuid, followed: Uuid) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn load_graph(&self, row: UserRow) -> Result<User, StoreError> {
        let following: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT followed_id FROM follows WHERE follower_id = $1"#,
        )
        .bind(row.id)
        .fetch_all(&self.db)
        .await
        .context("load following")?;

        let followers: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT follower_id FROM follows WHERE followed_id = $1"#,
        )
        .bind(row.id)
        .fetch_all(&self.db)
        .await
        .context("load followers")?;

        Ok(row.into_user(
            following.into_iter().collect::<BTreeSet<_>>(),
            followers.into_iter().collect::<BTreeSet<_>>(),
        ))
    }
}

fn map_write_error(e: sqlx::Error, email: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::DuplicateEmail(email.to_owned());
        }
    }
    StoreError::Backend(anyhow::Error::new(e))
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let row = UserRow::from(user);
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, about, created, updated, hashed_password)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(row.id)
        .bind(&row.email)
        .bind(&row.name)
        .bind(&row.about)
        .bind(row.created)
        .bind(row.updated)
        .bind(&row.hashed_password)
        .execute(&self.db)
        .await
        .map_err(|e| map_write_error(e, &row.email))?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let row = UserRow::from(user);
        let done = sqlx::query(
            r#"
            UPDATE users
               SET email = $2, name = $3, about = $4, updated = $5, hashed_password = $6
             WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(&row.email)
        .bind(&row.name)
        .bind(&row.about)
        .bind(row.updated)
        .bind(&row.hashed_password)
        .execute(&self.db)
        .await
        .map_err(|e| map_write_error(e, &row.email))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(row.id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, about, created, updated, hashed_password
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;

        match row {
            Some(row) => Ok(Some(self.load_graph(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, about, created, updated, hashed_password
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;

        match row {
            Some(row) => Ok(Some(self.load_graph(row).await?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let done = sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(done.rows_affected() > 0)
    }

    async fn add_follow(&self, follower: Uuid, followed: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO follows (follower_id, followed_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(follower)
        .bind(followed)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                let exists: Option<Uuid> =
                    sqlx::query_scalar(r#"SELECT id FROM users WHERE id = $1"#)
                        .bind(follower)
                        .fetch_optional(&self.db)
                        .await
                        .context("check follower exists")?;
                Err(StoreError::NotFound(if exists.is_some() {
                    followed
                } else {
                    follower
                }))
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert follow").into()),
        }
    }

    async fn remove_follow(&self, follower: Uuid, followed: Uuid) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM follows WHERE follower_id = $1 AND followed_id = $2"#)
            .bind(follower)
            .bind(followed)
            .execute(&self.db)
            .await
            .context("delete follow")?;
        Ok(())
    }
}
