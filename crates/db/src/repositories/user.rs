use sqlx::Row;

use bazaar_core::domain::user::{Role, User, UserId};

use super::{decode_err, decode_ts, encode_ts, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn roles_for(&self, user_id: &str) -> Result<Vec<Role>, RepositoryError> {
        let rows = sqlx::query("SELECT role FROM user_roles WHERE user_id = ? ORDER BY rowid ASC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("role").map_err(decode_err)?;
                Role::parse(&raw)
                    .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{raw}`")))
            })
            .collect()
    }

    async fn hydrate(
        &self,
        row: Option<sqlx::sqlite::SqliteRow>,
    ) -> Result<Option<User>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id").map_err(decode_err)?;
        let roles = self.roles_for(&id).await?;
        let created_at: String = row.try_get("created_at").map_err(decode_err)?;

        Ok(Some(User {
            id: UserId(id),
            email: row.try_get("email").map_err(decode_err)?,
            first_name: row.try_get("first_name").map_err(decode_err)?,
            last_name: row.try_get("last_name").map_err(decode_err)?,
            password_hash: row.try_get("password_hash").map_err(decode_err)?,
            roles,
            created_at: decode_ts("created_at", &created_at)?,
        }))
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, password_hash, created_at
             FROM users WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, password_hash, created_at
             FROM users WHERE email = ? COLLATE NOCASE",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn insert(&self, user: User) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.as_str())
        .bind(user.email.trim())
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.password_hash)
        .bind(encode_ts(user.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| match error {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Constraint(format!("email {} is already registered", user.email))
            }
            other => RepositoryError::Database(other),
        })?;

        for role in &user.roles {
            sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
                .bind(user.id.as_str())
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn add_role(&self, id: &UserId, role: Role) -> Result<(), RepositoryError> {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?, ?)")
            .bind(id.as_str())
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(|error| match error {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    RepositoryError::Constraint(format!("user {id} does not exist"))
                }
                other => RepositoryError::Database(other),
            })?;
        Ok(())
    }
}
