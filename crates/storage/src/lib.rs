use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{ChallengeId, UserId, UserRecord};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChallenge {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub otp_digest: String,
    pub expires_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// `None` when the name is taken.
    pub async fn create_user(&self, username: &str, role: &str) -> Result<Option<UserId>> {
        let rec = sqlx::query(
            "INSERT INTO users (username, role) VALUES (?, ?)
             ON CONFLICT(username) DO NOTHING
             RETURNING id",
        )
        .bind(username)
        .bind(role)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to create user '{username}'"))?;
        Ok(rec.map(|r| UserId(r.get::<i64, _>(0))))
    }

    pub async fn get_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT id, username, role FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    pub async fn set_user_role(&self, username: &str, role: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE username = ?")
            .bind(role)
            .bind(username)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to update role for '{username}'"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query("SELECT id, username, role FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn insert_token(&self, user_id: UserId, token_digest: &str) -> Result<()> {
        sqlx::query("INSERT INTO tokens (user_id, token) VALUES (?, ?)")
            .bind(user_id.0)
            .bind(token_digest)
            .execute(&self.pool)
            .await
            .context("failed to store session token")?;
        Ok(())
    }

    pub async fn username_for_token(&self, token_digest: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT users.username FROM tokens
             JOIN users ON users.id = tokens.user_id
             WHERE tokens.token = ?",
        )
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn delete_token(&self, token_digest: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE token = ?")
            .bind(token_digest)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_tokens_for_user(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_challenge(
        &self,
        user_id: UserId,
        token_digest: &str,
        otp_digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ChallengeId> {
        let rec = sqlx::query(
            "INSERT INTO challenges (user_id, otp, expire, token) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(user_id.0)
        .bind(otp_digest)
        .bind(expires_at.timestamp())
        .bind(token_digest)
        .fetch_one(&self.pool)
        .await
        .context("failed to store login challenge")?;
        Ok(ChallengeId(rec.get::<i64, _>(0)))
    }

    /// Expired challenges are purged either way.
    pub async fn take_challenge(
        &self,
        token_digest: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredChallenge>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT challenges.id, challenges.user_id, challenges.otp, challenges.expire
             FROM challenges
             JOIN users ON users.id = challenges.user_id
             WHERE challenges.token = ? AND users.username = ? AND challenges.expire > ?",
        )
        .bind(token_digest)
        .bind(username)
        .bind(now.timestamp())
        .fetch_optional(&mut *tx)
        .await?;

        let challenge = match row {
            Some(row) => {
                sqlx::query("DELETE FROM challenges WHERE token = ?")
                    .bind(token_digest)
                    .execute(&mut *tx)
                    .await?;
                let expire: i64 = row.get(3);
                Some(StoredChallenge {
                    challenge_id: ChallengeId(row.get::<i64, _>(0)),
                    user_id: UserId(row.get::<i64, _>(1)),
                    otp_digest: row.get::<String, _>(2),
                    expires_at: DateTime::from_timestamp(expire, 0).unwrap_or(now),
                })
            }
            None => None,
        };

        sqlx::query("DELETE FROM challenges WHERE expire < ?")
            .bind(now.timestamp())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(challenge)
    }

    pub async fn count_challenges(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM challenges")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> UserRecord {
    UserRecord {
        id: UserId(row.get::<i64, _>(0)),
        username: row.get::<String, _>(1),
        role: row.get::<String, _>(2),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
