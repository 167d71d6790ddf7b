use async_trait::async_trait;
use chrono::Utc;
use sqlx::prelude::FromRow;

use crate::error::{Error, Result};
use crate::model::User;
use crate::store::{PgStore, UserStore, UserUpdate};

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
    verified: bool,
    register_time: chrono::DateTime<Utc>,
    login_time: Option<chrono::DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            verified: row.verified,
            register_time: row.register_time,
            login_time: row.login_time,
        }
    }
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, verified, register_time, login_time";

/// Turns a unique-constraint violation into the Conflict error kind the
/// admission layer maps to a 400.
fn map_unique_violation(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        let message = match db_err.constraint() {
            Some(name) if name.contains("email") => "Email already exists",
            _ => "Username already exists",
        };
        return Error::Conflict(message.to_string());
    }

    Error::Database(err)
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, name: &str, email: &str, password_hash: &str) -> Result<User> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS};
            "#
        ))
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(row.into())
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1;"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE name = $1;"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1;"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET
              name = COALESCE($2, name),
              email = COALESCE($3, email),
              password_hash = COALESCE($4, password_hash)
            WHERE id = $1
            RETURNING {USER_COLUMNS};
            "#
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.email)
        .bind(update.password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        row.map(Into::into).ok_or(Error::NotFound)
    }

    async fn touch_login(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET login_time = $2 WHERE id = $1;")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1;")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
