use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::prelude::FromRow;

use crate::error::Result;
use crate::model::ApiKey;
use crate::store::{ApiKeyStore, PgStore};

#[derive(Debug, FromRow)]
struct ApiKeyRow {
    id: i64,
    user_id: i64,
    name: String,
    prefix: String,
    key_hash: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            prefix: row.prefix,
            key_hash: row.key_hash,
            created_at: row.created_at,
            expires_at: row.expires_at,
            is_active: row.is_active,
        }
    }
}

const API_KEY_COLUMNS: &str =
    "id, user_id, name, prefix, key_hash, created_at, expires_at, is_active";

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn insert_api_key(
        &self,
        user_id: i64,
        name: &str,
        prefix: &str,
        key_hash: &str,
    ) -> Result<ApiKey> {
        let row: ApiKeyRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO api_keys (user_id, name, prefix, key_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {API_KEY_COLUMNS};
            "#
        ))
        .bind(user_id)
        .bind(name)
        .bind(prefix)
        .bind(key_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn api_keys_for_user(&self, user_id: i64) -> Result<Vec<ApiKey>> {
        let rows: Vec<ApiKeyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {API_KEY_COLUMNS}
            FROM api_keys
            WHERE user_id = $1 AND is_active = TRUE
            ORDER BY id;
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<ApiKey>> {
        let rows: Vec<ApiKeyRow> = sqlx::query_as(&format!(
            r#"
            SELECT {API_KEY_COLUMNS}
            FROM api_keys
            WHERE prefix = $1 AND is_active = TRUE;
            "#
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn revoke_api_key(&self, id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE api_keys
            SET is_active = FALSE
            WHERE id = $1 AND user_id = $2 AND is_active = TRUE;
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
