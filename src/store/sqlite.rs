use std::str::FromStr as _;

use tracing::error;

use crate::store::KeyValueStore;

pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)
            .inspect_err(|error| error!(%error, %url, "Failed to parse store url"))?
            .create_if_missing(true);
        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .inspect_err(|error| error!(%error, %url, "Failed to open store db"))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv(
                key TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )
        .execute(&pool)
        .await
        .inspect_err(|error| error!(%error, %url, "Failed to execute DDL to store db"))?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

impl KeyValueStore for SqliteStore {
    type Error = sqlx::Error;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        sqlx::query_scalar::<_, String>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO kv(key, value)
            VALUES (?, ?)
            ON CONFLICT(key)
            DO UPDATE SET
                value = EXCLUDED.value
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
