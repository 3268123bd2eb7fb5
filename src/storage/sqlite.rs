use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::kv::KeyValueStore;
use super::schema::Database;
use super::types::StoreError;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn decode(row: Option<(String,)>) -> Result<Option<Value>, StoreError> {
    match row {
        Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl KeyValueStore for Database {
    // ========================================================================
    // Keyed values
    // ========================================================================

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM options WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        decode(row)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO options (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM options WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Transients
    // ========================================================================

    async fn get_transient(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM transients WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(now())
                .fetch_optional(&self.pool)
                .await?;
        decode(row)
    }

    async fn add_transient(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = now();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        // The upsert only overwrites an expired row, so exactly one caller
        // sees an affected row per live period.
        let result = sqlx::query(
            r#"
            INSERT INTO transients (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            WHERE transients.expires_at <= ?
        "#,
        )
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_transient(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM transients WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Objects
    // ========================================================================

    async fn create_object(&self) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO objects (created_at) VALUES (?)")
            .bind(now())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn delete_object(&self, object_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM object_meta WHERE object_id = ?")
            .bind(object_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_meta(&self, object_id: i64, name: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM object_meta WHERE object_id = ? AND name = ?")
                .bind(object_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        decode(row)
    }

    async fn set_meta(&self, object_id: i64, name: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO object_meta (object_id, name, value)
            VALUES (?, ?, ?)
            ON CONFLICT(object_id, name) DO UPDATE SET value = excluded.value
        "#,
        )
        .bind(object_id)
        .bind(name)
        .bind(serde_json::to_string(&value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_meta(&self, object_id: i64, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM object_meta WHERE object_id = ? AND name = ?")
            .bind(object_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{load, save};
    use serde_json::json;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = test_db().await;
        assert_eq!(db.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_upserts() {
        let db = test_db().await;
        db.set("register", json!({"a": 1})).await.unwrap();
        db.set("register", json!({"a": 2})).await.unwrap();
        assert_eq!(db.get("register").await.unwrap(), Some(json!({"a": 2})));

        db.delete("register").await.unwrap();
        assert_eq!(db.get("register").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let db = test_db().await;
        save(&db, "ids", &vec![3u32, 1, 2]).await.unwrap();
        let ids: Option<Vec<u32>> = load(&db, "ids").await.unwrap();
        assert_eq!(ids, Some(vec![3, 1, 2]));
    }

    #[tokio::test]
    async fn test_add_transient_exclusive() {
        let db = test_db().await;
        let ttl = Duration::from_secs(30);
        assert!(db.add_transient("lock", json!(true), ttl).await.unwrap());
        assert!(!db.add_transient("lock", json!(true), ttl).await.unwrap());
        assert_eq!(db.get_transient("lock").await.unwrap(), Some(json!(true)));

        db.delete_transient("lock").await.unwrap();
        assert_eq!(db.get_transient("lock").await.unwrap(), None);
        assert!(db.add_transient("lock", json!(true), ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_transient_is_replaced() {
        let db = test_db().await;
        sqlx::query("INSERT INTO transients (key, value, expires_at) VALUES ('lock', 'true', ?)")
            .bind(now() - 10)
            .execute(&db.pool)
            .await
            .unwrap();

        assert_eq!(db.get_transient("lock").await.unwrap(), None);
        assert!(db
            .add_transient("lock", json!(false), Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(db.get_transient("lock").await.unwrap(), Some(json!(false)));
    }

    #[tokio::test]
    async fn test_object_meta() {
        let db = test_db().await;
        let id = db.create_object().await.unwrap();
        assert!(id > 0);

        db.set_meta(id, "feed_data", json!({"title": "Show"}))
            .await
            .unwrap();
        db.set_meta(id, "last_checked", json!(42)).await.unwrap();
        assert_eq!(
            db.get_meta(id, "feed_data").await.unwrap(),
            Some(json!({"title": "Show"}))
        );

        db.delete_meta(id, "feed_data").await.unwrap();
        assert_eq!(db.get_meta(id, "feed_data").await.unwrap(), None);

        db.delete_object(id).await.unwrap();
        assert_eq!(db.get_meta(id, "last_checked").await.unwrap(), None);
    }
}
