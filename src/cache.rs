//! Best-effort cache: query results, permissions, search history and
//! hot-query statistics
//!
//! SQLite-backed with TTL semantics. Every operation is best-effort: a
//! failure returns `None` / `false` / empty and logs a warning, so
//! callers always tolerate misses.

use crate::config::CacheConfig;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Cached answer for one query fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sources: Value,
}

/// One hot-query entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotQuery {
    pub query: String,
    pub count: i64,
}

/// Cache diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub enabled: bool,
    pub total_entries: i64,
    pub hot_queries: i64,
    pub history_entries: i64,
}

/// Fingerprint of a normalized query, used as the cache key
pub fn query_fingerprint(query: &str) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{:x}", md5::compute(normalized.as_bytes()))
}

/// Semantic cache operations shared across the engine
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cached_query_result(&self, query: &str) -> Option<CachedAnswer>;

    async fn cache_query_result(
        &self,
        query: &str,
        result: &CachedAnswer,
        ttl_seconds: Option<i64>,
    ) -> bool;

    async fn cache_user_permissions(&self, user_id: &str, permissions: &[String]) -> bool;

    async fn get_user_permissions(&self, user_id: &str) -> Option<Vec<String>>;

    async fn add_search_history(&self, user_id: &str, query: &str) -> bool;

    async fn get_search_history(&self, user_id: &str, limit: usize) -> Vec<String>;

    async fn increment_hot_query(&self, query: &str) -> i64;

    async fn get_hot_queries(&self, limit: usize) -> Vec<HotQuery>;

    async fn cache_document_metadata(&self, doc_id: &str, metadata: &Value) -> bool;

    async fn get_document_metadata(&self, doc_id: &str) -> Option<Value>;

    async fn delete(&self, key: &str) -> bool;

    /// Delete every key matching a `*` glob pattern; returns the count
    async fn delete_pattern(&self, pattern: &str) -> u64;

    async fn get_info(&self) -> CacheInfo;

    async fn ping(&self) -> bool;
}

/// SQLite-backed cache store
pub struct SqliteCacheStore {
    pool: SqlitePool,
    config: CacheConfig,
}

impl SqliteCacheStore {
    /// Create the cache store, creating tables if missing
    pub async fn new(config: CacheConfig) -> anyhow::Result<Self> {
        info!("Initializing cache store at: {}", config.db_path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db_path))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                query TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hot_queries (
                query TEXT PRIMARY KEY,
                count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_user ON search_history(user_id, id)",
        )
        .execute(&pool)
        .await?;

        info!("Cache store initialized");
        Ok(Self { pool, config })
    }

    async fn set_value(&self, key: &str, value: &str, ttl_seconds: i64) -> bool {
        let expires_at = (Utc::now() + Duration::seconds(ttl_seconds)).to_rfc3339();
        let result = sqlx::query(
            "INSERT OR REPLACE INTO kv_cache (key, value, expires_at) VALUES (?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Cache set failed for {}: {}", key, e);
                false
            }
        }
    }

    async fn get_value(&self, key: &str) -> Option<String> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| warn!("Cache get failed for {}: {}", key, e))
            .ok()??;

        let expires_at: Option<String> = row.get("expires_at");
        if let Some(expires_at) = expires_at {
            if let Ok(expiry) = chrono::DateTime::parse_from_rfc3339(&expires_at) {
                if expiry.with_timezone(&Utc) < Utc::now() {
                    debug!("Cache entry expired: {}", key);
                    let _ = sqlx::query("DELETE FROM kv_cache WHERE key = ?")
                        .bind(key)
                        .execute(&self.pool)
                        .await;
                    return None;
                }
            }
        }

        Some(row.get("value"))
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get_cached_query_result(&self, query: &str) -> Option<CachedAnswer> {
        if !self.config.enabled {
            return None;
        }
        let key = format!("query_result:{}", query_fingerprint(query));
        let value = self.get_value(&key).await?;
        match serde_json::from_str(&value) {
            Ok(answer) => {
                debug!("Query cache hit");
                Some(answer)
            }
            Err(e) => {
                warn!("Cached query result did not parse: {}", e);
                None
            }
        }
    }

    async fn cache_query_result(
        &self,
        query: &str,
        result: &CachedAnswer,
        ttl_seconds: Option<i64>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = format!("query_result:{}", query_fingerprint(query));
        let ttl = ttl_seconds.unwrap_or(self.config.query_ttl_seconds);
        match serde_json::to_string(result) {
            Ok(value) => self.set_value(&key, &value, ttl).await,
            Err(e) => {
                warn!("Query result did not serialize: {}", e);
                false
            }
        }
    }

    async fn cache_user_permissions(&self, user_id: &str, permissions: &[String]) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = format!("user_perm:{}", user_id);
        match serde_json::to_string(permissions) {
            Ok(value) => {
                self.set_value(&key, &value, self.config.permission_ttl_seconds)
                    .await
            }
            Err(_) => false,
        }
    }

    async fn get_user_permissions(&self, user_id: &str) -> Option<Vec<String>> {
        if !self.config.enabled {
            return None;
        }
        let key = format!("user_perm:{}", user_id);
        let value = self.get_value(&key).await?;
        serde_json::from_str(&value).ok()
    }

    async fn add_search_history(&self, user_id: &str, query: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        let insert = sqlx::query(
            "INSERT INTO search_history (user_id, query, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(query)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;
        if let Err(e) = insert {
            warn!("Search history insert failed: {}", e);
            return false;
        }

        // Cap per-user history length and expire entries after 30 days
        let _ = sqlx::query(
            r#"
            DELETE FROM search_history
            WHERE user_id = ?1
              AND id NOT IN (
                  SELECT id FROM search_history
                  WHERE user_id = ?1
                  ORDER BY id DESC LIMIT ?2
              )
            "#,
        )
        .bind(user_id)
        .bind(self.config.max_search_history as i64)
        .execute(&self.pool)
        .await;

        let cutoff = (Utc::now() - Duration::days(30)).to_rfc3339();
        let _ = sqlx::query("DELETE FROM search_history WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await;

        true
    }

    async fn get_search_history(&self, user_id: &str, limit: usize) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        let rows = sqlx::query(
            "SELECT query FROM search_history WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows.into_iter().map(|r| r.get("query")).collect(),
            Err(e) => {
                warn!("Search history fetch failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn increment_hot_query(&self, query: &str) -> i64 {
        if !self.config.enabled {
            return 0;
        }
        let result = sqlx::query(
            r#"
            INSERT INTO hot_queries (query, count) VALUES (?, 1)
            ON CONFLICT(query) DO UPDATE SET count = count + 1
            "#,
        )
        .bind(query)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            warn!("Hot query increment failed: {}", e);
            return 0;
        }

        sqlx::query("SELECT count FROM hot_queries WHERE query = ?")
            .bind(query)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .map(|r| r.get::<i64, _>("count"))
            .unwrap_or(0)
    }

    async fn get_hot_queries(&self, limit: usize) -> Vec<HotQuery> {
        let rows = sqlx::query(
            "SELECT query, count FROM hot_queries ORDER BY count DESC, query ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|r| HotQuery {
                    query: r.get("query"),
                    count: r.get("count"),
                })
                .collect(),
            Err(e) => {
                warn!("Hot queries fetch failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn cache_document_metadata(&self, doc_id: &str, metadata: &Value) -> bool {
        if !self.config.enabled {
            return false;
        }
        let key = format!("doc_meta:{}", doc_id);
        self.set_value(&key, &metadata.to_string(), 3600).await
    }

    async fn get_document_metadata(&self, doc_id: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }
        let key = format!("doc_meta:{}", doc_id);
        let value = self.get_value(&key).await?;
        serde_json::from_str(&value).ok()
    }

    async fn delete(&self, key: &str) -> bool {
        sqlx::query("DELETE FROM kv_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .unwrap_or_else(|e| {
                warn!("Cache delete failed: {}", e);
                false
            })
    }

    async fn delete_pattern(&self, pattern: &str) -> u64 {
        let like = pattern.replace('*', "%");
        sqlx::query("DELETE FROM kv_cache WHERE key LIKE ?")
            .bind(like)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .unwrap_or_else(|e| {
                warn!("Cache pattern delete failed: {}", e);
                0
            })
    }

    async fn get_info(&self) -> CacheInfo {
        let count = |query: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query(query)
                    .fetch_one(&pool)
                    .await
                    .map(|r| r.get::<i64, _>(0))
                    .unwrap_or(0)
            }
        };

        CacheInfo {
            enabled: self.config.enabled,
            total_entries: count("SELECT COUNT(*) FROM kv_cache").await,
            hot_queries: count("SELECT COUNT(*) FROM hot_queries").await,
            history_entries: count("SELECT COUNT(*) FROM search_history").await,
        }
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
