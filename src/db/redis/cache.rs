use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;

use crate::error::AppResult;
use crate::models::{ActorKey, RecommendationRecord};
use crate::services::recommendations::RecommendationStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Recommendations(ActorKey),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Recommendations(actor_key) => write!(f, "reco:{}", actor_key),
        }
    }
}

/// Creates a Redis client for the recommendation records
///
/// Connections are opened lazily per operation, so Redis being down at startup only
/// delays the first write.
pub fn create_redis_client(redis_url: &str) -> AppResult<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Recommendation records stored as JSON strings, one key per actor.
///
/// `SET` and `DEL` are single-key atomic commands, which gives the full-replace and
/// delete semantics the storefront relies on.
#[derive(Clone)]
pub struct RecommendationCache {
    redis_client: Client,
}

impl RecommendationCache {
    pub fn new(redis_client: Client) -> Self {
        Self { redis_client }
    }
}

#[async_trait::async_trait]
impl RecommendationStore for RecommendationCache {
    async fn put(&self, record: &RecommendationRecord) -> AppResult<()> {
        let key = CacheKey::Recommendations(record.actor_key.clone());
        let json = serde_json::to_string(record)?;

        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(format!("{}", key), json).await?;

        tracing::debug!(key = %key, items = record.item_ids.len(), "Stored recommendations");
        Ok(())
    }

    async fn delete(&self, actor_key: &ActorKey) -> AppResult<()> {
        let key = CacheKey::Recommendations(actor_key.clone());

        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let removed: i64 = conn.del(format!("{}", key)).await?;

        if removed > 0 {
            tracing::debug!(key = %key, "Removed stale recommendations");
        }
        Ok(())
    }

    async fn get(&self, actor_key: &ActorKey) -> AppResult<Option<RecommendationRecord>> {
        let key = CacheKey::Recommendations(actor_key.clone());

        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(format!("{}", key)).await?;

        match cached {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_cache() -> RecommendationCache {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RecommendationCache::new(create_redis_client(&redis_url).unwrap())
    }

    #[test]
    fn test_cache_key_display_session() {
        let key = CacheKey::Recommendations(ActorKey::from("a1b2c3"));
        assert_eq!(format!("{}", key), "reco:a1b2c3");
    }

    #[test]
    fn test_cache_key_display_user() {
        let key = CacheKey::Recommendations(ActorKey::resolve(None, Some("42")));
        assert_eq!(format!("{}", key), "reco:user:42");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(create_redis_client("not-a-redis-url").is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_put_replaces_whole_record() {
        let cache = create_test_cache();
        let actor = ActorKey::from("redis-test-replace");

        let first = RecommendationRecord::new(actor.clone(), vec!["1".into(), "2".into()], Utc::now());
        let second = RecommendationRecord::new(actor.clone(), vec!["3".into()], Utc::now());
        cache.put(&first).await.unwrap();
        cache.put(&second).await.unwrap();

        let stored = cache.get(&actor).await.unwrap().unwrap();
        assert_eq!(stored, second);

        cache.delete(&actor).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_delete_missing_key_is_ok() {
        let cache = create_test_cache();
        let actor = ActorKey::from("redis-test-never-written");

        cache.delete(&actor).await.unwrap();
        assert_eq!(cache.get(&actor).await.unwrap(), None);
    }
}
