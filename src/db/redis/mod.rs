pub mod cache;

pub use self::cache::create_redis_client;
pub use self::cache::CacheKey;
pub use self::cache::RecommendationCache;
