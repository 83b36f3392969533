pub mod cache;

mod macros;

pub use cache::Cache;
pub use cache::CacheKey;
pub use cache::CacheWriterHandle;

use redis::Client;

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}
