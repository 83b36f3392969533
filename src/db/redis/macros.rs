/// Read-through caching for optional Redis caches.
///
/// Looks the key up when a cache is configured and returns the cached value on
/// a hit. On a miss, or when the cache cannot be reached, the block is awaited
/// and a successful result is written back in the background. Cache errors are
/// logged and never fail the request.
///
/// # Arguments
/// * `$cache`: an `Option<Cache>` (or a reference to one)
/// * `$key`: the `CacheKey` to read and write
/// * `$ttl`: time-to-live in seconds for the written value
/// * `$block`: a future producing `AppResult<T>`
/// * `$keep` (optional, after `if`): a predicate on `&T`; values it rejects are
///   returned but not written back
///
/// # Example
/// ```rust,ignore
/// let ranked = cached!(self.cache, CacheKey::Trending { limit }, 60, async {
///     self.compute_trending(limit).await
/// });
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {
        $crate::cached!($cache, $key, $ttl, $block, if |_| true)
    };
    ($cache:expr, $key:expr, $ttl:expr, $block:expr, if $keep:expr) => {{
        let key = $key;
        let mut hit = None;

        if let Some(cache) = $cache.as_ref() {
            match cache.get_from_cache(&key).await {
                Ok(found) => hit = found,
                Err(e) => tracing::warn!(error = %e, key = %key, "Cache read failed, bypassing"),
            }
        }

        match hit {
            Some(value) => Ok(value),
            None => {
                let result = $block.await;
                if let (Some(cache), Ok(value)) = ($cache.as_ref(), &result) {
                    if ($keep)(value) {
                        cache.set_in_background(&key, value, $ttl);
                    }
                }
                result
            }
        }
    }};
}
