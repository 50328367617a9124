//! Single-flight OAuth2 token cache with a 60s safety margin (spec §4.5,
//! §5 "Token caches inside the list backend adapter are per-connection and
//! guarded against concurrent refresh"). Grounded on the
//! single-`Mutex`-guarded-refresh shape used throughout pgdog's connection
//! pool (`parking_lot::Mutex` + async re-check after acquiring the lock).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::Result;

const SAFETY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Fetches and caches a bearer token, refreshing at most once across
/// concurrent callers (single-flight via the async mutex itself: callers
/// simply block on the same lock rather than racing independent refreshes).
pub struct TokenCache<F> {
    fetch: F,
    state: Arc<Mutex<Option<CachedToken>>>,
}

impl<F, Fut> TokenCache<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(String, Duration)>> + Send,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a valid token, refreshing if absent or within the safety
    /// margin of expiry.
    pub async fn get(&self) -> Result<String> {
        let mut guard = self.state.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() + SAFETY_MARGIN {
                return Ok(cached.value.clone());
            }
        }
        let (value, ttl) = (self.fetch)().await?;
        let expires_at = Instant::now() + ttl;
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }
}
