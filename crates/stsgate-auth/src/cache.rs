//! Process-wide cache of the issuer's key set.

use std::sync::Arc;
use std::time::{Duration, Instant};
use stsgate_core::Result;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::jwks::{KeySet, KeySource};

struct CachedKeySet {
    keys: Arc<KeySet>,
    fetch_started_at: Instant,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn is_fresh(&self, ttl: Duration) -> bool {
        !ttl.is_zero() && self.fetched_at.elapsed() < ttl
    }
}

/// Caches the most recent key set and refreshes it on demand.
///
/// The cached set is swapped as a whole behind an `Arc`, so readers hold
/// either the previous complete set or the new one. Refreshes are
/// serialized; a caller that waited on another caller's refresh reuses its
/// result when that fetch started after the caller asked.
pub struct KeySetCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    serve_stale_on_error: bool,
    current: RwLock<Option<Arc<CachedKeySet>>>,
    refresh: Mutex<()>,
}

impl KeySetCache {
    /// A zero `ttl` refreshes on every call.
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            serve_stale_on_error: false,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Serve the last good key set when a refresh fails.
    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The current key set, fetching a new one if the cached set is missing
    /// or older than the TTL.
    pub async fn get(&self) -> Result<Arc<KeySet>> {
        let requested_at = Instant::now();

        if let Some(cached) = self.snapshot().await {
            if cached.is_fresh(self.ttl) {
                return Ok(Arc::clone(&cached.keys));
            }
        }

        let _refresh = self.refresh.lock().await;

        let previous = self.snapshot().await;
        if let Some(cached) = &previous {
            if cached.fetch_started_at >= requested_at || cached.is_fresh(self.ttl) {
                debug!("Reusing key set fetched while waiting");
                return Ok(Arc::clone(&cached.keys));
            }
        }

        let fetch_started_at = Instant::now();
        match self.source.fetch().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                let entry = Arc::new(CachedKeySet {
                    keys: Arc::clone(&keys),
                    fetch_started_at,
                    fetched_at: Instant::now(),
                });
                *self.current.write().await = Some(entry);
                Ok(keys)
            }
            Err(err) => match previous {
                Some(stale) if self.serve_stale_on_error => {
                    warn!(
                        source = %self.source.describe(),
                        error = %err,
                        age_secs = stale.fetched_at.elapsed().as_secs(),
                        "Key set refresh failed, serving stale key set"
                    );
                    Ok(Arc::clone(&stale.keys))
                }
                _ => {
                    warn!(source = %self.source.describe(), error = %err, "Key set refresh failed");
                    Err(err)
                }
            },
        }
    }

    /// The cached key set without refreshing it.
    pub async fn cached(&self) -> Option<Arc<KeySet>> {
        self.snapshot().await.map(|cached| Arc::clone(&cached.keys))
    }

    async fn snapshot(&self) -> Option<Arc<CachedKeySet>> {
        self.current.read().await.clone()
    }
}
