use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use futures::{
    future::{BoxFuture, Shared, WeakShared},
    FutureExt,
};

use crate::{
    config::{ConfigLoader, ConfigTable},
    error::Error,
};

type Refresh = BoxFuture<'static, Result<Arc<ConfigTable>, Error>>;

#[derive(Debug, Clone)]
pub struct CachedConfig {
    pub table: Arc<ConfigTable>,
    pub loaded_at: Instant,
}

#[derive(Default)]
struct CacheState {
    cached: Option<CachedConfig>,
    /// Weak so that the refresh is dropped, and its request aborted, once
    /// every caller waiting on it has gone away.
    inflight: Option<WeakShared<Refresh>>,
}

struct Inner {
    loader: ConfigLoader,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(self: Arc<Self>) -> Result<Arc<ConfigTable>, Error> {
        let result = self.loader.load().await.map(Arc::new);

        let mut state = self.state();
        state.inflight = None;
        match &result {
            Ok(table) => {
                state.cached = Some(CachedConfig {
                    table: table.clone(),
                    loaded_at: Instant::now(),
                });
            }
            Err(e) => warn!("Config refresh failed: {}", e),
        }

        result
    }
}

/// TTL cache around [`ConfigLoader`] with single-flight refresh: callers that
/// arrive while a load is running wait for that load instead of starting
/// their own, and all of them get its result or its error.
#[derive(Clone)]
pub struct ConfigCache {
    inner: Arc<Inner>,
}

impl ConfigCache {
    pub fn new(loader: ConfigLoader, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                ttl,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub async fn get(&self) -> Result<Arc<ConfigTable>, Error> {
        let refresh: Shared<Refresh> = {
            let mut state = self.inner.state();

            if let Some(cached) = &state.cached {
                if cached.loaded_at.elapsed() < self.inner.ttl {
                    return Ok(cached.table.clone());
                }
            }

            match state.inflight.as_ref().and_then(WeakShared::upgrade) {
                Some(refresh) => refresh,
                None => {
                    let refresh = self.inner.clone().refresh().boxed().shared();
                    state.inflight = refresh.downgrade();
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Drops the cached table; the next `get` fetches a fresh one.
    pub fn invalidate(&self) {
        self.inner.state().cached = None;
    }

    pub fn cached(&self) -> Option<CachedConfig> {
        self.inner.state().cached.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::tests::get_test_html,
        options::Options,
        transport::mock::{ok, refused, MockTransport},
    };

    fn cache(transport: Arc<MockTransport>, ttl: Duration) -> ConfigCache {
        ConfigCache::new(ConfigLoader::new(transport, &Options::default()), ttl)
    }

    #[tokio::test]
    async fn single_flight() {
        let html = get_test_html("config_page.html");
        let transport = Arc::new(
            MockTransport::new()
                .with_latency(Duration::from_millis(50))
                .route("/AOPR/", vec![ok(&html)]),
        );
        let cache = cache(transport.clone(), Duration::from_secs(3600));

        let results = futures::future::join_all((0..8).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get().await })
        }))
        .await;

        for result in results {
            let table = result.expect("task panicked").expect("Could not get config");
            assert_eq!(table.keys[1], "ADK");
        }
        assert_eq!(transport.hits("/AOPR/"), 1);

        // Warm cache
        cache.get().await.expect("Could not get config");
        assert_eq!(transport.hits("/AOPR/"), 1);
    }

    #[tokio::test]
    async fn waiters_share_failure() {
        let transport = Arc::new(
            MockTransport::new()
                .with_latency(Duration::from_millis(50))
                .route("/AOPR/", vec![refused()]),
        );
        let cache = cache(transport.clone(), Duration::from_secs(3600));

        let (a, b) = tokio::join!(cache.get(), cache.get());
        assert!(matches!(a, Err(Error::ConfigFetch(_))));
        assert!(matches!(b, Err(Error::ConfigFetch(_))));
        assert_eq!(transport.hits("/AOPR/"), 1);

        // Failures are not cached
        assert!(cache.get().await.is_err());
        assert_eq!(transport.hits("/AOPR/"), 2);
    }

    #[tokio::test]
    async fn expiry_and_invalidate() {
        let html = get_test_html("config_page.html");
        let transport = Arc::new(MockTransport::new().route("/AOPR/", vec![ok(&html)]));

        let expired = cache(transport.clone(), Duration::ZERO);
        expired.get().await.expect("Could not get config");
        expired.get().await.expect("Could not get config");
        assert_eq!(transport.hits("/AOPR/"), 2);

        let fresh = cache(transport.clone(), Duration::from_secs(3600));
        fresh.get().await.expect("Could not get config");
        assert!(fresh.cached().is_some());
        fresh.invalidate();
        assert!(fresh.cached().is_none());
        fresh.get().await.expect("Could not get config");
        assert_eq!(transport.hits("/AOPR/"), 4);
    }

    #[tokio::test]
    async fn abandoned_refresh_is_dropped() {
        let html = get_test_html("config_page.html");
        let transport = Arc::new(
            MockTransport::new()
                .with_latency(Duration::from_millis(200))
                .route("/AOPR/", vec![ok(&html)]),
        );
        let cache = cache(transport.clone(), Duration::from_secs(3600));

        let abandoned = tokio::time::timeout(Duration::from_millis(10), cache.get()).await;
        assert!(abandoned.is_err());

        // A new caller starts over instead of waiting on a dead refresh
        cache.get().await.expect("Could not get config");
        assert_eq!(transport.requests().len(), 2);
    }
}
