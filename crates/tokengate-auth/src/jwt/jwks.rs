//! Signing key resolution from a JSON Web Key Set
//!
//! [`KeyResolver`] answers "which public key has this `kid`?":
//!
//! - **Per-kid cache**: resolved keys are cached with a TTL and a size bound
//! - **Single flight**: concurrent misses for the same `kid` share one fetch
//! - **Rate limiting**: outbound fetches share a global [`FetchRateLimiter`]
//! - **Timeout**: one deadline covers waiting for an in-flight fetch and the
//!   fetch itself; expiry is a resolution failure
//!
//! Fetching itself sits behind [`KeySetSource`] so the resolver can be driven
//! by the HTTP endpoint in production and by fixtures in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, PublicKeyUse};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::AuthorizerConfig;
use crate::error::KeyResolutionError;
use crate::rate_limit::FetchRateLimiter;

/// Largest key-set document accepted
const MAX_KEY_SET_BYTES: usize = 64 * 1024;

/// Where key sets come from
#[async_trait]
pub trait KeySetSource: Send + Sync + std::fmt::Debug {
    /// Fetch the current key set
    ///
    /// Keys that cannot be parsed are skipped rather than failing the whole set.
    async fn fetch(&self) -> Result<Vec<Jwk>, KeyResolutionError>;

    /// Human-readable location, for logs
    fn location(&self) -> &str;
}

/// Key set served over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    jwks_uri: Url,
    client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Create a source for `jwks_uri` whose requests time out after `timeout`
    ///
    /// Redirects are not followed.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(jwks_uri: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(format!("tokengate/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { jwks_uri, client })
    }

    /// The key-set endpoint
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<Vec<Jwk>, KeyResolutionError> {
        info!(jwks_uri = %self.jwks_uri, "Fetching key set");

        let response = self
            .client
            .get(self.jwks_uri.clone())
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %self.jwks_uri, error = %e, "Key-set request failed");
                KeyResolutionError::Unreachable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %self.jwks_uri, status = %status, "Key-set endpoint returned error status");
            return Err(KeyResolutionError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length()
            && length > MAX_KEY_SET_BYTES as u64
        {
            return Err(KeyResolutionError::InvalidDocument(format!(
                "document of {length} bytes exceeds limit"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to read key-set body");
            KeyResolutionError::Unreachable(e.to_string())
        })?;
        if body.len() > MAX_KEY_SET_BYTES {
            return Err(KeyResolutionError::InvalidDocument(
                "document exceeds size limit".to_string(),
            ));
        }

        let keys = parse_key_set(&body)?;
        info!(jwks_uri = %self.jwks_uri, key_count = keys.len(), "Fetched key set");
        Ok(keys)
    }

    fn location(&self) -> &str {
        self.jwks_uri.as_str()
    }
}

#[derive(Deserialize)]
struct KeySetDocument {
    keys: Vec<serde_json::Value>,
}

/// Parse a published-keys document, skipping keys that do not parse
///
/// # Errors
///
/// Returns [`KeyResolutionError::InvalidDocument`] if the body is not a JSON
/// object with a `keys` array.
pub fn parse_key_set(body: &[u8]) -> Result<Vec<Jwk>, KeyResolutionError> {
    let document: KeySetDocument = serde_json::from_slice(body)
        .map_err(|e| KeyResolutionError::InvalidDocument(e.to_string()))?;

    Ok(document
        .keys
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Jwk>(raw) {
            Ok(jwk) => Some(jwk),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable key in key set");
                None
            }
        })
        .collect())
}

#[derive(Debug, Clone)]
struct CachedKey {
    jwk: Arc<Jwk>,
    cached_at: Instant,
}

/// Per-kid single-flight slot
///
/// Holds the outcome of the last failed fetch so tasks that queued behind it
/// fail with it instead of fetching again.
#[derive(Debug, Default)]
struct FetchGate {
    last_failure: Option<(Instant, KeyResolutionError)>,
}

/// Resolves `kid`s to public keys with caching, single-flight fetches,
/// rate limiting and a timeout
#[derive(Debug)]
pub struct KeyResolver {
    source: Arc<dyn KeySetSource>,
    keys: DashMap<String, CachedKey>,
    fetch_gates: DashMap<String, Arc<Mutex<FetchGate>>>,
    limiter: FetchRateLimiter,
    cache_ttl: Duration,
    max_cached_keys: usize,
    fetch_timeout: Duration,
    fetches: AtomicU64,
}

impl KeyResolver {
    /// Create a resolver over `source`, tuned by `config`
    pub fn new(source: Arc<dyn KeySetSource>, config: &AuthorizerConfig) -> Self {
        Self {
            source,
            keys: DashMap::new(),
            fetch_gates: DashMap::new(),
            limiter: FetchRateLimiter::new(config.jwks_requests_per_window, config.jwks_rate_window),
            cache_ttl: config.cache_ttl,
            max_cached_keys: config.max_cached_keys,
            fetch_timeout: config.fetch_timeout,
            fetches: AtomicU64::new(0),
        }
    }

    /// Replace the fetch limiter
    #[must_use]
    pub fn with_limiter(mut self, limiter: FetchRateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Resolve the public key for `kid`
    ///
    /// # Errors
    ///
    /// Returns [`KeyResolutionError`] if the key is not cached and cannot be
    /// fetched, is absent from the fetched set, or cannot verify signatures.
    /// A miss fails with [`KeyResolutionError::Timeout`] once `fetch_timeout`
    /// has elapsed since the call, however many callers are queued on the kid.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<Jwk>, KeyResolutionError> {
        if let Some(jwk) = self.cached(kid) {
            debug!(kid, "Signing key served from cache");
            return Ok(jwk);
        }

        let arrived = Instant::now();
        let deadline = tokio::time::Instant::from_std(arrived) + self.fetch_timeout;

        let gate = self
            .fetch_gates
            .entry(kid.to_string())
            .or_default()
            .clone();

        let result = self.resolve_in_flight(kid, &gate, arrived, deadline).await;

        // Map entry plus our clone: nobody else is waiting on this gate
        self.fetch_gates
            .remove_if(kid, |_, g| Arc::strong_count(g) <= 2);

        result
    }

    async fn resolve_in_flight(
        &self,
        kid: &str,
        gate: &Mutex<FetchGate>,
        arrived: Instant,
        deadline: tokio::time::Instant,
    ) -> Result<Arc<Jwk>, KeyResolutionError> {
        let Ok(mut flight) = tokio::time::timeout_at(deadline, gate.lock()).await else {
            return Err(self.timed_out(kid));
        };

        // Another task may have populated the cache while we waited
        if let Some(jwk) = self.cached(kid) {
            debug!(kid, "Signing key populated by concurrent fetch");
            return Ok(jwk);
        }
        if let Some((failed_at, error)) = &flight.last_failure
            && *failed_at >= arrived
        {
            debug!(kid, reason = error.reason(), "Sharing failure of concurrent fetch");
            return Err(error.clone());
        }

        let result = self.fetch_and_cache(kid, deadline).await;
        if let Err(error) = &result {
            flight.last_failure = Some((Instant::now(), error.clone()));
        }
        result
    }

    fn timed_out(&self, kid: &str) -> KeyResolutionError {
        error!(
            kid,
            jwks = self.source.location(),
            timeout_ms = self.fetch_timeout.as_millis() as u64,
            "Key-set fetch timed out"
        );
        KeyResolutionError::Timeout(self.fetch_timeout)
    }

    async fn fetch_and_cache(
        &self,
        kid: &str,
        deadline: tokio::time::Instant,
    ) -> Result<Arc<Jwk>, KeyResolutionError> {
        self.limiter.check().await.map_err(|info| {
            warn!(kid, jwks = self.source.location(), "Key-set fetch rate limited");
            KeyResolutionError::RateLimited(info)
        })?;

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let keys = match tokio::time::timeout_at(deadline, self.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out(kid)),
        };

        let now = Instant::now();
        let mut wanted = None;
        for jwk in keys {
            let Some(id) = jwk.common.key_id.clone().filter(|id| !id.is_empty()) else {
                continue;
            };

            if let Err(reason) = check_usable(&jwk) {
                if id == kid {
                    wanted = Some(Err(KeyResolutionError::UnusableKey {
                        kid: id,
                        reason: reason.to_string(),
                    }));
                }
                continue;
            }

            let jwk = Arc::new(jwk);
            if id == kid {
                wanted = Some(Ok(Arc::clone(&jwk)));
            }
            self.keys.insert(id, CachedKey { jwk, cached_at: now });
        }
        self.evict_overflow(kid);

        wanted.unwrap_or_else(|| {
            warn!(kid, jwks = self.source.location(), "Key id not present in key set");
            Err(KeyResolutionError::UnknownKeyId(kid.to_string()))
        })
    }

    fn cached(&self, kid: &str) -> Option<Arc<Jwk>> {
        self.keys
            .get(kid)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| Arc::clone(&entry.jwk))
    }

    /// Drop expired keys, then the oldest ones until the bound holds
    ///
    /// `keep` is the kid being resolved; it is never evicted.
    fn evict_overflow(&self, keep: &str) {
        let ttl = self.cache_ttl;
        self.keys.retain(|_, entry| entry.cached_at.elapsed() < ttl);

        while self.keys.len() > self.max_cached_keys {
            let oldest = self
                .keys
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.cached_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(kid) => {
                    self.keys.remove(&kid);
                }
                None => break,
            }
        }
    }

    /// Number of outbound fetches attempted so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of keys currently cached (including expired, not yet evicted)
    pub fn cached_key_count(&self) -> usize {
        self.keys.len()
    }

    /// Drop every cached key
    pub fn clear(&self) {
        self.keys.clear();
        debug!(jwks = self.source.location(), "Key cache cleared");
    }
}

fn check_usable(jwk: &Jwk) -> Result<(), &'static str> {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return Err("key is published for encryption");
    }
    if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
        return Err("symmetric keys are not accepted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const JWKS: &str = include_str!("../../tests/fixtures/jwks.json");

    /// Serves the fixture key set, optionally slowly, counting calls
    #[derive(Debug, Default)]
    struct FixtureSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl KeySetSource for FixtureSource {
        async fn fetch(&self) -> Result<Vec<Jwk>, KeyResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            parse_key_set(JWKS.as_bytes())
        }

        fn location(&self) -> &str {
            "fixture"
        }
    }

    /// Publishes the fixture key under several extra kids
    #[derive(Debug, Default)]
    struct RotatedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeySetSource for RotatedSource {
        async fn fetch(&self) -> Result<Vec<Jwk>, KeyResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut document: serde_json::Value = serde_json::from_str(JWKS).unwrap();
            let template = document["keys"][0].clone();
            let keys = document["keys"].as_array_mut().unwrap();
            for kid in ["k1", "k2", "k3"] {
                let mut key = template.clone();
                key["kid"] = serde_json::Value::from(kid);
                keys.push(key);
            }
            parse_key_set(document.to_string().as_bytes())
        }

        fn location(&self) -> &str {
            "rotated"
        }
    }

    fn config() -> AuthorizerConfig {
        AuthorizerConfig::new("https://tenant.auth0.com/.well-known/jwks.json", "aud", "iss")
            .unwrap()
    }

    #[test]
    fn parses_fixture_and_skips_garbage() {
        let keys = parse_key_set(JWKS.as_bytes()).unwrap();
        assert!(keys.iter().any(|k| k.common.key_id.as_deref() == Some("abc")));

        let keys = parse_key_set(br#"{"keys":[{"kty":"nope"}]}"#).unwrap();
        assert!(keys.is_empty());

        assert!(matches!(
            parse_key_set(b"not json"),
            Err(KeyResolutionError::InvalidDocument(_))
        ));
    }

    #[tokio::test]
    async fn caches_after_first_fetch() {
        let source = Arc::new(FixtureSource::default());
        let resolver = KeyResolver::new(source.clone(), &config());

        resolver.resolve("abc").await.unwrap();
        resolver.resolve("abc").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(FixtureSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let resolver = Arc::new(KeyResolver::new(source.clone(), &config()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve("abc").await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_and_unusable_keys() {
        let resolver = KeyResolver::new(Arc::new(FixtureSource::default()), &config());

        assert!(matches!(
            resolver.resolve("missing").await,
            Err(KeyResolutionError::UnknownKeyId(_))
        ));
        assert!(matches!(
            resolver.resolve("enc-only").await,
            Err(KeyResolutionError::UnusableKey { .. })
        ));
        assert!(matches!(
            resolver.resolve("shared-secret").await,
            Err(KeyResolutionError::UnusableKey { .. })
        ));
    }

    #[tokio::test]
    async fn rate_limit_bounds_fetches() {
        let source = Arc::new(FixtureSource::default());
        let resolver = KeyResolver::new(source.clone(), &config())
            .with_limiter(FetchRateLimiter::new(2, Duration::from_secs(60)));

        for _ in 0..2 {
            assert!(resolver.resolve("missing").await.is_err());
        }
        assert!(matches!(
            resolver.resolve("missing").await,
            Err(KeyResolutionError::RateLimited(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // Cached keys are still served
        assert!(resolver.resolve("abc").await.is_ok());
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let source = Arc::new(FixtureSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(10),
        });
        let resolver = KeyResolver::new(
            source,
            &config().with_fetch_timeout(Duration::from_millis(50)),
        );

        let started = Instant::now();
        assert!(matches!(
            resolver.resolve("abc").await,
            Err(KeyResolutionError::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn queued_callers_fail_within_one_timeout() {
        let source = Arc::new(FixtureSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(30),
        });
        let resolver = Arc::new(KeyResolver::new(
            source.clone(),
            &config().with_fetch_timeout(Duration::from_millis(200)),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = resolver.resolve("abc").await;
                    (result, started.elapsed())
                })
            })
            .collect();

        for task in tasks {
            let (result, elapsed) = task.await.unwrap();
            assert!(matches!(result, Err(KeyResolutionError::Timeout(_))));
            assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_callers_retry_after_failure() {
        let source = Arc::new(FixtureSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(30),
        });
        let resolver = KeyResolver::new(
            source.clone(),
            &config().with_fetch_timeout(Duration::from_millis(20)),
        );

        assert!(resolver.resolve("abc").await.is_err());
        assert!(resolver.resolve("abc").await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let source = Arc::new(FixtureSource::default());
        let resolver = KeyResolver::new(
            source.clone(),
            &config().with_cache_ttl(Duration::from_millis(20)),
        );

        resolver.resolve("abc").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        resolver.resolve("abc").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cache_is_bounded() {
        let resolver = KeyResolver::new(
            Arc::new(FixtureSource::default()),
            &config().with_max_cached_keys(1),
        );

        resolver.resolve("abc").await.unwrap();
        assert!(resolver.cached_key_count() <= 1);

        resolver.clear();
        assert_eq!(resolver.cached_key_count(), 0);
    }

    #[tokio::test]
    async fn bound_never_evicts_the_requested_key() {
        let source = Arc::new(RotatedSource::default());
        let resolver = KeyResolver::new(source.clone(), &config().with_max_cached_keys(1));

        for kid in ["k2", "k2", "abc", "abc"] {
            resolver.resolve(kid).await.unwrap();
        }

        assert_eq!(resolver.cached_key_count(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
