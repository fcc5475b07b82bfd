//! Authentication, nonce management, and the retrying HTTP client for the
//! Kraken REST API.
//!
//! # Authentication
//!
//! Private endpoints are signed with HMAC-SHA512:
//! - `API-Sign = base64(HMAC-SHA512(base64decode(secret), path || SHA256(nonce + postdata)))`
//! - Headers: `API-Key`, `API-Sign`
//!
//! The nonce must be strictly increasing per credential, so it comes from a
//! shared atomic counter rather than the raw clock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::warn;

// ============================================================================
// API Endpoint Constants
// ============================================================================

/// Kraken Spot REST API base URL
pub const KRAKEN_SPOT_REST_URL: &str = "https://api.kraken.com";

/// The one application-level error that is retried instead of surfaced.
pub const RATE_LIMIT_ERROR: &str = "EAPI:Rate limit exceeded";

// ============================================================================
// Clock & Nonce
// ============================================================================

/// Source of wall-clock milliseconds, split out so nonce behavior is testable
/// under a controlled clock.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using real time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before Unix epoch")
            .as_millis() as u64
    }
}

/// Issues strictly increasing nonces for signed requests.
///
/// Kraken rejects a private request whose nonce is not greater than the last
/// one seen for the credential, so concurrent calls must never draw the same
/// value. [`NonceCounter::next`] returns `max(last + 1, now_ms)` via a CAS
/// loop: nonces track wall-clock milliseconds while the clock moves forward
/// and keep counting upward when it stalls within one millisecond or
/// regresses.
pub struct NonceCounter<C: Clock = SystemClock> {
    last: AtomicU64,
    clock: C,
}

impl NonceCounter<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for NonceCounter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> NonceCounter<C> {
    pub fn with_clock(clock: C) -> Self {
        let now = clock.now_ms();
        Self {
            last: AtomicU64::new(now),
            clock,
        }
    }

    pub fn next(&self) -> u64 {
        let now = self.clock.now_ms();
        loop {
            let last = self.last.load(Ordering::Acquire);
            let next = last.saturating_add(1).max(now);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(_) => continue,
            }
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Kraken API credentials. The secret is base64-encoded as issued by the
/// exchange and decoded on every signature.
#[derive(Clone)]
pub struct KrakenAuth {
    pub api_key: String,
    pub api_secret: String,
}

impl KrakenAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Generates the `API-Sign` header value for an authenticated request.
    ///
    /// `postdata` must be the exact URL-encoded body that goes on the wire,
    /// with the nonce already injected; any divergence between the signed
    /// bytes and the transmitted bytes invalidates the signature.
    ///
    /// A secret that does not decode as base64 is a configuration error and
    /// fails immediately; retrying cannot help.
    pub fn sign_request(&self, path: &str, nonce: u64, postdata: &str) -> Result<String> {
        use base64::engine::general_purpose;
        use base64::Engine;
        use hmac::{Hmac, Mac};
        use sha2::{Digest, Sha256, Sha512};

        let decoded_secret = general_purpose::STANDARD
            .decode(&self.api_secret)
            .context("Failed to decode API secret")?;

        // SHA256 of (nonce + postdata)
        let mut sha256 = Sha256::new();
        sha256.update(format!("{}{}", nonce, postdata));
        let digest = sha256.finalize();

        // HMAC input is path || digest
        let mut message = path.as_bytes().to_vec();
        message.extend_from_slice(&digest);

        let mut mac = Hmac::<Sha512>::new_from_slice(&decoded_secret)
            .context("Failed to create HMAC")?;
        mac.update(&message);

        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry and pacing policy for the REST client.
///
/// Gateway failures (504/520) are assumed self-resolving and retried without
/// an attempt budget; rate-limit envelopes back off briefly; every successful
/// response is followed by a pacing delay so subsequent calls respect the
/// exchange's published request budget.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Cooldown after an upstream gateway failure (HTTP 504/520).
    pub gateway_cooldown: Duration,
    /// Cooldown after the exchange reports [`RATE_LIMIT_ERROR`].
    pub rate_limit_cooldown: Duration,
    /// Outbound request budget; the pacing delay is its reciprocal.
    pub requests_per_second: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            gateway_cooldown: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(5),
            requests_per_second: 1.0,
        }
    }
}

impl RetryPolicy {
    fn pace(&self) -> Duration {
        if self.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.requests_per_second)
        } else {
            Duration::ZERO
        }
    }
}

// ============================================================================
// Response Envelope
// ============================================================================

/// Standard Kraken API response envelope: an error list alongside (or
/// instead of) a result payload.
#[derive(Debug, serde::Deserialize)]
pub struct KrakenResponse<T> {
    /// Error messages; empty on success.
    pub error: Vec<String>,
    /// Result data if successful.
    pub result: Option<T>,
}

impl<T> KrakenResponse<T> {
    /// True when the error list is exactly the rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        self.error.len() == 1 && self.error[0] == RATE_LIMIT_ERROR
    }

    /// Treats any application error as fatal and extracts the payload.
    /// Public operations use this; private operations inspect the envelope
    /// themselves and hand errors back to the caller as a value.
    pub fn into_result(self) -> Result<T> {
        if !self.error.is_empty() {
            anyhow::bail!("Kraken API error: {:?}", self.error);
        }
        self.result.context("Missing result in API response")
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

/// HTTP client for the Kraken REST API with retry, backoff, and pacing.
///
/// Cheap to clone; clones share one connection pool and one nonce counter.
/// Each call blocks its own task until it classifies as terminal: cooldown
/// sleeps happen inside the calling operation, and there is no cancellation
/// beyond dropping the future.
#[derive(Clone)]
pub struct KrakenRestClient {
    client: Client,
    auth: Option<KrakenAuth>,
    nonce: Arc<NonceCounter>,
    policy: RetryPolicy,
    base_url: String,
}

impl KrakenRestClient {
    fn build_client() -> Client {
        Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    }

    /// Spot client with the default retry policy. Pass `None` for public
    /// endpoints only.
    pub fn new_spot(auth: Option<KrakenAuth>) -> Self {
        Self::with_policy(auth, RetryPolicy::default())
    }

    pub fn with_policy(auth: Option<KrakenAuth>, policy: RetryPolicy) -> Self {
        Self {
            client: Self::build_client(),
            auth,
            nonce: Arc::new(NonceCounter::new()),
            policy,
            base_url: KRAKEN_SPOT_REST_URL.to_string(),
        }
    }

    /// Makes an unauthenticated form-encoded POST request to a public
    /// endpoint and returns the response envelope.
    pub async fn post_public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: HashMap<String, String>,
    ) -> Result<KrakenResponse<T>> {
        let url = format!("{}{}", self.base_url, endpoint);
        self.execute_with_retry(move || self.send(self.client.post(&url).form(&params)))
            .await
    }

    /// Makes an unauthenticated GET request with query parameters. Used by
    /// the paginated trade-history walk.
    pub async fn get_public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: HashMap<String, String>,
    ) -> Result<KrakenResponse<T>> {
        let url = format!("{}{}", self.base_url, endpoint);
        self.execute_with_retry(move || self.send(self.client.get(&url).query(&params)))
            .await
    }

    /// Makes an authenticated POST request to a private endpoint and returns
    /// the response envelope, application errors included.
    ///
    /// Every attempt signs afresh: a retried request with a replayed nonce
    /// would be rejected as stale.
    pub async fn post_private<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: HashMap<String, String>,
    ) -> Result<KrakenResponse<T>> {
        self.execute_with_retry(move || {
            let request = self.signed_request(endpoint, &params);
            async move { self.send(request?).await }
        })
        .await
    }

    fn signed_request(
        &self,
        endpoint: &str,
        params: &HashMap<String, String>,
    ) -> Result<reqwest::RequestBuilder> {
        let auth = self
            .auth
            .as_ref()
            .context("Authentication required for private endpoints")?;

        let nonce = self.nonce.next();
        let mut all_params = params.clone();
        all_params.insert("nonce".to_string(), nonce.to_string());

        // The encoded body doubles as the signing input; both must be the
        // same bytes.
        let postdata = serde_urlencoded::to_string(&all_params)
            .context("Failed to encode request body")?;
        let signature = auth.sign_request(endpoint, nonce, &postdata)?;

        Ok(self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("API-Key", &auth.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        Ok((status, body))
    }

    /// Issues a request until it classifies as terminal.
    ///
    /// `attempt` is invoked once per try and must rebuild the request from
    /// scratch. Classification order:
    ///
    /// 1. HTTP 504/520: gateway failure; wait out the gateway cooldown and
    ///    try again, indefinitely.
    /// 2. Any other non-success status: fatal, surfaced immediately.
    /// 3. HTTP 200: pace the next outbound call, then parse the envelope;
    ///    a rate-limited envelope waits the short cooldown and tries again.
    /// 4. Anything else is terminal: the envelope is returned as parsed,
    ///    errors included, for the calling layer to interpret.
    async fn execute_with_retry<T, F, Fut>(&self, mut attempt: F) -> Result<KrakenResponse<T>>
    where
        T: DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(StatusCode, String)>>,
    {
        loop {
            let (status, body) = attempt().await?;

            if status == StatusCode::GATEWAY_TIMEOUT || status.as_u16() == 520 {
                warn!(
                    status = status.as_u16(),
                    cooldown_secs = self.policy.gateway_cooldown.as_secs(),
                    "gateway failure, cooling down before retry"
                );
                sleep(self.policy.gateway_cooldown).await;
                continue;
            }
            if !status.is_success() {
                anyhow::bail!("Kraken API error ({}): {}", status, body);
            }

            sleep(self.policy.pace()).await;

            let envelope: KrakenResponse<T> =
                serde_json::from_str(&body).context("Failed to parse response")?;
            if envelope.is_rate_limited() {
                warn!(
                    cooldown_secs = self.policy.rate_limit_cooldown.as_secs(),
                    "rate limit exceeded, backing off"
                );
                sleep(self.policy.rate_limit_cooldown).await;
                continue;
            }
            return Ok(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use serde_json::Value;

    use super::*;

    // Signing example published in Kraken's REST API documentation.
    const DOC_SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    #[test]
    fn test_sign_request_matches_published_example() {
        let auth = KrakenAuth::new("key".to_string(), DOC_SECRET.to_string());
        let signature = auth
            .sign_request(
                "/0/private/AddOrder",
                1616492376594,
                "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25",
            )
            .unwrap();
        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_sign_request_rejects_non_base64_secret() {
        let auth = KrakenAuth::new("key".to_string(), "not base64 at all!".to_string());
        assert!(auth.sign_request("/0/private/Balance", 1, "nonce=1").is_err());
    }

    struct FrozenClock(u64);

    impl Clock for FrozenClock {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_nonce_increases_within_one_millisecond() {
        // The clock never advances, so only the counter can separate calls.
        let counter = NonceCounter::with_clock(FrozenClock(1_700_000_000_000));
        let a = counter.next();
        let b = counter.next();
        assert!(b > a);
    }

    #[test]
    fn test_nonce_survives_clock_regression() {
        struct RegressingClock {
            calls: AtomicUsize,
        }

        impl Clock for RegressingClock {
            fn now_ms(&self) -> u64 {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                // Clock jumps ten seconds backwards after the first reading.
                if call == 0 {
                    1_700_000_010_000
                } else {
                    1_700_000_000_000
                }
            }
        }

        let counter = NonceCounter::with_clock(RegressingClock {
            calls: AtomicUsize::new(0),
        });
        let a = counter.next();
        let b = counter.next();
        assert!(b > a, "nonce must not decrease when the clock regresses");
    }

    #[test]
    fn test_nonce_unique_across_threads() {
        let counter = Arc::new(NonceCounter::with_clock(FrozenClock(1_700_000_000_000)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..1000).map(|_| counter.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut nonces: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        nonces.sort_unstable();
        let total = nonces.len();
        nonces.dedup();
        assert_eq!(nonces.len(), total, "nonces must be unique across threads");
    }

    fn ok_body() -> String {
        r#"{"error":[],"result":{"status":"ok"}}"#.to_string()
    }

    fn rate_limited_body() -> String {
        r#"{"error":["EAPI:Rate limit exceeded"],"result":null}"#.to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_timeout_is_retried() {
        let client = KrakenRestClient::new_spot(None);
        let attempts = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let envelope: KrakenResponse<Value> = client
            .execute_with_retry(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    match attempt {
                        0 => Ok((StatusCode::GATEWAY_TIMEOUT, String::new())),
                        1 => Ok((StatusCode::from_u16(520).unwrap(), String::new())),
                        _ => Ok((StatusCode::OK, ok_body())),
                    }
                }
            })
            .await
            .unwrap();

        assert!(envelope.error.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two gateway cooldowns plus the final pacing delay.
        assert!(started.elapsed() >= Duration::from_secs(121));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_fatal_without_retry() {
        let client = KrakenRestClient::new_spot(None);
        let attempts = AtomicUsize::new(0);

        let outcome: Result<KrakenResponse<Value>> = client
            .execute_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok((StatusCode::BAD_REQUEST, "bad pair".to_string())) }
            })
            .await;

        assert!(outcome.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_envelope_is_retried_after_short_cooldown() {
        let client = KrakenRestClient::new_spot(None);
        let attempts = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();

        let envelope: KrakenResponse<Value> = client
            .execute_with_retry(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Ok((StatusCode::OK, rate_limited_body()))
                    } else {
                        Ok((StatusCode::OK, ok_body()))
                    }
                }
            })
            .await
            .unwrap();

        assert!(envelope.error.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // Pacing, five-second cooldown, pacing again.
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_errors_are_returned_without_retry() {
        let client = KrakenRestClient::new_spot(None);
        let attempts = AtomicUsize::new(0);

        let envelope: KrakenResponse<Value> = client
            .execute_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Ok((
                        StatusCode::OK,
                        r#"{"error":["EOrder:Insufficient funds"],"result":null}"#.to_string(),
                    ))
                }
            })
            .await
            .unwrap();

        assert_eq!(envelope.error, vec!["EOrder:Insufficient funds"]);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rate_limit_detection_is_exact() {
        let limited: KrakenResponse<Value> =
            serde_json::from_str(&rate_limited_body()).unwrap();
        assert!(limited.is_rate_limited());

        let mixed: KrakenResponse<Value> = serde_json::from_str(
            r#"{"error":["EAPI:Rate limit exceeded","EGeneral:Internal error"],"result":null}"#,
        )
        .unwrap();
        assert!(!mixed.is_rate_limited());
    }

    #[test]
    fn test_into_result_raises_application_errors() {
        let envelope: KrakenResponse<Value> = serde_json::from_str(
            r#"{"error":["EQuery:Unknown asset pair"],"result":null}"#,
        )
        .unwrap();
        assert!(envelope.into_result().is_err());
    }
}
