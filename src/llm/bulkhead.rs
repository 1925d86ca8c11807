//! Bulkhead pattern for provider calls.
//!
//! Concurrent runs share providers. Wrapping a provider in a bulkhead caps
//! the number of in-flight calls so one busy model cannot absorb every
//! connection or blow through a provider's rate limit.
//!
//! Waiting for a permit counts against the call deadline: a permit not
//! acquired in time is reported as a retriable `Timeout`, which moves the
//! access layer on to the next model.
//!
//! # Usage
//!
//! ```rust,ignore
//! use neuroprompt::llm::{BulkheadConfig, BulkheadLlmProvider, OpenAiClient};
//!
//! let client = OpenAiClient::openrouter("anthropic/claude-3-haiku");
//! let bulkhead = BulkheadLlmProvider::new(client, BulkheadConfig::default());
//! ```

use super::{CallFailureKind, CompletionRequest, LlmProvider, ProviderFailure};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Configuration for the bulkhead pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum concurrent calls allowed.
    ///
    /// Default: 4.
    pub max_concurrent: usize,

    /// Upper bound for acquiring a permit (0 = bounded only by the call deadline).
    ///
    /// Default: 30 seconds.
    pub acquire_timeout_ms: u64,

    /// Whether to fail immediately when the bulkhead is full.
    ///
    /// Default: false.
    pub fail_fast: bool,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadConfig {
    /// Creates a new bulkhead configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_concurrent: 4,
            acquire_timeout_ms: 30_000,
            fail_fast: false,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `NEUROPROMPT_BULKHEAD_MAX_CONCURRENT` | Max concurrent calls | 4 |
    /// | `NEUROPROMPT_BULKHEAD_ACQUIRE_TIMEOUT_MS` | Permit timeout | 30000 |
    /// | `NEUROPROMPT_BULKHEAD_FAIL_FAST` | Fail when full | false |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("NEUROPROMPT_BULKHEAD_MAX_CONCURRENT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_concurrent = parsed.max(1);
        }
        if let Ok(v) = std::env::var("NEUROPROMPT_BULKHEAD_ACQUIRE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.acquire_timeout_ms = parsed;
        }
        if let Ok(v) = std::env::var("NEUROPROMPT_BULKHEAD_FAIL_FAST") {
            self.fail_fast = v.eq_ignore_ascii_case("true") || v == "1";
        }
        self
    }

    /// Sets the maximum concurrent calls.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the acquire timeout in milliseconds.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Sets whether to fail fast when the bulkhead is full.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Provider wrapper that limits concurrent calls.
pub struct BulkheadLlmProvider<P: LlmProvider> {
    inner: P,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
}

impl<P: LlmProvider> BulkheadLlmProvider<P> {
    /// Creates a new bulkhead-wrapped provider.
    #[must_use]
    pub fn new(inner: P, config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner,
            config,
            semaphore,
        }
    }

    /// Returns the current number of available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Effective wait bound: the smaller of the configured timeout and the
    /// call deadline.
    fn acquire_bound(&self, deadline: Duration) -> Duration {
        if self.config.acquire_timeout_ms == 0 {
            deadline
        } else {
            deadline.min(Duration::from_millis(self.config.acquire_timeout_ms))
        }
    }

    fn acquire_permit(
        &self,
        deadline: Duration,
    ) -> std::result::Result<OwnedSemaphorePermit, ProviderFailure> {
        let provider = self.inner.name();
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("llm_bulkhead_available_permits", "provider" => provider)
            .set(self.semaphore.available_permits() as f64);

        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }

        if self.config.fail_fast {
            metrics::counter!(
                "llm_bulkhead_rejections_total",
                "provider" => provider,
                "reason" => "full"
            )
            .increment(1);
            return Err(ProviderFailure::new(
                CallFailureKind::RateLimited,
                format!(
                    "bulkhead full: {} concurrent calls in progress",
                    self.config.max_concurrent
                ),
            ));
        }

        let bound = self.acquire_bound(deadline);
        let start = Instant::now();
        loop {
            std::thread::sleep(Duration::from_millis(5));
            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                return Ok(permit);
            }
            if start.elapsed() >= bound {
                metrics::counter!(
                    "llm_bulkhead_rejections_total",
                    "provider" => provider,
                    "reason" => "timeout"
                )
                .increment(1);
                return Err(ProviderFailure::new(
                    CallFailureKind::Timeout,
                    format!("bulkhead acquire timed out after {}ms", bound.as_millis()),
                ));
            }
        }
    }
}

impl<P: LlmProvider> LlmProvider for BulkheadLlmProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderFailure> {
        let provider = self.inner.name();
        let span = tracing::debug_span!(
            "llm.bulkhead",
            provider = provider,
            available_permits = self.available_permits()
        );
        let _enter = span.enter();

        let waited = Instant::now();
        let _permit = self.acquire_permit(request.timeout)?;
        tracing::debug!(provider = provider, "Acquired bulkhead permit");

        // Time spent queueing comes out of the provider's budget.
        let mut request = request.clone();
        request.timeout = request.timeout.saturating_sub(waited.elapsed());
        if request.timeout.is_zero() {
            return Err(ProviderFailure::new(
                CallFailureKind::Timeout,
                "deadline spent waiting for a bulkhead permit",
            ));
        }

        self.inner.complete(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct MockProvider {
        delay: Duration,
    }

    impl LlmProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> std::result::Result<String, ProviderFailure> {
            std::thread::sleep(self.delay);
            Ok("response".to_string())
        }
    }

    fn request(timeout_ms: u64) -> CompletionRequest {
        CompletionRequest {
            prompt: "p".to_string(),
            system: None,
            temperature: 0.7,
            max_tokens: 16,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn test_bulkhead_config_builder() {
        let config = BulkheadConfig::new()
            .with_max_concurrent(8)
            .with_acquire_timeout_ms(5000)
            .with_fail_fast(true);
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.acquire_timeout_ms, 5000);
        assert!(config.fail_fast);
    }

    #[test]
    fn test_bulkhead_allows_calls_within_limit() {
        let bulkhead = BulkheadLlmProvider::new(
            MockProvider {
                delay: Duration::ZERO,
            },
            BulkheadConfig::default(),
        );
        assert_eq!(bulkhead.complete(&request(1000)).unwrap(), "response");
        assert_eq!(bulkhead.available_permits(), 4);
    }

    #[test]
    fn test_acquire_bound_uses_smaller_of_deadline_and_timeout() {
        let bulkhead = BulkheadLlmProvider::new(
            MockProvider {
                delay: Duration::ZERO,
            },
            BulkheadConfig::new().with_acquire_timeout_ms(100),
        );
        assert_eq!(
            bulkhead.acquire_bound(Duration::from_millis(20)),
            Duration::from_millis(20)
        );
        assert_eq!(
            bulkhead.acquire_bound(Duration::from_secs(5)),
            Duration::from_millis(100)
        );
    }

    fn occupy(bulkhead: &Arc<BulkheadLlmProvider<MockProvider>>) -> std::thread::JoinHandle<()> {
        let (tx, rx) = mpsc::channel();
        let clone = Arc::clone(bulkhead);
        let handle = std::thread::spawn(move || {
            tx.send(()).unwrap();
            let _ = clone.complete(&request(5_000));
        });
        rx.recv().unwrap();
        // Let the spawned call take the only permit.
        while bulkhead.available_permits() > 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        handle
    }

    #[test]
    fn test_full_bulkhead_times_out_within_deadline() {
        let bulkhead = Arc::new(BulkheadLlmProvider::new(
            MockProvider {
                delay: Duration::from_millis(300),
            },
            BulkheadConfig::new().with_max_concurrent(1),
        ));
        let handle = occupy(&bulkhead);

        let err = bulkhead.complete(&request(30)).unwrap_err();
        assert_eq!(err.kind, CallFailureKind::Timeout);
        handle.join().unwrap();
    }

    #[test]
    fn test_full_bulkhead_fail_fast_is_rate_limited() {
        let bulkhead = Arc::new(BulkheadLlmProvider::new(
            MockProvider {
                delay: Duration::from_millis(200),
            },
            BulkheadConfig::new().with_max_concurrent(1).with_fail_fast(true),
        ));
        let handle = occupy(&bulkhead);

        let err = bulkhead.complete(&request(1000)).unwrap_err();
        assert_eq!(err.kind, CallFailureKind::RateLimited);
        handle.join().unwrap();
    }
}
