//! Startup acquisition of the tool channel.
//!
//! The tool server may still be starting when we boot, so `connect()` is
//! retried with exponential backoff before giving up.

use std::time::Duration;

use learnpath_config::BootstrapConfig;
use learnpath_core::error::ConnectionError;
use learnpath_core::tool::ToolGateway;
use tracing::{info, warn};

/// Retry policy for [`acquire_gateway`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Each wait is the previous one times this factor.
    pub backoff_factor: f64,
    /// Upper bound for a single wait.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 1.5,
            max_delay: None,
        }
    }
}

impl From<&BootstrapConfig> for RetryPolicy {
    fn from(c: &BootstrapConfig) -> Self {
        Self {
            max_attempts: c.max_attempts,
            initial_delay: Duration::from_millis(c.initial_delay_ms),
            backoff_factor: c.backoff_factor,
            max_delay: c.max_delay_ms.map(Duration::from_millis),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    /// The wait that follows `current`.
    ///
    /// A factor below 1.0 or not finite keeps the delay constant.
    fn next_delay(&self, current: Duration) -> Duration {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let next = Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => next.min(cap),
            None => next,
        }
    }
}

/// Connect `gateway`, retrying per `policy`.
///
/// Sleeps only between attempts. On exhaustion the last connection error is
/// returned and the caller decides whether to exit or run degraded.
pub async fn acquire_gateway<G: ToolGateway>(
    gateway: G,
    policy: &RetryPolicy,
) -> Result<G, ConnectionError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        match gateway.connect().await {
            Ok(()) => {
                info!(gateway = gateway.name(), attempt, "Tool gateway connected");
                return Ok(gateway);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(
                    gateway = gateway.name(),
                    attempts = attempt,
                    error = %e,
                    "Giving up on tool gateway"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    gateway = gateway.name(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Tool gateway connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use learnpath_core::tool::{ToolDescriptor, ToolInvocation, ToolInvocationResult};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails `failures` times, then connects.
    struct FlakyGateway {
        failures: AtomicU32,
        attempts: Mutex<Vec<Instant>>,
    }

    impl FlakyGateway {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                attempts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolGateway for FlakyGateway {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn connect(&self) -> Result<(), ConnectionError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ConnectionError::Unreachable {
                    endpoint: "http://localhost:3000/mcp".into(),
                    reason: format!("connection refused ({remaining} left)"),
                });
            }
            Ok(())
        }

        fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ConnectionError> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, invocation: &ToolInvocation) -> ToolInvocationResult {
            ToolInvocationResult::success(&invocation.id, "")
        }

        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();

        let gateway = acquire_gateway(FlakyGateway::new(2), &policy).await.unwrap();

        let attempts = gateway.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0] - start, Duration::ZERO);
        assert_eq!(attempts[1] - attempts[0], Duration::from_millis(100));
        assert_eq!(attempts[2] - attempts[1], Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error_without_trailing_sleep() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();

        let err = acquire_gateway(FlakyGateway::new(10), &policy)
            .await
            .err()
            .unwrap();

        match err {
            ConnectionError::Unreachable { reason, .. } => assert!(reason.contains("8 left")),
            other => panic!("Expected Unreachable, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn degenerate_backoff_factor_does_not_panic() {
        let delay = Duration::from_millis(200);
        for factor in [f64::NAN, f64::INFINITY, -2.0, 0.5] {
            let policy = RetryPolicy {
                backoff_factor: factor,
                ..RetryPolicy::new(3, delay)
            };
            assert_eq!(policy.next_delay(delay), delay, "factor {factor}");
        }

        let huge = RetryPolicy {
            backoff_factor: f64::MAX,
            ..RetryPolicy::new(3, delay)
        };
        assert_eq!(huge.next_delay(delay), Duration::MAX);

        let capped = RetryPolicy {
            backoff_factor: f64::MAX,
            max_delay: Some(Duration::from_secs(30)),
            ..RetryPolicy::new(3, delay)
        };
        assert_eq!(capped.next_delay(delay), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_does_not_sleep() {
        let start = Instant::now();
        let gateway = acquire_gateway(FlakyGateway::new(0), &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(gateway.attempts.lock().unwrap().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: Some(Duration::from_millis(1500)),
        };
        let second = policy.next_delay(policy.initial_delay);
        assert_eq!(second, Duration::from_millis(1500));
        assert_eq!(policy.next_delay(second), Duration::from_millis(1500));
    }

    #[test]
    fn policy_from_config() {
        let config = BootstrapConfig {
            max_attempts: 4,
            initial_delay_ms: 250,
            backoff_factor: 1.5,
            max_delay_ms: Some(2000),
            exit_on_failure: false,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Some(Duration::from_millis(2000)));
    }
}
