//! Retrying external calls.
//!
//! [`ResilientExecutor`] runs a fallible async call, retrying transient
//! failures with exponential backoff. Before every backoff sleep it consults a
//! [`ConnectivityProbe`]; while the probe reports the network as down the
//! executor waits for it to come back instead of spending its attempts.

use std::fmt::Display;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Classifies an error as transient or permanent.
pub trait Retryable {
    /// Whether the failed call may succeed if repeated.
    fn is_retryable(&self) -> bool;

    /// Minimum delay requested by the remote side before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Best-effort check for network reachability.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe that opens a TCP connection to a well known, highly available host.
///
/// Asymmetric routing or a filtered port can make it report the wrong answer;
/// it only gates retries, so an occasional wrong answer costs one extra wait
/// or one wasted attempt.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    /// Google public DNS over TCP.
    pub const DEFAULT_ADDR: SocketAddr =
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 53));

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ADDR, Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Connectivity probe failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "Connectivity probe timed out");
                false
            }
        }
    }
}

/// How often and how patiently a call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the failure of attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

/// Executes external calls with bounded retries and a connectivity gate.
///
/// Total latency is unbounded: a call keeps waiting for as long as the probe
/// reports the network as down.
#[derive(Clone)]
pub struct ResilientExecutor {
    policy: RetryPolicy,
    probe: Arc<dyn ConnectivityProbe>,
    poll_interval: Duration,
}

impl ResilientExecutor {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

    pub fn new(policy: RetryPolicy, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            policy,
            probe,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how often connectivity is re-checked while offline.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn is_online(&self) -> bool {
        self.probe.is_online().await
    }

    /// Blocks until the probe reports connectivity.
    pub async fn wait_for_connection(&self) {
        let mut was_offline = false;
        while !self.probe.is_online().await {
            was_offline = true;
            warn!(retry_in = ?self.poll_interval, "No internet connection");
            sleep(self.poll_interval).await;
        }
        if was_offline {
            info!("Internet connection restored");
        }
    }

    /// Runs `call` under the executor's default policy.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.execute_with_retry(call, self.policy).await
    }

    /// Runs `call`, retrying retryable errors up to `policy.max_attempts` times.
    ///
    /// Non-retryable errors are returned from the first attempt that produces
    /// them. The last retryable error is returned once attempts run out.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        mut call: F,
        policy: RetryPolicy,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            warn!(
                attempt = attempt + 1,
                max_attempts,
                error = %error,
                "Connection error"
            );

            if attempt + 1 >= max_attempts {
                warn!(max_attempts, "All retry attempts exhausted");
                return Err(error);
            }

            self.wait_for_connection().await;

            let delay = policy
                .delay_for(attempt)
                .max(error.retry_after().unwrap_or_default());
            info!(delay = ?delay, "Retrying");
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    use super::*;

    #[derive(Debug)]
    enum FakeError {
        Transient,
        Permanent,
        Throttled(Duration),
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Retryable for FakeError {
        fn is_retryable(&self) -> bool {
            !matches!(self, FakeError::Permanent)
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                FakeError::Throttled(d) => Some(*d),
                _ => None,
            }
        }
    }

    /// Replays scripted answers, then reports online forever.
    #[derive(Default)]
    struct ScriptedProbe {
        answers: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(answers: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn is_online(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers.lock().pop_front().unwrap_or(true)
        }
    }

    fn executor(probe: Arc<ScriptedProbe>) -> ResilientExecutor {
        ResilientExecutor::new(RetryPolicy::new(3, Duration::from_secs(1)), probe)
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1));
        assert_eq!(policy.delay_for(64), Duration::from_secs(1).saturating_mul(u32::MAX));
    }

    /// Runs `outcome` through the executor, handing it the 0-based call index.
    async fn run<T>(
        exec: &ResilientExecutor,
        calls: &AtomicUsize,
        outcome: impl Fn(usize) -> Result<T, FakeError>,
    ) -> Result<T, FakeError> {
        exec.execute(|| std::future::ready(outcome(calls.fetch_add(1, Ordering::SeqCst))))
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_needs_no_retry() {
        let exec = executor(ScriptedProbe::new(&[]));
        let calls = AtomicUsize::new(0);
        let result = run(&exec, &calls, |_| Ok(7)).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_total_delay() {
        let exec = executor(ScriptedProbe::new(&[]));
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<(), _> = run(&exec, &calls, |_| Err(FakeError::Transient)).await;

        assert!(matches!(result, Err(FakeError::Transient)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_short_circuits() {
        let exec = ResilientExecutor::new(
            RetryPolicy::new(10, Duration::from_secs(1)),
            ScriptedProbe::new(&[]),
        );
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<(), _> = run(&exec, &calls, |_| Err(FakeError::Permanent)).await;

        assert!(matches!(result, Err(FakeError::Permanent)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let exec = executor(ScriptedProbe::new(&[]));
        let calls = AtomicUsize::new(0);

        let result = run(&exec, &calls, |n| {
            if n == 0 { Err(FakeError::Transient) } else { Ok("sent") }
        })
        .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_connectivity_before_backoff() {
        let probe = ScriptedProbe::new(&[false, false, true]);
        let exec = ResilientExecutor::new(
            RetryPolicy::new(2, Duration::from_secs(1)),
            probe.clone(),
        )
        .with_poll_interval(Duration::from_secs(10));
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result = run(&exec, &calls, |n| {
            if n == 0 { Err(FakeError::Transient) } else { Ok(()) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        // Two offline polls, then the first backoff step.
        assert_eq!(start.elapsed(), Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_extends_backoff() {
        let exec = executor(ScriptedProbe::new(&[]));
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result = run(&exec, &calls, |n| {
            if n == 0 {
                Err(FakeError::Throttled(Duration::from_secs(30)))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_tcp_probe_reports_reachability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap();
        assert!(TcpProbe::new(open, Duration::from_secs(1)).is_online().await);

        drop(listener);
        assert!(!TcpProbe::new(open, Duration::from_secs(1)).is_online().await);
    }
}
