use relaycore::{EngineError, ErrorKind};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};

/// Error kinds that never retry a step activity, regardless of attempts
/// remaining.
const STEP_NON_RETRYABLE: [ErrorKind; 4] = [
    ErrorKind::Validation,
    ErrorKind::ToolNotFound,
    ErrorKind::AgentNotFound,
    ErrorKind::HandlerSyntax,
];

/// Retry policy for one activity class
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_attempts: u32,
    pub maximum_interval: Duration,
    pub non_retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_attempts: 3,
            maximum_interval: Duration::from_secs(30),
            non_retryable: Vec::new(),
        }
    }
}

/// Timeout and retry profile of one activity class.
///
/// Resolution activities are short; step activities get a medium profile, or
/// a long one with liveness heartbeats when the step calls agents.
#[derive(Debug, Clone)]
pub struct ActivityProfile {
    pub start_to_close: Duration,
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl ActivityProfile {
    /// Tool/agent resolution: short timeout, every failure retryable.
    pub fn resolution() -> Self {
        Self {
            start_to_close: Duration::from_secs(60),
            heartbeat_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Step execution without agent calls.
    pub fn step() -> Self {
        Self {
            start_to_close: Duration::from_secs(5 * 60),
            heartbeat_timeout: None,
            retry: RetryPolicy {
                non_retryable: STEP_NON_RETRYABLE.to_vec(),
                ..RetryPolicy::default()
            },
        }
    }

    /// Step execution with agent calls: longer timeout, fewer attempts,
    /// longer backoff, periodic liveness signal expected.
    pub fn step_with_agents() -> Self {
        Self {
            start_to_close: Duration::from_secs(10 * 60),
            heartbeat_timeout: Some(Duration::from_secs(30)),
            retry: RetryPolicy {
                initial_interval: Duration::from_secs(2),
                maximum_attempts: 2,
                maximum_interval: Duration::from_secs(60),
                non_retryable: STEP_NON_RETRYABLE.to_vec(),
                ..RetryPolicy::default()
            },
        }
    }
}

/// Liveness signal for long-running activities. Workers record progress;
/// the runner treats a silent activity as crashed once the heartbeat window
/// elapses.
#[derive(Clone)]
pub struct Heartbeat {
    last: Arc<Mutex<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn record(&self) {
        *self.last.lock().unwrap() = Instant::now();
    }

    pub fn since_last(&self) -> Duration {
        self.last.lock().unwrap().elapsed()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one activity under its profile: per-attempt timeout, bounded
/// exponential backoff between attempts, and non-retryable classification by
/// explicit error kind.
pub async fn run_activity<T, F, Fut>(
    profile: &ActivityProfile,
    name: &str,
    mut attempt_fn: F,
) -> Result<T, EngineError>
where
    F: FnMut(Heartbeat) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut delay = profile.retry.initial_interval;
    let mut attempt: u32 = 1;

    loop {
        let heartbeat = Heartbeat::new();
        let outcome = match profile.heartbeat_timeout {
            Some(window) => {
                run_with_liveness(
                    profile.start_to_close,
                    window,
                    name,
                    attempt_fn(heartbeat.clone()),
                    heartbeat,
                )
                .await
            }
            None => match timeout(profile.start_to_close, attempt_fn(heartbeat)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(format!("activity {}", name))),
            },
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                let kind = err.kind();
                if !kind.is_retryable() || profile.retry.non_retryable.contains(&kind) {
                    tracing::error!("Activity {} failed (non-retryable): {}", name, err);
                    return Err(err);
                }
                if attempt >= profile.retry.maximum_attempts {
                    tracing::error!(
                        "Activity {} exhausted {} attempts: {}",
                        name,
                        attempt,
                        err
                    );
                    return Err(err);
                }
                tracing::warn!(
                    "Activity {} attempt {} failed, retrying in {:?}: {}",
                    name,
                    attempt,
                    delay,
                    err
                );
                sleep(delay).await;
                delay = delay
                    .mul_f64(profile.retry.backoff_coefficient)
                    .min(profile.retry.maximum_interval);
                attempt += 1;
            }
        }
    }
}

/// Race the activity against its start-to-close timeout and a liveness
/// monitor. A missed heartbeat window reads as a crashed worker and is
/// retryable.
async fn run_with_liveness<T, Fut>(
    start_to_close: Duration,
    window: Duration,
    name: &str,
    fut: Fut,
    heartbeat: Heartbeat,
) -> Result<T, EngineError>
where
    Fut: Future<Output = Result<T, EngineError>>,
{
    let monitor = async {
        loop {
            sleep(window / 4).await;
            if heartbeat.since_last() > window {
                return EngineError::Transient(format!(
                    "activity {} missed its heartbeat window",
                    name
                ));
            }
        }
    };

    tokio::select! {
        result = timeout(start_to_close, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::Timeout(format!("activity {}", name))),
        },
        err = monitor => Err(err),
    }
}
