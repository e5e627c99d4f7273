use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Consecutive failures before a method's circuit opens.
const FAILURE_THRESHOLD: u32 = 5;
/// How long an open circuit rejects calls before probing again.
const OPEN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct MethodState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-`(service, method)` circuit breaker.
///
/// After [`FAILURE_THRESHOLD`] consecutive failures the circuit opens and
/// calls are rejected locally for [`OPEN_TIMEOUT`]. Once the timeout
/// elapses the next call is let through as a probe; its outcome closes or
/// re-opens the circuit.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    methods: Mutex<HashMap<String, MethodState>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a call to `method` may proceed right now.
    pub fn allow(&self, method: &str) -> bool {
        let mut methods = lock(&self.methods);
        let state = methods.entry(method.to_string()).or_default();
        match state.opened_at {
            None => true,
            Some(opened_at) if opened_at.elapsed() >= OPEN_TIMEOUT => {
                // Half-open: probes are admitted until an outcome is
                // recorded; a failed probe re-opens with a fresh timeout.
                true
            },
            Some(_) => false,
        }
    }

    pub fn record_success(&self, method: &str) {
        let mut methods = lock(&self.methods);
        let state = methods.entry(method.to_string()).or_default();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self, method: &str) {
        let mut methods = lock(&self.methods);
        let state = methods.entry(method.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= FAILURE_THRESHOLD {
            if state.opened_at.is_none() {
                tracing::warn!(method, "circuit opened");
            }
            state.opened_at = Some(Instant::now());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
