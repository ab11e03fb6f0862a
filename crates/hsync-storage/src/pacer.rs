//! Request pacing between successive page fetches.
//!
//! Short jittered waits alternate with a longer cool-down once enough time has passed since
//! the previous one. Time and sleeping go through [`Clock`] so tests can simulate hours of
//! pacing without waiting.

use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock: `sleep` advances time instantly and is recorded.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualClockState>,
}

#[derive(Debug, Default)]
struct ManualClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ManualClockState::default()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.elapsed += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sleeps
            .clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + state.elapsed
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaceDecision {
    pub delay: Duration,
    pub long_break: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacingPolicy {
    pub long_break_after: Duration,
    pub short_delay_secs: Range<f64>,
    pub long_delay_secs: Range<f64>,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            long_break_after: Duration::from_secs(3 * 60),
            short_delay_secs: 2.0..8.0,
            long_delay_secs: 180.0..300.0,
        }
    }
}

impl PacingPolicy {
    pub fn next_delay<R: Rng + ?Sized>(&self, since_long_break: Duration, rng: &mut R) -> PaceDecision {
        if since_long_break >= self.long_break_after {
            PaceDecision {
                delay: Duration::from_secs_f64(rng.random_range(self.long_delay_secs.clone())),
                long_break: true,
            }
        } else {
            PaceDecision {
                delay: Duration::from_secs_f64(rng.random_range(self.short_delay_secs.clone())),
                long_break: false,
            }
        }
    }
}

pub struct Pacer {
    policy: PacingPolicy,
    clock: Arc<dyn Clock>,
    last_long_break: Instant,
    rng: StdRng,
    enabled: bool,
}

impl Pacer {
    pub fn new(policy: PacingPolicy, clock: Arc<dyn Clock>) -> Self {
        let last_long_break = clock.now();
        Self {
            policy,
            clock,
            last_long_break,
            rng: StdRng::from_os_rng(),
            enabled: true,
        }
    }

    /// Pacer that never waits.
    pub fn disabled() -> Self {
        let mut pacer = Self::new(PacingPolicy::default(), Arc::new(TokioClock));
        pacer.enabled = false;
        pacer
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn next_delay(&mut self) -> PaceDecision {
        let since = self
            .clock
            .now()
            .saturating_duration_since(self.last_long_break);
        self.policy.next_delay(since, &mut self.rng)
    }

    /// Suspend for the next delay. Returns `None` when pacing is disabled.
    pub async fn pause(&mut self) -> Option<PaceDecision> {
        if !self.enabled {
            return None;
        }
        let decision = self.next_delay();
        if decision.long_break {
            info!(delay_secs = decision.delay.as_secs_f64(), "taking a longer break");
        } else {
            info!(delay_secs = decision.delay.as_secs_f64(), "waiting before next request");
        }
        self.clock.sleep(decision.delay).await;
        // Measured from the end of the break, so the break itself never triggers another.
        if decision.long_break {
            self.last_long_break = self.clock.now();
        }
        Some(decision)
    }
}
