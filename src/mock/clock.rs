//! Manually advanced clock
//!
//! `sleep` advances time instead of blocking and records the requested
//! duration. An optional hook runs after every sleep, which lets tests
//! deliver async commands "mid-poll".

use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::ports::Clock;

type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

struct ClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
    hook: Option<SleepHook>,
}

pub struct ManualClock {
    base: Instant,
    utc_base: DateTime<Utc>,
    state: Mutex<ClockState>,
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.lock().elapsed)
            .finish()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            utc_base: Utc::now(),
            state: Mutex::new(ClockState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
                hook: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn advance(&self, by: Duration) {
        self.lock().elapsed += by;
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Durations passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Run `hook(n)` after the n-th sleep (1-based)
    pub fn on_sleep(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        self.lock().hook = Some(Box::new(hook));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.lock().elapsed
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = self.lock().elapsed;
        self.utc_base + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
        let count = state.sleeps.len();
        // Run the hook without the lock so it may use the clock
        let hook = state.hook.take();
        drop(state);

        if let Some(hook) = hook {
            hook(count);
            let mut state = self.lock();
            if state.hook.is_none() {
                state.hook = Some(hook);
            }
        }
    }
}
