//! Clock abstraction: production always runs on `RealClock`; tests
//! substitute `VirtualClock` so wait-time, cooldown, and timeout
//! measurements advance without real sleeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Seconds since an arbitrary but fixed epoch, shared by every
/// wait-time and timeout measurement in the simulation.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> f64;
}

#[derive(Clone, Default)]
pub struct RealClock {
    start: Arc<once_start::OnceStart>,
}

mod once_start {
    use super::Instant;
    use std::sync::OnceLock;

    #[derive(Default)]
    pub struct OnceStart(OnceLock<Instant>);

    impl OnceStart {
        pub fn get(&self) -> Instant {
            *self.0.get_or_init(Instant::now)
        }
    }
}

impl Clock for RealClock {
    fn now(&self) -> f64 {
        self.start.get().elapsed().as_secs_f64()
    }
}

/// A manually-advanced clock for deterministic tests. `now()` returns
/// whatever the test last set via `advance`/`set`.
#[derive(Clone, Default)]
pub struct VirtualClock {
    micros: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta: Duration) {
        self.micros
            .fetch_add(delta.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: f64) {
        self.micros
            .store((secs * 1_000_000.0) as u64, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
