//! Periodic autoscaler tick loop, ported from
//! `core/scaling_monitor.py::ScalingMonitor`; tick cadence and
//! observe→decide→act shape grounded in
//! `elohim-node::pod::monitor`/`pod::decider`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

use crate::clock::Clock;
use crate::core::priority_queue::PriorityQueue;
use crate::error::Result;
use crate::message::RequestClass;

#[derive(Debug, Clone, Copy)]
pub struct ScalingConfig {
    pub avg_wait_up: f64,
    pub scale_down: f64,
    pub cooldown: f64,
    pub min_per_class: usize,
    pub max_per_class: usize,
    pub tick_interval: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            avg_wait_up: 5.0,
            scale_down: 1.5,
            cooldown: 10.0,
            min_per_class: 1,
            max_per_class: 5,
            tick_interval: Duration::from_secs(2),
        }
    }
}

/// Instantiates/terminates stage-one workers and registers them with
/// the dispatching queue's `RoundRobin` for a class. Implemented by the
/// orchestrator, invoked by the monitor.
#[async_trait]
pub trait ScalingActions: Send + Sync {
    async fn scale_up(&self, class: RequestClass) -> Result<()>;
    async fn scale_down(&self, class: RequestClass) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct ClassState {
    processor_count: usize,
    last_scale_time: f64,
}

pub struct ScalingMonitor<C: Clock> {
    clock: C,
    config: ScalingConfig,
    state: Mutex<HashMap<RequestClass, ClassState>>,
}

impl<C: Clock> ScalingMonitor<C> {
    pub fn new(clock: C, config: ScalingConfig, initial_counts: HashMap<RequestClass, usize>) -> Self {
        // Seeded `cooldown` seconds in the past (not `now`) so the first
        // tick of a class's lifetime is immediately eligible to scale,
        // matching `core/scaling_monitor.py`'s `_last_scale_time = 0`
        // against wall-clock `time.time()`.
        let start = clock.now() - config.cooldown;
        let state = RequestClass::ALL
            .iter()
            .map(|&class| {
                (
                    class,
                    ClassState {
                        processor_count: *initial_counts.get(&class).unwrap_or(&1),
                        last_scale_time: start,
                    },
                )
            })
            .collect();
        Self {
            clock,
            config,
            state: Mutex::new(state),
        }
    }

    /// One observe→decide→act pass over every class. Never returns an
    /// error: any failure from a callback is logged and swallowed so
    /// the monitor keeps ticking.
    pub async fn tick<Q: SendsAvgWait, A: ScalingActions>(&self, queue: &Q, actions: &A) {
        for class in RequestClass::ALL {
            if let Err(e) = self.tick_one(class, queue, actions).await {
                error!(%class, error = %e, "scaling monitor tick failed for class");
            }
        }
    }

    async fn tick_one<Q: SendsAvgWait, A: ScalingActions>(
        &self,
        class: RequestClass,
        queue: &Q,
        actions: &A,
    ) -> Result<()> {
        let avg_wait = queue.avg_wait(class).await;
        let now = self.clock.now();

        let mut state = self.state.lock().await;
        let entry = state.entry(class).or_insert(ClassState {
            processor_count: self.config.min_per_class,
            last_scale_time: now - self.config.cooldown,
        });
        let cooldown_elapsed = now - entry.last_scale_time >= self.config.cooldown;

        if avg_wait > self.config.avg_wait_up
            && cooldown_elapsed
            && entry.processor_count < self.config.max_per_class
        {
            actions.scale_up(class).await?;
            entry.processor_count += 1;
            entry.last_scale_time = now;
            info!(%class, count = entry.processor_count, avg_wait, "scaled up");
        } else if avg_wait < self.config.scale_down
            && cooldown_elapsed
            && entry.processor_count > self.config.min_per_class
        {
            actions.scale_down(class).await?;
            entry.processor_count -= 1;
            entry.last_scale_time = now;
            info!(%class, count = entry.processor_count, avg_wait, "scaled down");
        }

        Ok(())
    }

    pub async fn processor_counts(&self) -> HashMap<RequestClass, usize> {
        self.state
            .lock()
            .await
            .iter()
            .map(|(&class, state)| (class, state.processor_count))
            .collect()
    }

    pub async fn last_scale_times(&self) -> HashMap<RequestClass, f64> {
        self.state
            .lock()
            .await
            .iter()
            .map(|(&class, state)| (class, state.last_scale_time))
            .collect()
    }

    /// Runs the tick loop until `shutdown` is signalled.
    pub async fn run<Q: SendsAvgWait, A: ScalingActions>(
        &self,
        queue: &Q,
        actions: &A,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick(queue, actions).await;
                }
            }
        }
    }
}

/// Narrow view of `PriorityQueue` the monitor needs, so it can be
/// tested against a fake without a real dispatching queue.
#[async_trait]
pub trait SendsAvgWait: Send + Sync {
    async fn avg_wait(&self, class: RequestClass) -> f64;
}

#[async_trait]
impl<C: Clock> SendsAvgWait for PriorityQueue<C> {
    async fn avg_wait(&self, class: RequestClass) -> f64 {
        PriorityQueue::avg_wait(self, class).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    struct FixedWait(f64);

    #[async_trait]
    impl SendsAvgWait for FixedWait {
        async fn avg_wait(&self, _class: RequestClass) -> f64 {
            self.0
        }
    }

    #[derive(Default)]
    struct CountingActions {
        ups: AtomicI64,
        downs: AtomicI64,
    }

    #[async_trait]
    impl ScalingActions for CountingActions {
        async fn scale_up(&self, _class: RequestClass) -> Result<()> {
            self.ups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn scale_down(&self, _class: RequestClass) -> Result<()> {
            self.downs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn scales_up_once_past_threshold_after_cooldown() {
        use crate::clock::VirtualClock;

        let clock = VirtualClock::new();
        let config = ScalingConfig::default();
        let monitor = Arc::new(ScalingMonitor::new(clock.clone(), config, HashMap::new()));
        let queue = FixedWait(10.0);
        let actions = CountingActions::default();

        monitor.tick(&queue, &actions).await;
        assert_eq!(actions.ups.load(Ordering::SeqCst), 1);

        // within cooldown: no further scale-up even though still over threshold
        monitor.tick(&queue, &actions).await;
        assert_eq!(actions.ups.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(11));
        monitor.tick(&queue, &actions).await;
        assert_eq!(actions.ups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn scales_down_to_min_but_not_below() {
        use crate::clock::VirtualClock;

        let clock = VirtualClock::new();
        let config = ScalingConfig::default();
        let mut initial = HashMap::new();
        initial.insert(RequestClass::Z1, 1);
        let monitor = Arc::new(ScalingMonitor::new(clock.clone(), config, initial));
        let queue = FixedWait(0.1);
        let actions = CountingActions::default();

        monitor.tick(&queue, &actions).await;
        assert_eq!(actions.downs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn never_exceeds_max_per_class() {
        use crate::clock::VirtualClock;

        let clock = VirtualClock::new();
        let mut config = ScalingConfig::default();
        config.cooldown = 0.0;
        config.max_per_class = 2;
        let mut initial = HashMap::new();
        initial.insert(RequestClass::Z2, 2);
        let monitor = Arc::new(ScalingMonitor::new(clock.clone(), config, initial));
        let queue = FixedWait(10.0);
        let actions = CountingActions::default();

        monitor.tick(&queue, &actions).await;
        assert_eq!(actions.ups.load(Ordering::SeqCst), 0);
    }
}
