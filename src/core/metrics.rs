//! Thread-safe counters, latencies, and wait times, ported 1:1 from
//! `core/metrics.py::MetricsCollector`.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::Clock;

#[derive(Debug, Default, Clone)]
struct ClientTally {
    sent: u64,
    received: u64,
    successful: u64,
    failed: u64,
    retried: u64,
    latencies: Vec<f64>,
    total_latency: f64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ClientSummary {
    pub sent: u64,
    pub received: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    pub avg_latency: f64,
    pub success_rate: f64,
    pub completion_rate: f64,
    pub retry_rate: f64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub avg_wait_time: f64,
    pub max_wait_time: f64,
    pub total_processed: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MetricsSummary {
    pub clients: HashMap<String, ClientSummary>,
    pub queue_stats: HashMap<String, QueueStats>,
    pub worker_avg_processing_time: HashMap<String, f64>,
    pub total_sent: u64,
    pub total_received: u64,
    pub total_successful: u64,
    pub throughput: f64,
}

struct Inner {
    clients: HashMap<String, ClientTally>,
    queue_wait_times: HashMap<String, Vec<f64>>,
    queue_processed: HashMap<String, u64>,
    worker_processing_times: HashMap<String, Vec<f64>>,
}

/// Single-mutex tally board; no critical section spans an await point
/// per spec §5's "no operation holds the mutex across I/O".
pub struct MetricsSink<C: Clock> {
    inner: Mutex<Inner>,
    clock: C,
    start: f64,
}

impl<C: Clock> MetricsSink<C> {
    pub fn new(clock: C) -> Self {
        let start = clock.now();
        Self {
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                queue_wait_times: HashMap::new(),
                queue_processed: HashMap::new(),
                worker_processing_times: HashMap::new(),
            }),
            clock,
            start,
        }
    }

    pub async fn record_sent(&self, client_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.clients.entry(client_id.to_string()).or_default().sent += 1;
    }

    pub async fn record_retry(&self, client_id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .clients
            .entry(client_id.to_string())
            .or_default()
            .retried += 1;
    }

    pub async fn record_success(&self, client_id: &str, latency: f64) {
        let mut inner = self.inner.lock().await;
        let tally = inner.clients.entry(client_id.to_string()).or_default();
        tally.received += 1;
        tally.successful += 1;
        tally.latencies.push(latency);
        tally.total_latency += latency;
    }

    pub async fn record_failure(&self, client_id: &str, latency: f64) {
        let mut inner = self.inner.lock().await;
        let tally = inner.clients.entry(client_id.to_string()).or_default();
        tally.received += 1;
        tally.failed += 1;
        tally.latencies.push(latency);
        tally.total_latency += latency;
    }

    pub async fn record_queue_wait(&self, queue_id: &str, wait: f64) {
        let mut inner = self.inner.lock().await;
        inner
            .queue_wait_times
            .entry(queue_id.to_string())
            .or_default()
            .push(wait);
        *inner.queue_processed.entry(queue_id.to_string()).or_default() += 1;
    }

    pub async fn record_processing_time(&self, worker_id: &str, elapsed: f64) {
        let mut inner = self.inner.lock().await;
        inner
            .worker_processing_times
            .entry(worker_id.to_string())
            .or_default()
            .push(elapsed);
    }

    pub async fn queue_stats(&self, queue_id: &str) -> QueueStats {
        let inner = self.inner.lock().await;
        let waits = inner
            .queue_wait_times
            .get(queue_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let avg_wait_time = if waits.is_empty() {
            0.0
        } else {
            waits.iter().sum::<f64>() / waits.len() as f64
        };
        let max_wait_time = waits.iter().cloned().fold(0.0_f64, f64::max);
        let total_processed = inner.queue_processed.get(queue_id).copied().unwrap_or(0);
        QueueStats {
            avg_wait_time,
            max_wait_time,
            total_processed,
        }
    }

    pub async fn get_summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().await;
        let elapsed = (self.clock.now() - self.start).max(f64::EPSILON);

        let mut clients = HashMap::new();
        let mut total_sent = 0;
        let mut total_received = 0;
        let mut total_successful = 0;

        for (id, tally) in inner.clients.iter() {
            let avg_latency = if tally.received > 0 {
                tally.total_latency / tally.received as f64
            } else {
                0.0
            };
            let success_rate = if tally.received > 0 {
                tally.successful as f64 / tally.received as f64
            } else {
                0.0
            };
            let completion_rate = if tally.sent > 0 {
                tally.received as f64 / tally.sent as f64
            } else {
                0.0
            };
            let retry_rate = if tally.sent > 0 {
                tally.retried as f64 / tally.sent as f64
            } else {
                0.0
            };

            total_sent += tally.sent;
            total_received += tally.received;
            total_successful += tally.successful;

            clients.insert(
                id.clone(),
                ClientSummary {
                    sent: tally.sent,
                    received: tally.received,
                    successful: tally.successful,
                    failed: tally.failed,
                    retried: tally.retried,
                    avg_latency,
                    success_rate,
                    completion_rate,
                    retry_rate,
                },
            );
        }

        let queue_stats = inner
            .queue_wait_times
            .keys()
            .chain(inner.queue_processed.keys())
            .map(|id| id.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .map(|id| {
                let waits = inner.queue_wait_times.get(&id).map(Vec::as_slice).unwrap_or(&[]);
                let avg_wait_time = if waits.is_empty() {
                    0.0
                } else {
                    waits.iter().sum::<f64>() / waits.len() as f64
                };
                let max_wait_time = waits.iter().cloned().fold(0.0_f64, f64::max);
                let total_processed = inner.queue_processed.get(&id).copied().unwrap_or(0);
                (
                    id,
                    QueueStats {
                        avg_wait_time,
                        max_wait_time,
                        total_processed,
                    },
                )
            })
            .collect();

        let worker_avg_processing_time = inner
            .worker_processing_times
            .iter()
            .map(|(id, samples)| {
                let avg = if samples.is_empty() {
                    0.0
                } else {
                    samples.iter().sum::<f64>() / samples.len() as f64
                };
                (id.clone(), avg)
            })
            .collect();

        MetricsSummary {
            clients,
            queue_stats,
            worker_avg_processing_time,
            total_sent,
            total_received,
            total_successful,
            throughput: total_successful as f64 / elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    #[tokio::test]
    async fn derived_rates_match_raw_tallies() {
        let clock = VirtualClock::new();
        let sink = MetricsSink::new(clock.clone());

        sink.record_sent("K1").await;
        sink.record_sent("K1").await;
        sink.record_success("K1", 0.5).await;
        sink.record_retry("K1").await;

        clock.advance(std::time::Duration::from_secs(1));
        let summary = sink.get_summary().await;
        let k1 = &summary.clients["K1"];

        assert_eq!(k1.sent, 2);
        assert_eq!(k1.received, 1);
        assert_eq!(k1.successful, 1);
        assert!((k1.avg_latency - 0.5).abs() < 1e-9);
        assert!((k1.completion_rate - 0.5).abs() < 1e-9);
        assert!((k1.retry_rate - 0.5).abs() < 1e-9);
        assert!((summary.throughput - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn queue_stats_track_wait_window_and_count() {
        let clock = VirtualClock::new();
        let sink = MetricsSink::new(clock.clone());

        sink.record_queue_wait("Q1", 0.1).await;
        sink.record_queue_wait("Q1", 0.3).await;

        let stats = sink.queue_stats("Q1").await;
        assert_eq!(stats.total_processed, 2);
        assert!((stats.avg_wait_time - 0.2).abs() < 1e-9);
        assert!((stats.max_wait_time - 0.3).abs() < 1e-9);
    }
}
