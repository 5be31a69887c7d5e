//! Unit-of-work server: stage-one (`can_fail=false`, always forwards)
//! and stage-two (`can_fail=true`, may fail/idle-out, replies to the
//! client) are the same struct parameterized by `can_fail`, matching
//! `nodes/processor.py::ProcessorNode`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Map;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::core::metrics::MetricsSink;
use crate::distributions::{self, ServiceTimeConfig};
use crate::error::{RelaySimError, Result};
use crate::message::{Message, Request, Response, ResponseStatus};
use crate::node::base::NodeStatus;
use crate::transport::{self, Peer};

pub struct Worker<C: Clock> {
    pub id: String,
    can_fail: bool,
    failure_probability: f64,
    idle_timeout: Duration,
    service_time: ServiceTimeConfig,
    forward_targets: Vec<Arc<Peer>>,
    status: Mutex<NodeStatus>,
    idle_since: Mutex<f64>,
    rng: Arc<Mutex<StdRng>>,
    clock: C,
    metrics: Arc<MetricsSink<C>>,
}

impl<C: Clock> Worker<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        can_fail: bool,
        failure_probability: f64,
        idle_timeout: Duration,
        service_time: ServiceTimeConfig,
        forward_targets: Vec<Arc<Peer>>,
        rng: Arc<Mutex<StdRng>>,
        clock: C,
        metrics: Arc<MetricsSink<C>>,
    ) -> Self {
        let now = clock.now();
        Self {
            id: id.into(),
            can_fail,
            failure_probability,
            idle_timeout,
            service_time,
            forward_targets,
            status: Mutex::new(NodeStatus::Idle),
            idle_since: Mutex::new(now),
            rng,
            clock,
            metrics,
        }
    }

    pub async fn status(&self) -> NodeStatus {
        *self.status.lock().await
    }

    /// Externally invoked; brings a `DOWN` worker back to `IDLE`.
    /// Whether this is ever called is a topology decision.
    pub async fn recover(&self) {
        let mut status = self.status.lock().await;
        if *status == NodeStatus::Down {
            *status = NodeStatus::Idle;
            *self.idle_since.lock().await = self.clock.now();
        }
    }

    /// Supervising check: an `IDLE` worker past `IDLE_TIMEOUT` self-downs.
    /// No-op for stage-one workers (`can_fail = false`).
    pub async fn check_idle_timeout(&self) {
        if !self.can_fail {
            return;
        }
        let mut status = self.status.lock().await;
        if *status == NodeStatus::Idle {
            let idle_since = *self.idle_since.lock().await;
            if self.clock.now() - idle_since > self.idle_timeout.as_secs_f64() {
                *status = NodeStatus::Down;
                debug!(worker = %self.id, "idle timeout, transitioning to DOWN");
            }
        }
    }

    pub async fn handle_request(&self, request: Request) -> Result<()> {
        if *self.status.lock().await == NodeStatus::Down {
            return self.reply(&request, ResponseStatus::NodeDown, 0.0).await;
        }

        *self.status.lock().await = NodeStatus::Busy;
        *self.idle_since.lock().await = self.clock.now();

        if self.can_fail {
            let draw: f64 = self.rng.lock().await.gen();
            if draw < self.failure_probability {
                *self.status.lock().await = NodeStatus::Down;
                warn!(worker = %self.id, "stochastic failure, transitioning to DOWN");
                return self.reply(&request, ResponseStatus::NodeDown, 0.0).await;
            }
        }

        let service_time = {
            let mut rng = self.rng.lock().await;
            distributions::generate(&self.service_time, &mut *rng)
        };
        tokio::time::sleep(Duration::from_secs_f64(service_time)).await;

        *self.status.lock().await = NodeStatus::Idle;
        *self.idle_since.lock().await = self.clock.now();
        self.metrics
            .record_processing_time(&self.id, service_time)
            .await;

        if self.forward_targets.is_empty() {
            self.reply(&request, ResponseStatus::Success, service_time).await
        } else {
            let message = Message::Request(request);
            for target in &self.forward_targets {
                if let Err(e) = target.send(&message).await {
                    warn!(worker = %self.id, error = %e, "forward failed");
                }
            }
            Ok(())
        }
    }

    async fn reply(
        &self,
        request: &Request,
        status: ResponseStatus,
        processing_time: f64,
    ) -> Result<()> {
        let addr = client_addr(request)?;
        let response = Response {
            request_id: request.request_id,
            status,
            processor_id: self.id.clone(),
            result: Map::new(),
            processing_time,
            created_at: self.clock.now(),
        };
        transport::send_once(addr, &Message::Response(response)).await
    }
}

fn client_addr(request: &Request) -> Result<SocketAddr> {
    let host = request
        .payload
        .get("client_host")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RelaySimError::Config("request payload missing client_host".into()))?;
    let port = request
        .payload
        .get("client_port")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RelaySimError::Config("request payload missing client_port".into()))?;
    format!("{host}:{port}")
        .parse()
        .map_err(|_| RelaySimError::Config(format!("invalid client address {host}:{port}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::message::RequestClass;
    use rand::SeedableRng;

    fn request_with_addr(addr: SocketAddr) -> Request {
        let mut request = Request::new(RequestClass::Z1, "K1", 0.0);
        request
            .payload
            .insert("client_host".into(), addr.ip().to_string().into());
        request
            .payload
            .insert("client_port".into(), addr.port().into());
        request
    }

    #[tokio::test]
    async fn down_worker_replies_node_down_without_running_service() {
        let clock = VirtualClock::new();
        let metrics = Arc::new(MetricsSink::new(clock.clone()));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(1)));
        let worker = Worker::new(
            "P21",
            true,
            0.0,
            Duration::from_secs(60),
            ServiceTimeConfig::default(),
            vec![],
            rng,
            clock,
            metrics,
        );
        *worker.status.lock().await = NodeStatus::Down;

        // no listener bound at this address: reply will fail to connect,
        // which is still the expected behavior being exercised (the
        // worker attempted a NODE_DOWN reply rather than running service).
        let request = request_with_addr("127.0.0.1:1".parse().unwrap());
        assert!(worker.handle_request(request).await.is_err());
    }

    #[tokio::test]
    async fn idle_timeout_downs_a_can_fail_worker() {
        let clock = VirtualClock::new();
        let metrics = Arc::new(MetricsSink::new(clock.clone()));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(1)));
        let worker = Worker::new(
            "P21",
            true,
            0.0,
            Duration::from_secs(10),
            ServiceTimeConfig::default(),
            vec![],
            rng,
            clock.clone(),
            metrics,
        );
        clock.advance(Duration::from_secs(11));
        worker.check_idle_timeout().await;
        assert_eq!(worker.status().await, NodeStatus::Down);
    }

    #[tokio::test]
    async fn idle_timeout_never_applies_to_a_stage_one_worker() {
        let clock = VirtualClock::new();
        let metrics = Arc::new(MetricsSink::new(clock.clone()));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(1)));
        let worker = Worker::new(
            "P11",
            false,
            0.0,
            Duration::from_secs(10),
            ServiceTimeConfig::default(),
            vec![],
            rng,
            clock.clone(),
            metrics,
        );
        clock.advance(Duration::from_secs(1000));
        worker.check_idle_timeout().await;
        assert_eq!(worker.status().await, NodeStatus::Idle);
    }

    #[tokio::test]
    async fn recover_brings_a_down_worker_back_to_idle() {
        let clock = VirtualClock::new();
        let metrics = Arc::new(MetricsSink::new(clock.clone()));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(1)));
        let worker = Worker::new(
            "P21",
            true,
            0.0,
            Duration::from_secs(10),
            ServiceTimeConfig::default(),
            vec![],
            rng,
            clock,
            metrics,
        );
        *worker.status.lock().await = NodeStatus::Down;
        worker.recover().await;
        assert_eq!(worker.status().await, NodeStatus::Idle);
    }
}
