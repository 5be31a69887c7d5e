//! Request generator + per-request quorum/retry/timeout state machine,
//! ported from `nodes/client.py::ClientNode`.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Map;
use tokio::sync::{watch, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::core::metrics::MetricsSink;
use crate::message::{Message, Request, RequestClass, Response, ResponseStatus};
use crate::transport::Peer;

struct PendingRequest {
    expected_set: HashSet<String>,
    received_set: HashSet<String>,
    sent_time: f64,
    retry_count: u32,
    request: Request,
}

pub struct Client<C: Clock> {
    pub id: String,
    allowed_classes: Vec<RequestClass>,
    request_interval: Duration,
    expected_set: HashSet<String>,
    max_retries: u32,
    request_timeout: Duration,
    dispatch_peer: Arc<Peer>,
    listen_addr: SocketAddr,
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
    rng: Arc<Mutex<StdRng>>,
    clock: C,
    metrics: Arc<MetricsSink<C>>,
}

impl<C: Clock> Client<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        allowed_classes: Vec<RequestClass>,
        request_interval: Duration,
        expected_set: HashSet<String>,
        max_retries: u32,
        request_timeout: Duration,
        dispatch_peer: Arc<Peer>,
        listen_addr: SocketAddr,
        rng: Arc<Mutex<StdRng>>,
        clock: C,
        metrics: Arc<MetricsSink<C>>,
    ) -> Self {
        Self {
            id: id.into(),
            allowed_classes,
            request_interval,
            expected_set,
            max_retries,
            request_timeout,
            dispatch_peer,
            listen_addr,
            pending: Mutex::new(HashMap::new()),
            rng,
            clock,
            metrics,
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Picks a class uniformly from `allowed_classes`, embeds this
    /// client's reply address, records the pending record, and sends
    /// without awaiting a reply.
    async fn generate_request(&self) {
        let class = {
            let mut rng = self.rng.lock().await;
            *self
                .allowed_classes
                .choose(&mut *rng)
                .expect("a client always has at least one allowed class")
        };

        let now = self.clock.now();
        let mut request = Request::new(class, self.id.clone(), now);
        let mut payload = Map::new();
        payload.insert("client_host".into(), self.listen_addr.ip().to_string().into());
        payload.insert("client_port".into(), self.listen_addr.port().into());
        payload.insert("timestamp".into(), now.into());
        request.payload = payload;

        let pending = PendingRequest {
            expected_set: self.expected_set.clone(),
            received_set: HashSet::new(),
            sent_time: now,
            retry_count: 0,
            request: request.clone(),
        };
        self.pending.lock().await.insert(request.request_id, pending);

        if self.dispatch_peer.send(&Message::Request(request)).await.is_ok() {
            self.metrics.record_sent(&self.id).await;
        }
    }

    pub async fn generator_loop(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.request_interval) => {
                    self.generate_request().await;
                }
            }
        }
    }

    /// If `m.request_id` is not pending: drop. `SUCCESS` adds to the
    /// received set (idempotent under duplicates) and completes the
    /// request on quorum; anything else is a lane failure.
    pub async fn handle_inbound(&self, response: Response) {
        let mut pending = self.pending.lock().await;
        let Some(record) = pending.get_mut(&response.request_id) else {
            debug!(client = %self.id, request_id = %response.request_id, "dropping response for unknown request");
            return;
        };

        if response.status == ResponseStatus::Success {
            record.received_set.insert(response.processor_id);
            if record.received_set == record.expected_set {
                let latency = self.clock.now() - record.sent_time;
                pending.remove(&response.request_id);
                drop(pending);
                self.metrics.record_success(&self.id, latency).await;
            }
        } else {
            self.fail_lane(&mut pending, response.request_id).await;
        }
    }

    /// Treats a pending record as having suffered a lane failure:
    /// retries (clearing `received_set`, resetting `sent_time`) while
    /// under `max_retries`, else records a permanent failure.
    async fn fail_lane(&self, pending: &mut HashMap<Uuid, PendingRequest>, request_id: Uuid) {
        let Some(record) = pending.get_mut(&request_id) else {
            return;
        };

        if record.retry_count < self.max_retries {
            record.retry_count += 1;
            record.received_set.clear();
            record.sent_time = self.clock.now();
            let resend = record.request.clone();
            self.metrics.record_retry(&self.id).await;
            let _ = self.dispatch_peer.send(&Message::Request(resend)).await;
        } else {
            let latency = self.clock.now() - record.sent_time;
            pending.remove(&request_id);
            self.metrics.record_failure(&self.id, latency).await;
        }
    }

    /// Runs every 1s; any pending record past `request_timeout` is
    /// treated exactly as a lane failure.
    pub async fn timeout_sweep_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.sweep_timeouts().await;
                }
            }
        }
    }

    async fn sweep_timeouts(&self) {
        let now = self.clock.now();
        let timeout = self.request_timeout.as_secs_f64();
        let mut pending = self.pending.lock().await;
        let expired: Vec<Uuid> = pending
            .iter()
            .filter(|(_, record)| now - record.sent_time > timeout)
            .map(|(id, _)| *id)
            .collect();
        for request_id in expired {
            self.fail_lane(&mut pending, request_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use rand::SeedableRng;

    fn make_client(
        expected: &[&str],
        max_retries: u32,
        clock: VirtualClock,
    ) -> Client<VirtualClock> {
        let metrics = Arc::new(MetricsSink::new(clock.clone()));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(1)));
        let peer = Peer::new("127.0.0.1:1".parse().unwrap());
        Client::new(
            "K1",
            vec![RequestClass::Z1],
            Duration::from_millis(10),
            expected.iter().map(|s| s.to_string()).collect(),
            max_retries,
            Duration::from_secs(15),
            peer,
            "127.0.0.1:9000".parse().unwrap(),
            rng,
            clock,
            metrics,
        )
    }

    fn response_for(request_id: Uuid, status: ResponseStatus, processor_id: &str) -> Response {
        Response {
            request_id,
            status,
            processor_id: processor_id.to_string(),
            result: Map::new(),
            processing_time: 0.0,
            created_at: 0.0,
        }
    }

    #[tokio::test]
    async fn quorum_completes_only_when_all_three_lanes_succeed() {
        let clock = VirtualClock::new();
        let client = make_client(&["P21", "P22", "P23"], 2, clock);
        let request = Request::new(RequestClass::Z1, "K1", 0.0);
        let id = request.request_id;
        client.pending.lock().await.insert(
            id,
            PendingRequest {
                expected_set: ["P21", "P22", "P23"].iter().map(|s| s.to_string()).collect(),
                received_set: HashSet::new(),
                sent_time: 0.0,
                retry_count: 0,
                request,
            },
        );

        client.handle_inbound(response_for(id, ResponseStatus::Success, "P21")).await;
        assert_eq!(client.pending_count().await, 1);
        client.handle_inbound(response_for(id, ResponseStatus::Success, "P22")).await;
        assert_eq!(client.pending_count().await, 1);
        client.handle_inbound(response_for(id, ResponseStatus::Success, "P23")).await;
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_success_from_same_processor_is_idempotent() {
        let clock = VirtualClock::new();
        let client = make_client(&["P21", "P22"], 2, clock);
        let request = Request::new(RequestClass::Z1, "K1", 0.0);
        let id = request.request_id;
        client.pending.lock().await.insert(
            id,
            PendingRequest {
                expected_set: ["P21", "P22"].iter().map(|s| s.to_string()).collect(),
                received_set: HashSet::new(),
                sent_time: 0.0,
                retry_count: 0,
                request,
            },
        );

        client.handle_inbound(response_for(id, ResponseStatus::Success, "P21")).await;
        client.handle_inbound(response_for(id, ResponseStatus::Success, "P21")).await;
        assert_eq!(client.pending_count().await, 1);
    }

    #[tokio::test]
    async fn node_down_triggers_retry_then_permanent_failure() {
        let clock = VirtualClock::new();
        let client = make_client(&["P21"], 1, clock);
        let request = Request::new(RequestClass::Z1, "K1", 0.0);
        let id = request.request_id;
        client.pending.lock().await.insert(
            id,
            PendingRequest {
                expected_set: ["P21"].iter().map(|s| s.to_string()).collect(),
                received_set: HashSet::new(),
                sent_time: 0.0,
                retry_count: 0,
                request,
            },
        );

        client.handle_inbound(response_for(id, ResponseStatus::NodeDown, "P21")).await;
        assert_eq!(client.pending.lock().await.get(&id).unwrap().retry_count, 1);

        client.handle_inbound(response_for(id, ResponseStatus::NodeDown, "P21")).await;
        assert_eq!(client.pending_count().await, 0);
    }

    #[tokio::test]
    async fn timeout_sweep_retries_a_stale_pending_request() {
        let clock = VirtualClock::new();
        let client = make_client(&["P21"], 2, clock.clone());
        let request = Request::new(RequestClass::Z1, "K1", 0.0);
        let id = request.request_id;
        client.pending.lock().await.insert(
            id,
            PendingRequest {
                expected_set: ["P21"].iter().map(|s| s.to_string()).collect(),
                received_set: HashSet::new(),
                sent_time: 0.0,
                retry_count: 0,
                request,
            },
        );

        clock.advance(Duration::from_secs(16));
        client.sweep_timeouts().await;
        assert_eq!(client.pending.lock().await.get(&id).unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn response_for_unknown_request_id_is_dropped_without_panicking() {
        let clock = VirtualClock::new();
        let client = make_client(&["P21"], 2, clock);
        client
            .handle_inbound(response_for(Uuid::new_v4(), ResponseStatus::Success, "P21"))
            .await;
        assert_eq!(client.pending_count().await, 0);
    }
}
