//! Dispatching queue node: a `PriorityQueue` plus one `RoundRobin` per
//! class, and the dispatch loop that binds dequeued requests to a
//! worker. Ported from `nodes/queue_node.py::QueueNode`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::core::metrics::MetricsSink;
use crate::core::priority_queue::PriorityQueue;
use crate::core::round_robin::RoundRobin;
use crate::error::Result;
use crate::message::{Message, Request, RequestClass};
use crate::transport::Peer;

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(10);
const NO_WORKER_BACKOFF: Duration = Duration::from_millis(100);

struct ClassRoundRobins {
    z1: RoundRobin,
    z2: RoundRobin,
    z3: RoundRobin,
}

impl ClassRoundRobins {
    fn get(&self, class: RequestClass) -> &RoundRobin {
        match class {
            RequestClass::Z1 => &self.z1,
            RequestClass::Z2 => &self.z2,
            RequestClass::Z3 => &self.z3,
        }
    }
}

pub struct QueueNode<C: Clock + Clone> {
    pub id: String,
    queue: Arc<PriorityQueue<C>>,
    round_robins: ClassRoundRobins,
    peers: Mutex<HashMap<String, Arc<Peer>>>,
    metrics: Arc<MetricsSink<C>>,
    clock: C,
}

impl<C: Clock + Clone> QueueNode<C> {
    pub fn new(id: impl Into<String>, clock: C, metrics: Arc<MetricsSink<C>>) -> Self {
        Self {
            id: id.into(),
            queue: Arc::new(PriorityQueue::new(clock.clone())),
            round_robins: ClassRoundRobins {
                z1: RoundRobin::new(vec![]),
                z2: RoundRobin::new(vec![]),
                z3: RoundRobin::new(vec![]),
            },
            peers: Mutex::new(HashMap::new()),
            metrics,
            clock,
        }
    }

    pub fn priority_queue(&self) -> Arc<PriorityQueue<C>> {
        self.queue.clone()
    }

    /// Never replies synchronously; a `Request` is just enqueued.
    pub async fn handle_inbound(&self, request: Request) {
        self.queue.enqueue(request).await;
    }

    pub async fn enqueue(&self, request: Request) {
        self.queue.enqueue(request).await;
    }

    /// Opens a connection to the worker at `addr`, registers it with
    /// the class's `RoundRobin`, and makes it eligible immediately.
    pub async fn add_processor(
        &self,
        class: RequestClass,
        worker_id: impl Into<String>,
        addr: std::net::SocketAddr,
    ) -> Result<()> {
        let worker_id = worker_id.into();
        let peer = Peer::new(addr);
        peer.connect().await?;
        self.peers.lock().await.insert(worker_id.clone(), peer);
        self.round_robins.get(class).add(worker_id).await;
        Ok(())
    }

    /// Registers an already-connected processor id with another class's
    /// `RoundRobin`, without dialing a second connection. Used when one
    /// physical worker serves requests of every class (a stage-two
    /// lane's single worker, which is not partitioned by class).
    pub async fn register_existing_processor(&self, class: RequestClass, worker_id: impl Into<String>) {
        self.round_robins.get(class).add(worker_id.into()).await;
    }

    /// Closes the connection and removes the id; in-flight requests
    /// already dispatched to it are not recalled — they surface as
    /// client-side timeouts.
    pub async fn remove_processor(&self, class: RequestClass, worker_id: &str) {
        self.round_robins.get(class).remove(worker_id).await;
        if let Some(peer) = self.peers.lock().await.remove(worker_id) {
            peer.disconnect().await;
        }
    }

    async fn pick_worker(&self, class: RequestClass) -> Option<(String, Arc<Peer>)> {
        let id = self.round_robins.get(class).next().await?;
        let peer = self.peers.lock().await.get(&id).cloned()?;
        Some((id, peer))
    }

    /// Single cooperative dispatch task: empty queue backs off 10ms; no
    /// available worker re-enqueues and backs off 100ms; send failure
    /// re-enqueues and marks the target unavailable.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.queue.is_empty().await {
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_QUEUE_BACKOFF) => {}
                    changed = shutdown.changed() => { if changed.is_err() { break; } }
                }
                continue;
            }

            let Some(request) = self.queue.dequeue().await else {
                continue;
            };
            if let Some(enqueued_at) = request.enqueued_at {
                let wait = self.clock.now() - enqueued_at;
                self.metrics.record_queue_wait(&self.id, wait).await;
            }

            let class = request.class;
            match self.pick_worker(class).await {
                None => {
                    debug!(queue = %self.id, %class, "no available worker, re-enqueueing");
                    self.queue.enqueue(request).await;
                    tokio::time::sleep(NO_WORKER_BACKOFF).await;
                }
                Some((worker_id, peer)) => {
                    let message = Message::Request(request.clone());
                    if let Err(e) = peer.send(&message).await {
                        warn!(queue = %self.id, worker = %worker_id, error = %e, "dispatch send failed, re-enqueueing");
                        self.queue.enqueue(request).await;
                        self.round_robins.get(class).mark_unavailable(&worker_id).await;
                    }
                }
            }
        }
    }
}
