//! Topology builder and lifecycle coordinator, ported from
//! `simulation/simulation_engine.py::SimulationEngine`.
//!
//! Builds the reference topology: one dispatching queue (`Q1`) with an
//! autoscaled stage-one worker pool per class, a distributor (`D`)
//! fanning out to three stage-two lanes (`Q21..Q23` each with one
//! `P21..P23` worker), and two clients (`K1`, `K2`) generating load.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, RealClock};
use crate::config::SimConfig;
use crate::core::metrics::{MetricsSink, MetricsSummary};
use crate::core::scaling_monitor::{ScalingActions, ScalingConfig, ScalingMonitor};
use crate::distributions::ServiceTimeConfig;
use crate::error::Result;
use crate::message::{Message, RequestClass};
use crate::node::base::Lifecycle;
use crate::node::client::Client;
use crate::node::distributor::Distributor;
use crate::node::queue_node::QueueNode;
use crate::node::worker::Worker;
use crate::transport::{self, Peer};

/// Static port assignments relative to `tcp_port_base`. Stage-one
/// workers — initial and autoscaled alike, they're structurally
/// identical — all take ports from `DYNAMIC_BASE` upward via
/// `StageOneScaler::next_port`.
mod ports {
    pub const Q1: u16 = 0;
    pub const DISTRIBUTOR: u16 = 1;
    pub const Q2X: [u16; 3] = [2, 3, 4];
    pub const P2X: [u16; 3] = [8, 9, 10];
    pub const KX_REPLY: [u16; 2] = [11, 12];
    pub const DYNAMIC_BASE: u16 = 100;
}

async fn forward<F, Fut>(
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
    mut on_message: F,
) -> Result<SocketAddr>
where
    F: FnMut(Message) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (tx, mut rx) = mpsc::channel(1024);
    let bound = transport::spawn_listener(addr, tx, shutdown).await?;
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            on_message(msg).await;
        }
    });
    Ok(bound)
}

struct StageOneScaler {
    queue: Arc<QueueNode<RealClock>>,
    distributor_peer: Arc<Peer>,
    service_time: ServiceTimeConfig,
    rng: Arc<Mutex<StdRng>>,
    clock: RealClock,
    metrics: Arc<MetricsSink<RealClock>>,
    host: std::net::IpAddr,
    next_port: AtomicU16,
    shutdown: watch::Receiver<bool>,
    insertion_order: Mutex<HashMap<RequestClass, Vec<String>>>,
}

impl StageOneScaler {
    async fn spawn_worker(&self, class: RequestClass) -> Result<String> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        let addr = SocketAddr::new(self.host, port);
        let id = format!("P1.{}.{}", class, port);

        let worker = Arc::new(Worker::new(
            id.clone(),
            false,
            0.0,
            std::time::Duration::from_secs(u64::MAX),
            self.service_time,
            vec![self.distributor_peer.clone()],
            self.rng.clone(),
            self.clock.clone(),
            self.metrics.clone(),
        ));

        let worker_for_loop = worker.clone();
        let bound = forward(addr, self.shutdown.clone(), move |msg| {
            let worker = worker_for_loop.clone();
            async move {
                if let Message::Request(request) = msg {
                    let _ = worker.handle_request(request).await;
                }
            }
        })
        .await?;

        self.queue.add_processor(class, id.clone(), bound).await?;
        self.insertion_order
            .lock()
            .await
            .entry(class)
            .or_default()
            .push(id.clone());
        Ok(id)
    }
}

#[async_trait]
impl ScalingActions for StageOneScaler {
    async fn scale_up(&self, class: RequestClass) -> Result<()> {
        self.spawn_worker(class).await?;
        Ok(())
    }

    async fn scale_down(&self, class: RequestClass) -> Result<()> {
        let mut order = self.insertion_order.lock().await;
        if let Some(ids) = order.get_mut(&class) {
            if let Some(id) = ids.pop() {
                self.queue.remove_processor(class, &id).await;
            }
        }
        Ok(())
    }
}

pub struct SimulationEngine {
    config: Arc<SimConfig>,
    metrics: Arc<MetricsSink<RealClock>>,
    q1: Arc<QueueNode<RealClock>>,
    stage_two_queues: Vec<Arc<QueueNode<RealClock>>>,
    distributor: Arc<Distributor>,
    scaler: Arc<StageOneScaler>,
    scaling_monitor: Arc<ScalingMonitor<RealClock>>,
    clients: Vec<Arc<Client<RealClock>>>,
    lifecycle: Lifecycle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulationEngine {
    pub async fn setup(config: SimConfig) -> Result<Self> {
        let config = Arc::new(config);
        let clock = RealClock::default();
        let metrics = Arc::new(MetricsSink::new(clock.clone()));
        let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(config.seed)));
        let host: std::net::IpAddr = "127.0.0.1".parse().unwrap();
        let (lifecycle, shutdown) = Lifecycle::new();

        let q1 = Arc::new(QueueNode::new("Q1", clock.clone(), metrics.clone()));
        forward(
            SocketAddr::new(host, config.tcp_port_base + ports::Q1),
            shutdown.clone(),
            {
                let q1 = q1.clone();
                move |msg| {
                    let q1 = q1.clone();
                    async move {
                        if let Message::Request(request) = msg {
                            q1.handle_inbound(request).await;
                        }
                    }
                }
            },
        )
        .await?;

        // Stage-two lanes: one queue + one worker per lane.
        let mut stage_two_queues = Vec::with_capacity(3);
        let mut lane_peers = Vec::with_capacity(3);
        for (i, &port_offset) in ports::Q2X.iter().enumerate() {
            let queue_id = format!("Q2{}", i + 1);
            let queue = Arc::new(QueueNode::new(queue_id.clone(), clock.clone(), metrics.clone()));
            let addr = forward(
                SocketAddr::new(host, config.tcp_port_base + port_offset),
                shutdown.clone(),
                {
                    let queue = queue.clone();
                    move |msg| {
                        let queue = queue.clone();
                        async move {
                            if let Message::Request(request) = msg {
                                queue.handle_inbound(request).await;
                            }
                        }
                    }
                },
            )
            .await?;

            let worker_id = format!("P2{}", i + 1);
            let worker_port = ports::P2X[i];
            let worker_addr = SocketAddr::new(host, config.tcp_port_base + worker_port);
            let worker = Arc::new(Worker::new(
                worker_id.clone(),
                true,
                config.failure_probability,
                config.idle_timeout,
                config.service_time,
                vec![],
                rng.clone(),
                clock.clone(),
                metrics.clone(),
            ));
            let worker_bound = forward(worker_addr, shutdown.clone(), {
                let worker = worker.clone();
                move |msg| {
                    let worker = worker.clone();
                    async move {
                        if let Message::Request(request) = msg {
                            let _ = worker.handle_request(request).await;
                        }
                    }
                }
            })
            .await?;

            queue.add_processor(RequestClass::Z1, worker_id.clone(), worker_bound).await?;
            queue.register_existing_processor(RequestClass::Z2, worker_id.clone()).await;
            queue.register_existing_processor(RequestClass::Z3, worker_id.clone()).await;

            lane_peers.push({
                let peer = Peer::new(addr);
                peer.connect().await?;
                peer
            });
            stage_two_queues.push(queue);
        }

        let distributor = Arc::new(Distributor::new("D", lane_peers));
        let distributor_addr = SocketAddr::new(host, config.tcp_port_base + ports::DISTRIBUTOR);
        forward(distributor_addr, shutdown.clone(), {
            let distributor = distributor.clone();
            move |msg| {
                let distributor = distributor.clone();
                async move {
                    if let Message::Request(request) = msg {
                        distributor.handle_inbound(request).await;
                    }
                }
            }
        })
        .await?;
        let distributor_peer = Peer::new(distributor_addr);
        distributor_peer.connect().await?;

        let scaler = Arc::new(StageOneScaler {
            queue: q1.clone(),
            distributor_peer,
            service_time: config.service_time,
            rng: rng.clone(),
            clock: clock.clone(),
            metrics: metrics.clone(),
            host,
            next_port: AtomicU16::new(config.tcp_port_base + ports::DYNAMIC_BASE),
            shutdown: shutdown.clone(),
            insertion_order: Mutex::new(HashMap::new()),
        });

        let mut initial_counts = HashMap::new();
        for class in RequestClass::ALL.iter() {
            scaler.spawn_worker(*class).await?;
            initial_counts.insert(*class, 1);
        }

        let scaling_monitor = Arc::new(ScalingMonitor::new(
            clock.clone(),
            ScalingConfig {
                avg_wait_up: config.avg_wait_up,
                scale_down: config.scale_down,
                cooldown: config.cooldown.as_secs_f64(),
                min_per_class: config.min_per_class,
                max_per_class: config.max_per_class,
                tick_interval: config.scaling_tick_interval,
            },
            initial_counts,
        ));

        let expected_set: HashSet<String> =
            (1..=3).map(|i| format!("P2{i}")).collect();
        let q1_dispatch_addr = SocketAddr::new(host, config.tcp_port_base + ports::Q1);

        let mut clients = Vec::with_capacity(2);
        for (i, &reply_port) in ports::KX_REPLY.iter().enumerate() {
            let client_id = format!("K{}", i + 1);
            let reply_addr = SocketAddr::new(host, config.tcp_port_base + reply_port);

            let dispatch_peer = Peer::new(q1_dispatch_addr);
            dispatch_peer.connect().await?;

            let client = Arc::new(Client::new(
                client_id.clone(),
                RequestClass::ALL.to_vec(),
                std::time::Duration::from_secs_f64(1.0 / config.rate.max(0.001)),
                expected_set.clone(),
                config.max_retries,
                config.client_request_timeout,
                dispatch_peer,
                reply_addr,
                rng.clone(),
                clock.clone(),
                metrics.clone(),
            ));

            forward(reply_addr, shutdown.clone(), {
                let client = client.clone();
                move |msg| {
                    let client = client.clone();
                    async move {
                        if let Message::Response(response) = msg {
                            client.handle_inbound(response).await;
                        }
                    }
                }
            })
            .await?;

            clients.push(client);
        }

        info!(clients = clients.len(), "topology ready");

        Ok(Self {
            config,
            metrics,
            q1,
            stage_two_queues,
            distributor,
            scaler,
            scaling_monitor,
            clients,
            lifecycle,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;

        tasks.push(tokio::spawn({
            let q1 = self.q1.clone();
            let shutdown = self.lifecycle.subscribe();
            async move { q1.run(shutdown).await }
        }));

        for queue in &self.stage_two_queues {
            tasks.push(tokio::spawn({
                let queue = queue.clone();
                let shutdown = self.lifecycle.subscribe();
                async move { queue.run(shutdown).await }
            }));
        }

        tasks.push(tokio::spawn({
            let monitor = self.scaling_monitor.clone();
            let queue = self.q1.priority_queue();
            let scaler = self.scaler.clone();
            let shutdown = self.lifecycle.subscribe();
            async move { monitor.run(queue.as_ref(), scaler.as_ref(), shutdown).await }
        }));

        for client in &self.clients {
            tasks.push(tokio::spawn({
                let client = client.clone();
                let shutdown = self.lifecycle.subscribe();
                async move { client.generator_loop(shutdown).await }
            }));
            tasks.push(tokio::spawn({
                let client = client.clone();
                let shutdown = self.lifecycle.subscribe();
                async move { client.timeout_sweep_loop(shutdown).await }
            }));
        }
    }

    /// Runs for `config.duration`, then stops in shutdown order:
    /// clients → monitor → dispatching queue → stage-one workers →
    /// distributor → stage-two queues → stage-two workers.
    pub async fn run(&self) -> Result<()> {
        self.start().await;
        tokio::time::sleep(self.config.duration).await;
        self.stop().await;
        Ok(())
    }

    pub async fn stop(&self) {
        self.lifecycle.stop();
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
    }

    pub async fn get_results(&self) -> MetricsSummary {
        self.metrics.get_summary().await
    }

    pub fn distributed_count(&self) -> u64 {
        self.distributor.distributed_count()
    }

    pub async fn scaling_status(&self) -> (HashMap<RequestClass, usize>, HashMap<RequestClass, f64>) {
        (
            self.scaling_monitor.processor_counts().await,
            self.scaling_monitor.last_scale_times().await,
        )
    }

    pub fn config(&self) -> Arc<SimConfig> {
        self.config.clone()
    }
}
