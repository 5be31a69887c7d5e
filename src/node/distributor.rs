//! Fan-out replicator to N downstream queues, ported 1:1 from
//! `nodes/distributor.py::Distributor`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::message::{Message, Request};
use crate::transport::Peer;

pub struct Distributor {
    pub id: String,
    downstream: Vec<Arc<Peer>>,
    distributed: AtomicU64,
}

impl Distributor {
    pub fn new(id: impl Into<String>, downstream: Vec<Arc<Peer>>) -> Self {
        Self {
            id: id.into(),
            downstream,
            distributed: AtomicU64::new(0),
        }
    }

    /// Sends `request` to every connected downstream concurrently.
    /// Records a distribution count iff at least one send succeeded.
    /// No retry, no ordering between downstreams: a partial fan-out is
    /// silently resolved by client-side timeout + retry.
    pub async fn handle_inbound(&self, request: Request) {
        let message = Message::Request(request);
        let sends = self.downstream.iter().map(|peer| {
            let peer = peer.clone();
            let message = message.clone();
            async move { peer.send(&message).await }
        });
        let results = futures::future::join_all(sends).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        if succeeded > 0 {
            self.distributed.fetch_add(1, Ordering::SeqCst);
        }
        if succeeded < self.downstream.len() {
            debug!(
                distributor = %self.id,
                succeeded,
                total = self.downstream.len(),
                "partial fan-out"
            );
        }
    }

    pub fn distributed_count(&self) -> u64 {
        self.distributed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestClass;

    #[tokio::test]
    async fn fan_out_to_zero_downstreams_never_counts_a_distribution() {
        let distributor = Distributor::new("D", vec![]);
        distributor
            .handle_inbound(Request::new(RequestClass::Z1, "K1", 0.0))
            .await;
        assert_eq!(distributor.distributed_count(), 0);
    }
}
