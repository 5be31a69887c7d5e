//! Three-class strict-priority FIFO queue, ported from
//! `core/priority_queue.py::PriorityRequestQueue`.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::message::{Request, RequestClass};

/// Wait-time samples kept per class; only the last `WAIT_WINDOW` feed
/// `avg_wait`: a bounded sliding window of the last 100 measurements.
const WAIT_WINDOW: usize = 100;

struct ClassQueue {
    requests: VecDeque<Request>,
    wait_times: VecDeque<f64>,
}

impl ClassQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            wait_times: VecDeque::new(),
        }
    }

    fn record_wait(&mut self, wait: f64) {
        self.wait_times.push_back(wait);
        while self.wait_times.len() > WAIT_WINDOW {
            self.wait_times.pop_front();
        }
    }
}

struct Inner {
    z1: ClassQueue,
    z2: ClassQueue,
    z3: ClassQueue,
}

impl Inner {
    fn class_queue(&mut self, class: RequestClass) -> &mut ClassQueue {
        match class {
            RequestClass::Z1 => &mut self.z1,
            RequestClass::Z2 => &mut self.z2,
            RequestClass::Z3 => &mut self.z3,
        }
    }

    fn class_queue_ref(&self, class: RequestClass) -> &ClassQueue {
        match class {
            RequestClass::Z1 => &self.z1,
            RequestClass::Z2 => &self.z2,
            RequestClass::Z3 => &self.z3,
        }
    }
}

pub struct PriorityQueue<C: Clock> {
    inner: Mutex<Inner>,
    clock: C,
}

impl<C: Clock> PriorityQueue<C> {
    pub fn new(clock: C) -> Self {
        Self {
            inner: Mutex::new(Inner {
                z1: ClassQueue::new(),
                z2: ClassQueue::new(),
                z3: ClassQueue::new(),
            }),
            clock,
        }
    }

    /// Stamp `enqueued_at` and append to the tail of the request's class.
    pub async fn enqueue(&self, mut request: Request) {
        request.enqueued_at = Some(self.clock.now());
        let mut inner = self.inner.lock().await;
        inner.class_queue(request.class).requests.push_back(request);
    }

    /// Strict priority dequeue: Z3 head, else Z2 head, else Z1 head.
    pub async fn dequeue(&self) -> Option<Request> {
        let mut inner = self.inner.lock().await;
        for class in [RequestClass::Z3, RequestClass::Z2, RequestClass::Z1] {
            if let Some(request) = inner.class_queue(class).requests.pop_front() {
                let wait = self.clock.now() - request.enqueued_at.unwrap_or(self.clock.now());
                inner.class_queue(class).record_wait(wait);
                return Some(request);
            }
        }
        None
    }

    pub async fn size(&self, class: Option<RequestClass>) -> usize {
        let inner = self.inner.lock().await;
        match class {
            Some(c) => inner.class_queue_ref(c).requests.len(),
            None => {
                inner.z1.requests.len() + inner.z2.requests.len() + inner.z3.requests.len()
            }
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.size(None).await == 0
    }

    pub async fn avg_wait(&self, class: RequestClass) -> f64 {
        let inner = self.inner.lock().await;
        let samples = &inner.class_queue_ref(class).wait_times;
        if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<f64>() / samples.len() as f64
        }
    }

    pub async fn max_wait(&self, class: RequestClass) -> f64 {
        let inner = self.inner.lock().await;
        let now = self.clock.now();
        inner
            .class_queue_ref(class)
            .requests
            .iter()
            .map(|r| now - r.enqueued_at.unwrap_or(now))
            .fold(0.0_f64, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;

    fn request(class: RequestClass) -> Request {
        Request::new(class, "K1", 0.0)
    }

    #[tokio::test]
    async fn strict_priority_across_classes() {
        let q = PriorityQueue::new(VirtualClock::new());
        q.enqueue(request(RequestClass::Z1)).await;
        q.enqueue(request(RequestClass::Z2)).await;
        q.enqueue(request(RequestClass::Z3)).await;

        assert_eq!(q.dequeue().await.unwrap().class, RequestClass::Z3);
        assert_eq!(q.dequeue().await.unwrap().class, RequestClass::Z2);
        assert_eq!(q.dequeue().await.unwrap().class, RequestClass::Z1);
        assert!(q.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn fifo_within_a_class() {
        let q = PriorityQueue::new(VirtualClock::new());
        let first = request(RequestClass::Z1);
        let first_id = first.request_id;
        q.enqueue(first).await;
        q.enqueue(request(RequestClass::Z1)).await;

        assert_eq!(q.dequeue().await.unwrap().request_id, first_id);
    }

    #[tokio::test]
    async fn z3_preempts_waiting_lower_classes() {
        let q = PriorityQueue::new(VirtualClock::new());
        q.enqueue(request(RequestClass::Z1)).await;
        q.enqueue(request(RequestClass::Z1)).await;
        q.enqueue(request(RequestClass::Z3)).await;

        assert_eq!(q.dequeue().await.unwrap().class, RequestClass::Z3);
    }

    #[tokio::test]
    async fn avg_wait_uses_bounded_window() {
        let clock = VirtualClock::new();
        let q = PriorityQueue::new(clock.clone());

        for _ in 0..150 {
            q.enqueue(request(RequestClass::Z1)).await;
            clock.advance(std::time::Duration::from_millis(10));
            q.dequeue().await;
        }

        // window caps at 100 samples of ~10ms wait each
        let avg = q.avg_wait(RequestClass::Z1).await;
        assert!((avg - 0.010).abs() < 0.001);
    }

    #[tokio::test]
    async fn max_wait_reflects_oldest_enqueued() {
        let clock = VirtualClock::new();
        let q = PriorityQueue::new(clock.clone());
        q.enqueue(request(RequestClass::Z2)).await;
        clock.advance(std::time::Duration::from_secs(2));
        assert!((q.max_wait(RequestClass::Z2).await - 2.0).abs() < 0.001);
    }
}
