//! Rotating selector over a health-tagged set of worker ids, ported
//! from `core/round_robin.py::RoundRobinBalancer`.

use tokio::sync::Mutex;

struct Inner {
    ids: Vec<String>,
    available: Vec<bool>,
    last_index: Option<usize>,
}

impl Inner {
    fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|existing| existing == id)
    }
}

pub struct RoundRobin {
    inner: Mutex<Inner>,
}

impl RoundRobin {
    pub fn new(ids: Vec<String>) -> Self {
        let available = vec![true; ids.len()];
        Self {
            inner: Mutex::new(Inner {
                ids,
                available,
                last_index: None,
            }),
        }
    }

    /// `(last + 1) mod m`, scanning at most `m` positions for an
    /// available id.
    pub async fn next(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let m = inner.ids.len();
        if m == 0 {
            return None;
        }

        let start = (inner.last_index.map(|i| i + 1).unwrap_or(0)) % m;
        for step in 0..m {
            let idx = (start + step) % m;
            if inner.available[idx] {
                inner.last_index = Some(idx);
                return Some(inner.ids[idx].clone());
            }
        }
        None
    }

    pub async fn mark_available(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(idx) = inner.position(id) {
            inner.available[idx] = true;
        }
    }

    pub async fn mark_unavailable(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(idx) = inner.position(id) {
            inner.available[idx] = false;
        }
    }

    /// Appends `id`, preserving existing rotation order.
    pub async fn add(&self, id: String) {
        let mut inner = self.inner.lock().await;
        if inner.position(&id).is_none() {
            inner.ids.push(id);
            inner.available.push(true);
        }
    }

    /// Removes `id`; adjusts `last_index` so the next call naturally
    /// returns whatever would have followed the removed position
    /// so the rotation does not skip a healthy successor.
    pub async fn remove(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner.position(id) else {
            return;
        };
        inner.ids.remove(idx);
        inner.available.remove(idx);

        inner.last_index = match inner.last_index {
            None => None,
            Some(last) if inner.ids.is_empty() => None,
            Some(last) if idx <= last => Some(last.saturating_sub(1)),
            Some(last) => Some(last),
        };
    }

    pub async fn available_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.available.iter().filter(|a| **a).count()
    }

    pub async fn all_ids(&self) -> Vec<String> {
        self.inner.lock().await.ids.clone()
    }
}
