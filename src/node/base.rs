//! Shared lifecycle state for every node kind, ported from
//! `nodes/base_node.py::BaseNode`.

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Initializing,
    Running,
    Busy,
    Idle,
    Down,
    Stopped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Initializing => "INITIALIZING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Busy => "BUSY",
            NodeStatus::Idle => "IDLE",
            NodeStatus::Down => "DOWN",
            NodeStatus::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// A `stop()`-able background loop: every node's accept/dispatch/generator
/// task polls the paired `watch::Receiver<bool>` at its next suspension
/// point rather than being forcibly cancelled.
pub struct Lifecycle {
    tx: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new().0
    }
}
