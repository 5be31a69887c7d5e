//! Wire-level data model.
//!
//! `Request` and `Response` are the only two payload-bearing message
//! types; `Heartbeat`, `ScaleUp`, and `Shutdown` are reserved control
//! frames carried for protocol completeness but unused by the core
//! simulation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Request priority class. Ord follows discriminant order, so
/// `Z3 > Z2 > Z1` directly expresses "higher value = higher priority".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RequestClass {
    Z1 = 1,
    Z2 = 2,
    Z3 = 3,
}

impl RequestClass {
    pub const ALL: [RequestClass; 3] = [RequestClass::Z1, RequestClass::Z2, RequestClass::Z3];

    pub fn name(self) -> &'static str {
        match self {
            RequestClass::Z1 => "Z1",
            RequestClass::Z2 => "Z2",
            RequestClass::Z3 => "Z3",
        }
    }
}

impl std::fmt::Display for RequestClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResponseStatus {
    Success = 0,
    Error = 1,
    Timeout = 2,
    NodeDown = 3,
}

/// An immutable-after-creation unit of work, stamped with `enqueued_at`
/// by whichever `QueueNode` currently holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: Uuid,
    pub class: RequestClass,
    pub client_id: String,
    pub payload: Map<String, Value>,
    pub created_at: f64,
    pub enqueued_at: Option<f64>,
}

impl Request {
    pub fn new(class: RequestClass, client_id: impl Into<String>, now: f64) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            class,
            client_id: client_id.into(),
            payload: Map::new(),
            created_at: now,
            enqueued_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: Uuid,
    pub status: ResponseStatus,
    pub processor_id: String,
    pub result: Map<String, Value>,
    pub processing_time: f64,
    pub created_at: f64,
}

/// Reserved control frame. Not acted on by any node in this core; kept
/// so the full reserved message set is represented and a future
/// extension (real supervisory signaling) has somewhere to land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reserved {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
    Heartbeat(Reserved),
    ScaleUp(Reserved),
    Shutdown(Reserved),
}

impl Message {
    pub fn type_byte(&self) -> u8 {
        match self {
            Message::Request(_) => 1,
            Message::Response(_) => 2,
            Message::Heartbeat(_) => 3,
            Message::ScaleUp(_) => 4,
            Message::Shutdown(_) => 5,
        }
    }
}
