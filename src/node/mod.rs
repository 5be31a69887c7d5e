pub mod base;
pub mod client;
pub mod distributor;
pub mod queue_node;
pub mod worker;
