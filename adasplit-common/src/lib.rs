//! AdaSplit Common Types
//!
//! Shared types used by the router and by tooling that talks to it.

pub mod chat;
pub mod class;
pub mod status;

pub use chat::{ChatCompletionRequest, ChatMessage};
pub use class::TaskClass;
pub use status::{HandleStatus, Partition, QueueDepths, RouterStatus, TrafficStats};
