pub mod client;
pub mod message;

pub use client::{MemoryQueue, MessageQueueClient, QueueError, ReceivedMessage, Topic};
pub use message::{properties, resolve_body, stage_body, QueueMessage};
