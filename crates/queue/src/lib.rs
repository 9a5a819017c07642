//! `jobping-queue` — queue transport contract, message bodies and an
//! in-memory transport.

pub mod in_memory;
pub mod message;
pub mod transport;

pub use in_memory::InMemoryQueue;
pub use message::{JobMessage, JobUserMessage, MalformedMessage, MessageBody};
pub use transport::{QueueError, QueueId, QueueTransport, ReceiptHandle, ReceiveOptions, ReceivedMessage};
