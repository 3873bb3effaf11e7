//! Outbox relay. Downstream of the pipeline: it only reads rows the completion writer
//! already committed and never runs inside a request.

pub mod relay;

pub use relay::{EventPublisher, OutboxRelay, PublishError, RedisPublisher, DEFAULT_CHANNEL};
