//! Counter sinks the monitor feeds classified events into.

use std::error::Error as StdError;

use crate::classify::{EventLabels, SeverityBucket};

pub mod prometheus;
pub use self::prometheus::PrometheusSink;

/// Where classified events are counted.
///
/// Implementations must tolerate unordered concurrent increments; the
/// monitor calls this from whatever task delivers the notification.
pub trait CounterSink {
    /// Increments the counter for `(bucket, labels)` by one, creating the
    /// series on first use.
    fn increment(&self, bucket: SeverityBucket, labels: &EventLabels) -> Result<(), SinkError>;
}

/// Failures from the underlying counter registry.
///
/// Either way the affected notification is dropped from counting and
/// processing continues.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The label values do not fit the registered schema.
    #[error("label values do not match the counter schema: {0}")]
    Cardinality(#[source] Box<dyn StdError + Send + Sync>),
    /// The counter family could not be created or registered.
    #[error("failed to register counter family: {0}")]
    Registration(#[source] Box<dyn StdError + Send + Sync>),
}
