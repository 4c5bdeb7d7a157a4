//! kube-event-counter turns the apiserver's event stream into Prometheus
//! counters.
//!
//! The process list-watches `v1/Event` objects, classifies each one by its
//! severity (`Normal`, `Warning`, anything else as unknown) and increments
//! a counter keyed by the involved object, the reason and the reporting
//! source. Periodic relists re-deliver unchanged objects; those are
//! detected by resource version and counted exactly once.
//!
//! Counter series are created lazily and never removed, so a churny
//! cluster grows an unbounded number of series over time. That is a known
//! limitation of keying on object names.

pub mod classify;
mod monitor;
pub mod sink;
pub mod source;

pub use monitor::{EventHandler, EventMonitor, MonitorConfig, RunError};
