use std::future::Future;

use k8s_openapi::api::core::v1::Event as CoreEvent;
use kube_core::ResourceExt;
use tokio_util::sync::CancellationToken;

use crate::classify::{classify, SeverityBucket};
use crate::sink::CounterSink;

/// The callbacks a notification source delivers event objects through.
///
/// The source invokes these from its own task, possibly before
/// [`EventMonitor::run`]'s synchronization wait unblocks, so implementations
/// take `&self` and must be safe to call concurrently.
pub trait EventHandler {
    /// A new event object appeared, either from the initial list or because
    /// it was genuinely just created.
    fn on_created(&self, event: &CoreEvent);

    /// An already-seen event object was re-delivered. `old` is the state
    /// seen previously; a relist re-delivers unchanged state, in which case
    /// both carry the same resource version.
    fn on_changed(&self, old: &CoreEvent, new: &CoreEvent);

    /// The event object fell out of the apiserver's retention window.
    fn on_removed(&self, event: &CoreEvent);
}

/// Counting policy for one [`EventMonitor`] instance.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Count `Normal` events too. Off by default: normal events dominate
    /// the feed and most operators only chart warnings.
    pub count_normal: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { count_normal: false }
    }
}

/// Folds the event notification feed into per-severity counters.
///
/// Holds no mutable state of its own; deduplication only needs the paired
/// old/new of a single [`EventHandler::on_changed`] call, and the sink is
/// responsible for atomic increments.
#[derive(Clone)]
pub struct EventMonitor<S> {
    sink: S,
    config: MonitorConfig,
}

impl<S: CounterSink> EventMonitor<S> {
    pub fn new(sink: S, config: MonitorConfig) -> Self {
        Self { sink, config }
    }

    /// Blocks until `synced` resolves, then until `stop` fires.
    ///
    /// If `stop` fires while the source is still listing, returns
    /// [`RunError::SyncInterrupted`]; no events were counted through this
    /// call, though callbacks themselves never wait on the gate.
    pub async fn run(
        &self,
        synced: impl Future<Output = ()>,
        stop: &CancellationToken,
    ) -> Result<(), RunError> {
        tokio::select! {
            biased;
            () = synced => {}
            () = stop.cancelled() => {
                log::warn!("stopped before event caches synced");
                return Err(RunError::SyncInterrupted);
            }
        }
        log::info!("event caches synced, counting");

        stop.cancelled().await;
        log::info!("shutting down event monitor");
        Ok(())
    }

    fn count(&self, event: &CoreEvent) {
        let (bucket, labels) = classify(event);
        if bucket == SeverityBucket::Normal && !self.config.count_normal {
            log::debug!("skipping normal event {labels:?}");
            return;
        }
        if let Err(err) = self.sink.increment(bucket, &labels) {
            log::warn!("dropping event {labels:?} from counting: {err}");
        }
    }
}

impl<S: CounterSink> EventHandler for EventMonitor<S> {
    fn on_created(&self, event: &CoreEvent) {
        self.count(event);
    }

    fn on_changed(&self, old: &CoreEvent, new: &CoreEvent) {
        if old.resource_version() == new.resource_version() {
            // relist re-delivery, nothing actually changed
            return;
        }
        self.count(new);
    }

    fn on_removed(&self, event: &CoreEvent) {
        // expiry of the record is unrelated to the event having occurred;
        // counting it again would corrupt the totals
        log::debug!(
            "event {}/{} expired",
            event.namespace().unwrap_or_default(),
            event.name_any(),
        );
    }
}

/// The error type returned by [`EventMonitor::run`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The stop signal fired before the initial list completed.
    #[error("stopped before event caches synced; no events were counted")]
    SyncInterrupted,
}
