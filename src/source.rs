//! Feeds `v1/Event` list-watch notifications into an [`EventHandler`].
//!
//! The apiserver's watch delivers raw applied/deleted events; this module
//! keeps the last seen state per object so that re-deliveries carry their
//! prior state, which is what lets the monitor tell a relist replay from a
//! genuine change.

use std::collections::{HashMap, HashSet};

use futures::{stream, Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Event as CoreEvent;
use kube_client::Api;
use kube_core::ResourceExt;
use kube_runtime::{reflector, watcher};
use tokio_util::sync::CancellationToken;

use crate::monitor::EventHandler;

/// Uniquely identifies an event object by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    fn from_event(event: &CoreEvent) -> Self {
        Self {
            namespace: event.namespace(),
            name: event.name_any(),
        }
    }
}

/// One lifecycle notification about an event object.
#[derive(Debug, Clone)]
pub enum Notification {
    /// First sighting, either from the initial list or a fresh object.
    Created(CoreEvent),
    /// Re-delivery of an object seen before, with the previously seen state.
    Changed { old: CoreEvent, new: CoreEvent },
    /// The apiserver dropped the object out of its retention window.
    Removed(CoreEvent),
}

/// Last seen state per object, folding raw watch events into
/// [`Notification`]s.
#[derive(Default)]
struct Tracker {
    seen: HashMap<ObjectKey, CoreEvent>,
}

impl Tracker {
    fn track(&mut self, event: watcher::Event<CoreEvent>) -> Vec<Notification> {
        match event {
            watcher::Event::Applied(object) => vec![self.apply(object)],
            watcher::Event::Deleted(object) => {
                self.seen.remove(&ObjectKey::from_event(&object));
                vec![Notification::Removed(object)]
            }
            watcher::Event::Restarted(objects) => {
                // a relist re-delivers everything that still exists;
                // whatever we saw before and the list omits is gone
                let listed: HashSet<ObjectKey> =
                    objects.iter().map(ObjectKey::from_event).collect();
                let vanished: Vec<ObjectKey> = self
                    .seen
                    .keys()
                    .filter(|key| !listed.contains(key))
                    .cloned()
                    .collect();

                let mut notifications = Vec::with_capacity(objects.len() + vanished.len());
                for key in vanished {
                    if let Some(old) = self.seen.remove(&key) {
                        notifications.push(Notification::Removed(old));
                    }
                }
                notifications.extend(objects.into_iter().map(|object| self.apply(object)));
                notifications
            }
        }
    }

    fn apply(&mut self, object: CoreEvent) -> Notification {
        let key = ObjectKey::from_event(&object);
        match self.seen.insert(key, object.clone()) {
            None => Notification::Created(object),
            Some(old) => Notification::Changed { old, new: object },
        }
    }
}

/// Starts a list-watch on `api` and returns the backing store together with
/// the notification stream.
///
/// The store's [`wait_until_ready`](reflector::Store::wait_until_ready) is
/// the "caches synced" gate for [`EventMonitor::run`]; the stream itself
/// delivers notifications as soon as it is polled, sync or not.
///
/// [`EventMonitor::run`]: crate::EventMonitor::run
pub fn events(
    api: Api<CoreEvent>,
    watcher_config: watcher::Config,
) -> (
    reflector::Store<CoreEvent>,
    impl Stream<Item = Result<Notification, watcher::Error>>,
) {
    let writer = reflector::store::Writer::<CoreEvent>::default();
    let store = writer.as_reader();

    let mut tracker = Tracker::default();
    let notifications = reflector(writer, watcher(api, watcher_config))
        .map_ok(move |event| stream::iter(tracker.track(event)).map(Ok))
        .try_flatten();

    (store, notifications)
}

/// Delivers notifications to `handler` until the stream ends or `stop`
/// fires.
///
/// Watch interruptions are logged and skipped; the watcher re-establishes
/// the connection on its own, and a broken notification must never halt
/// counting.
pub async fn dispatch<H: EventHandler>(
    notifications: impl Stream<Item = Result<Notification, watcher::Error>>,
    handler: &H,
    stop: &CancellationToken,
) {
    futures::pin_mut!(notifications);
    loop {
        let item = tokio::select! {
            biased;
            () = stop.cancelled() => return,
            item = notifications.next() => item,
        };
        match item {
            Some(Ok(Notification::Created(event))) => handler.on_created(&event),
            Some(Ok(Notification::Changed { old, new })) => handler.on_changed(&old, &new),
            Some(Ok(Notification::Removed(event))) => handler.on_removed(&event),
            Some(Err(err)) => log::warn!("event watch interrupted: {err}"),
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::stream;
    use k8s_openapi::api::core::v1::Event as CoreEvent;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::watcher;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::{dispatch, Notification, Tracker};
    use crate::monitor::EventHandler;

    fn event(name: &str, rv: &str) -> CoreEvent {
        CoreEvent {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("ns".to_owned()),
                resource_version: Some(rv.to_owned()),
                ..ObjectMeta::default()
            },
            ..CoreEvent::default()
        }
    }

    fn rv(event: &CoreEvent) -> &str {
        event.metadata.resource_version.as_deref().unwrap_or("")
    }

    #[test]
    fn first_sighting_is_created() {
        let mut tracker = Tracker::default();
        let notifications = tracker.track(watcher::Event::Applied(event("a", "1")));
        assert!(matches!(&notifications[..], [Notification::Created(_)]));
    }

    #[test]
    fn redelivery_is_changed_with_prior_state() {
        let mut tracker = Tracker::default();
        tracker.track(watcher::Event::Applied(event("a", "1")));
        let notifications = tracker.track(watcher::Event::Applied(event("a", "2")));
        match &notifications[..] {
            [Notification::Changed { old, new }] => {
                assert_eq!(rv(old), "1");
                assert_eq!(rv(new), "2");
            }
            other => panic!("expected one Changed, got {other:?}"),
        }
    }

    #[test]
    fn deletion_is_removed_and_forgotten() {
        let mut tracker = Tracker::default();
        tracker.track(watcher::Event::Applied(event("a", "1")));
        let notifications = tracker.track(watcher::Event::Deleted(event("a", "1")));
        assert!(matches!(&notifications[..], [Notification::Removed(_)]));

        // the next sighting starts over
        let notifications = tracker.track(watcher::Event::Applied(event("a", "2")));
        assert!(matches!(&notifications[..], [Notification::Created(_)]));
    }

    #[test]
    fn relist_replays_and_drops_vanished_objects() {
        let mut tracker = Tracker::default();
        tracker.track(watcher::Event::Applied(event("a", "1")));
        tracker.track(watcher::Event::Applied(event("b", "7")));

        let notifications = tracker.track(watcher::Event::Restarted(vec![event("a", "1")]));

        let removed: Vec<_> = notifications
            .iter()
            .filter(|n| matches!(n, Notification::Removed(_)))
            .collect();
        let changed: Vec<_> = notifications
            .iter()
            .filter(|n| matches!(n, Notification::Changed { .. }))
            .collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(changed.len(), 1);
        if let Notification::Changed { old, new } = changed[0] {
            // the unchanged replay keeps its resource version on both sides
            assert_eq!(rv(old), rv(new));
        }
    }

    #[derive(Clone, Default)]
    struct RecordingHandler {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl EventHandler for RecordingHandler {
        fn on_created(&self, event: &CoreEvent) {
            self.calls.lock().push(format!("created {}", rv(event)));
        }

        fn on_changed(&self, old: &CoreEvent, new: &CoreEvent) {
            self.calls
                .lock()
                .push(format!("changed {} {}", rv(old), rv(new)));
        }

        fn on_removed(&self, event: &CoreEvent) {
            self.calls.lock().push(format!("removed {}", rv(event)));
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_in_order_until_the_stream_ends() {
        let handler = RecordingHandler::default();
        let stop = CancellationToken::new();
        let notifications = stream::iter(vec![
            Ok(Notification::Created(event("a", "1"))),
            Ok(Notification::Changed {
                old: event("a", "1"),
                new: event("a", "2"),
            }),
            Ok(Notification::Removed(event("a", "2"))),
        ]);

        dispatch(notifications, &handler, &stop).await;

        assert_eq!(
            *handler.calls.lock(),
            ["created 1", "changed 1 2", "removed 2"]
        );
    }

    #[tokio::test]
    async fn dispatch_returns_when_stopped() {
        let handler = RecordingHandler::default();
        let stop = CancellationToken::new();
        stop.cancel();

        dispatch(stream::pending(), &handler, &stop).await;
        assert!(handler.calls.lock().is_empty());
    }
}
