//! Watch-fed reflector stores with change notifications
//!
//! Each informer applies watch events to a reflector [`Writer`] and reports
//! what changed. The previous object is read from the store before an event
//! is applied, so updates carry both the old and the new object.

use futures::StreamExt;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::reflector::store::Writer;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// A change observed in a store
#[derive(Debug)]
pub enum Notification<K> {
    Added(Arc<K>),
    /// Also emitted with `old == new` for every stored object on resync
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    writer: Writer<K>,
    resync: Duration,
}

impl<K> Informer<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    pub fn new(api: Api<K>, writer: Writer<K>, resync: Duration) -> Self {
        Self { api, writer, resync }
    }

    /// Watch until the stream ends, calling `handler` for every change
    pub async fn run<F>(mut self, handler: F)
    where
        F: Fn(Notification<K>) + Send + Sync,
    {
        let reader = self.writer.as_reader();
        let mut stream = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        let mut resync = tokio::time::interval(self.resync);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        resync.tick().await;

        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => apply_event(&mut self.writer, &reader, event, &handler),
                    Some(Err(e)) => warn!(error = %e, "Watch stream error"),
                    None => {
                        warn!("Watch stream ended");
                        return;
                    }
                },
                _ = resync.tick() => resync_all(&reader, &handler),
            }
        }
    }
}

/// Apply one watch event to the store and report the resulting changes
pub fn apply_event<K, F>(writer: &mut Writer<K>, reader: &Store<K>, event: watcher::Event<K>, handler: &F)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
    F: Fn(Notification<K>),
{
    match &event {
        // InitApply lands in the writer's buffer, which only becomes visible on
        // InitDone. Until then lookups in this or any other store may miss the
        // object, so handlers must only enqueue. Workers start once every store
        // is ready and the periodic resync covers anything read too early.
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
            let old = reader.get(&ObjectRef::from_obj(obj));
            writer.apply_watcher_event(&event);
            let new = Arc::new(obj.clone());
            match old {
                Some(old) => handler(Notification::Updated { old, new }),
                None => handler(Notification::Added(new)),
            }
        }
        watcher::Event::Delete(obj) => {
            writer.apply_watcher_event(&event);
            handler(Notification::Deleted(Arc::new(obj.clone())));
        }
        watcher::Event::Init => writer.apply_watcher_event(&event),
        watcher::Event::InitDone => {
            // Objects missing from a relist were deleted while unwatched
            let before = reader.state();
            writer.apply_watcher_event(&event);
            for obj in before {
                if reader.get(&ObjectRef::from_obj(&obj)).is_none() {
                    handler(Notification::Deleted(obj));
                }
            }
            debug!(objects = reader.state().len(), "Store synced");
        }
    }
}

fn resync_all<K, F>(reader: &Store<K>, handler: &F)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
    F: Fn(Notification<K>),
{
    for obj in reader.state() {
        handler(Notification::Updated {
            old: obj.clone(),
            new: obj,
        });
    }
}
