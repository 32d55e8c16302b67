use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use backoff::ExponentialBackoff;
use futures::StreamExt;
use kubernetes::{Event, Resource};
use tokio::sync::watch;
use tripwire::Tripwire;

use super::EventStream;
use super::queue::Queue;

/// A local cache of one watched resource kind, kept up to date from the
/// watch stream. With a queue, every change enqueues the key of the
/// affected object.
pub struct Informer<R> {
    store: Mutex<BTreeMap<String, Arc<R>>>,
    synced: watch::Sender<bool>,
}

impl<R: Resource> Default for Informer<R> {
    fn default() -> Self {
        Informer {
            store: Mutex::new(BTreeMap::new()),
            synced: watch::Sender::new(false),
        }
    }
}

impl<R: Resource> Informer<R> {
    fn store(&self) -> MutexGuard<'_, BTreeMap<String, Arc<R>>> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        self.store().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.store().keys().cloned().collect()
    }

    /// True once the first full listing has been stored.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Resolves once the first listing completes.
    pub async fn synced(&self) {
        let mut synced = self.synced.subscribe();
        // the sender lives as long as `self`, so this never fails
        let _ = synced.wait_for(|synced| *synced).await;
    }

    /// Consumes the watch stream until `shutdown` resolves or the stream ends.
    /// Failed list and watch attempts are retried with backoff.
    pub async fn run(
        &self,
        mut stream: EventStream<R>,
        queue: Option<&Queue>,
        mut shutdown: Tripwire,
    ) {
        let mut backoff = ExponentialBackoff::default();
        // objects of an ongoing (re)list
        let mut listing = None;

        loop {
            let result = tokio::select! {
                biased;

                _ = &mut shutdown => break,
                result = stream.next() => match result {
                    Some(result) => result,
                    None => {
                        debug!(message = "watch stream ended", kind = R::KIND);
                        break;
                    }
                }
            };

            match result {
                Ok(event) => {
                    backoff.reset();
                    self.apply(event, &mut listing, queue);
                }
                Err(err) => {
                    warn!(message = "watch failed, retrying", kind = R::KIND, %err);

                    tokio::select! {
                        biased;

                        _ = &mut shutdown => break,
                        _ = backoff.wait() => {}
                    }
                }
            }
        }
    }

    fn apply(
        &self,
        event: Event<R>,
        listing: &mut Option<BTreeMap<String, Arc<R>>>,
        queue: Option<&Queue>,
    ) {
        let enqueue = |key: String| {
            if let Some(queue) = queue {
                queue.add(key);
            }
        };

        match event {
            Event::Apply(obj) => {
                let key = obj.metadata().key();
                self.store().insert(key.clone(), Arc::new(obj));
                enqueue(key);
            }
            Event::Deleted(obj) => {
                let key = obj.metadata().key();
                self.store().remove(&key);
                enqueue(key);
            }
            Event::Init => {
                *listing = Some(BTreeMap::new());
            }
            Event::InitApply(obj) => {
                if let Some(listing) = listing.as_mut() {
                    listing.insert(obj.metadata().key(), Arc::new(obj));
                }
            }
            Event::InitDone => {
                let Some(listed) = listing.take() else {
                    return;
                };

                // objects gone while the watch was down only show up as
                // missing keys, they must be enqueued too
                let previous = std::mem::replace(&mut *self.store(), listed);
                let keys = previous.into_keys().chain(self.keys()).collect::<Vec<_>>();
                keys.into_iter().for_each(enqueue);

                if !self.has_synced() {
                    debug!(message = "cache synced", kind = R::KIND);
                }
                self.synced.send_replace(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use kubernetes::{ConfigMap, ObjectMeta, Service};
    use pretty_assertions::assert_eq;

    use super::*;

    fn service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            spec: Default::default(),
        }
    }

    async fn drain(queue: &Queue) -> Vec<String> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            let key = queue.get().await.unwrap();
            queue.done(&key);
            keys.push(key);
        }
        keys
    }

    #[tokio::test]
    async fn list_then_watch() {
        let informer = Informer::<Service>::default();
        let queue = Queue::default();
        let (_trigger, shutdown) = Tripwire::new("test");

        let events = stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(service("prod", "a"))),
            Ok(Event::InitApply(service("prod", "b"))),
            Ok(Event::InitDone),
            Ok(Event::Apply(service("prod", "c"))),
            Ok(Event::Deleted(service("prod", "a"))),
        ])
        .boxed();

        assert!(!informer.has_synced());
        informer.run(events, Some(&queue), shutdown).await;
        assert!(informer.has_synced());

        assert_eq!(informer.keys(), vec!["prod/b", "prod/c"]);
        assert!(informer.get("prod/a").is_none());
        assert_eq!(drain(&queue).await, vec!["prod/a", "prod/b", "prod/c"]);
    }

    #[tokio::test]
    async fn relist_enqueues_missing() {
        let informer = Informer::<Service>::default();
        let queue = Queue::default();
        let (_trigger, shutdown) = Tripwire::new("test");

        let events = stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(service("prod", "a"))),
            Ok(Event::InitApply(service("prod", "b"))),
            Ok(Event::InitDone),
        ])
        .boxed();
        informer.run(events, Some(&queue), shutdown.clone()).await;
        drain(&queue).await;

        // "a" was deleted while the watch was down
        let events = stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(service("prod", "b"))),
            Ok(Event::InitDone),
        ])
        .boxed();
        informer.run(events, Some(&queue), shutdown).await;

        assert_eq!(informer.keys(), vec!["prod/b"]);
        assert_eq!(drain(&queue).await, vec!["prod/a", "prod/b"]);
    }

    #[tokio::test]
    async fn not_synced_before_init_done() {
        let informer = Informer::<Service>::default();
        let queue = Queue::default();
        let (_trigger, shutdown) = Tripwire::new("test");

        let events = stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(service("prod", "a"))),
        ])
        .boxed();
        informer.run(events, Some(&queue), shutdown).await;

        assert!(!informer.has_synced());
        assert!(informer.keys().is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_error() {
        let informer = Informer::<Service>::default();
        let queue = Queue::default();
        let (_trigger, shutdown) = Tripwire::new("test");

        let events = stream::iter(vec![
            Err(kubernetes::Error::Validation("connection refused")),
            Ok(Event::Init),
            Ok(Event::InitDone),
        ])
        .boxed();
        informer.run(events, Some(&queue), shutdown).await;

        assert!(informer.has_synced());
    }

    #[tokio::test]
    async fn without_queue() {
        let informer = Informer::<ConfigMap>::default();
        let (_trigger, shutdown) = Tripwire::new("test");

        let events = stream::iter(vec![
            Ok(Event::Init),
            Ok(Event::InitApply(ConfigMap {
                metadata: ObjectMeta {
                    name: "settings".to_string(),
                    namespace: "prod".to_string(),
                    ..Default::default()
                },
                data: BTreeMap::from([("level".to_string(), "debug".to_string())]),
            })),
            Ok(Event::InitDone),
        ])
        .boxed();
        informer.run(events, None, shutdown).await;

        assert!(informer.has_synced());
        let settings = informer.get("prod/settings").unwrap();
        assert_eq!(settings.data["level"], "debug");
    }
}
