use std::sync::Arc;

use kubernetes::{WatchConfig, split_key};
use tokio::sync::mpsc;
use tripwire::Tripwire;

use super::informer::Informer;
use super::queue::Queue;
use super::{Dependencies, Kind, WatchSource};
use crate::model::{Group, Tags};

/// Watches one resource kind in one namespace (or all of them), and emits one
/// group per changed object.
pub struct ResourceDiscoverer<R: Kind> {
    source: Arc<dyn WatchSource>,
    namespace: Option<String>,
    config: WatchConfig,
    tags: Tags,

    informer: Informer<R>,
    dependencies: R::Dependencies,
    queue: Queue,
}

impl<R: Kind> ResourceDiscoverer<R> {
    pub fn new(
        source: Arc<dyn WatchSource>,
        namespace: Option<String>,
        config: WatchConfig,
        tags: Tags,
    ) -> Self {
        ResourceDiscoverer {
            source,
            namespace,
            config,
            tags,
            informer: Informer::default(),
            dependencies: R::Dependencies::default(),
            queue: Queue::default(),
        }
    }

    /// True once the kind and all of its dependencies completed their first
    /// listing.
    pub fn has_synced(&self) -> bool {
        self.informer.has_synced() && self.dependencies.has_synced()
    }

    pub async fn synced(&self) {
        tokio::join!(self.informer.synced(), self.dependencies.synced());
    }

    /// Waits until synced, false if `shutdown` resolves first.
    async fn wait_synced(&self, shutdown: Tripwire) -> bool {
        tokio::select! {
            biased;

            _ = shutdown => false,
            _ = self.synced() => true,
        }
    }

    pub async fn discover(&self, shutdown: Tripwire, out: mpsc::Sender<Vec<Group>>) {
        let namespace = self.namespace.as_deref().unwrap_or("all");
        info!(message = "instance is started", role = %R::ROLE, namespace);

        let stream = R::watch(
            self.source.as_ref(),
            self.namespace.as_deref(),
            self.config.clone(),
        );

        let worker = async {
            if !self.wait_synced(shutdown.clone()).await {
                error!(message = "failed to sync caches", role = %R::ROLE, namespace);
                return;
            }

            self.process(shutdown.clone(), &out).await
        };

        // wakes the worker if it is waiting for keys
        let stop = async {
            shutdown.clone().await;
            self.queue.shut_down();
        };

        tokio::join!(
            self.informer.run(stream, Some(&self.queue), shutdown.clone()),
            self.dependencies.run(
                self.source.as_ref(),
                self.namespace.as_deref(),
                shutdown.clone()
            ),
            worker,
            stop
        );

        info!(message = "instance is stopped", role = %R::ROLE, namespace);
    }

    async fn process(&self, mut shutdown: Tripwire, out: &mpsc::Sender<Vec<Group>>) {
        while let Some(key) = self.queue.get().await {
            let sent = match self.reconcile(&key) {
                Some(group) => tokio::select! {
                    biased;

                    _ = &mut shutdown => false,
                    result = out.send(vec![group]) => result.is_ok(),
                },
                None => true,
            };

            self.queue.done(&key);

            if !sent {
                break;
            }
        }
    }

    fn reconcile(&self, key: &str) -> Option<Group> {
        let Some((namespace, name)) = split_key(key) else {
            warn!(message = "invalid object key, skipped", role = %R::ROLE, key);
            return None;
        };

        let mut group = match self.informer.get(key) {
            Some(obj) => obj.build_group(&self.dependencies),
            None => Group::tombstone(R::source(namespace, name)),
        };

        for target in group.targets_mut() {
            target.tags_mut().merge(&self.tags);
        }

        Some(group)
    }
}
