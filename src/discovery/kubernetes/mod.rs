//! Kubernetes discovery: one resource-kind discoverer per namespace, all of
//! them feeding one output channel.

mod informer;
mod pod;
mod queue;
mod resource;
mod service;

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use kubernetes::{
    Client, ConfigMap, Event, Pod, Resource, Secret, Service, WatchConfig, watcher,
};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tripwire::Tripwire;

use crate::model::{Group, Tags, TagsError};
use crate::pipeline::Discoverer;

pub use informer::Informer;
pub use pod::{EnvSources, PodFields, PodTarget};
pub use queue::Queue;
pub use resource::ResourceDiscoverer;
pub use service::{ServiceFields, ServiceTarget};

/// Events of one watched resource kind, as produced by [`kubernetes::watcher`].
pub type EventStream<R> = BoxStream<'static, Result<Event<R>, kubernetes::Error>>;

/// Where watch streams come from, the API server or anything else which
/// speaks the same list/watch protocol.
pub trait WatchSource: Send + Sync {
    fn pods(&self, namespace: Option<&str>, config: WatchConfig) -> EventStream<Pod>;

    fn services(&self, namespace: Option<&str>, config: WatchConfig) -> EventStream<Service>;

    fn config_maps(
        &self,
        namespace: Option<&str>,
        config: WatchConfig,
    ) -> EventStream<ConfigMap>;

    fn secrets(&self, namespace: Option<&str>, config: WatchConfig) -> EventStream<Secret>;
}

impl WatchSource for Client {
    fn pods(&self, namespace: Option<&str>, config: WatchConfig) -> EventStream<Pod> {
        watcher::<Pod>(self.namespaced(namespace.map(String::from)), config).boxed()
    }

    fn services(&self, namespace: Option<&str>, config: WatchConfig) -> EventStream<Service> {
        watcher::<Service>(self.namespaced(namespace.map(String::from)), config).boxed()
    }

    fn config_maps(
        &self,
        namespace: Option<&str>,
        config: WatchConfig,
    ) -> EventStream<ConfigMap> {
        watcher::<ConfigMap>(self.namespaced(namespace.map(String::from)), config).boxed()
    }

    fn secrets(&self, namespace: Option<&str>, config: WatchConfig) -> EventStream<Secret> {
        watcher::<Secret>(self.namespaced(namespace.map(String::from)), config).boxed()
    }
}

/// Other objects a kind reads while building groups. They are watched next
/// to the kind itself, and must be synced before any of its objects is
/// reconciled.
#[async_trait]
pub trait Dependencies: Default + Send + Sync + 'static {
    fn has_synced(&self) -> bool;

    async fn synced(&self);

    /// Keeps the dependencies up to date until `shutdown` resolves.
    async fn run(&self, source: &dyn WatchSource, namespace: Option<&str>, shutdown: Tripwire);
}

#[derive(Default)]
pub struct NoDependencies;

#[async_trait]
impl Dependencies for NoDependencies {
    fn has_synced(&self) -> bool {
        true
    }

    async fn synced(&self) {}

    async fn run(
        &self,
        _source: &dyn WatchSource,
        _namespace: Option<&str>,
        _shutdown: Tripwire,
    ) {
    }
}

/// A resource kind which can be turned into groups.
pub trait Kind: Resource + 'static {
    const ROLE: Role;

    type Dependencies: Dependencies;

    fn watch(
        source: &dyn WatchSource,
        namespace: Option<&str>,
        config: WatchConfig,
    ) -> EventStream<Self>;

    /// The group source of an object, derived from its name only so deleted
    /// objects map to the same source.
    fn source(namespace: &str, name: &str) -> String;

    /// Builds the group of an existing object. Objects which can't be
    /// monitored yet produce an empty group.
    fn build_group(&self, dependencies: &Self::Dependencies) -> Group;
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Pod,
    Service,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Pod => f.write_str("pod"),
            Role::Service => f.write_str("service"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tags are required")]
    MissingTags,
    #[error(transparent)]
    InvalidTags(#[from] TagsError),
    #[error("local mode is not supported for role {0}")]
    LocalModeUnsupported(Role),
    #[error("local mode requires the node name")]
    MissingNodeName,
}

/// Label and field selectors, passed through to the watch query.
///
/// See https://kubernetes.io/docs/concepts/overview/working-with-objects/labels/
/// and https://kubernetes.io/docs/concepts/overview/working-with-objects/field-selectors/
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Selector {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub field: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub role: Role,

    /// Space separated tags attached to every discovered target.
    #[serde(default)]
    pub tags: String,

    /// Namespaces to watch, all namespaces when empty.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Watch only pods scheduled on this node.
    #[serde(default)]
    pub local_mode: bool,

    /// The node this instance runs on, required by local mode.
    #[serde(default)]
    pub node_name: Option<String>,

    #[serde(default)]
    pub selector: Selector,
}

enum KindDiscoverer {
    Pod(ResourceDiscoverer<Pod>),
    Service(ResourceDiscoverer<Service>),
}

impl KindDiscoverer {
    fn has_synced(&self) -> bool {
        match self {
            KindDiscoverer::Pod(discoverer) => discoverer.has_synced(),
            KindDiscoverer::Service(discoverer) => discoverer.has_synced(),
        }
    }

    async fn synced(&self) {
        match self {
            KindDiscoverer::Pod(discoverer) => discoverer.synced().await,
            KindDiscoverer::Service(discoverer) => discoverer.synced().await,
        }
    }

    async fn discover(&self, shutdown: Tripwire, out: mpsc::Sender<Vec<Group>>) {
        match self {
            KindDiscoverer::Pod(discoverer) => discoverer.discover(shutdown, out).await,
            KindDiscoverer::Service(discoverer) => discoverer.discover(shutdown, out).await,
        }
    }
}

/// Runs every resource-kind discoverer of one role and merges their output.
pub struct Discovery {
    role: Role,
    selector_label: String,
    selector_field: String,

    discoverers: Vec<Arc<KindDiscoverer>>,
    started: watch::Sender<bool>,
}

impl Discovery {
    pub fn new(config: Config, source: Arc<dyn WatchSource>) -> Result<Self, Error> {
        let tags = config.tags.parse::<Tags>()?;
        if tags.is_empty() {
            return Err(Error::MissingTags);
        }

        let mut selector_field = config.selector.field;
        if config.local_mode {
            if config.role != Role::Pod {
                return Err(Error::LocalModeUnsupported(config.role));
            }

            let node_name = config
                .node_name
                .filter(|name| !name.is_empty())
                .ok_or(Error::MissingNodeName)?;
            if !selector_field.is_empty() {
                selector_field.push(',');
            }
            selector_field.push_str("spec.nodeName=");
            selector_field.push_str(&node_name);
        }

        let selector_label = config.selector.label;
        let watch_config = WatchConfig {
            label_selector: Some(selector_label.clone()).filter(|s| !s.is_empty()),
            field_selector: Some(selector_field.clone()).filter(|s| !s.is_empty()),
            bookmark: true,
            ..Default::default()
        };

        let namespaces = if config.namespaces.is_empty() {
            vec![None]
        } else {
            config.namespaces.into_iter().map(Some).collect()
        };

        let role = config.role;
        let discoverers = namespaces
            .into_iter()
            .map(|namespace| {
                let source = Arc::clone(&source);
                let config = watch_config.clone();
                let tags = tags.clone();

                Arc::new(match role {
                    Role::Pod => KindDiscoverer::Pod(ResourceDiscoverer::new(
                        source, namespace, config, tags,
                    )),
                    Role::Service => KindDiscoverer::Service(ResourceDiscoverer::new(
                        source, namespace, config, tags,
                    )),
                })
            })
            .collect();

        Ok(Discovery {
            role,
            selector_label,
            selector_field,
            discoverers,
            started: watch::Sender::new(false),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn selector_label(&self) -> &str {
        &self.selector_label
    }

    /// The field selector of the watch query, including the node
    /// constraint of local mode.
    pub fn selector_field(&self) -> &str {
        &self.selector_field
    }

    /// True once every resource-kind discoverer has completed its first
    /// listing.
    pub fn has_synced(&self) -> bool {
        self.discoverers
            .iter()
            .all(|discoverer| discoverer.has_synced())
    }

    /// Waits until every resource-kind discoverer has completed its first
    /// listing, false if `timeout` elapses first.
    pub async fn wait_synced(&self, timeout: Duration) -> bool {
        let synced = futures::future::join_all(
            self.discoverers
                .iter()
                .map(|discoverer| discoverer.synced()),
        );

        tokio::time::timeout(timeout, synced).await.is_ok()
    }

    /// Flips to true once `discover` has dispatched every discoverer.
    pub fn started(&self) -> watch::Receiver<bool> {
        self.started.subscribe()
    }
}

#[async_trait]
impl Discoverer for Discovery {
    async fn discover(&self, shutdown: Tripwire, out: mpsc::Sender<Vec<Group>>) {
        info!(
            message = "instance is started",
            role = %self.role,
            discoverers = self.discoverers.len()
        );

        let mut tasks = JoinSet::new();
        for discoverer in &self.discoverers {
            let discoverer = Arc::clone(discoverer);
            let shutdown = shutdown.clone();
            let out = out.clone();

            tasks.spawn(async move { discoverer.discover(shutdown, out).await });
        }
        drop(out);

        self.started.send_replace(true);

        shutdown.await;
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(message = "discoverer task failed", role = %self.role, %err);
            }
        }

        info!(message = "instance is stopped", role = %self.role);
    }
}

/// `host:port`, with IPv6 hosts in brackets.
fn join_host_port(host: &str, port: i32) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
