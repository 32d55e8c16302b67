//! A small Kubernetes API client, just enough to list and watch pods,
//! services and the config maps and secrets pods refer to.

mod client;
mod config;
mod resource;
mod watch;

pub use client::{Client, Error, ErrorResponse, ListParams, WatchEvent, WatchParams};
pub use config::{Auth, Config, Error as ConfigError, RefreshableToken};
pub use resource::config_map::ConfigMap;
pub use resource::pod::{
    Container, ContainerPort, EnvFromSource, EnvVar, EnvVarSource, KeySelector,
    LocalObjectReference, Pod, PodSpec, PodStatus,
};
pub use resource::secret::Secret;
pub use resource::service::{Service, ServicePort, ServiceSpec};
pub use resource::{ListMeta, ObjectList, ObjectMeta, OwnerReference, Resource, split_key};
pub use watch::{Config as WatchConfig, Event, watcher};
