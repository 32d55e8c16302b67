pub mod config_map;
mod metadata;
pub mod pod;
pub mod secret;
pub mod service;

use serde::Deserialize;
use serde::de::DeserializeOwned;

pub use metadata::{ListMeta, ObjectMeta, OwnerReference, split_key};

/// An accessor trait for a kubernetes Resource.
pub trait Resource: DeserializeOwned + Send + Sync {
    /// The group of the resource, or the empty string if the resource doesn't have a
    /// group.
    const GROUP: &'static str;

    /// The version of the resource.
    const VERSION: &'static str;

    const KIND: &'static str;

    /// The plural of this resource, which is used to construct URLS
    const PLURAL: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    /// Creates a url path for http requests for this resource
    fn url_path(namespace: Option<&str>) -> String {
        let group = if Self::GROUP.is_empty() {
            "api"
        } else {
            "apis"
        };
        let api_version = if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        };
        let namespace = match namespace {
            Some(namespace) => format!("namespaces/{namespace}/"),
            None => String::new(),
        };
        let plural = Self::PLURAL;

        format!("/{group}/{api_version}/{namespace}{plural}")
    }
}

/// A generic Kubernetes object list, produced by list queries.
#[derive(Deserialize)]
pub struct ObjectList<T> {
    /// ListMeta, used for its `resourceVersion` and `continue` token
    pub metadata: ListMeta,

    /// These items we are actually interested in.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}
