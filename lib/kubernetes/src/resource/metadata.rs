use std::collections::BTreeMap;

use serde::Deserialize;

/// OwnerReference contains enough information to let you identify an owning object.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#ownerreference-v1-meta
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    /// If true, this reference points to the managing controller.
    #[serde(default)]
    pub controller: Option<bool>,
}

/// ObjectMeta is metadata that all persisted resources must have.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#objectmeta-v1-meta
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    /// Namespace defines the space within which each name must be unique. Empty
    /// for cluster scoped objects.
    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default, rename = "resourceVersion")]
    pub resource_version: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, rename = "ownerReferences")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// The `<namespace>/<name>` key of the object, or just `<name>` for
    /// cluster scoped objects.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }

    /// The owner reference flagged as the managing controller, if any.
    pub fn controller(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|owner| owner.controller.unwrap_or(false))
    }
}

/// ListMeta describes metadata that synthetic resources must have, including
/// lists and various status objects.
#[derive(Debug, Default, Deserialize)]
pub struct ListMeta {
    /// Set when the list is chunked and more items are available.
    #[serde(default, rename = "continue")]
    pub r#continue: Option<String>,

    #[serde(default, rename = "resourceVersion")]
    pub resource_version: Option<String>,
}

/// Split a `<namespace>/<name>` key, a key without a slash is a cluster
/// scoped name. More than one slash is invalid.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Some(("", name)),
        (Some(namespace), Some(name), None) if !name.is_empty() => Some((namespace, name)),
        _ => None,
    }
}
