use std::collections::BTreeMap;

use serde::Deserialize;

use super::{ObjectMeta, Resource};

/// ConfigMap holds configuration data for pods to consume.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#configmap-v1-core
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,

    /// UTF-8 data, `binaryData` is not decoded.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Resource for ConfigMap {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "ConfigMap";
    const PLURAL: &'static str = "configmaps";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize() {
        let cm = serde_json::from_str::<ConfigMap>(
            r#"{
                "kind": "ConfigMap",
                "apiVersion": "v1",
                "metadata": {"name": "nginx", "namespace": "prod"},
                "data": {"LOG_LEVEL": "debug"},
                "binaryData": {"blob": "AAE="}
            }"#,
        )
        .unwrap();

        assert_eq!(cm.metadata.key(), "prod/nginx");
        assert_eq!(cm.data.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(cm.data.len(), 1);

        let empty = serde_json::from_str::<ConfigMap>(r#"{"metadata": {"name": "empty"}}"#).unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn url() {
        assert_eq!(
            ConfigMap::url_path(Some("prod")),
            "/api/v1/namespaces/prod/configmaps"
        );
    }
}
