use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};

use super::{ObjectMeta, Resource};

/// Secret holds secret data of a certain type.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#secret-v1-core
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Secret {
    pub metadata: ObjectMeta,

    /// Base64 decoded values.
    #[serde(default, deserialize_with = "decode_data")]
    pub data: BTreeMap<String, Vec<u8>>,
}

fn decode_data<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
    let encoded = Option::<BTreeMap<String, String>>::deserialize(deserializer)?;

    encoded
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            STANDARD
                .decode(value.as_bytes())
                .map(|value| (key, value))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

impl Resource for Secret {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const KIND: &'static str = "Secret";
    const PLURAL: &'static str = "secrets";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize() {
        let secret = serde_json::from_str::<Secret>(
            r#"{
                "kind": "Secret",
                "apiVersion": "v1",
                "metadata": {"name": "db", "namespace": "prod"},
                "type": "Opaque",
                "data": {"password": "czNjcjN0"}
            }"#,
        )
        .unwrap();

        assert_eq!(secret.metadata.key(), "prod/db");
        assert_eq!(secret.data.get("password").map(Vec::as_slice), Some(&b"s3cr3t"[..]));

        let empty =
            serde_json::from_str::<Secret>(r#"{"metadata": {"name": "empty"}, "data": null}"#)
                .unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn invalid_base64() {
        let result = serde_json::from_str::<Secret>(
            r#"{"metadata": {"name": "db"}, "data": {"password": "not base64!"}}"#,
        );

        assert!(result.is_err());
    }
}
