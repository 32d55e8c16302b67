use crate::model::{Config, Target};
use crate::pipeline::Builder;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("target {tuid} is not tagged with {tag}")]
    MissingTag { tuid: String, tag: String },
}

/// Builds one config per target, the payload is the target's fields plus its
/// tags.
#[derive(Default)]
pub struct JsonBuilder {
    required: Option<String>,
}

impl JsonBuilder {
    /// Targets without the `required` tag are refused.
    pub fn new(required: Option<String>) -> Self {
        JsonBuilder {
            required: required.filter(|tag| !tag.is_empty()),
        }
    }
}

impl Builder for JsonBuilder {
    fn build(&self, target: &dyn Target) -> crate::Result<Vec<Config>> {
        if let Some(tag) = &self.required {
            if !target.tags().contains(tag) {
                return Err(Error::MissingTag {
                    tuid: target.tuid().to_string(),
                    tag: tag.clone(),
                }
                .into());
            }
        }

        let mut payload = match target.fields() {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("fields".to_string(), other);
                map
            }
        };
        payload.insert(
            "tags".to_string(),
            serde_json::Value::String(target.tags().to_string()),
        );

        Ok(vec![Config::new(target, serde_json::Value::Object(payload))])
    }
}
