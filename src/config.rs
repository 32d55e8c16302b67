use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::discovery::kubernetes;
use crate::model::Tags;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("read config file {path:?} failed, {source}")]
    Read {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("parse config failed, {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// How to reach the API server when not running inside the cluster.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Cluster {
    pub api_server: String,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The node this process runs on, used by local mode discovery.
    #[serde(default)]
    pub node_name: Option<String>,

    /// Tags added to every target before its configs are built.
    #[serde(default)]
    pub tags: Tags,

    /// Targets without this tag are not turned into configs.
    #[serde(default)]
    pub required_tag: Option<String>,

    /// The in-cluster service account is used when absent.
    #[serde(default)]
    pub cluster: Option<Cluster>,

    pub kubernetes: Vec<kubernetes::Config>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
            source,
            path: path.to_path_buf(),
        })?;

        Config::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Config, Error> {
        serde_yaml::from_str(content).map_err(Into::into)
    }

    /// Discovery configs with the global node name filled in where they
    /// don't set their own.
    pub fn discovery(&self) -> Vec<kubernetes::Config> {
        self.kubernetes
            .iter()
            .cloned()
            .map(|mut config| {
                if config.node_name.is_none() {
                    config.node_name = self.node_name.clone();
                }
                config
            })
            .collect()
    }
}
