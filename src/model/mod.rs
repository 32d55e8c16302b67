//! Value types shared by discoverers and the pipeline.

mod hash;
mod tags;

use std::fmt::Debug;

use serde::Serialize;

pub use hash::calc_hash;
pub use tags::{Error as TagsError, Tags};

/// A discovered unit of monitoring interest, e.g. one container port of a pod
/// or one port of a service.
pub trait Target: Debug + Send + Sync {
    /// Content fingerprint over every semantic field, computed once when the
    /// target is built. Identity and tags are not part of it.
    fn hash(&self) -> u64;

    /// Target unique identifier, stable across content changes.
    fn tuid(&self) -> &str;

    fn tags(&self) -> &Tags;

    fn tags_mut(&mut self) -> &mut Tags;

    /// The semantic fields of the target, which config builders render from.
    fn fields(&self) -> serde_json::Value;
}

/// The complete set of targets currently produced by one source.
///
/// A group replaces any previous group of the same source, an empty group is
/// a tombstone which retracts everything the source produced before.
#[derive(Debug)]
pub struct Group {
    source: String,
    targets: Vec<Box<dyn Target>>,
}

impl Group {
    pub fn new(source: impl Into<String>, targets: Vec<Box<dyn Target>>) -> Self {
        Group {
            source: source.into(),
            targets,
        }
    }

    pub fn tombstone(source: impl Into<String>) -> Self {
        Group::new(source, Vec::new())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn targets(&self) -> &[Box<dyn Target>] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [Box<dyn Target>] {
        &mut self.targets
    }

    pub fn is_tombstone(&self) -> bool {
        self.targets.is_empty()
    }
}

/// An artifact built from one target. The pipeline never looks into the
/// payload, it only flags configs as stale when their target disappears.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Config {
    pub tuid: String,
    /// Hash of the target this config was built from, retractions must be
    /// matched on `(tuid, hash)`.
    pub hash: u64,
    /// Marks the config for retraction.
    pub stale: bool,
    pub payload: serde_json::Value,
}

impl Config {
    pub fn new(target: &dyn Target, payload: serde_json::Value) -> Self {
        Config {
            tuid: target.tuid().to_string(),
            hash: target.hash(),
            stale: false,
            payload,
        }
    }
}

/// Flags every config for retraction.
pub fn stale(mut configs: Vec<Config>) -> Vec<Config> {
    for config in configs.iter_mut() {
        config.stale = true;
    }

    configs
}
