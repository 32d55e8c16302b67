use std::collections::{BTreeMap, HashMap, HashSet};

use super::{Builder, Tagger};
use crate::model::{Config, Group, stale};

/// The diff/cache engine.
///
/// Keeps the configs built for every (source, target hash) pair, so a target
/// whose content did not change is never rebuilt, and computes which configs
/// must be added and which retracted when a new group arrives.
pub struct Engine {
    tagger: Box<dyn Tagger>,
    builder: Box<dyn Builder>,

    // source -> target hash -> configs
    cache: HashMap<String, BTreeMap<u64, Vec<Config>>>,
}

impl Engine {
    pub fn new(tagger: Box<dyn Tagger>, builder: Box<dyn Builder>) -> Self {
        Engine {
            tagger,
            builder,
            cache: HashMap::new(),
        }
    }

    /// Processes a batch of groups in arrival order. The result holds all
    /// additions of the batch followed by all stale configs.
    pub fn process(&mut self, groups: Vec<Group>) -> Vec<Config> {
        info!(message = "received groups", count = groups.len());

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for mut group in groups {
            debug!(
                message = "processing group",
                source = group.source(),
                targets = group.targets().len()
            );

            if group.is_tombstone() {
                let stale = self.handle_empty(group.source());
                if !stale.is_empty() {
                    info!(
                        message = "group retracted",
                        source = group.source(),
                        stale = stale.len()
                    );

                    removed.extend(stale);
                }
            } else {
                let (add, remove) = self.handle_not_empty(&mut group);
                if !add.is_empty() || !remove.is_empty() {
                    info!(
                        message = "group changed",
                        source = group.source(),
                        new = add.len(),
                        stale = remove.len()
                    );

                    added.extend(add);
                    removed.extend(remove);
                }
            }
        }

        added.extend(removed);
        added
    }

    /// Target hashes cached for `source`, `None` when the source is unknown.
    pub fn hashes(&self, source: &str) -> Option<Vec<u64>> {
        self.cache
            .get(source)
            .map(|cached| cached.keys().copied().collect())
    }

    fn handle_empty(&mut self, source: &str) -> Vec<Config> {
        match self.cache.remove(source) {
            Some(cached) => stale(cached.into_values().flatten().collect()),
            None => Vec::new(),
        }
    }

    fn handle_not_empty(&mut self, group: &mut Group) -> (Vec<Config>, Vec<Config>) {
        let exist = self.cache.contains_key(group.source());
        let cached = self.cache.entry(group.source().to_string()).or_default();

        let mut seen = HashSet::new();
        let mut added = Vec::new();
        for target in group.targets_mut() {
            let hash = target.hash();
            // counted as seen even if the build below fails, nothing gets
            // cached for a failed hash so the next delivery builds it again
            seen.insert(hash);

            if cached.contains_key(&hash) {
                continue;
            }

            self.tagger.tag(target.as_mut());
            match self.builder.build(target.as_ref()) {
                Ok(configs) => {
                    added.extend(configs.iter().cloned());
                    cached.insert(hash, configs);
                }
                Err(err) => {
                    warn!(
                        message = "build configs failed, retry on next delivery",
                        tuid = target.tuid(),
                        hash,
                        %err
                    );
                }
            }
        }

        if !exist {
            return (added, Vec::new());
        }

        let mut removed = Vec::new();
        cached.retain(|hash, configs| {
            if seen.contains(hash) {
                return true;
            }

            removed.append(configs);
            false
        });

        (added, stale(removed))
    }
}
