use crate::model::{Tags, Target};
use crate::pipeline::Tagger;

/// Merges a fixed set of tags into every target.
pub struct StaticTagger {
    tags: Tags,
}

impl StaticTagger {
    pub fn new(tags: Tags) -> Self {
        StaticTagger { tags }
    }
}

impl Tagger for StaticTagger {
    fn tag(&self, target: &mut dyn Target) {
        target.tags_mut().merge(&self.tags);
    }
}
