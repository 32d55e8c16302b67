use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("invalid tag '{0}', tags must not start with '-'")]
    Invalid(String),
}

/// A set of words attached to a target, written as a space separated string
/// like `"k8s pod web"`.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new() -> Self {
        Tags(BTreeSet::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn insert(&mut self, tag: impl Into<String>) {
        self.0.insert(tag.into());
    }

    /// Adds every tag of `other`.
    pub fn merge(&mut self, other: &Tags) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromStr for Tags {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tags = Tags::new();
        for tag in s.split_whitespace() {
            if tag.starts_with('-') {
                return Err(Error::Invalid(tag.to_string()));
            }

            tags.insert(tag);
        }

        Ok(tags)
    }
}

impl<const N: usize> From<[&str; N]> for Tags {
    fn from(tags: [&str; N]) -> Self {
        Tags(tags.into_iter().map(String::from).collect())
    }
}

impl Display for Tags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, tag) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            f.write_str(tag)?;
        }

        Ok(())
    }
}

impl Serialize for Tags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let tags = "k8s  pod\tweb k8s".parse::<Tags>().unwrap();

        assert_eq!(tags.len(), 3);
        assert!(tags.contains("k8s"));
        assert!(tags.contains("web"));
        assert_eq!(tags.to_string(), "k8s pod web");
    }

    #[test]
    fn parse_empty() {
        assert!("  ".parse::<Tags>().unwrap().is_empty());
    }

    #[test]
    fn parse_invalid() {
        assert_eq!(
            "k8s -pod".parse::<Tags>(),
            Err(Error::Invalid("-pod".to_string()))
        );
    }

    #[test]
    fn merge() {
        let mut tags = Tags::from(["k8s"]);
        tags.merge(&Tags::from(["pod", "k8s"]));

        assert_eq!(tags, Tags::from(["k8s", "pod"]));
    }

    #[test]
    fn serde() {
        let tags = serde_yaml::from_str::<Tags>("\"web k8s\"").unwrap();
        assert_eq!(tags, Tags::from(["k8s", "web"]));

        assert_eq!(serde_json::to_string(&tags).unwrap(), "\"k8s web\"");
    }
}
