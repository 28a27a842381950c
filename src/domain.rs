use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// one polling cycle's worth of readings: series name -> value.
///
/// ordered by name, so columns created from a batch always come out in the
/// same order no matter which sensor answered first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingBatch(BTreeMap<String, f64>);

impl ReadingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// union with `other`; on a name clash `other` wins. returns the names
    /// that were overwritten.
    pub fn merge(&mut self, other: ReadingBatch) -> Vec<String> {
        let mut overwritten = Vec::new();
        for (name, value) in other.0 {
            if self.0.insert(name.clone(), value).is_some() {
                overwritten.push(name);
            }
        }
        overwritten
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ReadingBatch {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
