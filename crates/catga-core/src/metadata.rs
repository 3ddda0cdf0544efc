//! Ordered key -> string metadata bag attached to `CatgaResult`.
//!
//! Propagates across pipeline stages (spec §4.A): behaviors read and
//! append entries without disturbing insertion order, since some
//! consumers (logging, the HTTP adapter) render metadata as an
//! ordered list.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(IndexMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut m = Self::new();
        m.insert(key, value);
        m
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Merge `other` into self, later keys win on collision but original
    /// insertion order of self's keys is preserved.
    pub fn merge(&mut self, other: &Metadata) {
        for (k, v) in other.iter() {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
