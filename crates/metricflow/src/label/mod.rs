// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sorted label sets.
//!
//! A [`LabelSet`] keeps its pairs sorted by name with unique names, so every
//! lookup is a binary search. Mutations that allocate reserve first and
//! leave the set untouched when the reservation fails.

mod text;

pub use text::escape_value;

use crate::error::{Error, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::cmp::Ordering;

/// Pseudo-label naming the metric itself.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A single `name="value"` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

/// Check `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn try_string(s: &str) -> Result<String> {
    let mut out = String::new();
    out.try_reserve_exact(s.len())?;
    out.push_str(s);
    Ok(out)
}

/// Label collection sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet {
    pairs: Vec<LabelPair>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(name, value)` pairs, later pairs overwriting earlier ones.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Result<Self>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.add(true, name.as_ref(), value.as_ref())?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabelPair> {
        self.pairs.iter()
    }

    pub fn pairs(&self) -> &[LabelPair] {
        &self.pairs
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.pairs
            .binary_search_by(|pair| pair.name.as_str().cmp(name))
    }

    /// Insert, update or delete a label.
    ///
    /// An empty `value` removes `name`. When the label exists and
    /// `overwrite` is false the set is left unchanged.
    pub fn add(&mut self, overwrite: bool, name: &str, value: &str) -> Result<()> {
        match self.position(name) {
            Ok(idx) => {
                if value.is_empty() {
                    self.pairs.remove(idx);
                } else if overwrite {
                    self.pairs[idx].value = try_string(value)?;
                }
                Ok(())
            }
            Err(idx) => {
                if value.is_empty() {
                    return Ok(());
                }
                if !is_valid_label_name(name) {
                    return Err(Error::InvalidArgument(format!(
                        "invalid label name '{}'",
                        name
                    )));
                }
                let pair = LabelPair {
                    name: try_string(name)?,
                    value: try_string(value)?,
                };
                self.pairs.try_reserve(1)?;
                self.pairs.insert(idx, pair);
                Ok(())
            }
        }
    }

    /// Shorthand for `add(true, name, value)`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        self.add(true, name, value)
    }

    /// Remove `name`, returning whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Ok(idx) => {
                self.pairs.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Look up the value of `name`.
    pub fn read(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(format!("label '{}'", name)))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .ok()
            .map(|idx| self.pairs[idx].value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_ok()
    }

    /// Merge every pair of `other` into this set.
    pub fn add_set(&mut self, overwrite: bool, other: &LabelSet) -> Result<()> {
        for pair in &other.pairs {
            self.add(overwrite, &pair.name, &pair.value)?;
        }
        Ok(())
    }

    /// Rename label `from` to `to`, keeping its value.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if self.contains(to) {
            return Err(Error::AlreadyExists(format!("label '{}'", to)));
        }
        let idx = self
            .position(from)
            .map_err(|_| Error::NotFound(format!("label '{}'", from)))?;
        if !is_valid_label_name(to) {
            return Err(Error::InvalidArgument(format!(
                "invalid label name '{}'",
                to
            )));
        }
        self.pairs[idx].name = try_string(to)?;
        self.pairs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }

    /// Deep copy through fallible allocation.
    pub fn try_clone(&self) -> Result<Self> {
        let mut pairs = Vec::new();
        pairs.try_reserve_exact(self.pairs.len())?;
        for pair in &self.pairs {
            pairs.push(LabelPair {
                name: try_string(&pair.name)?,
                value: try_string(&pair.value)?,
            });
        }
        Ok(Self { pairs })
    }

    /// Keep only the labels whose name satisfies `keep`.
    pub fn retain_names<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.pairs.retain(|pair| keep(&pair.name));
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

impl Ord for LabelSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pairs.len().cmp(&other.pairs.len()).then_with(|| {
            for (a, b) in self.pairs.iter().zip(other.pairs.iter()) {
                let ord = a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        })
    }
}

impl PartialOrd for LabelSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a LabelPair;
    type IntoIter = std::slice::Iter<'a, LabelPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

impl Serialize for LabelSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.pairs.len()))?;
        for pair in &self.pairs {
            map.serialize_entry(&pair.name, &pair.value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &LabelSet) -> Vec<&str> {
        set.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_add_then_read() {
        let mut set = LabelSet::new();
        set.add(true, "zone", "a").expect("add");
        set.add(true, "host", "example.com").expect("add");
        assert_eq!(set.read("zone").expect("read"), "a");
        assert_eq!(set.read("host").expect("read"), "example.com");
        assert_eq!(names(&set), vec!["host", "zone"]);
    }

    #[test]
    fn test_empty_value_deletes() {
        let mut set = LabelSet::from_pairs([("a", "1"), ("b", "2")]).expect("set");
        set.add(true, "a", "").expect("delete");
        assert!(matches!(set.read("a"), Err(Error::NotFound(_))));
        assert_eq!(set.len(), 1);

        // deleting a missing label is not an error
        set.add(true, "missing", "").expect("noop");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_add_without_overwrite() {
        let mut set = LabelSet::from_pairs([("a", "1")]).expect("set");
        set.add(false, "a", "2").expect("add");
        assert_eq!(set.get("a"), Some("1"));
        set.add(true, "a", "2").expect("add");
        assert_eq!(set.get("a"), Some("2"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let mut set = LabelSet::new();
        assert!(matches!(
            set.add(true, "9bad", "x"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            set.add(true, "with-dash", "x"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn test_rename() {
        let mut set = LabelSet::from_pairs([("b", "1"), ("c", "2")]).expect("set");
        set.rename("c", "a").expect("rename");
        assert_eq!(names(&set), vec!["a", "b"]);
        assert_eq!(set.get("a"), Some("2"));

        assert!(matches!(set.rename("a", "b"), Err(Error::AlreadyExists(_))));
        assert!(matches!(set.rename("zz", "y"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_stays_sorted_under_mixed_mutations() {
        let mut set = LabelSet::new();
        let mut rng = fastrand::Rng::with_seed(7);
        let pool = ["alpha", "beta", "gamma", "delta", "eps", "zeta", "eta", "theta"];
        for _ in 0..500 {
            let name = pool[rng.usize(..pool.len())];
            match rng.u8(..3) {
                0 => set.add(true, name, "v").expect("add"),
                1 => set.add(true, name, "").expect("delete"),
                _ => {
                    let to = pool[rng.usize(..pool.len())];
                    let _ = set.rename(name, to);
                }
            }
            let sorted = set.pairs().windows(2).all(|w| w[0].name < w[1].name);
            assert!(sorted, "labels out of order: {:?}", names(&set));
        }
    }

    #[test]
    fn test_compare_by_count_first() {
        let short = LabelSet::from_pairs([("z", "z")]).expect("set");
        let long = LabelSet::from_pairs([("a", "a"), ("b", "b")]).expect("set");
        assert!(short < long);

        let a = LabelSet::from_pairs([("a", "1")]).expect("set");
        let b = LabelSet::from_pairs([("a", "2")]).expect("set");
        assert!(a < b);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_add_set_keeps_existing() {
        let mut set = LabelSet::from_pairs([("host", "local")]).expect("set");
        let global = LabelSet::from_pairs([("host", "global"), ("dc", "eu")]).expect("set");
        set.add_set(false, &global).expect("merge");
        assert_eq!(set.get("host"), Some("local"));
        assert_eq!(set.get("dc"), Some("eu"));
    }

    #[test]
    fn test_try_clone_is_deep() {
        let set = LabelSet::from_pairs([("a", "1")]).expect("set");
        let mut copy = set.try_clone().expect("clone");
        copy.set("a", "2").expect("set");
        assert_eq!(set.get("a"), Some("1"));
    }
}
