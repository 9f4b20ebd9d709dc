//! Multi-valued string dictionary.
//!
//! [`Values`] backs every parameter view. Reads never fail: an absent key and a
//! key with no values both read as empty, the same way HTML form semantics
//! treat a missing field.

use std::collections::HashMap;
use std::collections::hash_map;

use serde::Serialize;

/// A mapping from key to an ordered list of string values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Values(HashMap<String, Vec<String>>);

impl Values {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// First value for `key`, or `""`.
    pub fn get(&self, key: &str) -> &str {
        self.0
            .get(key)
            .and_then(|vs| vs.first())
            .map_or("", String::as_str)
    }

    /// Every value for `key`, or an empty slice.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map_or(&[], Vec::as_slice)
    }

    /// Replaces all values of `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    /// Adds `values` after any existing values of `key`.
    pub fn append<I, S>(&mut self, key: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// True when `key` has at least one value.
    pub fn contains(&self, key: &str) -> bool {
        !self.get_all(key).is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Vec<String>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Values
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut values = Values::new();
        for (k, v) in iter {
            values.append(k, [v]);
        }
        values
    }
}

impl<'a> IntoIterator for &'a Values {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = hash_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
