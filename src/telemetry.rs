use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Name/value pairs sampled from the subsystem models for one tick.
///
/// Iteration order is sorted by name so that anything derived from a sample
/// set is reproducible between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Samples {
    values: BTreeMap<String, f64>,
}

impl Samples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Builder-style insert, handy for scripted inputs.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Remove every non-finite value and return the removed pairs.
    pub fn take_non_finite(&mut self) -> Vec<(String, f64)> {
        let invalid: Vec<(String, f64)> = self
            .values
            .iter()
            .filter(|(_, v)| !v.is_finite())
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        for (name, _) in &invalid {
            self.values.remove(name);
        }

        invalid
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Samples {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut samples = Samples::new();
        for (name, value) in iter {
            samples.insert(name, value);
        }
        samples
    }
}
