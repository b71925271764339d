use std::collections::HashMap;
use std::hash::Hash;

use crate::table::Value;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Rounds to two decimals for presentation.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Increments the counter for `key`.
pub fn bump<K: Eq + Hash>(counts: &mut HashMap<K, usize>, key: K, by: usize) {
    *counts.entry(key).or_insert(0) += by;
}

/// Normalized key of a cell, or an empty string for nulls.
pub fn key_of(value: &Value) -> String {
    value.key().unwrap_or_default()
}
