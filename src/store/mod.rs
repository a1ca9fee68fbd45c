//! Resource Store Adapters
//!
//! Provides adapters for the [`ResourceStore`](crate::domain::ports::ResourceStore) port:
//! - Kubernetes API (`KubeStore`)
//! - In-memory cluster model (`MemoryStore`)

pub mod kube;
pub mod memory;

#[cfg(test)]
pub(crate) mod fixtures;

pub use self::kube::KubeStore;
pub use self::memory::{MemoryStore, MutationSnapshot};

use std::collections::BTreeMap;

/// Evaluate an equality-based label selector (`a=b,c=d`) against a label map
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let value_of = |key: &str| labels.get(key.trim()).map(String::as_str);
            if let Some((key, value)) = term.split_once("!=") {
                value_of(key) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once("==") {
                value_of(key) == Some(value.trim())
            } else if let Some((key, value)) = term.split_once('=') {
                value_of(key) == Some(value.trim())
            } else {
                labels.contains_key(term)
            }
        })
}
