//! Per-session store of document results, kept in submission order.

use crate::pipeline::DocumentResult;
use std::collections::HashMap;

/// Results keyed by document name.
///
/// Re-processing a name replaces its result in place; the entry keeps the
/// position of its first insertion.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    entries: Vec<(String, DocumentResult)>,
    index: HashMap<String, usize>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the result for `name`. Last write wins.
    pub fn put(&mut self, name: impl Into<String>, result: DocumentResult) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&pos) => {
                tracing::debug!("ResultStore: replacing '{}'", name);
                self.entries[pos].1 = result;
            }
            None => {
                tracing::debug!("ResultStore: stored '{}'", name);
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, result));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&DocumentResult> {
        self.index.get(name).map(|&pos| &self.entries[pos].1)
    }

    /// All entries in insertion order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &DocumentResult)> {
        self.entries.iter().map(|(name, result)| (name.as_str(), result))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
