use crate::prelude::*;

use std::collections::HashMap;

/// Resolves the small integer indices some return keys carry into text.
pub trait LabelLookup {
    fn lookup(&self, index: u16) -> Option<String>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelMap(HashMap<u16, String>);

impl LabelMap {
    pub fn new(labels: HashMap<u16, String>) -> Self {
        Self(labels)
    }

    /// Reads a YAML mapping of `index: label`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| crate::file_error_with_source!(err, "error reading labels {}", path))?;
        let labels: HashMap<u16, String> = serde_yaml::from_str(&content)?;
        info!("loaded {} labels from {}", labels.len(), path);
        Ok(Self(labels))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl LabelLookup for LabelMap {
    fn lookup(&self, index: u16) -> Option<String> {
        self.0.get(&index).cloned()
    }
}
