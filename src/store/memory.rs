// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::collections::BTreeMap;

use anyhow::Result;

use super::{Observation, ObservationStore};

/// 内存存储 (dry-run 与测试)
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    items: BTreeMap<String, Observation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ObservationStore for MemoryStore {
    fn put(&mut self, obs: &Observation) -> Result<()> {
        self.items.insert(obs.image.clone(), obs.clone());
        Ok(())
    }

    fn get(&self, image: &str) -> Result<Option<Observation>> {
        Ok(self.items.get(image).cloned())
    }

    fn list(&self) -> Result<Vec<Observation>> {
        Ok(self.items.values().cloned().collect())
    }
}
