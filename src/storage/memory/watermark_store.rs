//! In-memory WatermarkStore.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::Sequence;
use crate::storage::{Result, WatermarkStore};

#[derive(Default)]
pub struct MemoryWatermarkStore {
    marks: RwLock<HashMap<String, Sequence>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, name: &str) -> Result<Option<Sequence>> {
        Ok(self.marks.read().await.get(name).copied())
    }

    async fn put(&self, name: &str, sequence: Sequence) -> Result<()> {
        self.marks.write().await.insert(name.to_string(), sequence);
        Ok(())
    }
}
