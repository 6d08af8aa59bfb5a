use async_trait::async_trait;
use dashmap::DashMap;

use super::{SessionSlot, SlotError};

/// Volatile slot. Lives as long as the process.
#[derive(Debug, Default)]
pub struct MemorySlot {
    entries: DashMap<String, String>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionSlot for MemorySlot {
    async fn get(&self, key: &str) -> Result<Option<String>, SlotError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), SlotError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SlotError> {
        self.entries.remove(key);
        Ok(())
    }
}
