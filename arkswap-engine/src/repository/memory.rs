use super::SwapFilter;
use super::SwapRepository;
use crate::model::SwapRecord;
use arkswap_core::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of [`SwapRepository`].
///
/// The default backend for tests and short-lived embedders; nothing survives
/// the process.
#[derive(Clone, Default)]
pub struct MemorySwapRepository {
    records: Arc<RwLock<HashMap<String, SwapRecord>>>,
}

impl MemorySwapRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwapRepository for MemorySwapRepository {
    async fn save(&self, record: &SwapRecord) -> Result<(), Error> {
        let mut records = self.records.write().await;
        records.insert(record.id().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SwapRecord>, Error> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<Option<SwapRecord>, Error> {
        let mut records = self.records.write().await;
        Ok(records.remove(id))
    }

    async fn get_all(&self, filter: Option<&SwapFilter>) -> Result<Vec<SwapRecord>, Error> {
        let records = self.records.read().await;

        let mut result: Vec<SwapRecord> = match filter {
            Some(filter) => records
                .values()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect(),
            None => records.values().cloned().collect(),
        };

        if let Some(filter) = filter {
            filter.sort(&mut result);
        }

        Ok(result)
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut records = self.records.write().await;
        records.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
