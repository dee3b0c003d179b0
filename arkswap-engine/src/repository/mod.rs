//! # Swap repository
//!
//! Durable, queryable storage for swap records. Two backends satisfy the
//! same contract: [`MemorySwapRepository`] for tests and embedded use, and a
//! SQLite backend behind the `sqlite` feature for production.

use crate::model::SwapKind;
use crate::model::SwapRecord;
use arkswap_core::Error;
use arkswap_provider::SwapStatus;
use async_trait::async_trait;

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemorySwapRepository;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSwapRepository;

/// Which field to order query results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Conjunctive filter over swap records.
///
/// A field set to `None` does not constrain the result. An *empty* set
/// matches nothing.
#[derive(Debug, Clone, Default)]
pub struct SwapFilter {
    pub ids: Option<Vec<String>>,
    pub statuses: Option<Vec<SwapStatus>>,
    pub kinds: Option<Vec<SwapKind>>,
    pub order_by: Option<OrderBy>,
    pub order_direction: Option<OrderDirection>,
}

impl SwapFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            ids: Some(vec![id.into()]),
            ..Default::default()
        }
    }

    pub fn by_statuses(statuses: Vec<SwapStatus>) -> Self {
        Self {
            statuses: Some(statuses),
            ..Default::default()
        }
    }

    /// Whether `record` satisfies every constrained field.
    pub fn matches(&self, record: &SwapRecord) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == record.id()) {
                return false;
            }
        }

        if let Some(statuses) = &self.statuses {
            if !statuses.contains(record.status()) {
                return false;
            }
        }

        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&record.kind()) {
                return false;
            }
        }

        true
    }

    /// Apply ordering to an already-filtered result set.
    pub fn sort(&self, records: &mut [SwapRecord]) {
        if let Some(OrderBy::CreatedAt) = self.order_by {
            match self.order_direction.unwrap_or(OrderDirection::Asc) {
                OrderDirection::Asc => records.sort_by_key(|r| r.created_at()),
                OrderDirection::Desc => {
                    records.sort_by_key(|r| std::cmp::Reverse(r.created_at()))
                }
            }
        }
    }
}

/// The storage contract of the engine.
///
/// `save` is an upsert keyed on the swap id; reads observe prior completed
/// writes.
#[async_trait]
pub trait SwapRepository: Send + Sync {
    async fn save(&self, record: &SwapRecord) -> Result<(), Error>;

    async fn get(&self, id: &str) -> Result<Option<SwapRecord>, Error>;

    async fn delete(&self, id: &str) -> Result<Option<SwapRecord>, Error>;

    async fn get_all(&self, filter: Option<&SwapFilter>) -> Result<Vec<SwapRecord>, Error>;

    /// Remove every record.
    async fn clear(&self) -> Result<(), Error>;

    /// Release backend resources. The repository must not be used afterwards.
    async fn close(&self) -> Result<(), Error>;
}
