//! The swap lifecycle engine.
//!
//! Monitors every in-flight swap between the Ark layer and Lightning (or
//! on-chain BTC), reacts to status updates pushed over the counterparty's
//! WebSocket (with polling fallback), and at the right transitions builds,
//! co-signs, verifies, and finalizes the transactions that claim or refund
//! each swap.
//!
//! The moving parts, leaf first:
//!
//! - [`model`]: the swap records and the pure classifiers over them.
//! - [`repository`]: durable storage (in-memory, and SQLite behind the
//!   `sqlite` feature).
//! - [`connection`]: the WebSocket + polling connection state machine.
//! - [`ark`]: the narrow Ark server interface and its REST implementation.
//! - [`orchestrator`]: the claim/refund signing ceremonies.
//! - [`engine`]: the top-level state machine tying it all together.

pub mod ark;
pub mod config;
pub mod connection;
pub mod engine;
pub mod events;
pub mod keys;
pub mod model;
pub mod orchestrator;
pub mod repository;

pub use arkswap_core::Error;
pub use arkswap_core::ErrorKind;
pub use config::EngineConfig;
pub use engine::LifecycleEngine;
pub use engine::SwapCompletion;
pub use events::EventBus;
pub use events::SwapEvent;
pub use model::PendingAction;
pub use model::SwapKind;
pub use model::SwapRecord;
pub use orchestrator::ActionExecutor;
pub use orchestrator::ActionOutcome;
pub use orchestrator::Orchestrator;
pub use repository::MemorySwapRepository;
pub use repository::SwapFilter;
pub use repository::SwapRepository;
#[cfg(feature = "sqlite")]
pub use repository::SqliteSwapRepository;
