//! Typed boundary to the swap counterparty.
//!
//! The counterparty exposes a REST API for creating swaps and negotiating
//! cooperative signatures, plus a WebSocket stream of status updates. This
//! crate owns the wire types and the HTTP client; connection management and
//! reconnect policy live in the engine.

pub mod model;
pub mod ws;

mod client;

pub use client::ProviderClient;
pub use model::SwapStatus;
