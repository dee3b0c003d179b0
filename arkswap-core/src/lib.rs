//! Protocol primitives for Ark swaps.
//!
//! Everything in this crate is pure computation: script and address
//! construction, VHTLC trees, MuSig2 sessions, offchain transaction building
//! and signing, and the wire types shared with the Ark server. The lifecycle
//! engine and all I/O live in `arkswap-engine`.

use bitcoin::Amount;
use bitcoin::ScriptBuf;
use bitcoin::TxOut;

pub mod batch;
pub mod intent;
pub mod keys;
pub mod musig2;
pub mod offchain;
pub mod script;
pub mod server;
pub mod vhtlc;

mod address;
mod conversions;
mod error;

pub use address::ArkAddress;
pub use conversions::from_musig_xonly;
pub use conversions::to_musig_keypair;
pub use conversions::to_musig_pk;
pub use error::Error;
pub use error::ErrorContext;
pub use error::ErrorKind;

/// The canonical provably-unspendable internal key for Taproot outputs whose
/// key path must never be usable.
pub const UNSPENDABLE_KEY: &str =
    "0250929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

/// The byte value corresponds to the string "taptree".
pub const VTXO_TAPROOT_KEY: [u8; 7] = [116, 97, 112, 116, 114, 101, 101];

/// The byte value corresponds to the string "condition".
pub const VTXO_CONDITION_KEY: [u8; 9] = [99, 111, 110, 100, 105, 116, 105, 111, 110];

const ANCHOR_SCRIPT_PUBKEY: [u8; 4] = [0x51, 0x02, 0x4e, 0x73];

/// The zero-value anchor output carried by every offchain transaction.
pub fn anchor_output() -> TxOut {
    let script_pubkey = ScriptBuf::from_bytes(ANCHOR_SCRIPT_PUBKEY.to_vec());

    TxOut {
        value: Amount::ZERO,
        script_pubkey,
    }
}
