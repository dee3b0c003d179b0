//! Wire types of the swap counterparty API.

use arkswap_core::ArkAddress;
use bitcoin::hashes::sha256;
use bitcoin::Amount;
use bitcoin::PublicKey;
use lightning_invoice::Bolt11Invoice;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DisplayFromStr;
use std::fmt;

/// All statuses a swap can report, across the three swap flavors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SwapStatus {
    /// Initial state when the swap is created.
    #[serde(rename = "swap.created")]
    Created,
    /// Lockup transaction detected in the mempool.
    #[serde(rename = "transaction.mempool")]
    TransactionMempool,
    /// Lockup transaction confirmed.
    #[serde(rename = "transaction.confirmed")]
    TransactionConfirmed,
    /// The counterparty's server-side lockup is in the mempool (chain swaps).
    #[serde(rename = "transaction.server.mempool")]
    TransactionServerMempool,
    /// The counterparty's server-side lockup is confirmed (chain swaps).
    #[serde(rename = "transaction.server.confirmed")]
    TransactionServerConfirmed,
    /// Funds were refunded to the sender.
    #[serde(rename = "transaction.refunded")]
    TransactionRefunded,
    /// Lockup transaction failed.
    #[serde(rename = "transaction.failed")]
    TransactionFailed,
    /// The user's lockup did not match what the counterparty expected.
    #[serde(rename = "transaction.lockupFailed")]
    TransactionLockupFailed,
    /// Funds were claimed by the counterparty.
    #[serde(rename = "transaction.claimed")]
    TransactionClaimed,
    /// A Lightning invoice has been attached to the swap.
    #[serde(rename = "invoice.set")]
    InvoiceSet,
    /// Waiting for the Lightning invoice to be paid.
    #[serde(rename = "invoice.pending")]
    InvoicePending,
    /// The Lightning invoice was paid.
    #[serde(rename = "invoice.paid")]
    InvoicePaid,
    /// The Lightning payment settled; preimage has been revealed.
    #[serde(rename = "invoice.settled")]
    InvoiceSettled,
    /// Paying the Lightning invoice failed; refund path is open.
    #[serde(rename = "invoice.failedToPay")]
    InvoiceFailedToPay,
    /// The Lightning invoice expired.
    #[serde(rename = "invoice.expired")]
    InvoiceExpired,
    /// The swap expired; refund path is open.
    #[serde(rename = "swap.expired")]
    SwapExpired,
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwapStatus::Created => "swap.created",
            SwapStatus::TransactionMempool => "transaction.mempool",
            SwapStatus::TransactionConfirmed => "transaction.confirmed",
            SwapStatus::TransactionServerMempool => "transaction.server.mempool",
            SwapStatus::TransactionServerConfirmed => "transaction.server.confirmed",
            SwapStatus::TransactionRefunded => "transaction.refunded",
            SwapStatus::TransactionFailed => "transaction.failed",
            SwapStatus::TransactionLockupFailed => "transaction.lockupFailed",
            SwapStatus::TransactionClaimed => "transaction.claimed",
            SwapStatus::InvoiceSet => "invoice.set",
            SwapStatus::InvoicePending => "invoice.pending",
            SwapStatus::InvoicePaid => "invoice.paid",
            SwapStatus::InvoiceSettled => "invoice.settled",
            SwapStatus::InvoiceFailedToPay => "invoice.failedToPay",
            SwapStatus::InvoiceExpired => "invoice.expired",
            SwapStatus::SwapExpired => "swap.expired",
        };
        write!(f, "{s}")
    }
}

/// The asset on either side of a swap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Ark,
}

/// The four timelocks of a VHTLC, as raw values off the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutBlockHeights {
    pub refund: u32,
    pub unilateral_claim: u32,
    pub unilateral_refund: u32,
    pub unilateral_refund_without_receiver: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTree {
    pub claim_leaf: TreeLeaf,
    pub refund_leaf: TreeLeaf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeLeaf {
    pub version: u8,
    /// Script hex.
    pub output: String,
}

// Reverse swaps.

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReverseSwapRequest {
    pub from: Asset,
    pub to: Asset,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_amount: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain_amount: Option<Amount>,
    pub claim_public_key: PublicKey,
    pub preimage_hash: sha256::Hash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Invoice expiry, seconds from now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_expiry: Option<u64>,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReverseSwapResponse {
    pub id: String,
    #[serde_as(as = "DisplayFromStr")]
    pub lockup_address: ArkAddress,
    pub refund_public_key: PublicKey,
    pub timeout_block_heights: TimeoutBlockHeights,
    pub invoice: Bolt11Invoice,
    pub onchain_amount: Option<Amount>,
}

// Submarine swaps.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmarineSwapRequest {
    pub from: Asset,
    pub to: Asset,
    pub invoice: Bolt11Invoice,
    pub refund_public_key: PublicKey,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmarineSwapResponse {
    pub id: String,
    #[serde_as(as = "DisplayFromStr")]
    pub address: ArkAddress,
    pub expected_amount: Amount,
    pub claim_public_key: PublicKey,
    #[serde(default)]
    pub accept_zero_conf: bool,
    pub timeout_block_heights: TimeoutBlockHeights,
}

// Chain swaps.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainSwapRequest {
    pub from: Asset,
    pub to: Asset,
    pub preimage_hash: sha256::Hash,
    pub claim_public_key: PublicKey,
    pub refund_public_key: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_lock_amount: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_lock_amount: Option<Amount>,
}

/// One side of a chain swap as described by the counterparty.
///
/// The BTC side carries a `swap_tree`; the Ark side carries the VHTLC
/// timeouts and the server key instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapDetails {
    pub lockup_address: String,
    pub amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_public_key: Option<PublicKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_tree: Option<SwapTree>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_block_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_block_heights: Option<TimeoutBlockHeights>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainSwapResponse {
    pub id: String,
    pub claim_details: ChainSwapDetails,
    pub lockup_details: ChainSwapDetails,
}

// Status and transactions.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSwapStatusResponse {
    pub status: SwapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_conf_rejected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetReverseSwapTxIdResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_block_height: Option<u32>,
}

// Cooperative refund.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSubmarineSwapRequest {
    /// Base64 PSBT of the refund Ark transaction.
    pub transaction: String,
    /// Base64 PSBT of the refund checkpoint transaction.
    pub checkpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSubmarineSwapResponse {
    /// Counterparty-signed refund transaction, base64 PSBT.
    pub transaction: String,
    /// Counterparty-signed checkpoint transaction, base64 PSBT.
    pub checkpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Cooperative chain claim.

/// The counterparty's half of the cooperative claim exchange: their nonce and
/// the sighash of their claim transaction they want our partial signature on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimDetails {
    /// Hex MuSig2 public nonce.
    pub pub_nonce: String,
    pub public_key: PublicKey,
    /// Hex sighash of the counterparty's claim transaction.
    pub transaction_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSignatureDetails {
    /// Hex MuSig2 partial signature.
    pub partial_signature: String,
    /// Hex MuSig2 public nonce.
    pub pub_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimSignRequest {
    /// Hex sighash of our claim transaction, for the counterparty to sign.
    pub pub_nonce: String,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostChainClaimRequest {
    /// Hex preimage proving our right to claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    /// Our signature on the counterparty's claim transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<PartialSignatureDetails>,
    /// Our claim sighash and nonce for the counterparty to sign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_sign: Option<ChainClaimSignRequest>,
}

// Fees and limits.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainMinerFees {
    pub server: u64,
    pub user: ChainUserMinerFees,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainUserMinerFees {
    pub claim: u64,
    pub lockup: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChainFeesResponse {
    pub miner_fees: ChainMinerFees,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChainLimitsResponse {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTransactionRequest {
    pub hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTransactionResponse {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn deserialize_create_reverse_swap_response() {
        let json = r#"{
  "id": "vqhG2fJtNY4H",
  "lockupAddress": "tark1qra883hysahlkt0ujcwhv0x2n278849c3m7t3a08l7fdc40f4f2nmw3f7kn37vvq0hqazxtqgtvhwp3z83zfgr7qc82t9mty8vk95ynpx3l43d",
  "refundPublicKey": "0206988651c7fbe41747bb21b54ced0a183f4d658e007ee8fdb23fbbfccb8e0c55",
  "timeoutBlockHeights": {
    "refund": 1760508054,
    "unilateralClaim": 9728,
    "unilateralRefund": 86528,
    "unilateralRefundWithoutReceiver": 86528
  },
  "invoice": "lntbs10u1p5wmeeepp56ms94rkev7tdrwqyus5a63lny2mqzq9vh2rq3u4ym3v4lxv6xl4qdql2djkuepqw3hjqs2jfvsxzerywfjhxuccqz95xqztfsp5ckaskagag554na8d56tlrfdxasstqrmmpkvswqqqx6y386jcfq9s9qxpqysgqt7z0vkdwkqamydae7ctgkh7l8q75w7q9394ce3lda2mkfxrpfdtj5gmltuctav7jdgatkflhztrjjzutdla5e4xp0uhxxy7sluzll4qpkkh6wv",
  "onchainAmount": 996
}"#;

        let response: CreateReverseSwapResponse =
            serde_json::from_str(json).expect("deserializes");

        assert_eq!(response.id, "vqhG2fJtNY4H");
        assert_eq!(response.onchain_amount, Some(Amount::from_sat(996)));
        assert_eq!(
            response.refund_public_key,
            PublicKey::from_str(
                "0206988651c7fbe41747bb21b54ced0a183f4d658e007ee8fdb23fbbfccb8e0c55"
            )
            .expect("valid key")
        );
        assert_eq!(response.timeout_block_heights.refund, 1760508054);
        assert_eq!(response.timeout_block_heights.unilateral_claim, 9728);
    }

    #[test]
    fn status_wire_strings() {
        for (status, wire) in [
            (SwapStatus::Created, "\"swap.created\""),
            (SwapStatus::TransactionMempool, "\"transaction.mempool\""),
            (
                SwapStatus::TransactionServerConfirmed,
                "\"transaction.server.confirmed\"",
            ),
            (SwapStatus::InvoiceFailedToPay, "\"invoice.failedToPay\""),
            (SwapStatus::InvoiceSettled, "\"invoice.settled\""),
        ] {
            assert_eq!(serde_json::to_string(&status).expect("serializes"), wire);
            assert_eq!(
                serde_json::from_str::<SwapStatus>(wire).expect("deserializes"),
                status
            );
        }
    }

    #[test]
    fn deserialize_chain_swap_response() {
        let json = r#"{
  "id": "chainAbc123",
  "claimDetails": {
    "lockupAddress": "bcrt1pexample",
    "amount": 99000,
    "serverPublicKey": "0206988651c7fbe41747bb21b54ced0a183f4d658e007ee8fdb23fbbfccb8e0c55",
    "swapTree": {
      "claimLeaf": { "version": 192, "output": "a914aabbccdd87" },
      "refundLeaf": { "version": 192, "output": "029000b175" }
    },
    "timeoutBlockHeight": 144
  },
  "lockupDetails": {
    "lockupAddress": "tark1qexample",
    "amount": 100000,
    "serverPublicKey": "0206988651c7fbe41747bb21b54ced0a183f4d658e007ee8fdb23fbbfccb8e0c55",
    "timeoutBlockHeights": {
      "refund": 144,
      "unilateralClaim": 24,
      "unilateralRefund": 144,
      "unilateralRefundWithoutReceiver": 288
    }
  }
}"#;

        let response: CreateChainSwapResponse = serde_json::from_str(json).expect("deserializes");

        assert_eq!(response.id, "chainAbc123");
        assert!(response.claim_details.swap_tree.is_some());
        assert!(response.lockup_details.timeout_block_heights.is_some());
        assert_eq!(response.lockup_details.amount, Amount::from_sat(100_000));
    }
}
