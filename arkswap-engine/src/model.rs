//! The swap records tracked by the engine, and the pure classifiers that
//! drive the lifecycle state machine.

use arkswap_core::ArkAddress;
use arkswap_provider::model::ChainSwapDetails;
use arkswap_provider::model::TimeoutBlockHeights;
use arkswap_provider::SwapStatus;
use bitcoin::hashes::sha256;
use bitcoin::Amount;
use bitcoin::PublicKey;
use lightning_invoice::Bolt11Invoice;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DisplayFromStr;
use std::fmt;

/// The three swap flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapKind {
    Reverse,
    Submarine,
    Chain,
}

impl fmt::Display for SwapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapKind::Reverse => write!(f, "reverse"),
            SwapKind::Submarine => write!(f, "submarine"),
            SwapKind::Chain => write!(f, "chain"),
        }
    }
}

/// Direction of a chain swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainDirection {
    ArkToBtc,
    BtcToArk,
}

/// A swap in which we receive over Lightning and claim a VHTLC with the
/// preimage.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseSwap {
    pub id: String,
    pub status: SwapStatus,
    pub created_at: u64,
    /// Absent when the record was restored from storage without its secret
    /// material; such a swap is watched but never claimed.
    pub preimage: Option<[u8; 32]>,
    /// SHA-256 of the preimage; the invoice payment hash.
    pub preimage_hash: sha256::Hash,
    /// Our key on the claim leaf.
    pub claim_public_key: PublicKey,
    /// The counterparty's key on the refund leaves.
    pub refund_public_key: PublicKey,
    pub invoice: Bolt11Invoice,
    /// Amount locked in the VHTLC.
    pub onchain_amount: Amount,
    #[serde_as(as = "DisplayFromStr")]
    pub lockup_address: ArkAddress,
    pub timeout_block_heights: TimeoutBlockHeights,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A swap in which we pay a Lightning invoice by funding a VHTLC.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmarineSwap {
    pub id: String,
    pub status: SwapStatus,
    pub created_at: u64,
    pub invoice: Bolt11Invoice,
    /// SHA-256 payment hash of the invoice.
    pub preimage_hash: sha256::Hash,
    /// Our key on the refund leaves.
    pub refund_public_key: PublicKey,
    /// The counterparty's key on the claim leaf.
    pub claim_public_key: PublicKey,
    pub expected_amount: Amount,
    pub accept_zero_conf: bool,
    #[serde_as(as = "DisplayFromStr")]
    pub lockup_address: ArkAddress,
    pub timeout_block_heights: TimeoutBlockHeights,
}

/// A swap between an Ark VTXO and on-chain BTC through symmetric VHTLCs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSwap {
    pub id: String,
    pub status: SwapStatus,
    pub created_at: u64,
    pub direction: ChainDirection,
    pub preimage: Option<[u8; 32]>,
    pub preimage_hash: sha256::Hash,
    /// Our key on the claim side.
    pub claim_public_key: PublicKey,
    /// Our key on the refund side.
    pub refund_public_key: PublicKey,
    /// Where the claimed funds should end up.
    pub to_address: String,
    pub amount: Amount,
    pub fee_sats_per_vbyte: u64,
    /// The side we lock.
    pub lockup_details: ChainSwapDetails,
    /// The side we claim.
    pub claim_details: ChainSwapDetails,
    /// The counterparty's BTC lockup transaction, once it exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub btc_tx_hex: Option<String>,
}

/// A monitored swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SwapRecord {
    Reverse(ReverseSwap),
    Submarine(SubmarineSwap),
    Chain(ChainSwap),
}

impl SwapRecord {
    pub fn id(&self) -> &str {
        match self {
            SwapRecord::Reverse(s) => &s.id,
            SwapRecord::Submarine(s) => &s.id,
            SwapRecord::Chain(s) => &s.id,
        }
    }

    pub fn kind(&self) -> SwapKind {
        match self {
            SwapRecord::Reverse(_) => SwapKind::Reverse,
            SwapRecord::Submarine(_) => SwapKind::Submarine,
            SwapRecord::Chain(_) => SwapKind::Chain,
        }
    }

    pub fn status(&self) -> &SwapStatus {
        match self {
            SwapRecord::Reverse(s) => &s.status,
            SwapRecord::Submarine(s) => &s.status,
            SwapRecord::Chain(s) => &s.status,
        }
    }

    pub fn set_status(&mut self, status: SwapStatus) {
        match self {
            SwapRecord::Reverse(s) => s.status = status,
            SwapRecord::Submarine(s) => s.status = status,
            SwapRecord::Chain(s) => s.status = status,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            SwapRecord::Reverse(s) => s.created_at,
            SwapRecord::Submarine(s) => s.created_at,
            SwapRecord::Chain(s) => s.created_at,
        }
    }

    /// Whether the current status ends the swap's lifecycle.
    pub fn is_final(&self) -> bool {
        is_final_status(self.kind(), self.status())
    }

    /// Whether the swap concluded the way its flow intends: funds claimed on
    /// the receiving side, or a refund completed.
    pub fn is_success(&self) -> bool {
        is_success_status(self.kind(), self.status())
    }

    /// The action the current status calls for, if any.
    pub fn pending_action(&self) -> PendingAction {
        match self {
            SwapRecord::Reverse(s) => match s.status {
                SwapStatus::TransactionMempool | SwapStatus::TransactionConfirmed => {
                    PendingAction::ClaimReverse
                }
                SwapStatus::Created
                | SwapStatus::TransactionServerMempool
                | SwapStatus::TransactionServerConfirmed
                | SwapStatus::TransactionRefunded
                | SwapStatus::TransactionFailed
                | SwapStatus::TransactionLockupFailed
                | SwapStatus::TransactionClaimed
                | SwapStatus::InvoiceSet
                | SwapStatus::InvoicePending
                | SwapStatus::InvoicePaid
                | SwapStatus::InvoiceSettled
                | SwapStatus::InvoiceFailedToPay
                | SwapStatus::InvoiceExpired
                | SwapStatus::SwapExpired => PendingAction::None,
            },
            SwapRecord::Submarine(s) => match s.status {
                SwapStatus::InvoiceFailedToPay | SwapStatus::SwapExpired => {
                    PendingAction::RefundSubmarine
                }
                SwapStatus::Created
                | SwapStatus::TransactionMempool
                | SwapStatus::TransactionConfirmed
                | SwapStatus::TransactionServerMempool
                | SwapStatus::TransactionServerConfirmed
                | SwapStatus::TransactionRefunded
                | SwapStatus::TransactionFailed
                | SwapStatus::TransactionLockupFailed
                | SwapStatus::TransactionClaimed
                | SwapStatus::InvoiceSet
                | SwapStatus::InvoicePending
                | SwapStatus::InvoicePaid
                | SwapStatus::InvoiceSettled
                | SwapStatus::InvoiceExpired => PendingAction::None,
            },
            SwapRecord::Chain(s) => match (s.direction, &s.status) {
                (
                    ChainDirection::ArkToBtc,
                    SwapStatus::TransactionServerMempool | SwapStatus::TransactionServerConfirmed,
                ) => PendingAction::ClaimBtc,
                (ChainDirection::ArkToBtc, SwapStatus::TransactionClaimed) => {
                    PendingAction::SignServerClaim
                }
                (
                    ChainDirection::ArkToBtc,
                    SwapStatus::SwapExpired
                    | SwapStatus::TransactionFailed
                    | SwapStatus::TransactionLockupFailed,
                ) => PendingAction::RefundArk,
                (ChainDirection::BtcToArk, SwapStatus::TransactionServerConfirmed) => {
                    PendingAction::ClaimArk
                }
                // Refunding the BTC side is not defined by the upstream
                // protocol yet.
                (ChainDirection::ArkToBtc | ChainDirection::BtcToArk, _) => PendingAction::None,
            },
        }
    }

    /// An action may only run when the record carries the secret material it
    /// needs.
    pub fn is_armed(&self, action: PendingAction) -> bool {
        match action {
            PendingAction::ClaimReverse => matches!(
                self,
                SwapRecord::Reverse(ReverseSwap {
                    preimage: Some(_),
                    ..
                })
            ),
            PendingAction::ClaimArk | PendingAction::ClaimBtc => {
                matches!(self, SwapRecord::Chain(ChainSwap { preimage: Some(_), .. }))
            }
            PendingAction::RefundSubmarine
            | PendingAction::RefundArk
            | PendingAction::SignServerClaim => true,
            PendingAction::None => false,
        }
    }
}

/// The actions the orchestrator can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    ClaimReverse,
    RefundSubmarine,
    ClaimArk,
    ClaimBtc,
    RefundArk,
    SignServerClaim,
    None,
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingAction::ClaimReverse => write!(f, "claim"),
            PendingAction::RefundSubmarine => write!(f, "refund"),
            PendingAction::ClaimArk => write!(f, "claimArk"),
            PendingAction::ClaimBtc => write!(f, "claimBtc"),
            PendingAction::RefundArk => write!(f, "refundArk"),
            PendingAction::SignServerClaim => write!(f, "signServerClaim"),
            PendingAction::None => write!(f, "none"),
        }
    }
}

/// Whether `status` is terminal for a swap of kind `kind`.
pub fn is_final_status(kind: SwapKind, status: &SwapStatus) -> bool {
    match kind {
        SwapKind::Reverse => matches!(
            status,
            SwapStatus::InvoiceSettled
                | SwapStatus::InvoiceExpired
                | SwapStatus::SwapExpired
                | SwapStatus::TransactionFailed
                | SwapStatus::TransactionRefunded
        ),
        SwapKind::Submarine => matches!(
            status,
            SwapStatus::TransactionClaimed
                | SwapStatus::TransactionRefunded
                | SwapStatus::InvoiceSettled
        ),
        SwapKind::Chain => matches!(
            status,
            SwapStatus::TransactionClaimed | SwapStatus::TransactionRefunded
        ),
    }
}

/// Whether a terminal `status` counts as the intended outcome of the flow.
///
/// A completed refund concludes a submarine or chain swap successfully: the
/// payment failed but the funds are safe.
pub fn is_success_status(kind: SwapKind, status: &SwapStatus) -> bool {
    match kind {
        SwapKind::Reverse => matches!(status, SwapStatus::InvoiceSettled),
        SwapKind::Submarine => matches!(
            status,
            SwapStatus::TransactionClaimed
                | SwapStatus::InvoiceSettled
                | SwapStatus::TransactionRefunded
        ),
        SwapKind::Chain => matches!(
            status,
            SwapStatus::TransactionClaimed | SwapStatus::TransactionRefunded
        ),
    }
}

/// Ordering of statuses within one swap's lifecycle.
///
/// A status update ranking strictly below the current status is a regression
/// (a late poll result racing a newer push) and must not be applied.
pub fn status_rank(kind: SwapKind, status: &SwapStatus) -> u8 {
    if is_final_status(kind, status) {
        return 10;
    }

    match status {
        SwapStatus::Created => 0,
        SwapStatus::InvoiceSet => 1,
        SwapStatus::TransactionMempool => 2,
        SwapStatus::TransactionConfirmed => 3,
        SwapStatus::TransactionServerMempool => 4,
        SwapStatus::TransactionServerConfirmed => 5,
        SwapStatus::InvoicePending => 6,
        SwapStatus::InvoicePaid => 7,
        // Non-terminal for this kind but late in every flow it appears in.
        SwapStatus::TransactionClaimed
        | SwapStatus::TransactionRefunded
        | SwapStatus::TransactionFailed
        | SwapStatus::TransactionLockupFailed
        | SwapStatus::InvoiceSettled
        | SwapStatus::InvoiceFailedToPay
        | SwapStatus::InvoiceExpired
        | SwapStatus::SwapExpired => 8,
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use bitcoin::hashes::Hash;
    use std::str::FromStr;

    pub const TEST_ADDRESS: &str = "tark1qqellv77udfmr20tun8dvju5vgudpf9vxe8jwhthrkn26fz96pawqfdy8nk05rsmrf8h94j26905e7n6sng8y059z8ykn2j5xcuw4xt846qj6x";
    pub const TEST_INVOICE: &str = "lnbcrt10u1p5d55pjpp56ms94rkev7tdrwqyus5a63lny2mqzq9vh2rq3u4ym3v4lxv6xl4qdql2djkuepqw3hjqs2jfvsxzerywfjhxuccqz95xqztfsp57x0nwf7nzsndjdrvsre570ehg0szw34l284hswdz6zpqvktq9mrs9qxpqysgqllgxhxeny0tvtnxuqgn4s0t2qamc6yqc4t3pe6p2x5lgs8v8r3vxzxp3a3ax9j7d2ta5cduddln8n9se7q0jgg7s0h8t2vhljlu3wkcps9k8xs";
    pub const TEST_PK: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    pub fn timeouts() -> TimeoutBlockHeights {
        TimeoutBlockHeights {
            refund: 144,
            unilateral_claim: 24,
            unilateral_refund: 144,
            unilateral_refund_without_receiver: 288,
        }
    }

    pub fn reverse_swap(id: &str, status: SwapStatus, preimage: Option<[u8; 32]>) -> SwapRecord {
        let preimage_hash = match preimage {
            Some(preimage) => sha256::Hash::hash(&preimage),
            None => sha256::Hash::hash(&[0u8; 32]),
        };

        SwapRecord::Reverse(ReverseSwap {
            id: id.to_string(),
            status,
            created_at: 1_700_000_000,
            preimage,
            preimage_hash,
            claim_public_key: PublicKey::from_str(TEST_PK).expect("valid key"),
            refund_public_key: PublicKey::from_str(TEST_PK).expect("valid key"),
            invoice: Bolt11Invoice::from_str(TEST_INVOICE).expect("valid invoice"),
            onchain_amount: Amount::from_sat(100_000),
            lockup_address: ArkAddress::decode(TEST_ADDRESS).expect("valid address"),
            timeout_block_heights: timeouts(),
            description: None,
        })
    }

    pub fn submarine_swap(id: &str, status: SwapStatus) -> SwapRecord {
        SwapRecord::Submarine(SubmarineSwap {
            id: id.to_string(),
            status,
            created_at: 1_700_000_000,
            invoice: Bolt11Invoice::from_str(TEST_INVOICE).expect("valid invoice"),
            preimage_hash: sha256::Hash::hash(&[1u8; 32]),
            refund_public_key: PublicKey::from_str(TEST_PK).expect("valid key"),
            claim_public_key: PublicKey::from_str(TEST_PK).expect("valid key"),
            expected_amount: Amount::from_sat(100_000),
            accept_zero_conf: false,
            lockup_address: ArkAddress::decode(TEST_ADDRESS).expect("valid address"),
            timeout_block_heights: timeouts(),
        })
    }

    pub fn chain_swap(
        id: &str,
        status: SwapStatus,
        direction: ChainDirection,
        preimage: Option<[u8; 32]>,
    ) -> SwapRecord {
        let details = ChainSwapDetails {
            lockup_address: TEST_ADDRESS.to_string(),
            amount: Amount::from_sat(100_000),
            server_public_key: Some(PublicKey::from_str(TEST_PK).expect("valid key")),
            swap_tree: None,
            timeout_block_height: Some(144),
            timeout_block_heights: Some(timeouts()),
        };

        SwapRecord::Chain(ChainSwap {
            id: id.to_string(),
            status,
            created_at: 1_700_000_000,
            direction,
            preimage,
            preimage_hash: sha256::Hash::hash(&preimage.unwrap_or([0u8; 32])),
            claim_public_key: PublicKey::from_str(TEST_PK).expect("valid key"),
            refund_public_key: PublicKey::from_str(TEST_PK).expect("valid key"),
            to_address: "bcrt1qdestination".to_string(),
            amount: Amount::from_sat(100_000),
            fee_sats_per_vbyte: 2,
            lockup_details: details.clone(),
            claim_details: details,
            btc_tx_hex: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;

    #[test]
    fn reverse_claimable_at_confirmation() {
        let swap = reverse_swap("r1", SwapStatus::TransactionConfirmed, Some([0xaa; 32]));
        assert_eq!(swap.pending_action(), PendingAction::ClaimReverse);
        assert!(swap.is_armed(PendingAction::ClaimReverse));
    }

    #[test]
    fn reverse_without_preimage_is_not_armed() {
        let swap = reverse_swap("r3", SwapStatus::TransactionConfirmed, None);
        assert_eq!(swap.pending_action(), PendingAction::ClaimReverse);
        assert!(!swap.is_armed(PendingAction::ClaimReverse));
    }

    #[test]
    fn submarine_refundable_on_failed_payment() {
        for status in [SwapStatus::InvoiceFailedToPay, SwapStatus::SwapExpired] {
            let swap = submarine_swap("s1", status);
            assert_eq!(swap.pending_action(), PendingAction::RefundSubmarine);
            assert!(swap.is_armed(PendingAction::RefundSubmarine));
        }
    }

    #[test]
    fn chain_action_table() {
        let claim_btc = chain_swap(
            "c1",
            SwapStatus::TransactionServerConfirmed,
            ChainDirection::ArkToBtc,
            Some([0xbb; 32]),
        );
        assert_eq!(claim_btc.pending_action(), PendingAction::ClaimBtc);

        let sign = chain_swap(
            "c2",
            SwapStatus::TransactionClaimed,
            ChainDirection::ArkToBtc,
            Some([0xbb; 32]),
        );
        assert_eq!(sign.pending_action(), PendingAction::SignServerClaim);

        let refund = chain_swap(
            "c3",
            SwapStatus::SwapExpired,
            ChainDirection::ArkToBtc,
            None,
        );
        assert_eq!(refund.pending_action(), PendingAction::RefundArk);

        let claim_ark = chain_swap(
            "c4",
            SwapStatus::TransactionServerConfirmed,
            ChainDirection::BtcToArk,
            Some([0xbb; 32]),
        );
        assert_eq!(claim_ark.pending_action(), PendingAction::ClaimArk);

        // Refunding the BTC side is undefined upstream.
        let btc_refund = chain_swap(
            "c5",
            SwapStatus::SwapExpired,
            ChainDirection::BtcToArk,
            None,
        );
        assert_eq!(btc_refund.pending_action(), PendingAction::None);
    }

    #[test]
    fn terminal_classification() {
        assert!(reverse_swap("r", SwapStatus::InvoiceSettled, None).is_final());
        assert!(reverse_swap("r", SwapStatus::InvoiceSettled, None).is_success());
        assert!(reverse_swap("r", SwapStatus::TransactionRefunded, None).is_final());
        assert!(!reverse_swap("r", SwapStatus::TransactionRefunded, None).is_success());
        assert!(!reverse_swap("r", SwapStatus::TransactionMempool, None).is_final());

        assert!(submarine_swap("s", SwapStatus::TransactionClaimed).is_final());
        assert!(submarine_swap("s", SwapStatus::TransactionClaimed).is_success());
        // A refunded submarine concluded safely.
        assert!(submarine_swap("s", SwapStatus::TransactionRefunded).is_success());
    }

    #[test]
    fn status_rank_rejects_regressions() {
        let kind = SwapKind::Reverse;

        assert!(
            status_rank(kind, &SwapStatus::TransactionMempool)
                < status_rank(kind, &SwapStatus::TransactionConfirmed)
        );
        assert!(
            status_rank(kind, &SwapStatus::TransactionConfirmed)
                < status_rank(kind, &SwapStatus::InvoiceSettled)
        );
        assert!(
            status_rank(kind, &SwapStatus::Created)
                < status_rank(kind, &SwapStatus::TransactionMempool)
        );
    }

    #[test]
    fn record_round_trips_through_json() {
        let swap = reverse_swap("r1", SwapStatus::Created, Some([0xaa; 32]));

        let json = serde_json::to_string(&swap).expect("serializes");
        assert!(json.contains("\"type\":\"reverse\""));

        let restored: SwapRecord = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(restored.id(), "r1");
        assert_eq!(restored.kind(), SwapKind::Reverse);
        assert_eq!(restored.status(), &SwapStatus::Created);
    }
}
