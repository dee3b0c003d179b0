//! Chain swap actions: Ark ↔ BTC through symmetric VHTLCs.
//!
//! The Ark side is spent through the usual offchain-tx path. The BTC side is
//! a Taproot output whose internal key aggregates our key with the
//! counterparty's; claiming it is a cooperative MuSig2 key-path spend
//! negotiated over the provider's claim endpoints.

use super::Orchestrator;
use crate::ark::ArkClient;
use crate::keys::KeyProvider;
use crate::model::ChainSwap;
use arkswap_core::musig2::MusigSigningSession;
use arkswap_core::ArkAddress;
use arkswap_core::Error;
use arkswap_core::ErrorContext;
use arkswap_provider::model::ChainClaimSignRequest;
use arkswap_provider::model::ChainSwapDetails;
use arkswap_provider::model::PartialSignatureDetails;
use arkswap_provider::model::PostChainClaimRequest;
use arkswap_provider::model::SwapTree;
use arkswap_provider::SwapStatus;
use bitcoin::consensus;
use bitcoin::hashes::Hash;
use bitcoin::hex::DisplayHex;
use bitcoin::hex::FromHex;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::PublicKey;
use bitcoin::sighash::Prevouts;
use bitcoin::sighash::SighashCache;
use bitcoin::taproot::LeafVersion;
use bitcoin::taproot::TapNodeHash;
use bitcoin::taproot::TapTweakHash;
use bitcoin::transaction;
use bitcoin::Amount;
use bitcoin::OutPoint;
use bitcoin::ScriptBuf;
use bitcoin::Sequence;
use bitcoin::TapSighashType;
use bitcoin::Transaction;
use bitcoin::TxIn;
use bitcoin::TxOut;
use bitcoin::Witness;
use musig::musig;

use super::ActionOutcome;

/// Rough vsize of a single-input key-path Taproot spend with one output.
const KEY_SPEND_CLAIM_VSIZE: u64 = 111;

impl<A, K> Orchestrator<A, K>
where
    A: ArkClient,
    K: KeyProvider,
{
    /// Claim the Ark side of a BTC→ARK swap once the counterparty's BTC
    /// lockup is server-confirmed.
    pub(crate) async fn claim_chain_ark_side(
        &self,
        swap: &ChainSwap,
    ) -> Result<ActionOutcome, Error> {
        if !matches!(swap.status, SwapStatus::TransactionServerConfirmed) {
            return Err(Error::state(format!(
                "chain swap {} Ark side is not claimable in status {}",
                swap.id, swap.status
            )));
        }

        let preimage = swap.preimage.ok_or_else(|| {
            Error::state(format!("chain swap {} has no preimage to claim with", swap.id))
        })?;

        let (timeouts, counterparty_pk) = ark_side_params(&swap.claim_details)?;

        let vhtlc = self.build_vhtlc(
            swap.preimage_hash,
            &counterparty_pk.serialize(),
            &swap.claim_public_key.inner.serialize(),
            &timeouts,
        )?;

        let expected = ArkAddress::decode(&swap.claim_details.lockup_address)
            .map_err(|e| Error::protocol(format!("invalid Ark lockup address: {e}")))?;
        vhtlc.verify_lockup_address(&expected)?;

        let outpoint = self.find_vhtlc_outpoint(&vhtlc).await?;

        let keypair = self
            .keys
            .keypair_for_pk(&swap.claim_public_key.inner.x_only_public_key().0)?;

        let to_address = ArkAddress::decode(&swap.to_address)
            .map_err(|e| Error::invalid_input(format!("invalid destination address: {e}")))?;

        let txid = if outpoint.is_recoverable() {
            self.join_batch(&vhtlc, &outpoint, &keypair, preimage).await?
        } else {
            let input = Self::vtxo_input_for_leaf(&vhtlc, vhtlc.claim_script(), None, &outpoint)?;

            self.claim_vhtlc_with_offchain_tx(
                &input,
                &to_address,
                outpoint.amount,
                &keypair,
                preimage,
            )
            .await?
        };

        tracing::info!(swap_id = swap.id, %txid, "Claimed chain swap Ark side");

        Ok(ActionOutcome {
            txid: Some(txid),
            new_status: self.refreshed_status(&swap.id).await,
        })
    }

    /// Claim the BTC side of an ARK→BTC swap from the counterparty's lockup
    /// transaction, cooperatively through the key path.
    pub(crate) async fn claim_chain_btc_side(
        &self,
        swap: &ChainSwap,
    ) -> Result<ActionOutcome, Error> {
        if !matches!(
            swap.status,
            SwapStatus::TransactionServerMempool | SwapStatus::TransactionServerConfirmed
        ) {
            return Err(Error::state(format!(
                "chain swap {} BTC side is not claimable in status {}",
                swap.id, swap.status
            )));
        }

        let preimage = swap.preimage.ok_or_else(|| {
            Error::state(format!("chain swap {} has no preimage to claim with", swap.id))
        })?;

        let swap_tree = swap
            .claim_details
            .swap_tree
            .as_ref()
            .ok_or_else(|| Error::protocol("BTC claim details are missing the swap tree"))?;

        let counterparty_pk = swap
            .claim_details
            .server_public_key
            .ok_or_else(|| Error::protocol("BTC claim details are missing the server key"))?;

        let lockup_tx_hex = swap
            .btc_tx_hex
            .as_deref()
            .ok_or_else(|| Error::state("counterparty lockup transaction not yet known"))?;

        let lockup_tx: Transaction = consensus::encode::deserialize_hex(lockup_tx_hex)
            .map_err(|e| Error::protocol(format!("invalid lockup transaction: {e}")))?;

        let keypair = self
            .keys
            .keypair_for_pk(&swap.claim_public_key.inner.x_only_public_key().0)?;

        // Aggregate our claim key with theirs and commit to the swap tree.
        let mut session =
            MusigSigningSession::new(&keypair, &[keypair.public_key(), counterparty_pk.inner])?;

        let merkle_root = swap_tree_merkle_root(swap_tree)?;
        let internal_key = session.aggregate_key();
        let tweak =
            TapTweakHash::from_key_and_tweak(internal_key, Some(merkle_root)).to_byte_array();
        let output_key = session.tweak_xonly(&tweak)?;

        let lockup_script = ScriptBuf::builder()
            .push_opcode(bitcoin::opcodes::all::OP_PUSHNUM_1)
            .push_slice(output_key.serialize())
            .into_script();

        let (vout, lockup_output) = lockup_tx
            .output
            .iter()
            .enumerate()
            .find(|(_, output)| output.script_pubkey == lockup_script)
            .ok_or_else(|| {
                Error::adversary("lockup transaction does not pay the expected swap output")
            })?;

        // The lockup must cover what the counterparty promised.
        if lockup_output.value < swap.claim_details.amount {
            return Err(Error::adversary(format!(
                "lockup pays {} but {} was promised",
                lockup_output.value, swap.claim_details.amount
            )));
        }

        let to_address = swap
            .to_address
            .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
            .map_err(|e| Error::invalid_input(format!("invalid destination address: {e}")))?
            .require_network(self.server_info.network)
            .map_err(|e| {
                Error::invalid_input(format!("destination address network mismatch: {e}"))
            })?;

        let fee = Amount::from_sat(swap.fee_sats_per_vbyte * KEY_SPEND_CLAIM_VSIZE);
        let claim_value = lockup_output
            .value
            .checked_sub(fee)
            .ok_or_else(|| Error::transaction("lockup value does not cover the claim fee"))?;

        let claim_tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: lockup_tx.compute_txid(),
                    vout: vout as u32,
                },
                script_sig: Default::default(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: claim_value,
                script_pubkey: to_address.script_pubkey(),
            }],
        };

        let prevouts = [lockup_output.clone()];
        let sighash = SighashCache::new(&claim_tx)
            .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::Default)
            .map_err(Error::crypto)
            .context("failed to compute claim sighash")?;

        session.set_message(sighash.to_raw_hash().to_byte_array())?;

        let our_nonce = {
            let mut rng = rand::thread_rng();
            session.generate_nonce(&mut rng)?
        };

        // The counterparty wants our signature on their Ark-side claim in
        // exchange; it spends the cooperative leaf of our lockup VHTLC.
        let details = self.provider.get_chain_claim_details(&swap.id).await?;
        let their_sighash = parse_digest(&details.transaction_hash)?;

        let refund_keypair = self
            .keys
            .keypair_for_pk(&swap.refund_public_key.inner.x_only_public_key().0)?;
        let cooperative_sig = Secp256k1::new().sign_schnorr_no_aux_rand(
            &bitcoin::secp256k1::Message::from_digest(their_sighash),
            &refund_keypair,
        );

        let response = self
            .provider
            .post_chain_claim(
                &swap.id,
                &PostChainClaimRequest {
                    preimage: Some(preimage.to_lower_hex_string()),
                    signature: Some(PartialSignatureDetails {
                        partial_signature: cooperative_sig.serialize().to_lower_hex_string(),
                        pub_nonce: String::new(),
                    }),
                    to_sign: Some(ChainClaimSignRequest {
                        pub_nonce: our_nonce.serialize().to_lower_hex_string(),
                        transaction_hash: sighash.to_raw_hash().to_byte_array()
                            .to_lower_hex_string(),
                    }),
                },
            )
            .await?;

        let their_nonce = parse_public_nonce(&response.pub_nonce)?;
        let their_partial = parse_partial_signature(&response.partial_signature)?;

        session.aggregate_nonces(&[(counterparty_pk.inner, their_nonce)])?;
        session.initialize_session()?;
        session.partial_sign()?;
        session.add_partial(counterparty_pk.inner, their_partial)?;

        let final_sig = session.aggregate_partials()?;

        let mut claim_tx = claim_tx;
        claim_tx.input[0].witness = Witness::p2tr_key_spend(&bitcoin::taproot::Signature {
            signature: final_sig,
            sighash_type: TapSighashType::Default,
        });

        let tx_hex = consensus::encode::serialize_hex(&claim_tx);
        let broadcast = self
            .provider
            .broadcast_transaction("BTC", tx_hex)
            .await
            .context("failed to broadcast BTC claim")?;

        let txid = super::parse_txid(&broadcast.id)?;

        tracing::info!(swap_id = swap.id, %txid, "Claimed chain swap BTC side");

        Ok(ActionOutcome {
            txid: Some(txid),
            new_status: self.refreshed_status(&swap.id).await,
        })
    }

    /// Refund our Ark-side lockup of a failed ARK→BTC swap through the
    /// without-receiver leaf.
    pub(crate) async fn refund_chain_ark_side(
        &self,
        swap: &ChainSwap,
    ) -> Result<ActionOutcome, Error> {
        if !matches!(
            swap.status,
            SwapStatus::SwapExpired
                | SwapStatus::TransactionFailed
                | SwapStatus::TransactionLockupFailed
        ) {
            return Err(Error::state(format!(
                "chain swap {} is not refundable in status {}",
                swap.id, swap.status
            )));
        }

        let (timeouts, counterparty_pk) = ark_side_params(&swap.lockup_details)?;

        let vhtlc = self.build_vhtlc(
            swap.preimage_hash,
            &swap.refund_public_key.inner.serialize(),
            &counterparty_pk.serialize(),
            &timeouts,
        )?;

        let expected = ArkAddress::decode(&swap.lockup_details.lockup_address)
            .map_err(|e| Error::protocol(format!("invalid Ark lockup address: {e}")))?;
        vhtlc.verify_lockup_address(&expected)?;

        let outpoint = self.find_vhtlc_outpoint(&vhtlc).await?;

        let keypair = self
            .keys
            .keypair_for_pk(&swap.refund_public_key.inner.x_only_public_key().0)?;

        let txid = self
            .refund_vhtlc_without_receiver(&vhtlc, &outpoint, timeouts.refund, &keypair)
            .await?;

        tracing::info!(swap_id = swap.id, %txid, "Refunded chain swap Ark side");

        Ok(ActionOutcome {
            txid: Some(txid),
            new_status: self.refreshed_status(&swap.id).await,
        })
    }

    /// Hand the counterparty our signature on their cooperative claim of the
    /// Ark side, after we claimed the BTC side.
    pub(crate) async fn sign_chain_server_claim(
        &self,
        swap: &ChainSwap,
    ) -> Result<ActionOutcome, Error> {
        if !matches!(swap.status, SwapStatus::TransactionClaimed) {
            return Err(Error::state(format!(
                "chain swap {} has no server claim to sign in status {}",
                swap.id, swap.status
            )));
        }

        let details = self.provider.get_chain_claim_details(&swap.id).await?;
        let their_sighash = parse_digest(&details.transaction_hash)?;

        let keypair = self
            .keys
            .keypair_for_pk(&swap.refund_public_key.inner.x_only_public_key().0)?;

        let sig = Secp256k1::new().sign_schnorr_no_aux_rand(
            &bitcoin::secp256k1::Message::from_digest(their_sighash),
            &keypair,
        );

        self.provider
            .post_chain_claim(
                &swap.id,
                &PostChainClaimRequest {
                    preimage: swap.preimage.map(|p| p.to_lower_hex_string()),
                    signature: Some(PartialSignatureDetails {
                        partial_signature: sig.serialize().to_lower_hex_string(),
                        pub_nonce: String::new(),
                    }),
                    to_sign: None,
                },
            )
            .await?;

        tracing::info!(swap_id = swap.id, "Signed counterparty's cooperative claim");

        Ok(ActionOutcome {
            txid: None,
            new_status: self.refreshed_status(&swap.id).await,
        })
    }
}

/// The VHTLC parameters of an Ark-side lockup: its timeouts and the
/// counterparty key on the other leg.
fn ark_side_params(
    details: &ChainSwapDetails,
) -> Result<(arkswap_provider::model::TimeoutBlockHeights, PublicKey), Error> {
    let timeouts = details
        .timeout_block_heights
        .ok_or_else(|| Error::protocol("Ark side details are missing the timeout set"))?;

    let counterparty = details
        .server_public_key
        .ok_or_else(|| Error::protocol("Ark side details are missing the server key"))?;

    Ok((timeouts, counterparty.inner))
}

/// Merkle root of the two-leaf swap tree on the BTC side.
fn swap_tree_merkle_root(tree: &SwapTree) -> Result<TapNodeHash, Error> {
    let claim = parse_leaf_hash(&tree.claim_leaf.output, tree.claim_leaf.version)?;
    let refund = parse_leaf_hash(&tree.refund_leaf.output, tree.refund_leaf.version)?;

    Ok(TapNodeHash::from_node_hashes(claim, refund))
}

fn parse_leaf_hash(script_hex: &str, version: u8) -> Result<TapNodeHash, Error> {
    let script = Vec::from_hex(script_hex)
        .map_err(|e| Error::protocol(format!("invalid swap tree leaf: {e}")))?;
    let script = ScriptBuf::from_bytes(script);

    let version = LeafVersion::from_consensus(version)
        .map_err(|e| Error::protocol(format!("invalid leaf version: {e:?}")))?;

    Ok(TapNodeHash::from_script(&script, version))
}

fn parse_digest(hex: &str) -> Result<[u8; 32], Error> {
    let bytes =
        Vec::from_hex(hex).map_err(|e| Error::protocol(format!("invalid sighash hex: {e}")))?;

    bytes
        .try_into()
        .map_err(|_| Error::protocol("sighash must be 32 bytes"))
}

fn parse_public_nonce(hex: &str) -> Result<musig::PublicNonce, Error> {
    let bytes =
        Vec::from_hex(hex).map_err(|e| Error::protocol(format!("invalid nonce hex: {e}")))?;

    let bytes: [u8; 66] = bytes
        .try_into()
        .map_err(|_| Error::protocol("MuSig2 public nonce must be 66 bytes"))?;

    musig::PublicNonce::from_byte_array(&bytes)
        .map_err(|e| Error::protocol(format!("invalid MuSig2 nonce: {e}")))
}

fn parse_partial_signature(hex: &str) -> Result<musig::PartialSignature, Error> {
    let bytes =
        Vec::from_hex(hex).map_err(|e| Error::protocol(format!("invalid signature hex: {e}")))?;

    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::protocol("MuSig2 partial signature must be 32 bytes"))?;

    musig::PartialSignature::from_byte_array(&bytes)
        .map_err(|e| Error::protocol(format!("invalid MuSig2 partial signature: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkswap_provider::model::TreeLeaf;

    #[test]
    fn swap_tree_merkle_root_is_order_independent() {
        let tree_a = SwapTree {
            claim_leaf: TreeLeaf {
                version: 0xc0,
                output: "a914aabbccdd87".to_string(),
            },
            refund_leaf: TreeLeaf {
                version: 0xc0,
                output: "029000b175".to_string(),
            },
        };

        let tree_b = SwapTree {
            claim_leaf: tree_a.refund_leaf.clone(),
            refund_leaf: tree_a.claim_leaf.clone(),
        };

        // Node hashes are combined in sorted order, so swapping the leaves
        // must not change the root.
        assert_eq!(
            swap_tree_merkle_root(&tree_a).expect("valid tree"),
            swap_tree_merkle_root(&tree_b).expect("valid tree")
        );
    }

    #[test]
    fn digest_parsing_enforces_length() {
        assert!(parse_digest(&"ab".repeat(32)).is_ok());
        assert!(parse_digest(&"ab".repeat(31)).is_err());
        assert!(parse_digest("zz").is_err());
    }
}
