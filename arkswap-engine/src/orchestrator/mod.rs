//! The transaction orchestrator: turns an actionable swap into signed,
//! verified, finalized Ark (or Bitcoin) transactions.

use crate::ark::ArkClient;
use crate::keys::KeyProvider;
use crate::model::ChainSwap;
use crate::model::ReverseSwap;
use crate::model::SubmarineSwap;
use arkswap_core::offchain::build_offchain_transactions;
use arkswap_core::offchain::merge_tap_script_sigs;
use arkswap_core::offchain::set_condition_witness;
use arkswap_core::offchain::sign_ark_transaction;
use arkswap_core::offchain::sign_checkpoint_transaction;
use arkswap_core::offchain::verify_tap_script_signatures;
use arkswap_core::offchain::CheckpointTransaction;
use arkswap_core::offchain::VtxoInput;
use arkswap_core::server::GetVtxosRequest;
use arkswap_core::server::Info;
use arkswap_core::server::VirtualTxOutPoint;
use arkswap_core::vhtlc::Vhtlc;
use arkswap_core::vhtlc::VhtlcParams;
use arkswap_core::ArkAddress;
use arkswap_core::Error;
use arkswap_core::ErrorContext;
use arkswap_provider::model::TimeoutBlockHeights;
use arkswap_provider::ProviderClient;
use arkswap_provider::SwapStatus;
use async_trait::async_trait;
use base64::Engine;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::key::Keypair;
use bitcoin::key::Secp256k1;
use bitcoin::psbt;
use bitcoin::secp256k1;
use bitcoin::secp256k1::schnorr;
use bitcoin::taproot::LeafVersion;
use bitcoin::Amount;
use bitcoin::Psbt;
use bitcoin::ScriptBuf;
use bitcoin::Txid;
use bitcoin::XOnlyPublicKey;
use std::str::FromStr;
use std::sync::Arc;

mod batch;
mod chain;
mod create;

/// What an executed action produced.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Transaction id of the claim/refund, when one was produced.
    pub txid: Option<Txid>,
    /// Status refreshed from the provider after the action, when available.
    pub new_status: Option<SwapStatus>,
}

/// The capability the lifecycle engine needs to run swap actions.
///
/// Production uses [`Orchestrator`]; tests plug in stubs.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn claim_reverse(&self, swap: &ReverseSwap) -> Result<ActionOutcome, Error>;

    async fn refund_submarine(&self, swap: &SubmarineSwap) -> Result<ActionOutcome, Error>;

    async fn claim_ark(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error>;

    async fn claim_btc(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error>;

    async fn refund_ark(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error>;

    async fn sign_server_claim(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error>;
}

/// Drives the claim/refund protocols against the provider and the Ark
/// server.
pub struct Orchestrator<A, K> {
    provider: ProviderClient,
    ark: Arc<A>,
    keys: Arc<K>,
    server_info: Info,
    /// Where claimed and refunded Ark funds are sent.
    receive_address: ArkAddress,
}

impl<A, K> Orchestrator<A, K>
where
    A: ArkClient,
    K: KeyProvider,
{
    pub fn new(
        provider: ProviderClient,
        ark: Arc<A>,
        keys: Arc<K>,
        server_info: Info,
        receive_address: ArkAddress,
    ) -> Self {
        Self {
            provider,
            ark,
            keys,
            server_info,
            receive_address,
        }
    }

    fn server_xonly(&self) -> XOnlyPublicKey {
        self.server_info.signer_pk.x_only_public_key().0
    }

    fn build_vhtlc(
        &self,
        payment_hash: sha256::Hash,
        sender: &[u8],
        receiver: &[u8],
        timeouts: &TimeoutBlockHeights,
    ) -> Result<Vhtlc, Error> {
        let params = VhtlcParams::new(
            payment_hash,
            sender,
            receiver,
            &self.server_info.signer_pk.serialize(),
            timeouts.refund,
            timeouts.unilateral_claim,
            timeouts.unilateral_refund,
            timeouts.unilateral_refund_without_receiver,
        )?;

        Vhtlc::new(params, self.server_info.network)
    }

    /// Find the single unspent VTXO funding `vhtlc`.
    async fn find_vhtlc_outpoint(&self, vhtlc: &Vhtlc) -> Result<VirtualTxOutPoint, Error> {
        let request = GetVtxosRequest::new_for_scripts(&[vhtlc.script_pubkey()]);

        let vtxos = self
            .ark
            .list_vtxos(request)
            .await
            .context("failed to fetch VHTLC outpoint")?;

        vtxos
            .into_iter()
            .find(|vtxo| !vtxo.is_spent)
            .ok_or_else(|| {
                Error::no_vtxo(format!(
                    "no unspent VTXO found for address {}",
                    vhtlc.address()
                ))
            })
    }

    fn vtxo_input_for_leaf(
        vhtlc: &Vhtlc,
        leaf: ScriptBuf,
        locktime: Option<LockTime>,
        outpoint: &VirtualTxOutPoint,
    ) -> Result<VtxoInput, Error> {
        let control_block = vhtlc
            .spend_info()
            .control_block(&(leaf.clone(), LeafVersion::TapScript))
            .ok_or_else(|| Error::transaction("control block not found for spend leaf"))?;

        Ok(VtxoInput::new(
            leaf,
            locktime,
            control_block,
            vhtlc.tapscripts(),
            vhtlc.script_pubkey(),
            outpoint.amount,
            outpoint.outpoint,
        ))
    }

    /// Claim a VHTLC through the offchain-tx path: sign, submit, verify the
    /// server's work, finalize. The preimage goes into the condition witness
    /// of every signed input.
    pub(crate) async fn claim_vhtlc_with_offchain_tx(
        &self,
        vtxo_input: &VtxoInput,
        to_address: &ArkAddress,
        amount: Amount,
        keypair: &Keypair,
        preimage: [u8; 32],
    ) -> Result<Txid, Error> {
        let outputs = [(to_address, amount)];

        let transactions = build_offchain_transactions(
            &outputs,
            None,
            std::slice::from_ref(vtxo_input),
            &self.server_info.checkpoint_tapscript,
            self.server_info.dust,
        )
        .context("failed to build offchain transactions")?;

        let mut ark_tx = transactions.ark_tx;
        let checkpoints = expect_single_checkpoint(transactions.checkpoints)?;

        let kp = *keypair;
        let sign_fn = |input: &mut psbt::Input,
                       msg: secp256k1::Message|
         -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
            set_condition_witness(input, &[&preimage]);

            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
            Ok(vec![(sig, kp.x_only_public_key().0)])
        };

        sign_ark_transaction(sign_fn, &mut ark_tx, &checkpoints, 0)
            .context("failed to sign Ark transaction")?;

        let ark_txid = ark_tx.unsigned_tx.compute_txid();

        let response = self
            .ark
            .submit_offchain_tx(ark_tx, checkpoints.iter().map(|c| c.psbt.clone()).collect())
            .await
            .context("failed to submit offchain transactions")?;

        verify_tap_script_signatures(&response.signed_ark_tx, &[self.server_xonly()])
            .context("server-signed Ark transaction failed verification")?;

        let mut final_checkpoints = Vec::new();
        for mut checkpoint_psbt in response.signed_checkpoint_txs {
            let sign_fn = |input: &mut psbt::Input,
                           msg: secp256k1::Message|
             -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
                set_condition_witness(input, &[&preimage]);

                let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
                Ok(vec![(sig, kp.x_only_public_key().0)])
            };

            sign_checkpoint_transaction(sign_fn, &mut checkpoint_psbt, &checkpoints[0].vtxo_input)
                .context("failed to sign checkpoint transaction")?;

            final_checkpoints.push(checkpoint_psbt);
        }

        self.ark
            .finalize_offchain_tx(ark_txid, final_checkpoints)
            .await
            .context("failed to finalize offchain transaction")?;

        Ok(ark_txid)
    }

    /// Refund a VHTLC unilaterally through the without-receiver leaf; only
    /// valid once the refund locktime has passed.
    async fn refund_vhtlc_without_receiver(
        &self,
        vhtlc: &Vhtlc,
        outpoint: &VirtualTxOutPoint,
        refund_locktime: u32,
        keypair: &Keypair,
    ) -> Result<Txid, Error> {
        let input = Self::vtxo_input_for_leaf(
            vhtlc,
            vhtlc.refund_without_receiver_script(),
            Some(LockTime::from_consensus(refund_locktime)),
            outpoint,
        )?;

        let outputs = vec![(&self.receive_address, outpoint.amount)];

        let transactions = build_offchain_transactions(
            &outputs,
            None,
            std::slice::from_ref(&input),
            &self.server_info.checkpoint_tapscript,
            self.server_info.dust,
        )
        .context("failed to build refund transactions")?;

        let mut ark_tx = transactions.ark_tx;
        let checkpoints = expect_single_checkpoint(transactions.checkpoints)?;

        let kp = *keypair;
        let sign_fn = |_: &mut psbt::Input,
                       msg: secp256k1::Message|
         -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
            Ok(vec![(sig, kp.x_only_public_key().0)])
        };

        sign_ark_transaction(sign_fn, &mut ark_tx, &checkpoints, 0)
            .context("failed to sign refund transaction")?;

        let ark_txid = ark_tx.unsigned_tx.compute_txid();

        let response = self
            .ark
            .submit_offchain_tx(ark_tx, checkpoints.iter().map(|c| c.psbt.clone()).collect())
            .await
            .context("failed to submit refund transactions")?;

        verify_tap_script_signatures(&response.signed_ark_tx, &[self.server_xonly()])
            .context("server-signed refund transaction failed verification")?;

        let mut final_checkpoints = Vec::new();
        for mut checkpoint_psbt in response.signed_checkpoint_txs {
            let sign_fn = |_: &mut psbt::Input,
                           msg: secp256k1::Message|
             -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
                let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
                Ok(vec![(sig, kp.x_only_public_key().0)])
            };

            sign_checkpoint_transaction(sign_fn, &mut checkpoint_psbt, &checkpoints[0].vtxo_input)
                .context("failed to sign refund checkpoint")?;

            final_checkpoints.push(checkpoint_psbt);
        }

        self.ark
            .finalize_offchain_tx(ark_txid, final_checkpoints)
            .await
            .context("failed to finalize refund transaction")?;

        Ok(ark_txid)
    }

    /// Refund a VHTLC cooperatively: the counterparty signs the refund leaf
    /// alongside us, then the Ark server completes the 3-of-3.
    async fn refund_vhtlc_with_offchain_tx(
        &self,
        swap_id: &str,
        vhtlc: &Vhtlc,
        outpoint: &VirtualTxOutPoint,
        counterparty_pk: XOnlyPublicKey,
        keypair: &Keypair,
    ) -> Result<Txid, Error> {
        let input =
            Self::vtxo_input_for_leaf(vhtlc, vhtlc.refund_script(), None, outpoint)?;

        let outputs = vec![(&self.receive_address, outpoint.amount)];

        let transactions = build_offchain_transactions(
            &outputs,
            None,
            std::slice::from_ref(&input),
            &self.server_info.checkpoint_tapscript,
            self.server_info.dust,
        )
        .context("failed to build refund transactions")?;

        let mut ark_tx = transactions.ark_tx;
        let checkpoints = expect_single_checkpoint(transactions.checkpoints)?;
        let mut checkpoint_psbt = checkpoints[0].psbt.clone();

        let kp = *keypair;
        let sign_fn = |_: &mut psbt::Input,
                       msg: secp256k1::Message|
         -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
            Ok(vec![(sig, kp.x_only_public_key().0)])
        };

        sign_ark_transaction(sign_fn, &mut ark_tx, &checkpoints, 0)
            .context("failed to sign refund transaction")?;

        let sign_fn = |_: &mut psbt::Input,
                       msg: secp256k1::Message|
         -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
            Ok(vec![(sig, kp.x_only_public_key().0)])
        };

        sign_checkpoint_transaction(sign_fn, &mut checkpoint_psbt, &checkpoints[0].vtxo_input)
            .context("failed to sign refund checkpoint")?;

        // Ask the counterparty to co-sign both transactions.
        let response = self
            .provider
            .refund_submarine_swap(
                swap_id,
                encode_psbt_b64(&ark_tx),
                encode_psbt_b64(&checkpoint_psbt),
            )
            .await?;

        let counterparty_ark_tx = decode_psbt_b64(&response.transaction)
            .context("counterparty returned an invalid refund transaction")?;
        let counterparty_checkpoint = decode_psbt_b64(&response.checkpoint)
            .context("counterparty returned an invalid checkpoint")?;

        // Their signatures must verify before we combine anything.
        verify_tap_script_signatures(&counterparty_ark_tx, &[counterparty_pk])
            .context("counterparty signature on refund transaction is invalid")?;
        verify_tap_script_signatures(&counterparty_checkpoint, &[counterparty_pk])
            .context("counterparty signature on checkpoint is invalid")?;

        merge_tap_script_sigs(&mut ark_tx, &counterparty_ark_tx)?;
        merge_tap_script_sigs(&mut checkpoint_psbt, &counterparty_checkpoint)?;

        let ark_txid = ark_tx.unsigned_tx.compute_txid();

        let response = self
            .ark
            .submit_offchain_tx(ark_tx, vec![checkpoint_psbt.clone()])
            .await
            .context("failed to submit refund transactions")?;

        // The final transaction carries all three required signers.
        verify_tap_script_signatures(
            &response.signed_ark_tx,
            &[
                kp.x_only_public_key().0,
                counterparty_pk,
                self.server_xonly(),
            ],
        )
        .context("final refund transaction failed 3-of-3 verification")?;

        let mut final_checkpoints = Vec::new();
        for server_checkpoint in response.signed_checkpoint_txs {
            let mut combined = server_checkpoint;
            merge_tap_script_sigs(&mut combined, &checkpoint_psbt)?;
            final_checkpoints.push(combined);
        }

        self.ark
            .finalize_offchain_tx(ark_txid, final_checkpoints)
            .await
            .context("failed to finalize refund transaction")?;

        Ok(ark_txid)
    }

    async fn refreshed_status(&self, swap_id: &str) -> Option<SwapStatus> {
        match self.provider.get_swap_status(swap_id).await {
            Ok(response) => Some(response.status),
            Err(e) => {
                tracing::debug!(swap_id, error = %e, "Could not refresh status after action");
                None
            }
        }
    }
}

#[async_trait]
impl<A, K> ActionExecutor for Orchestrator<A, K>
where
    A: ArkClient + 'static,
    K: KeyProvider + 'static,
{
    async fn claim_reverse(&self, swap: &ReverseSwap) -> Result<ActionOutcome, Error> {
        if !matches!(
            swap.status,
            SwapStatus::TransactionMempool | SwapStatus::TransactionConfirmed
        ) {
            return Err(Error::state(format!(
                "reverse swap {} is not claimable in status {}",
                swap.id, swap.status
            )));
        }

        let preimage = swap.preimage.ok_or_else(|| {
            Error::state(format!("reverse swap {} has no preimage to claim with", swap.id))
        })?;

        let payment_hash = sha256::Hash::hash(&preimage);
        if payment_hash != swap.preimage_hash {
            return Err(Error::invalid_input(format!(
                "preimage does not match the stored payment hash for swap {}",
                swap.id
            )));
        }

        let vhtlc = self.build_vhtlc(
            payment_hash,
            &swap.refund_public_key.inner.serialize(),
            &swap.claim_public_key.inner.serialize(),
            &swap.timeout_block_heights,
        )?;

        vhtlc.verify_lockup_address(&swap.lockup_address)?;

        let outpoint = self.find_vhtlc_outpoint(&vhtlc).await?;
        let input =
            Self::vtxo_input_for_leaf(&vhtlc, vhtlc.claim_script(), None, &outpoint)?;

        let keypair = self
            .keys
            .keypair_for_pk(&swap.claim_public_key.inner.x_only_public_key().0)?;

        let txid = if outpoint.is_recoverable() {
            // A swept VTXO can only be spent through the next commitment
            // batch.
            self.join_batch(&vhtlc, &outpoint, &keypair, preimage).await?
        } else {
            self.claim_vhtlc_with_offchain_tx(
                &input,
                &self.receive_address,
                outpoint.amount,
                &keypair,
                preimage,
            )
            .await?
        };

        tracing::info!(swap_id = swap.id, %txid, "Claimed reverse swap VHTLC");

        Ok(ActionOutcome {
            txid: Some(txid),
            new_status: self.refreshed_status(&swap.id).await,
        })
    }

    async fn refund_submarine(&self, swap: &SubmarineSwap) -> Result<ActionOutcome, Error> {
        if !matches!(
            swap.status,
            SwapStatus::InvoiceFailedToPay | SwapStatus::SwapExpired
        ) {
            return Err(Error::state(format!(
                "submarine swap {} is not refundable in status {}",
                swap.id, swap.status
            )));
        }

        let vhtlc = self.build_vhtlc(
            swap.preimage_hash,
            &swap.refund_public_key.inner.serialize(),
            &swap.claim_public_key.inner.serialize(),
            &swap.timeout_block_heights,
        )?;

        vhtlc.verify_lockup_address(&swap.lockup_address)?;

        let outpoint = self.find_vhtlc_outpoint(&vhtlc).await?;

        let keypair = self
            .keys
            .keypair_for_pk(&swap.refund_public_key.inner.x_only_public_key().0)?;

        let txid = match swap.status {
            // The counterparty is alive and refusing to pay; they will
            // co-sign.
            SwapStatus::InvoiceFailedToPay => {
                self.refund_vhtlc_with_offchain_tx(
                    &swap.id,
                    &vhtlc,
                    &outpoint,
                    swap.claim_public_key.inner.x_only_public_key().0,
                    &keypair,
                )
                .await?
            }
            // The swap expired, so the locktime has passed and the
            // without-receiver leaf is spendable.
            SwapStatus::SwapExpired => {
                self.refund_vhtlc_without_receiver(
                    &vhtlc,
                    &outpoint,
                    swap.timeout_block_heights.refund,
                    &keypair,
                )
                .await?
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
            | SwapStatus::InvoiceExpired => unreachable!("guarded above"),
        };

        tracing::info!(swap_id = swap.id, %txid, "Refunded submarine swap VHTLC");

        Ok(ActionOutcome {
            txid: Some(txid),
            new_status: self.refreshed_status(&swap.id).await,
        })
    }

    async fn claim_ark(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error> {
        self.claim_chain_ark_side(swap).await
    }

    async fn claim_btc(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error> {
        self.claim_chain_btc_side(swap).await
    }

    async fn refund_ark(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error> {
        self.refund_chain_ark_side(swap).await
    }

    async fn sign_server_claim(&self, swap: &ChainSwap) -> Result<ActionOutcome, Error> {
        self.sign_chain_server_claim(swap).await
    }
}

fn expect_single_checkpoint(
    checkpoints: Vec<CheckpointTransaction>,
) -> Result<Vec<CheckpointTransaction>, Error> {
    if checkpoints.len() != 1 {
        return Err(Error::protocol(format!(
            "expected exactly one checkpoint transaction, got {}",
            checkpoints.len()
        )));
    }

    Ok(checkpoints)
}

pub(crate) fn encode_psbt_b64(psbt: &Psbt) -> String {
    let b64 = base64::engine::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::GeneralPurposeConfig::new(),
    );
    b64.encode(psbt.serialize())
}

pub(crate) fn decode_psbt_b64(encoded: &str) -> Result<Psbt, Error> {
    let b64 = base64::engine::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::GeneralPurposeConfig::new(),
    );

    let bytes = b64
        .decode(encoded)
        .map_err(|e| Error::protocol(format!("invalid base64 PSBT: {e}")))?;

    Psbt::deserialize(&bytes).map_err(|e| Error::protocol(format!("invalid PSBT: {e}")))
}

pub(crate) fn parse_txid(s: &str) -> Result<Txid, Error> {
    Txid::from_str(s).map_err(|e| Error::protocol(format!("invalid txid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ark::ArkClient;
    use crate::keys::StaticKeyProvider;
    use crate::model::ReverseSwap;
    use arkswap_core::intent::Intent;
    use arkswap_core::server::NoncePks;
    use arkswap_core::server::PartialSigTree;
    use arkswap_core::server::StreamEvent;
    use arkswap_core::server::SubmitOffchainTxResponse;
    use arkswap_core::script::csv_sig_script;
    use bitcoin::hashes::sha256;
    use bitcoin::key::Keypair;
    use bitcoin::secp256k1::PublicKey as SecpPublicKey;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::Network;
    use bitcoin::Sequence;
    use futures::stream::BoxStream;
    use lightning_invoice::Bolt11Invoice;

    struct StubArkClient {
        vtxos: Vec<VirtualTxOutPoint>,
    }

    #[async_trait]
    impl ArkClient for StubArkClient {
        async fn get_info(&self) -> Result<Info, Error> {
            Err(Error::network("stub"))
        }

        async fn list_vtxos(
            &self,
            _request: GetVtxosRequest,
        ) -> Result<Vec<VirtualTxOutPoint>, Error> {
            Ok(self.vtxos.clone())
        }

        async fn submit_offchain_tx(
            &self,
            _signed_ark_tx: Psbt,
            _checkpoint_txs: Vec<Psbt>,
        ) -> Result<SubmitOffchainTxResponse, Error> {
            Err(Error::network("stub"))
        }

        async fn finalize_offchain_tx(
            &self,
            _ark_txid: Txid,
            _final_checkpoint_txs: Vec<Psbt>,
        ) -> Result<(), Error> {
            Err(Error::network("stub"))
        }

        async fn register_intent(&self, _intent: &Intent) -> Result<String, Error> {
            Err(Error::network("stub"))
        }

        async fn delete_intent(&self, _intent: &Intent) -> Result<(), Error> {
            Ok(())
        }

        async fn confirm_registration(&self, _intent_id: &str) -> Result<(), Error> {
            Err(Error::network("stub"))
        }

        async fn submit_tree_nonces(
            &self,
            _batch_id: &str,
            _cosigner_pk: SecpPublicKey,
            _nonces: &NoncePks,
        ) -> Result<(), Error> {
            Err(Error::network("stub"))
        }

        async fn submit_tree_signatures(
            &self,
            _batch_id: &str,
            _cosigner_pk: SecpPublicKey,
            _signatures: &PartialSigTree,
        ) -> Result<(), Error> {
            Err(Error::network("stub"))
        }

        async fn submit_signed_forfeit_txs(&self, _forfeit_txs: Vec<Psbt>) -> Result<(), Error> {
            Err(Error::network("stub"))
        }

        async fn event_stream(
            &self,
            _topics: Vec<String>,
        ) -> Result<BoxStream<'static, Result<StreamEvent, Error>>, Error> {
            Err(Error::network("stub"))
        }
    }

    fn keypair(byte: u8) -> Keypair {
        let secp = Secp256k1::new();
        Keypair::from_secret_key(
            &secp,
            &SecretKey::from_slice(&[byte; 32]).expect("valid secret key"),
        )
    }

    fn server_info(server: &Keypair) -> Info {
        let forfeit_address = bitcoin::Address::p2tr(
            &Secp256k1::new(),
            server.x_only_public_key().0,
            None,
            Network::Regtest,
        );

        Info {
            signer_pk: server.public_key(),
            forfeit_address,
            network: Network::Regtest,
            dust: Amount::from_sat(546),
            checkpoint_tapscript: csv_sig_script(
                Sequence::from_height(144),
                server.x_only_public_key().0,
            ),
            vtxo_tree_expiry: Sequence::from_height(1008),
            round_interval: 30,
            version: "test".to_string(),
        }
    }

    fn receive_address(server: &Keypair) -> ArkAddress {
        ArkAddress::new(
            Network::Regtest,
            server.x_only_public_key().0,
            bitcoin::key::TweakedPublicKey::dangerous_assume_tweaked(
                keypair(9).x_only_public_key().0,
            ),
        )
    }

    const TEST_INVOICE: &str = "lnbcrt10u1p5d55pjpp56ms94rkev7tdrwqyus5a63lny2mqzq9vh2rq3u4ym3v4lxv6xl4qdql2djkuepqw3hjqs2jfvsxzerywfjhxuccqz95xqztfsp57x0nwf7nzsndjdrvsre570ehg0szw34l284hswdz6zpqvktq9mrs9qxpqysgqllgxhxeny0tvtnxuqgn4s0t2qamc6yqc4t3pe6p2x5lgs8v8r3vxzxp3a3ax9j7d2ta5cduddln8n9se7q0jgg7s0h8t2vhljlu3wkcps9k8xs";

    /// A reverse swap whose lockup address honestly matches its parameters
    /// under `server`.
    fn honest_reverse_swap(
        claim: &Keypair,
        refund: &Keypair,
        server: &Keypair,
        preimage: [u8; 32],
    ) -> ReverseSwap {
        let preimage_hash = sha256::Hash::hash(&preimage);

        let timeouts = arkswap_provider::model::TimeoutBlockHeights {
            refund: 144,
            unilateral_claim: 24,
            unilateral_refund: 144,
            unilateral_refund_without_receiver: 288,
        };

        let params = VhtlcParams::new(
            preimage_hash,
            &refund.x_only_public_key().0.serialize(),
            &claim.x_only_public_key().0.serialize(),
            &server.x_only_public_key().0.serialize(),
            timeouts.refund,
            timeouts.unilateral_claim,
            timeouts.unilateral_refund,
            timeouts.unilateral_refund_without_receiver,
        )
        .expect("valid params");
        let vhtlc = Vhtlc::new(params, Network::Regtest).expect("valid VHTLC");

        ReverseSwap {
            id: "r1".to_string(),
            status: SwapStatus::TransactionConfirmed,
            created_at: 1_700_000_000,
            preimage: Some(preimage),
            preimage_hash,
            claim_public_key: bitcoin::PublicKey::new(claim.public_key()),
            refund_public_key: bitcoin::PublicKey::new(refund.public_key()),
            invoice: TEST_INVOICE.parse::<Bolt11Invoice>().expect("valid invoice"),
            onchain_amount: Amount::from_sat(100_000),
            lockup_address: vhtlc.address(),
            timeout_block_heights: timeouts,
            description: None,
        }
    }

    fn orchestrator(
        vtxos: Vec<VirtualTxOutPoint>,
        user_keys: Vec<Keypair>,
        server: &Keypair,
    ) -> Orchestrator<StubArkClient, StaticKeyProvider> {
        let secret_keys = user_keys
            .iter()
            .map(|kp| SecretKey::from_slice(&kp.secret_bytes()).expect("valid secret key"))
            .collect();

        Orchestrator::new(
            ProviderClient::new("http://localhost:1"),
            Arc::new(StubArkClient { vtxos }),
            Arc::new(StaticKeyProvider::new(secret_keys).expect("valid provider")),
            server_info(server),
            receive_address(server),
        )
    }

    #[tokio::test]
    async fn tampered_lockup_address_is_fatal() {
        let claim = keypair(1);
        let refund = keypair(2);
        let server = keypair(3);

        let mut swap = honest_reverse_swap(&claim, &refund, &server, [0xaa; 32]);
        // The counterparty hands us an address for different parameters.
        swap.lockup_address = receive_address(&server);

        let orchestrator = orchestrator(vec![], vec![claim], &server);

        let err = orchestrator.claim_reverse(&swap).await.unwrap_err();
        assert_eq!(err.kind(), arkswap_core::ErrorKind::Adversary);
    }

    #[tokio::test]
    async fn missing_vtxo_is_reported_as_such() {
        let claim = keypair(1);
        let refund = keypair(2);
        let server = keypair(3);

        let swap = honest_reverse_swap(&claim, &refund, &server, [0xaa; 32]);
        let orchestrator = orchestrator(vec![], vec![claim], &server);

        let err = orchestrator.claim_reverse(&swap).await.unwrap_err();
        assert_eq!(err.kind(), arkswap_core::ErrorKind::NoVtxo);
        // A missing VTXO may still show up; the action stays retryable.
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn claim_requires_the_preimage() {
        let claim = keypair(1);
        let refund = keypair(2);
        let server = keypair(3);

        let mut swap = honest_reverse_swap(&claim, &refund, &server, [0xaa; 32]);
        swap.preimage = None;

        let orchestrator = orchestrator(vec![], vec![claim], &server);

        let err = orchestrator.claim_reverse(&swap).await.unwrap_err();
        assert_eq!(err.kind(), arkswap_core::ErrorKind::State);
    }

    #[tokio::test]
    async fn claim_rejects_mismatched_preimage() {
        let claim = keypair(1);
        let refund = keypair(2);
        let server = keypair(3);

        let mut swap = honest_reverse_swap(&claim, &refund, &server, [0xaa; 32]);
        swap.preimage = Some([0xbb; 32]);

        let orchestrator = orchestrator(vec![], vec![claim], &server);

        let err = orchestrator.claim_reverse(&swap).await.unwrap_err();
        assert_eq!(err.kind(), arkswap_core::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn claim_rejects_wrong_status() {
        let claim = keypair(1);
        let refund = keypair(2);
        let server = keypair(3);

        let mut swap = honest_reverse_swap(&claim, &refund, &server, [0xaa; 32]);
        swap.status = SwapStatus::Created;

        let orchestrator = orchestrator(vec![], vec![claim], &server);

        let err = orchestrator.claim_reverse(&swap).await.unwrap_err();
        assert_eq!(err.kind(), arkswap_core::ErrorKind::State);
    }
}
