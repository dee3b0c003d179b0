//! The recoverable-VTXO path: claim through the next commitment batch.

use super::Orchestrator;
use crate::ark::ArkClient;
use crate::keys::KeyProvider;
use arkswap_core::batch::create_and_sign_forfeit_tx;
use arkswap_core::batch::extract_cosigner_pks;
use arkswap_core::batch::generate_tree_nonces;
use arkswap_core::batch::sign_tree_tx;
use arkswap_core::batch::TreeNonceKps;
use arkswap_core::intent::make_intent;
use arkswap_core::intent::Intent;
use arkswap_core::intent::IntentInput;
use arkswap_core::intent::IntentMessage;
use arkswap_core::server::intent_id_hash;
use arkswap_core::server::PartialSigTree;
use arkswap_core::server::StreamEvent;
use arkswap_core::server::VirtualTxOutPoint;
use arkswap_core::vhtlc::Vhtlc;
use arkswap_core::Error;
use arkswap_core::ErrorContext;
use bitcoin::key::Keypair;
use bitcoin::key::Secp256k1;
use bitcoin::psbt;
use bitcoin::secp256k1;
use bitcoin::secp256k1::schnorr;
use bitcoin::taproot::LeafVersion;
use bitcoin::Psbt;
use bitcoin::Sequence;
use bitcoin::TxOut;
use bitcoin::Txid;
use bitcoin::XOnlyPublicKey;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// How long a registered intent stays valid.
const INTENT_VALIDITY_SECS: u64 = 600;

impl<A, K> Orchestrator<A, K>
where
    A: ArkClient,
    K: KeyProvider,
{
    /// Claim a recoverable VTXO by joining the server's next commitment
    /// batch: register an intent, cosign the new VTXO tree, forfeit the old
    /// output, and return the commitment transaction id.
    pub(crate) async fn join_batch(
        &self,
        vhtlc: &Vhtlc,
        outpoint: &VirtualTxOutPoint,
        keypair: &Keypair,
        preimage: [u8; 32],
    ) -> Result<Txid, Error> {
        let cosigner_pk = keypair.public_key();

        let claim_script = vhtlc.claim_script();
        let control_block = vhtlc
            .spend_info()
            .control_block(&(claim_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| Error::transaction("control block not found for claim leaf"))?;

        let intent_input = IntentInput::new(
            outpoint.outpoint,
            Sequence::MAX,
            None,
            TxOut {
                value: outpoint.amount,
                script_pubkey: vhtlc.script_pubkey(),
            },
            vhtlc.tapscripts(),
            (claim_script, control_block),
        )
        .with_extra_witness(vec![preimage.to_vec()]);

        let outputs = vec![TxOut {
            value: outpoint.amount,
            script_pubkey: self.receive_address.to_p2tr_script_pubkey(),
        }];

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::state(format!("system clock before epoch: {e}")))?
            .as_secs();

        let kp = *keypair;
        let sign_fn = move |_: &mut psbt::Input,
                            msg: secp256k1::Message|
         -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
            Ok(vec![(sig, kp.x_only_public_key().0)])
        };

        let register_intent = make_intent(
            sign_fn,
            vec![intent_input.clone()],
            outputs.clone(),
            IntentMessage::Register {
                onchain_output_indexes: vec![],
                valid_at: now,
                expire_at: now + INTENT_VALIDITY_SECS,
                own_cosigner_pks: vec![cosigner_pk],
            },
        )
        .context("failed to build register intent")?;

        let delete_intent = make_intent(
            sign_fn,
            vec![intent_input.clone()],
            outputs,
            IntentMessage::Delete {
                expire_at: now + INTENT_VALIDITY_SECS,
            },
        )
        .context("failed to build delete intent")?;

        let intent_id = self
            .ark
            .register_intent(&register_intent)
            .await
            .context("failed to register batch intent")?;

        tracing::debug!(intent_id, "Registered intent for commitment batch");

        let topics = vec![
            cosigner_pk.to_string(),
            format!("{}:{}", outpoint.outpoint.txid, outpoint.outpoint.vout),
        ];

        let result = self
            .run_batch_ceremony(&intent_id, topics, &intent_input, keypair, preimage)
            .await;

        if result.is_err() {
            // Nothing was committed; withdraw the intent so the server does
            // not wait for us in the next round.
            self.delete_intent_best_effort(&delete_intent).await;
        }

        result
    }

    async fn delete_intent_best_effort(&self, intent: &Intent) {
        if let Err(e) = self.ark.delete_intent(intent).await {
            tracing::warn!(error = %e, "Failed to delete batch intent");
        }
    }

    async fn run_batch_ceremony(
        &self,
        intent_id: &str,
        topics: Vec<String>,
        intent_input: &IntentInput,
        keypair: &Keypair,
        preimage: [u8; 32],
    ) -> Result<Txid, Error> {
        let mut stream = self
            .ark
            .event_stream(topics)
            .await
            .context("failed to open batch event stream")?;

        let own_intent_hash = intent_id_hash(intent_id)?;
        let cosigner_pk = keypair.public_key();

        let mut batch_id: Option<String> = None;
        let mut tree_txs: HashMap<Txid, Psbt> = HashMap::new();
        let mut connectors: Vec<Psbt> = Vec::new();
        let mut commitment_psbt: Option<Psbt> = None;
        let mut nonce_kps: Option<TreeNonceKps> = None;

        while let Some(event) = stream.next().await {
            let event = event.context("batch event stream failed")?;

            tracing::debug!(event = event.name(), "Batch event");

            match event {
                StreamEvent::BatchStarted(e) => {
                    if !e.intent_id_hashes.iter().any(|h| h == &own_intent_hash) {
                        tracing::debug!(batch = e.id, "Batch does not include our intent");
                        continue;
                    }

                    self.ark
                        .confirm_registration(intent_id)
                        .await
                        .context("failed to confirm batch registration")?;

                    batch_id = Some(e.id);
                }
                StreamEvent::TreeTx(e) => {
                    match e.batch_tree_event_type {
                        arkswap_core::server::BatchTreeEventType::Vtxo => {
                            tree_txs.insert(e.txid, e.tx);
                        }
                        arkswap_core::server::BatchTreeEventType::Connector => {
                            connectors.push(e.tx);
                        }
                    }
                }
                StreamEvent::TreeSigningStarted(e) => {
                    let batch_id = batch_id
                        .as_deref()
                        .ok_or_else(|| Error::protocol("tree signing before batch start"))?;

                    if !e.cosigners_pubkeys.contains(&cosigner_pk) {
                        return Err(Error::protocol(
                            "our cosigner key is missing from the batch tree",
                        ));
                    }

                    // Only the tree transactions we actually cosign concern
                    // us.
                    let our_tree_txs: HashMap<Txid, Psbt> = tree_txs
                        .iter()
                        .filter(|(_, tx)| {
                            extract_cosigner_pks(tx)
                                .map(|pks| pks.contains(&cosigner_pk))
                                .unwrap_or(false)
                        })
                        .map(|(txid, tx)| (*txid, tx.clone()))
                        .collect();

                    if our_tree_txs.is_empty() {
                        return Err(Error::protocol(
                            "no tree transaction in the batch includes us",
                        ));
                    }

                    let nonces = {
                        let mut rng = rand::thread_rng();
                        generate_tree_nonces(
                            &mut rng,
                            &our_tree_txs,
                            cosigner_pk,
                            &e.unsigned_commitment_tx,
                        )?
                    };

                    self.ark
                        .submit_tree_nonces(batch_id, cosigner_pk, &nonces.to_nonce_pks())
                        .await
                        .context("failed to submit tree nonces")?;

                    commitment_psbt = Some(e.unsigned_commitment_tx);
                    nonce_kps = Some(nonces);
                }
                StreamEvent::TreeNoncesAggregated(e) => {
                    let batch_id = batch_id
                        .as_deref()
                        .ok_or_else(|| Error::protocol("nonces aggregated before batch start"))?;
                    let commitment = commitment_psbt
                        .as_ref()
                        .ok_or_else(|| Error::protocol("nonces aggregated before tree signing"))?;
                    let nonces = nonce_kps
                        .as_mut()
                        .ok_or_else(|| Error::protocol("nonces aggregated before nonce setup"))?;

                    let mut partial_sigs = PartialSigTree(HashMap::new());
                    let signable: Vec<Txid> = e.tree_nonces.0.keys().copied().collect();

                    for txid in signable {
                        if !tree_txs.contains_key(&txid) {
                            continue;
                        }

                        let sigs = sign_tree_tx(
                            txid,
                            self.server_info.vtxo_tree_expiry,
                            self.server_xonly(),
                            keypair,
                            &e.tree_nonces,
                            &tree_txs,
                            commitment,
                            nonces,
                        )?;

                        partial_sigs.0.extend(sigs.0);
                    }

                    self.ark
                        .submit_tree_signatures(batch_id, cosigner_pk, &partial_sigs)
                        .await
                        .context("failed to submit tree signatures")?;
                }
                StreamEvent::BatchFinalization(_) => {
                    let kp = *keypair;
                    let sign_fn = move |input: &mut psbt::Input,
                                        msg: secp256k1::Message|
                     -> Result<
                        Vec<(schnorr::Signature, XOnlyPublicKey)>,
                        Error,
                    > {
                        arkswap_core::offchain::set_condition_witness(input, &[&preimage]);

                        let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &kp);
                        Ok(vec![(sig, kp.x_only_public_key().0)])
                    };

                    let forfeit_tx = create_and_sign_forfeit_tx(
                        sign_fn,
                        intent_input,
                        &connectors,
                        &self.server_info.forfeit_address,
                        self.server_info.dust,
                    )
                    .context("failed to sign forfeit transaction")?;

                    self.ark
                        .submit_signed_forfeit_txs(vec![forfeit_tx])
                        .await
                        .context("failed to submit forfeit transaction")?;
                }
                StreamEvent::BatchFinalized(e) => {
                    tracing::info!(
                        commitment_txid = %e.commitment_txid,
                        "Commitment batch finalized"
                    );
                    return Ok(e.commitment_txid);
                }
                StreamEvent::BatchFailed(e) => {
                    return Err(Error::protocol(format!(
                        "batch {} failed: {}",
                        e.id, e.reason
                    )));
                }
                StreamEvent::TreeSignature(_) => {
                    // Fully-signed tree transactions are the server's
                    // business; we only contribute partials.
                }
            }
        }

        Err(Error::network("batch event stream ended unexpectedly"))
    }
}
