//! Cooperative signing helpers for commitment batches.
//!
//! A recoverable VTXO can only be spent by joining the server's next
//! commitment round: we register an intent, cosign the new VTXO tree with
//! MuSig2 key spends, and forfeit the old VTXO against a connector output of
//! the commitment transaction.

use crate::anchor_output;
use crate::conversions::from_musig_xonly;
use crate::conversions::to_musig_keypair;
use crate::conversions::to_musig_pk;
use crate::intent::IntentInput;
use crate::script::csv_sig_script;
use crate::server::NoncePks;
use crate::server::PartialSigTree;
use crate::Error;
use crate::ErrorContext;
use bitcoin::hashes::Hash;
use bitcoin::key::Keypair;
use bitcoin::key::Secp256k1;
use bitcoin::psbt;
use bitcoin::secp256k1;
use bitcoin::secp256k1::schnorr;
use bitcoin::secp256k1::PublicKey;
use bitcoin::sighash::Prevouts;
use bitcoin::sighash::SighashCache;
use bitcoin::taproot;
use bitcoin::taproot::TaprootBuilder;
use bitcoin::transaction;
use bitcoin::Address;
use bitcoin::Amount;
use bitcoin::Psbt;
use bitcoin::TapSighashType;
use bitcoin::Transaction;
use bitcoin::TxIn;
use bitcoin::TxOut;
use bitcoin::Txid;
use bitcoin::XOnlyPublicKey;
use musig::musig;
use rand::CryptoRng;
use rand::Rng;
use std::collections::HashMap;

/// Index of the single VTXO input in every tree transaction.
const TREE_TX_INPUT_INDEX: usize = 0;

/// The PSBT proprietary key prefix under which cosigner keys of a tree
/// transaction are stored.
const COSIGNER_KEY_PREFIX: &[u8] = b"cosigner";

/// Our nonce pair per tree transaction we cosign.
///
/// The secret half is behind an [`Option`] because it must be moved out to
/// sign, which guarantees single use.
#[allow(clippy::type_complexity)]
pub struct TreeNonceKps(HashMap<Txid, (Option<musig::SecretNonce>, musig::PublicNonce)>);

impl TreeNonceKps {
    pub fn take_sk(&mut self, txid: &Txid) -> Option<musig::SecretNonce> {
        self.0.get_mut(txid).and_then(|(sec, _)| sec.take())
    }

    pub fn to_nonce_pks(&self) -> NoncePks {
        NoncePks(
            self.0
                .iter()
                .map(|(txid, (_, pub_nonce))| (*txid, *pub_nonce))
                .collect(),
        )
    }
}

/// Read the cosigner public keys out of a tree transaction PSBT.
pub fn extract_cosigner_pks(psbt: &Psbt) -> Result<Vec<PublicKey>, Error> {
    let input = psbt
        .inputs
        .get(TREE_TX_INPUT_INDEX)
        .ok_or_else(|| Error::protocol("tree transaction has no input"))?;

    let mut pks = Vec::new();
    for (key, value) in input.unknown.iter() {
        if key.key.starts_with(COSIGNER_KEY_PREFIX) {
            let pk = PublicKey::from_slice(value)
                .map_err(|e| Error::protocol(format!("invalid cosigner key in tree PSBT: {e}")))?;
            pks.push(pk);
        }
    }

    if pks.is_empty() {
        return Err(Error::protocol("tree transaction lists no cosigners"));
    }

    Ok(pks)
}

fn tree_tx_sighash(
    psbt: &Psbt,
    tree_txs: &HashMap<Txid, Psbt>,
    commitment_tx: &Psbt,
) -> Result<[u8; 32], Error> {
    let tx = &psbt.unsigned_tx;

    let previous_output = tx.input[TREE_TX_INPUT_INDEX].previous_output;

    let parent = tree_txs
        .get(&previous_output.txid)
        .or_else(|| {
            (previous_output.txid == commitment_tx.unsigned_tx.compute_txid())
                .then_some(commitment_tx)
        })
        .ok_or_else(|| {
            Error::crypto(format!(
                "parent transaction {} not found for tree TX {}",
                previous_output.txid,
                tx.compute_txid()
            ))
        })?;

    let prevout = parent
        .unsigned_tx
        .output
        .get(previous_output.vout as usize)
        .ok_or_else(|| {
            Error::crypto(format!(
                "previous output {previous_output} not found for tree TX {}",
                tx.compute_txid()
            ))
        })?;

    let prevouts = [prevout];
    let prevouts = Prevouts::All(&prevouts);

    // Tree outputs are spent through the aggregated cosigner key, so this is
    // a key-spend sighash.
    let tap_sighash = SighashCache::new(tx)
        .taproot_key_spend_signature_hash(TREE_TX_INPUT_INDEX, &prevouts, TapSighashType::Default)
        .map_err(Error::crypto)?;

    Ok(tap_sighash.to_raw_hash().to_byte_array())
}

/// Generate a nonce pair for every tree transaction we are a cosigner of.
pub fn generate_tree_nonces<R>(
    rng: &mut R,
    tree_txs: &HashMap<Txid, Psbt>,
    own_cosigner_pk: PublicKey,
    commitment_tx: &Psbt,
) -> Result<TreeNonceKps, Error>
where
    R: Rng + CryptoRng,
{
    let nonces = tree_txs
        .iter()
        .map(|(txid, tx)| {
            let cosigner_pks = extract_cosigner_pks(tx)?;

            if !cosigner_pks.contains(&own_cosigner_pk) {
                return Err(Error::crypto(format!(
                    "cosigner set does not contain {own_cosigner_pk} for tree TX {txid}"
                )));
            }

            let session_secrand = musig::SessionSecretRand::assume_unique_per_nonce_gen(rng.gen());
            let extra_rand = rng.gen();

            let msg = tree_tx_sighash(tx, tree_txs, commitment_tx)?;

            let key_agg_cache = {
                let cosigner_pks = cosigner_pks
                    .iter()
                    .map(|pk| to_musig_pk(*pk))
                    .collect::<Vec<_>>();
                musig::KeyAggCache::new(&cosigner_pks.iter().collect::<Vec<_>>())
            };

            let (nonce, pub_nonce) = key_agg_cache.nonce_gen(
                session_secrand,
                to_musig_pk(own_cosigner_pk),
                &msg,
                Some(extra_rand),
            );

            Ok((*txid, (Some(nonce), pub_nonce)))
        })
        .collect::<Result<HashMap<_, _>, _>>()?;

    Ok(TreeNonceKps(nonces))
}

/// The single sweep leaf of a batch tree output: the server can reclaim the
/// output once the tree expires.
fn sweep_spend_info(
    secp: &Secp256k1<bitcoin::secp256k1::All>,
    vtxo_tree_expiry: bitcoin::Sequence,
    server_pk: XOnlyPublicKey,
    agg_pk: XOnlyPublicKey,
) -> Result<taproot::TaprootSpendInfo, Error> {
    let sweep_script = csv_sig_script(vtxo_tree_expiry, server_pk);

    TaprootBuilder::new()
        .add_leaf(0, sweep_script)
        .map_err(|e| Error::crypto(format!("failed to add sweep leaf: {e}")))?
        .finalize(secp, agg_pk)
        .map_err(|e| Error::crypto(format!("failed to finalize sweep tree: {e:?}")))
}

/// Produce our partial signature for the tree transaction `txid`.
pub fn sign_tree_tx(
    txid: Txid,
    vtxo_tree_expiry: bitcoin::Sequence,
    server_pk: XOnlyPublicKey,
    own_cosigner_kp: &Keypair,
    aggregated_nonces: &NoncePks,
    tree_txs: &HashMap<Txid, Psbt>,
    commitment_tx: &Psbt,
    nonce_kps: &mut TreeNonceKps,
) -> Result<PartialSigTree, Error> {
    let secp = Secp256k1::new();
    let secp_musig = ::musig::Secp256k1::new();

    let own_kp = to_musig_keypair(&secp_musig, own_cosigner_kp)?;
    let own_pk = own_kp.public_key();

    let psbt = tree_txs
        .get(&txid)
        .ok_or_else(|| Error::protocol(format!("tree TX {txid} not found in batch tree")))?;

    let mut cosigner_pks = extract_cosigner_pks(psbt)?
        .into_iter()
        .map(to_musig_pk)
        .collect::<Vec<_>>();
    cosigner_pks.sort_by_key(|k| k.serialize());

    if !cosigner_pks.contains(&own_pk) {
        return Err(Error::crypto(
            "own cosigner key not found among tree transaction cosigners",
        ));
    }

    tracing::debug!(%txid, "Generating partial signature for tree TX");

    let mut key_agg_cache = musig::KeyAggCache::new(&cosigner_pks.iter().collect::<Vec<_>>());

    let sweep = sweep_spend_info(
        &secp,
        vtxo_tree_expiry,
        server_pk,
        from_musig_xonly(key_agg_cache.agg_pk()),
    )?;

    let tweak = ::musig::Scalar::from(
        ::musig::SecretKey::from_byte_array(*sweep.tap_tweak().as_byte_array())
            .map_err(|e| Error::crypto(format!("invalid tweak: {e}")))?,
    );

    key_agg_cache
        .pubkey_xonly_tweak_add(&tweak)
        .map_err(Error::crypto)?;

    let msg = tree_tx_sighash(psbt, tree_txs, commitment_tx)?;

    let agg_nonce = aggregated_nonces
        .get(&txid)
        .ok_or_else(|| Error::crypto(format!("missing aggregated nonce for tree TX {txid}")))?;
    let agg_nonce = musig::AggregatedNonce::from_byte_array(&agg_nonce.serialize())
        .map_err(|e| Error::crypto(format!("invalid aggregated nonce: {e}")))?;

    let nonce_sk = nonce_kps
        .take_sk(&txid)
        .ok_or_else(|| Error::crypto(format!("missing secret nonce for tree TX {txid}")))?;

    let sig = musig::Session::new(&key_agg_cache, agg_nonce, &msg).partial_sign(
        nonce_sk,
        &own_kp,
        &key_agg_cache,
    );

    Ok(PartialSigTree(HashMap::from_iter([(txid, sig)])))
}

/// Build and sign the forfeit transaction handing `vtxo_input` over to the
/// server against one connector output of the commitment transaction.
pub fn create_and_sign_forfeit_tx<S>(
    sign_fn: S,
    vtxo_input: &IntentInput,
    connector_psbts: &[Psbt],
    server_forfeit_address: &Address,
    dust: Amount,
) -> Result<Psbt, Error>
where
    S: FnOnce(
        &mut psbt::Input,
        secp256k1::Message,
    ) -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error>,
{
    const FORFEIT_TX_CONNECTOR_INDEX: usize = 0;
    const FORFEIT_TX_VTXO_INDEX: usize = 1;

    let connector_amount = dust;

    // Take the first connector output matching the connector amount.
    let (connector_outpoint, connector_output) = connector_psbts
        .iter()
        .find_map(|psbt| {
            let txid = psbt.unsigned_tx.compute_txid();
            psbt.unsigned_tx
                .output
                .iter()
                .enumerate()
                .find(|(_, output)| output.value == connector_amount)
                .map(|(vout, output)| {
                    (
                        bitcoin::OutPoint {
                            txid,
                            vout: vout as u32,
                        },
                        output.clone(),
                    )
                })
        })
        .ok_or_else(|| Error::protocol("no connector output available for forfeit"))?;

    let forfeit_output = TxOut {
        value: vtxo_input.amount() + connector_amount,
        script_pubkey: server_forfeit_address.script_pubkey(),
    };

    let mut forfeit_psbt = Psbt::from_unsigned_tx(Transaction {
        version: transaction::Version::non_standard(3),
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: vec![
            TxIn {
                previous_output: connector_outpoint,
                ..Default::default()
            },
            TxIn {
                previous_output: vtxo_input.outpoint(),
                ..Default::default()
            },
        ],
        output: vec![forfeit_output, anchor_output()],
    })
    .map_err(Error::transaction)?;

    forfeit_psbt.inputs[FORFEIT_TX_CONNECTOR_INDEX].witness_utxo = Some(connector_output);

    forfeit_psbt.inputs[FORFEIT_TX_VTXO_INDEX].witness_utxo = Some(TxOut {
        value: vtxo_input.amount(),
        script_pubkey: vtxo_input.script_pubkey().clone(),
    });

    forfeit_psbt.inputs[FORFEIT_TX_VTXO_INDEX].sighash_type =
        Some(TapSighashType::Default.into());

    let (spend_script, control_block) = vtxo_input.spend_info().clone();
    let leaf_version = control_block.leaf_version;
    let leaf_hash = bitcoin::TapLeafHash::from_script(&spend_script, leaf_version);

    forfeit_psbt.inputs[FORFEIT_TX_VTXO_INDEX].tap_scripts =
        std::collections::BTreeMap::from_iter([(control_block, (spend_script, leaf_version))]);

    let prevouts = forfeit_psbt
        .inputs
        .iter()
        .filter_map(|i| i.witness_utxo.clone())
        .collect::<Vec<_>>();

    let tap_sighash = SighashCache::new(&forfeit_psbt.unsigned_tx)
        .taproot_script_spend_signature_hash(
            FORFEIT_TX_VTXO_INDEX,
            &Prevouts::All(&prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(Error::crypto)
        .context("failed to compute forfeit sighash")?;

    let msg = secp256k1::Message::from_digest(tap_sighash.to_raw_hash().to_byte_array());

    let psbt_input = &mut forfeit_psbt.inputs[FORFEIT_TX_VTXO_INDEX];
    let sigs = sign_fn(psbt_input, msg)?;

    for (sig, pk) in sigs {
        let sig = taproot::Signature {
            signature: sig,
            sighash_type: TapSighashType::Default,
        };
        psbt_input.tap_script_sigs.insert((pk, leaf_hash), sig);
    }

    Ok(forfeit_psbt)
}
