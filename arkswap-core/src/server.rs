//! Types exchanged with the Ark server.

use crate::Error;
use ::serde::Deserialize;
use ::serde::Serialize;
use bitcoin::secp256k1::PublicKey;
use bitcoin::taproot::Signature;
use bitcoin::Amount;
use bitcoin::Network;
use bitcoin::OutPoint;
use bitcoin::Psbt;
use bitcoin::ScriptBuf;
use bitcoin::Txid;
use musig::musig;
use std::collections::HashMap;

/// Static information published by the Ark server.
#[derive(Clone, Debug)]
pub struct Info {
    /// The server's signing key; the server leg of every VHTLC.
    pub signer_pk: PublicKey,
    /// On-chain address receiving forfeited VTXOs.
    pub forfeit_address: bitcoin::Address,
    pub network: Network,
    pub dust: Amount,
    /// The server's unrollable CSV tapscript used in checkpoint outputs.
    pub checkpoint_tapscript: ScriptBuf,
    /// Expiry of batch VTXO trees, as a relative locktime.
    pub vtxo_tree_expiry: bitcoin::Sequence,
    pub round_interval: i64,
    pub version: String,
}

/// A VTXO as reported by the Ark indexer.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualTxOutPoint {
    pub outpoint: OutPoint,
    pub created_at: i64,
    pub expires_at: i64,
    pub amount: Amount,
    pub script: ScriptBuf,
    pub is_preconfirmed: bool,
    pub is_swept: bool,
    pub is_unrolled: bool,
    pub is_spent: bool,
    pub spent_by: Option<Txid>,
    pub commitment_txids: Vec<Txid>,
}

impl VirtualTxOutPoint {
    pub fn is_spendable(&self) -> bool {
        !self.is_spent && !self.is_unrolled && !self.is_swept
    }

    /// A recoverable VTXO was swept into a commitment round and can only be
    /// spent by joining the next batch.
    pub fn is_recoverable(&self) -> bool {
        self.is_swept && !self.is_spent
    }
}

/// Query for VTXOs by their locking scripts.
#[derive(Clone, Debug)]
pub struct GetVtxosRequest {
    pub scripts: Vec<ScriptBuf>,
    pub spendable_only: bool,
}

impl GetVtxosRequest {
    pub fn new_for_scripts(scripts: &[ScriptBuf]) -> Self {
        Self {
            scripts: scripts.to_vec(),
            spendable_only: false,
        }
    }
}

#[derive(Debug)]
pub struct SubmitOffchainTxResponse {
    pub ark_txid: Txid,
    pub signed_ark_tx: Psbt,
    pub signed_checkpoint_txs: Vec<Psbt>,
}

/// A public nonce per shared tree transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoncePks(#[serde(with = "wire::nonce_map")] pub HashMap<Txid, musig::PublicNonce>);

impl NoncePks {
    pub fn get(&self, txid: &Txid) -> Option<musig::PublicNonce> {
        self.0.get(txid).copied()
    }
}

/// A MuSig2 partial signature per shared tree transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialSigTree(
    #[serde(with = "wire::partial_sig_map")] pub HashMap<Txid, musig::PartialSignature>,
);

#[derive(Debug, Clone)]
pub struct BatchStartedEvent {
    pub id: String,
    pub intent_id_hashes: Vec<String>,
    pub batch_expiry: i64,
}

#[derive(Debug, Clone)]
pub struct BatchFinalizationEvent {
    pub id: String,
    pub commitment_tx: Psbt,
}

#[derive(Debug, Clone)]
pub struct BatchFinalizedEvent {
    pub id: String,
    pub commitment_txid: Txid,
}

#[derive(Debug, Clone)]
pub struct BatchFailedEvent {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TreeSigningStartedEvent {
    pub id: String,
    pub cosigners_pubkeys: Vec<PublicKey>,
    pub unsigned_commitment_tx: Psbt,
}

#[derive(Debug, Clone)]
pub struct TreeNoncesAggregatedEvent {
    pub id: String,
    pub tree_nonces: NoncePks,
}

#[derive(Debug, Clone)]
pub enum BatchTreeEventType {
    Vtxo,
    Connector,
}

/// A transaction of the batch tree, streamed one at a time.
#[derive(Debug, Clone)]
pub struct TreeTxEvent {
    pub id: String,
    pub topic: Vec<String>,
    pub batch_tree_event_type: BatchTreeEventType,
    pub txid: Txid,
    pub tx: Psbt,
}

#[derive(Debug, Clone)]
pub struct TreeSignatureEvent {
    pub id: String,
    pub topic: Vec<String>,
    pub batch_tree_event_type: BatchTreeEventType,
    pub txid: Txid,
    pub signature: Signature,
}

/// Events delivered over the Ark server's batch event stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    BatchStarted(BatchStartedEvent),
    BatchFinalization(BatchFinalizationEvent),
    BatchFinalized(BatchFinalizedEvent),
    BatchFailed(BatchFailedEvent),
    TreeSigningStarted(TreeSigningStartedEvent),
    TreeNoncesAggregated(TreeNoncesAggregatedEvent),
    TreeTx(TreeTxEvent),
    TreeSignature(TreeSignatureEvent),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::BatchStarted(_) => "BatchStarted",
            StreamEvent::BatchFinalization(_) => "BatchFinalization",
            StreamEvent::BatchFinalized(_) => "BatchFinalized",
            StreamEvent::BatchFailed(_) => "BatchFailed",
            StreamEvent::TreeSigningStarted(_) => "TreeSigningStarted",
            StreamEvent::TreeNoncesAggregated(_) => "TreeNoncesAggregated",
            StreamEvent::TreeTx(_) => "TreeTx",
            StreamEvent::TreeSignature(_) => "TreeSignature",
        }
    }
}

/// Compute the SHA-256 hash used to match our intent id against the hashes
/// announced in a `BatchStarted` event.
pub fn intent_id_hash(intent_id: &str) -> Result<String, Error> {
    use bitcoin::hashes::sha256;
    use bitcoin::hashes::Hash;

    if intent_id.is_empty() {
        return Err(Error::invalid_input("intent id must not be empty"));
    }

    Ok(sha256::Hash::hash(intent_id.as_bytes()).to_string())
}

mod wire {
    use super::*;
    use ::serde::de;
    use ::serde::Deserializer;
    use ::serde::Serializer;
    use bitcoin::hex::DisplayHex;

    pub mod nonce_map {
        use super::*;

        pub fn serialize<S>(
            map: &HashMap<Txid, musig::PublicNonce>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let map_object: HashMap<String, String> = map
                .iter()
                .map(|(txid, nonce)| {
                    (
                        txid.to_string(),
                        nonce.serialize().to_vec().to_lower_hex_string(),
                    )
                })
                .collect();

            map_object.serialize(serializer)
        }

        pub fn deserialize<'de, D>(
            deserializer: D,
        ) -> Result<HashMap<Txid, musig::PublicNonce>, D::Error>
        where
            D: Deserializer<'de>,
        {
            use de::Error;

            let map_object: HashMap<String, String> = HashMap::deserialize(deserializer)?;

            let mut nonce_pks = HashMap::new();
            for (txid, hex_nonce) in map_object {
                let txid = txid.parse().map_err(D::Error::custom)?;
                let bytes = bitcoin::hex::FromHex::from_hex(&hex_nonce).map_err(D::Error::custom)?;
                let nonce =
                    musig::PublicNonce::from_byte_array(&bytes).map_err(D::Error::custom)?;
                nonce_pks.insert(txid, nonce);
            }

            Ok(nonce_pks)
        }
    }

    pub mod partial_sig_map {
        use super::*;

        pub fn serialize<S>(
            map: &HashMap<Txid, musig::PartialSignature>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let map_object: HashMap<String, String> = map
                .iter()
                .map(|(txid, sig)| {
                    (
                        txid.to_string(),
                        sig.serialize().to_vec().to_lower_hex_string(),
                    )
                })
                .collect();

            map_object.serialize(serializer)
        }

        pub fn deserialize<'de, D>(
            deserializer: D,
        ) -> Result<HashMap<Txid, musig::PartialSignature>, D::Error>
        where
            D: Deserializer<'de>,
        {
            use de::Error;

            let map_object: HashMap<String, String> = HashMap::deserialize(deserializer)?;

            let mut sigs = HashMap::new();
            for (txid, hex_sig) in map_object {
                let txid = txid.parse().map_err(D::Error::custom)?;
                let bytes = bitcoin::hex::FromHex::from_hex(&hex_sig).map_err(D::Error::custom)?;
                let sig =
                    musig::PartialSignature::from_byte_array(&bytes).map_err(D::Error::custom)?;
                sigs.insert(txid, sig);
            }

            Ok(sigs)
        }
    }
}
