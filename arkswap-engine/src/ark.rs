//! The narrow interface the engine needs from the Ark server, and a REST
//! implementation of it.

use arkswap_core::intent::Intent;
use arkswap_core::server::BatchFailedEvent;
use arkswap_core::server::BatchFinalizationEvent;
use arkswap_core::server::BatchFinalizedEvent;
use arkswap_core::server::BatchStartedEvent;
use arkswap_core::server::BatchTreeEventType;
use arkswap_core::server::GetVtxosRequest;
use arkswap_core::server::Info;
use arkswap_core::server::NoncePks;
use arkswap_core::server::PartialSigTree;
use arkswap_core::server::StreamEvent;
use arkswap_core::server::SubmitOffchainTxResponse;
use arkswap_core::server::TreeNoncesAggregatedEvent;
use arkswap_core::server::TreeSignatureEvent;
use arkswap_core::server::TreeSigningStartedEvent;
use arkswap_core::server::TreeTxEvent;
use arkswap_core::server::VirtualTxOutPoint;
use arkswap_core::Error;
use arkswap_core::ErrorContext;
use async_trait::async_trait;
use base64::Engine;
use bitcoin::hex::DisplayHex;
use bitcoin::hex::FromHex;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Amount;
use bitcoin::Network;
use bitcoin::OutPoint;
use bitcoin::Psbt;
use bitcoin::ScriptBuf;
use bitcoin::Txid;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use std::str::FromStr;

/// What the orchestrator needs from the Ark server: info, the indexer, the
/// offchain-tx endpoints, and the batch ceremony surface.
#[async_trait]
pub trait ArkClient: Send + Sync {
    async fn get_info(&self) -> Result<Info, Error>;

    async fn list_vtxos(
        &self,
        request: GetVtxosRequest,
    ) -> Result<Vec<VirtualTxOutPoint>, Error>;

    async fn submit_offchain_tx(
        &self,
        signed_ark_tx: Psbt,
        checkpoint_txs: Vec<Psbt>,
    ) -> Result<SubmitOffchainTxResponse, Error>;

    async fn finalize_offchain_tx(
        &self,
        ark_txid: Txid,
        final_checkpoint_txs: Vec<Psbt>,
    ) -> Result<(), Error>;

    async fn register_intent(&self, intent: &Intent) -> Result<String, Error>;

    async fn delete_intent(&self, intent: &Intent) -> Result<(), Error>;

    async fn confirm_registration(&self, intent_id: &str) -> Result<(), Error>;

    async fn submit_tree_nonces(
        &self,
        batch_id: &str,
        cosigner_pk: PublicKey,
        nonces: &NoncePks,
    ) -> Result<(), Error>;

    async fn submit_tree_signatures(
        &self,
        batch_id: &str,
        cosigner_pk: PublicKey,
        signatures: &PartialSigTree,
    ) -> Result<(), Error>;

    async fn submit_signed_forfeit_txs(&self, forfeit_txs: Vec<Psbt>) -> Result<(), Error>;

    /// Subscribe to the batch event stream, filtered on `topics`.
    async fn event_stream(
        &self,
        topics: Vec<String>,
    ) -> Result<BoxStream<'static, Result<StreamEvent, Error>>, Error>;
}

/// REST gateway implementation of [`ArkClient`].
#[derive(Clone)]
pub struct ArkRestClient {
    base_url: String,
    client: reqwest::Client,
}

impl ArkRestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("GET {url} failed: {e}")))?;

        Self::parse(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::network(format!("POST {url} failed: {e}")))?;

        Self::parse(response).await
    }

    async fn parse<T>(response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::network(format!(
                "Ark server returned {status}: {text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::protocol(format!("failed to deserialize Ark response: {e}")))
    }
}

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        base64::engine::GeneralPurposeConfig::new(),
    )
}

fn encode_psbt(psbt: &Psbt) -> String {
    b64().encode(psbt.serialize())
}

fn decode_psbt(encoded: &str) -> Result<Psbt, Error> {
    let bytes = b64()
        .decode(encoded)
        .map_err(|e| Error::protocol(format!("invalid base64 PSBT: {e}")))?;
    Psbt::deserialize(&bytes).map_err(|e| Error::protocol(format!("invalid PSBT: {e}")))
}

#[async_trait]
impl ArkClient for ArkRestClient {
    async fn get_info(&self) -> Result<Info, Error> {
        let info: wire::InfoResponse = self
            .get_json("/v1/info")
            .await
            .context("failed to fetch Ark server info")?;

        info.try_into()
    }

    async fn list_vtxos(
        &self,
        request: GetVtxosRequest,
    ) -> Result<Vec<VirtualTxOutPoint>, Error> {
        let scripts = request
            .scripts
            .iter()
            .map(|s| s.to_bytes().to_lower_hex_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut path = format!("/v1/indexer/vtxos?scripts={scripts}");
        if request.spendable_only {
            path.push_str("&spendableOnly=true");
        }

        let response: wire::ListVtxosResponse = self
            .get_json(&path)
            .await
            .context("failed to list VTXOs")?;

        response
            .vtxos
            .into_iter()
            .map(wire::Vtxo::try_into)
            .collect()
    }

    async fn submit_offchain_tx(
        &self,
        signed_ark_tx: Psbt,
        checkpoint_txs: Vec<Psbt>,
    ) -> Result<SubmitOffchainTxResponse, Error> {
        let request = wire::SubmitTxRequest {
            signed_ark_tx: encode_psbt(&signed_ark_tx),
            checkpoint_txs: checkpoint_txs.iter().map(encode_psbt).collect(),
        };

        let response: wire::SubmitTxResponse = self
            .post_json("/v1/tx/submit", &request)
            .await
            .context("failed to submit offchain transaction")?;

        let ark_txid = Txid::from_str(&response.ark_txid)
            .map_err(|e| Error::protocol(format!("invalid Ark txid: {e}")))?;

        Ok(SubmitOffchainTxResponse {
            ark_txid,
            signed_ark_tx: decode_psbt(&response.final_ark_tx)?,
            signed_checkpoint_txs: response
                .signed_checkpoint_txs
                .iter()
                .map(|tx| decode_psbt(tx))
                .collect::<Result<_, _>>()?,
        })
    }

    async fn finalize_offchain_tx(
        &self,
        ark_txid: Txid,
        final_checkpoint_txs: Vec<Psbt>,
    ) -> Result<(), Error> {
        let request = wire::FinalizeTxRequest {
            ark_txid: ark_txid.to_string(),
            final_checkpoint_txs: final_checkpoint_txs.iter().map(encode_psbt).collect(),
        };

        let _: wire::Empty = self
            .post_json("/v1/tx/finalize", &request)
            .await
            .context("failed to finalize offchain transaction")?;

        Ok(())
    }

    async fn register_intent(&self, intent: &Intent) -> Result<String, Error> {
        let request = wire::IntentRequest {
            intent: wire::Bip322Signature {
                proof: intent.serialize_proof(),
                message: intent.serialize_message()?,
            },
        };

        let response: wire::RegisterIntentResponse = self
            .post_json("/v1/batch/registerIntent", &request)
            .await
            .context("failed to register intent")?;

        Ok(response.intent_id)
    }

    async fn delete_intent(&self, intent: &Intent) -> Result<(), Error> {
        let request = wire::IntentRequest {
            intent: wire::Bip322Signature {
                proof: intent.serialize_proof(),
                message: intent.serialize_message()?,
            },
        };

        let _: wire::Empty = self
            .post_json("/v1/batch/deleteIntent", &request)
            .await
            .context("failed to delete intent")?;

        Ok(())
    }

    async fn confirm_registration(&self, intent_id: &str) -> Result<(), Error> {
        let _: wire::Empty = self
            .post_json(
                "/v1/batch/ack",
                &wire::ConfirmRegistrationRequest {
                    intent_id: intent_id.to_string(),
                },
            )
            .await
            .context("failed to confirm registration")?;

        Ok(())
    }

    async fn submit_tree_nonces(
        &self,
        batch_id: &str,
        cosigner_pk: PublicKey,
        nonces: &NoncePks,
    ) -> Result<(), Error> {
        let request = wire::SubmitTreeNoncesRequest {
            batch_id: batch_id.to_string(),
            pubkey: cosigner_pk.to_string(),
            tree_nonces: serde_json::to_string(nonces)
                .map_err(|e| Error::protocol(format!("failed to serialize nonces: {e}")))?,
        };

        let _: wire::Empty = self
            .post_json("/v1/batch/treeNonces", &request)
            .await
            .context("failed to submit tree nonces")?;

        Ok(())
    }

    async fn submit_tree_signatures(
        &self,
        batch_id: &str,
        cosigner_pk: PublicKey,
        signatures: &PartialSigTree,
    ) -> Result<(), Error> {
        let request = wire::SubmitTreeSignaturesRequest {
            batch_id: batch_id.to_string(),
            pubkey: cosigner_pk.to_string(),
            tree_signatures: serde_json::to_string(signatures)
                .map_err(|e| Error::protocol(format!("failed to serialize signatures: {e}")))?,
        };

        let _: wire::Empty = self
            .post_json("/v1/batch/treeSignatures", &request)
            .await
            .context("failed to submit tree signatures")?;

        Ok(())
    }

    async fn submit_signed_forfeit_txs(&self, forfeit_txs: Vec<Psbt>) -> Result<(), Error> {
        let request = wire::SubmitForfeitTxsRequest {
            signed_forfeit_txs: forfeit_txs.iter().map(encode_psbt).collect(),
        };

        let _: wire::Empty = self
            .post_json("/v1/batch/submitForfeitTxs", &request)
            .await
            .context("failed to submit forfeit transactions")?;

        Ok(())
    }

    async fn event_stream(
        &self,
        topics: Vec<String>,
    ) -> Result<BoxStream<'static, Result<StreamEvent, Error>>, Error> {
        let topics = topics.join(",");
        let url = format!("{}/v1/batch/events?topics={topics}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("GET {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::network(format!(
                "Ark server returned {} opening event stream",
                response.status()
            )));
        }

        // The gateway serves newline-delimited JSON.
        let stream = response
            .bytes_stream()
            .scan(Vec::new(), |buffer, chunk| {
                let lines = match chunk {
                    Ok(chunk) => {
                        buffer.extend_from_slice(&chunk);

                        let mut lines = Vec::new();
                        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line).trim().to_string();
                            if !line.is_empty() {
                                lines.push(Ok(line));
                            }
                        }
                        lines
                    }
                    Err(e) => vec![Err(Error::network(format!("event stream failed: {e}")))],
                };

                futures::future::ready(Some(futures::stream::iter(lines)))
            })
            .flatten()
            .map(|line| line.and_then(|line| wire::parse_stream_event(&line)));

        Ok(stream.boxed())
    }
}

mod wire {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct Empty {}

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct InfoResponse {
        pub signer_pubkey: String,
        pub forfeit_address: String,
        pub network: String,
        pub dust: u64,
        pub checkpoint_tapscript: String,
        pub vtxo_tree_expiry: u32,
        pub round_interval: i64,
        #[serde(default)]
        pub version: String,
    }

    impl TryFrom<InfoResponse> for Info {
        type Error = Error;

        fn try_from(info: InfoResponse) -> Result<Self, Error> {
            let network = match info.network.as_str() {
                "mainnet" | "bitcoin" => Network::Bitcoin,
                "testnet" | "testnet3" => Network::Testnet,
                "signet" | "mutinynet" => Network::Signet,
                "regtest" => Network::Regtest,
                other => {
                    return Err(Error::protocol(format!("unknown network: {other}")));
                }
            };

            let signer_pk = info
                .signer_pubkey
                .parse::<PublicKey>()
                .map_err(|e| Error::protocol(format!("invalid signer key: {e}")))?;

            let forfeit_address = bitcoin::Address::from_str(&info.forfeit_address)
                .map_err(|e| Error::protocol(format!("invalid forfeit address: {e}")))?
                .require_network(network)
                .map_err(|e| Error::protocol(format!("forfeit address network mismatch: {e}")))?;

            let checkpoint_tapscript = Vec::from_hex(&info.checkpoint_tapscript)
                .map_err(|e| Error::protocol(format!("invalid checkpoint tapscript: {e}")))?;

            Ok(Info {
                signer_pk,
                forfeit_address,
                network,
                dust: Amount::from_sat(info.dust),
                checkpoint_tapscript: ScriptBuf::from_bytes(checkpoint_tapscript),
                vtxo_tree_expiry: bitcoin::Sequence::from_consensus(info.vtxo_tree_expiry),
                round_interval: info.round_interval,
                version: info.version,
            })
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireOutPoint {
        pub txid: String,
        pub vout: u32,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Vtxo {
        pub outpoint: WireOutPoint,
        pub created_at: i64,
        pub expires_at: i64,
        pub amount: u64,
        pub script: String,
        #[serde(default)]
        pub is_preconfirmed: bool,
        #[serde(default)]
        pub is_swept: bool,
        #[serde(default)]
        pub is_unrolled: bool,
        #[serde(default)]
        pub is_spent: bool,
        #[serde(default)]
        pub spent_by: Option<String>,
        #[serde(default)]
        pub commitment_txids: Vec<String>,
    }

    impl TryFrom<Vtxo> for VirtualTxOutPoint {
        type Error = Error;

        fn try_from(vtxo: Vtxo) -> Result<Self, Error> {
            let txid = Txid::from_str(&vtxo.outpoint.txid)
                .map_err(|e| Error::protocol(format!("invalid VTXO txid: {e}")))?;

            let script = Vec::from_hex(&vtxo.script)
                .map_err(|e| Error::protocol(format!("invalid VTXO script: {e}")))?;

            let spent_by = vtxo
                .spent_by
                .filter(|s| !s.is_empty())
                .map(|s| Txid::from_str(&s))
                .transpose()
                .map_err(|e| Error::protocol(format!("invalid spending txid: {e}")))?;

            let commitment_txids = vtxo
                .commitment_txids
                .iter()
                .map(|s| Txid::from_str(s))
                .collect::<Result<_, _>>()
                .map_err(|e| Error::protocol(format!("invalid commitment txid: {e}")))?;

            Ok(VirtualTxOutPoint {
                outpoint: OutPoint {
                    txid,
                    vout: vtxo.outpoint.vout,
                },
                created_at: vtxo.created_at,
                expires_at: vtxo.expires_at,
                amount: Amount::from_sat(vtxo.amount),
                script: ScriptBuf::from_bytes(script),
                is_preconfirmed: vtxo.is_preconfirmed,
                is_swept: vtxo.is_swept,
                is_unrolled: vtxo.is_unrolled,
                is_spent: vtxo.is_spent,
                spent_by,
                commitment_txids,
            })
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct ListVtxosResponse {
        pub vtxos: Vec<Vtxo>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitTxRequest {
        pub signed_ark_tx: String,
        pub checkpoint_txs: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitTxResponse {
        pub ark_txid: String,
        pub final_ark_tx: String,
        pub signed_checkpoint_txs: Vec<String>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct FinalizeTxRequest {
        pub ark_txid: String,
        pub final_checkpoint_txs: Vec<String>,
    }

    #[derive(Debug, Serialize)]
    pub struct Bip322Signature {
        pub proof: String,
        pub message: String,
    }

    #[derive(Debug, Serialize)]
    pub struct IntentRequest {
        pub intent: Bip322Signature,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RegisterIntentResponse {
        pub intent_id: String,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConfirmRegistrationRequest {
        pub intent_id: String,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitTreeNoncesRequest {
        pub batch_id: String,
        pub pubkey: String,
        pub tree_nonces: String,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitTreeSignaturesRequest {
        pub batch_id: String,
        pub pubkey: String,
        pub tree_signatures: String,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubmitForfeitTxsRequest {
        pub signed_forfeit_txs: Vec<String>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct EventEnvelope {
        #[serde(default)]
        pub batch_started: Option<BatchStartedWire>,
        #[serde(default)]
        pub batch_finalization: Option<BatchFinalizationWire>,
        #[serde(default)]
        pub batch_finalized: Option<BatchFinalizedWire>,
        #[serde(default)]
        pub batch_failed: Option<BatchFailedWire>,
        #[serde(default)]
        pub tree_signing_started: Option<TreeSigningStartedWire>,
        #[serde(default)]
        pub tree_nonces_aggregated: Option<TreeNoncesAggregatedWire>,
        #[serde(default)]
        pub tree_tx: Option<TreeTxWire>,
        #[serde(default)]
        pub tree_signature: Option<TreeSignatureWire>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchStartedWire {
        pub id: String,
        #[serde(default)]
        pub intent_id_hashes: Vec<String>,
        #[serde(default)]
        pub batch_expiry: i64,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchFinalizationWire {
        pub id: String,
        pub commitment_tx: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchFinalizedWire {
        pub id: String,
        pub commitment_txid: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BatchFailedWire {
        pub id: String,
        pub reason: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TreeSigningStartedWire {
        pub id: String,
        #[serde(default)]
        pub cosigners_pubkeys: Vec<String>,
        pub unsigned_commitment_tx: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TreeNoncesAggregatedWire {
        pub id: String,
        pub tree_nonces: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TreeTxWire {
        pub id: String,
        #[serde(default)]
        pub topic: Vec<String>,
        pub batch_index: i32,
        pub tx: String,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TreeSignatureWire {
        pub id: String,
        #[serde(default)]
        pub topic: Vec<String>,
        pub batch_index: i32,
        pub txid: String,
        pub signature: String,
    }

    fn tree_event_type(batch_index: i32) -> BatchTreeEventType {
        // Index 0 carries the VTXO tree, index 1 the connectors tree.
        if batch_index == 0 {
            BatchTreeEventType::Vtxo
        } else {
            BatchTreeEventType::Connector
        }
    }

    pub fn parse_stream_event(line: &str) -> Result<StreamEvent, Error> {
        let envelope: EventEnvelope = serde_json::from_str(line)
            .map_err(|e| Error::protocol(format!("invalid stream event: {e}")))?;

        if let Some(e) = envelope.batch_started {
            return Ok(StreamEvent::BatchStarted(BatchStartedEvent {
                id: e.id,
                intent_id_hashes: e.intent_id_hashes,
                batch_expiry: e.batch_expiry,
            }));
        }

        if let Some(e) = envelope.batch_finalization {
            return Ok(StreamEvent::BatchFinalization(BatchFinalizationEvent {
                id: e.id,
                commitment_tx: decode_psbt(&e.commitment_tx)?,
            }));
        }

        if let Some(e) = envelope.batch_finalized {
            return Ok(StreamEvent::BatchFinalized(BatchFinalizedEvent {
                id: e.id,
                commitment_txid: Txid::from_str(&e.commitment_txid)
                    .map_err(|err| Error::protocol(format!("invalid commitment txid: {err}")))?,
            }));
        }

        if let Some(e) = envelope.batch_failed {
            return Ok(StreamEvent::BatchFailed(BatchFailedEvent {
                id: e.id,
                reason: e.reason,
            }));
        }

        if let Some(e) = envelope.tree_signing_started {
            let cosigners_pubkeys = e
                .cosigners_pubkeys
                .iter()
                .map(|pk| pk.parse::<PublicKey>())
                .collect::<Result<_, _>>()
                .map_err(|err| Error::protocol(format!("invalid cosigner key: {err}")))?;

            return Ok(StreamEvent::TreeSigningStarted(TreeSigningStartedEvent {
                id: e.id,
                cosigners_pubkeys,
                unsigned_commitment_tx: decode_psbt(&e.unsigned_commitment_tx)?,
            }));
        }

        if let Some(e) = envelope.tree_nonces_aggregated {
            let tree_nonces: NoncePks = serde_json::from_str(&e.tree_nonces)
                .map_err(|err| Error::protocol(format!("invalid tree nonces: {err}")))?;

            return Ok(StreamEvent::TreeNoncesAggregated(
                TreeNoncesAggregatedEvent {
                    id: e.id,
                    tree_nonces,
                },
            ));
        }

        if let Some(e) = envelope.tree_tx {
            let tx = decode_psbt(&e.tx)?;
            let txid = tx.unsigned_tx.compute_txid();

            return Ok(StreamEvent::TreeTx(TreeTxEvent {
                id: e.id,
                topic: e.topic,
                batch_tree_event_type: tree_event_type(e.batch_index),
                txid,
                tx,
            }));
        }

        if let Some(e) = envelope.tree_signature {
            let signature = Vec::from_hex(&e.signature)
                .map_err(|err| Error::protocol(format!("invalid tree signature: {err}")))?;
            let signature = bitcoin::taproot::Signature::from_slice(&signature)
                .map_err(|err| Error::protocol(format!("invalid tree signature: {err}")))?;

            return Ok(StreamEvent::TreeSignature(TreeSignatureEvent {
                id: e.id,
                topic: e.topic,
                batch_tree_event_type: tree_event_type(e.batch_index),
                txid: Txid::from_str(&e.txid)
                    .map_err(|err| Error::protocol(format!("invalid tree txid: {err}")))?,
                signature,
            }));
        }

        Err(Error::protocol(format!("unknown stream event: {line}")))
    }
}
