//! Construction and signing of Ark offchain transactions.
//!
//! Spending a VTXO cooperatively produces two layers: a checkpoint
//! transaction per input, anchoring the spend to a server-unrollable CSV
//! script, and the Ark transaction that spends the checkpoint outputs into
//! the final destinations.

use crate::anchor_output;
use crate::script::tr_script_pubkey;
use crate::ArkAddress;
use crate::Error;
use crate::ErrorContext;
use crate::UNSPENDABLE_KEY;
use crate::VTXO_CONDITION_KEY;
use crate::VTXO_TAPROOT_KEY;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::PublicKey;
use bitcoin::key::Secp256k1;
use bitcoin::psbt;
use bitcoin::secp256k1;
use bitcoin::secp256k1::schnorr;
use bitcoin::sighash::Prevouts;
use bitcoin::sighash::SighashCache;
use bitcoin::taproot;
use bitcoin::taproot::ControlBlock;
use bitcoin::taproot::LeafVersion;
use bitcoin::taproot::TaprootBuilder;
use bitcoin::taproot::TaprootSpendInfo;
use bitcoin::transaction;
use bitcoin::Amount;
use bitcoin::OutPoint;
use bitcoin::Psbt;
use bitcoin::ScriptBuf;
use bitcoin::Sequence;
use bitcoin::TapLeafHash;
use bitcoin::TapSighashType;
use bitcoin::Transaction;
use bitcoin::TxIn;
use bitcoin::TxOut;
use bitcoin::XOnlyPublicKey;
use std::collections::BTreeMap;
use std::io;
use std::io::Write;

/// A VTXO to be spent through one of its script paths.
#[derive(Debug, Clone)]
pub struct VtxoInput {
    /// The leaf used to spend the VTXO; also embedded in the checkpoint
    /// output.
    spend_script: ScriptBuf,
    /// Set when `spend_script` uses OP_CLTV.
    locktime: Option<LockTime>,
    control_block: ControlBlock,
    /// All leaves of the VTXO's Taproot tree.
    tapscripts: Vec<ScriptBuf>,
    script_pubkey: ScriptBuf,
    amount: Amount,
    outpoint: OutPoint,
}

impl VtxoInput {
    pub fn new(
        spend_script: ScriptBuf,
        locktime: Option<LockTime>,
        control_block: ControlBlock,
        tapscripts: Vec<ScriptBuf>,
        script_pubkey: ScriptBuf,
        amount: Amount,
        outpoint: OutPoint,
    ) -> Self {
        Self {
            spend_script,
            locktime,
            control_block,
            tapscripts,
            script_pubkey,
            amount,
            outpoint,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn script_pubkey(&self) -> &ScriptBuf {
        &self.script_pubkey
    }

    pub fn tapscripts(&self) -> &[ScriptBuf] {
        &self.tapscripts
    }

    pub fn spend_info(&self) -> (&ScriptBuf, &ControlBlock) {
        (&self.spend_script, &self.control_block)
    }
}

/// The checkpoint layer for one VTXO input.
#[derive(Debug, Clone)]
pub struct CheckpointTransaction {
    pub psbt: Psbt,
    spend_script: ScriptBuf,
    spend_info: TaprootSpendInfo,
    outpoint: OutPoint,
    amount: Amount,
    pub vtxo_input: VtxoInput,
}

impl CheckpointTransaction {
    pub fn outpoint(&self) -> OutPoint {
        self.outpoint
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        tr_script_pubkey(&self.spend_info)
    }
}

#[derive(Debug, Clone)]
pub struct OffchainTransactions {
    pub ark_tx: Psbt,
    pub checkpoints: Vec<CheckpointTransaction>,
}

/// Build the Ark transaction and one checkpoint transaction per input.
///
/// `checkpoint_exit_script` is the server's unrollable CSV tapscript, as
/// published in the server info. Outputs below `dust` are committed with the
/// sub-dust script form.
pub fn build_offchain_transactions(
    outputs: &[(&ArkAddress, Amount)],
    change_address: Option<&ArkAddress>,
    vtxo_inputs: &[VtxoInput],
    checkpoint_exit_script: &ScriptBuf,
    dust: Amount,
) -> Result<OffchainTransactions, Error> {
    if vtxo_inputs.is_empty() {
        return Err(Error::transaction(
            "cannot build an Ark transaction without inputs",
        ));
    }

    let mut checkpoints = Vec::new();
    for vtxo_input in vtxo_inputs.iter() {
        let checkpoint = build_checkpoint_transaction(vtxo_input, checkpoint_exit_script)
            .with_context(|| {
                format!(
                    "failed to build checkpoint transaction for input {}",
                    vtxo_input.outpoint
                )
            })?;
        checkpoints.push(checkpoint);
    }

    let mut tx_outputs = outputs
        .iter()
        .map(|(address, amount)| TxOut {
            value: *amount,
            script_pubkey: if *amount > dust {
                address.to_p2tr_script_pubkey()
            } else {
                address.to_sub_dust_script_pubkey()
            },
        })
        .collect::<Vec<_>>();

    let total_in: Amount = vtxo_inputs.iter().map(|v| v.amount).sum();
    let total_out: Amount = tx_outputs.iter().map(|o| o.value).sum();

    let change_amount = total_in.checked_sub(total_out).ok_or_else(|| {
        Error::transaction(format!(
            "cannot cover total output amount ({total_out}) with total input amount ({total_in})"
        ))
    })?;

    if change_amount > Amount::ZERO {
        if let Some(change_address) = change_address {
            tx_outputs.push(TxOut {
                value: change_amount,
                script_pubkey: if change_amount > dust {
                    change_address.to_p2tr_script_pubkey()
                } else {
                    change_address.to_sub_dust_script_pubkey()
                },
            });
        }
    }

    tx_outputs.push(anchor_output());

    let (lock_time, sequence) = highest_locktime(vtxo_inputs)?;

    let unsigned_ark_tx = Transaction {
        version: transaction::Version::non_standard(3),
        lock_time,
        input: checkpoints
            .iter()
            .map(|checkpoint| TxIn {
                previous_output: checkpoint.outpoint,
                script_sig: Default::default(),
                sequence,
                witness: Default::default(),
            })
            .collect(),
        output: tx_outputs,
    };

    let mut ark_tx = Psbt::from_unsigned_tx(unsigned_ark_tx).map_err(Error::transaction)?;

    for (i, checkpoint) in checkpoints.iter().enumerate() {
        let bytes = encode_taptree(std::slice::from_ref(&checkpoint.spend_script))
            .map_err(Error::transaction)?;

        ark_tx.inputs[i].unknown.insert(
            psbt::raw::Key {
                type_value: u8::MAX,
                key: VTXO_TAPROOT_KEY.to_vec(),
            },
            bytes,
        );
    }

    Ok(OffchainTransactions {
        ark_tx,
        checkpoints,
    })
}

fn highest_locktime(vtxo_inputs: &[VtxoInput]) -> Result<(LockTime, Sequence), Error> {
    let locktimes = vtxo_inputs
        .iter()
        .filter_map(|x| x.locktime)
        .collect::<Vec<_>>();

    let highest = locktimes.iter().try_fold(None, |acc, a| match (acc, a) {
        (None, locktime) => Ok(Some(*locktime)),
        (Some(a @ LockTime::Blocks(h1)), LockTime::Blocks(h2)) if h1 > *h2 => Ok(Some(a)),
        (Some(LockTime::Blocks(_)), b @ LockTime::Blocks(_)) => Ok(Some(*b)),
        (Some(a @ LockTime::Seconds(t1)), LockTime::Seconds(t2)) if t1 > *t2 => Ok(Some(a)),
        (Some(LockTime::Seconds(_)), b @ LockTime::Seconds(_)) => Ok(Some(*b)),
        _ => Err(Error::transaction("incompatible locktimes across inputs")),
    })?;

    Ok(match highest {
        Some(locktime) => (locktime, Sequence::ENABLE_LOCKTIME_NO_RBF),
        None => (LockTime::ZERO, Sequence::MAX),
    })
}

fn build_checkpoint_transaction(
    vtxo_input: &VtxoInput,
    checkpoint_exit_script: &ScriptBuf,
) -> Result<CheckpointTransaction, Error> {
    let secp = Secp256k1::new();

    let unspendable_key: PublicKey = UNSPENDABLE_KEY.parse().expect("valid key");
    let (unspendable_key, _) = unspendable_key.inner.x_only_public_key();

    let spend_script = vtxo_input.spend_script.clone();

    let spend_info = TaprootBuilder::new()
        .add_leaf(1, spend_script.clone())
        .expect("valid spend leaf")
        .add_leaf(1, checkpoint_exit_script.clone())
        .expect("valid exit leaf")
        .finalize(&secp, unspendable_key)
        .map_err(|e| Error::transaction(format!("failed to finalize checkpoint tree: {e:?}")))?;

    let (lock_time, sequence) = match vtxo_input.locktime {
        Some(locktime) => (locktime, Sequence::ENABLE_LOCKTIME_NO_RBF),
        None => (LockTime::ZERO, Sequence::MAX),
    };

    let script_pubkey = tr_script_pubkey(&spend_info);

    let unsigned_tx = Transaction {
        version: transaction::Version::non_standard(3),
        lock_time,
        input: vec![TxIn {
            previous_output: vtxo_input.outpoint,
            script_sig: Default::default(),
            sequence,
            witness: Default::default(),
        }],
        output: vec![
            TxOut {
                value: vtxo_input.amount,
                script_pubkey,
            },
            anchor_output(),
        ],
    };

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx).map_err(Error::transaction)?;

    psbt.inputs[0].witness_utxo = Some(TxOut {
        value: vtxo_input.amount,
        script_pubkey: vtxo_input.script_pubkey.clone(),
    });

    let (vtxo_spend_script, control_block) = vtxo_input.spend_info();
    psbt.inputs[0].tap_scripts = BTreeMap::from_iter([(
        control_block.clone(),
        (vtxo_spend_script.clone(), control_block.leaf_version),
    )]);

    let bytes = encode_taptree(&vtxo_input.tapscripts).map_err(Error::transaction)?;
    psbt.inputs[0].unknown.insert(
        psbt::raw::Key {
            type_value: u8::MAX,
            key: VTXO_TAPROOT_KEY.to_vec(),
        },
        bytes,
    );

    let outpoint = OutPoint {
        txid: psbt.unsigned_tx.compute_txid(),
        vout: 0,
    };

    Ok(CheckpointTransaction {
        psbt,
        spend_script,
        spend_info,
        outpoint,
        amount: vtxo_input.amount,
        vtxo_input: vtxo_input.clone(),
    })
}

/// Serialize a list of tapscripts for the proprietary taptree PSBT field.
fn encode_taptree(scripts: &[ScriptBuf]) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();

    write_compact_size_uint(&mut bytes, scripts.len() as u64)?;

    for script in scripts {
        // Depth is always 1 on the wire.
        bytes.push(1);
        bytes.push(LeafVersion::TapScript.to_consensus());

        let script_bytes = script.to_bytes();
        write_compact_size_uint(&mut bytes, script_bytes.len() as u64)?;
        bytes.extend_from_slice(&script_bytes);
    }

    Ok(bytes)
}

fn write_compact_size_uint<W: Write>(w: &mut W, val: u64) -> io::Result<()> {
    if val < 253 {
        w.write_all(&[val as u8])?;
    } else if val < 0x10000 {
        w.write_all(&[253])?;
        w.write_all(&(val as u16).to_le_bytes())?;
    } else if val < 0x100000000 {
        w.write_all(&[254])?;
        w.write_all(&(val as u32).to_le_bytes())?;
    } else {
        w.write_all(&[255])?;
        w.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

/// Write extra witness elements (such as a claim preimage) into the
/// proprietary condition PSBT field of an input.
pub fn set_condition_witness(input: &mut psbt::Input, elements: &[&[u8]]) {
    let mut bytes = Vec::new();

    bytes.push(elements.len() as u8);
    for element in elements {
        write_compact_size_uint(&mut bytes, element.len() as u64).expect("vec write");
        bytes.extend_from_slice(element);
    }

    input.unknown.insert(
        psbt::raw::Key {
            type_value: 222,
            key: VTXO_CONDITION_KEY.to_vec(),
        },
        bytes,
    );
}

/// Sign input `input_index` of the Ark transaction, spending the checkpoint
/// output at the same index through its embedded VTXO spend leaf.
pub fn sign_ark_transaction<S>(
    sign_fn: S,
    ark_tx: &mut Psbt,
    checkpoints: &[CheckpointTransaction],
    input_index: usize,
) -> Result<(), Error>
where
    S: FnOnce(
        &mut psbt::Input,
        secp256k1::Message,
    ) -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error>,
{
    let checkpoint = checkpoints
        .get(input_index)
        .ok_or_else(|| Error::transaction(format!("no checkpoint at index {input_index}")))?;

    ark_tx
        .unsigned_tx
        .input
        .iter()
        .find(|input| input.previous_output == checkpoint.outpoint)
        .ok_or_else(|| {
            Error::transaction(format!(
                "missing input for checkpoint outpoint {}",
                checkpoint.outpoint
            ))
        })?;

    let prevouts = checkpoints
        .iter()
        .map(|c| TxOut {
            value: c.amount,
            script_pubkey: c.script_pubkey(),
        })
        .collect::<Vec<_>>();

    let leaf_version = LeafVersion::TapScript;
    let leaf_hash = TapLeafHash::from_script(&checkpoint.spend_script, leaf_version);

    let tap_sighash = SighashCache::new(&ark_tx.unsigned_tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(&prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(Error::crypto)
        .context("failed to compute Ark transaction sighash")?;

    let msg = secp256k1::Message::from_digest(tap_sighash.to_raw_hash().to_byte_array());

    let psbt_input = ark_tx
        .inputs
        .get_mut(input_index)
        .ok_or_else(|| Error::transaction(format!("no PSBT input at index {input_index}")))?;

    psbt_input.witness_utxo = Some(prevouts[input_index].clone());

    let control_block = checkpoint
        .spend_info
        .control_block(&(checkpoint.spend_script.clone(), leaf_version))
        .ok_or_else(|| Error::transaction("control block missing for checkpoint spend leaf"))?;

    psbt_input.tap_scripts = BTreeMap::from_iter([(
        control_block,
        (checkpoint.spend_script.clone(), leaf_version),
    )]);

    let sigs = sign_fn(psbt_input, msg)?;

    for (sig, pk) in sigs {
        let sig = taproot::Signature {
            signature: sig,
            sighash_type: TapSighashType::Default,
        };
        psbt_input.tap_script_sigs.insert((pk, leaf_hash), sig);
    }

    Ok(())
}

/// Sign the checkpoint transaction spending `vtxo_input` through its VTXO
/// spend leaf.
pub fn sign_checkpoint_transaction<S>(
    sign_fn: S,
    psbt: &mut Psbt,
    vtxo_input: &VtxoInput,
) -> Result<(), Error>
where
    S: FnOnce(
        &mut psbt::Input,
        secp256k1::Message,
    ) -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error>,
{
    let (input_index, _) = psbt
        .unsigned_tx
        .input
        .iter()
        .enumerate()
        .find(|(_, input)| input.previous_output == vtxo_input.outpoint)
        .ok_or_else(|| {
            Error::transaction(format!(
                "missing input for VTXO outpoint {}",
                vtxo_input.outpoint
            ))
        })?;

    tracing::debug!(
        outpoint = %vtxo_input.outpoint,
        amount = %vtxo_input.amount,
        index = input_index,
        "Signing VTXO for checkpoint transaction"
    );

    let (spend_script, control_block) = vtxo_input.spend_info();
    let leaf_hash = TapLeafHash::from_script(spend_script, control_block.leaf_version);

    let prevouts = [TxOut {
        value: vtxo_input.amount,
        script_pubkey: vtxo_input.script_pubkey.clone(),
    }];

    let tap_sighash = SighashCache::new(&psbt.unsigned_tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(&prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(Error::crypto)
        .context("failed to compute checkpoint sighash")?;

    let msg = secp256k1::Message::from_digest(tap_sighash.to_raw_hash().to_byte_array());

    let psbt_input = psbt
        .inputs
        .get_mut(input_index)
        .ok_or_else(|| Error::transaction(format!("no PSBT input at index {input_index}")))?;

    let sigs = sign_fn(psbt_input, msg)?;

    for (sig, pk) in sigs {
        let sig = taproot::Signature {
            signature: sig,
            sighash_type: TapSighashType::Default,
        };
        psbt_input.tap_script_sigs.insert((pk, leaf_hash), sig);
    }

    Ok(())
}

/// Verify the tapscript signatures of `signers` on every input of `psbt`.
///
/// Every input must carry a witness UTXO and a tapscript spend; each required
/// signer must have a valid Schnorr signature on the input's leaf. Used to
/// check counterparty- and server-signed transactions before they are
/// combined or finalized.
pub fn verify_tap_script_signatures(
    psbt: &Psbt,
    signers: &[XOnlyPublicKey],
) -> Result<(), Error> {
    let secp = Secp256k1::new();

    let prevouts = psbt
        .inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            input
                .witness_utxo
                .clone()
                .ok_or_else(|| Error::protocol(format!("input {i} is missing its witness UTXO")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (i, input) in psbt.inputs.iter().enumerate() {
        let (_, (script, leaf_version)) = input
            .tap_scripts
            .first_key_value()
            .ok_or_else(|| Error::protocol(format!("input {i} has no tapscript spend")))?;

        let leaf_hash = TapLeafHash::from_script(script, *leaf_version);

        let tap_sighash = SighashCache::new(&psbt.unsigned_tx)
            .taproot_script_spend_signature_hash(
                i,
                &Prevouts::All(&prevouts),
                leaf_hash,
                TapSighashType::Default,
            )
            .map_err(Error::crypto)
            .with_context(|| format!("failed to compute sighash for input {i}"))?;

        let msg = secp256k1::Message::from_digest(tap_sighash.to_raw_hash().to_byte_array());

        for signer in signers {
            let sig = input
                .tap_script_sigs
                .get(&(*signer, leaf_hash))
                .ok_or_else(|| {
                    Error::adversary(format!("input {i} is missing a signature from {signer}"))
                })?;

            secp.verify_schnorr(&sig.signature, &msg, signer)
                .map_err(|_| {
                    Error::adversary(format!("invalid signature from {signer} on input {i}"))
                })?;
        }
    }

    Ok(())
}

/// Copy the tapscript signatures of `src` into `dst`, input by input.
///
/// The caller verifies `src` first; this only merges.
pub fn merge_tap_script_sigs(dst: &mut Psbt, src: &Psbt) -> Result<(), Error> {
    if dst.inputs.len() != src.inputs.len() {
        return Err(Error::protocol(format!(
            "cannot merge signatures: {} inputs vs {}",
            src.inputs.len(),
            dst.inputs.len()
        )));
    }

    if dst.unsigned_tx.compute_txid() != src.unsigned_tx.compute_txid() {
        return Err(Error::protocol(
            "cannot merge signatures across different transactions",
        ));
    }

    for (dst_input, src_input) in dst.inputs.iter_mut().zip(src.inputs.iter()) {
        for (key, sig) in src_input.tap_script_sigs.iter() {
            dst_input.tap_script_sigs.insert(*key, *sig);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::csv_sig_script;
    use crate::vhtlc::Vhtlc;
    use crate::vhtlc::VhtlcParams;
    use bitcoin::hashes::ripemd160;
    use bitcoin::hashes::sha256;
    use bitcoin::key::Keypair;
    use bitcoin::secp256k1::SecretKey;
    use bitcoin::Network;
    use bitcoin::Txid;
    use std::str::FromStr;

    fn keypair(byte: u8) -> Keypair {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).expect("valid secret key");
        Keypair::from_secret_key(&secp, &sk)
    }

    fn test_vhtlc() -> Vhtlc {
        let params = VhtlcParams {
            sender: keypair(1).x_only_public_key().0,
            receiver: keypair(2).x_only_public_key().0,
            server: keypair(3).x_only_public_key().0,
            commitment: ripemd160::Hash::hash(
                sha256::Hash::hash(&[0xaa; 32]).as_byte_array(),
            ),
            refund_locktime: 144,
            unilateral_claim_delay: Sequence::from_height(24),
            unilateral_refund_delay: Sequence::from_height(144),
            unilateral_refund_without_receiver_delay: Sequence::from_height(288),
        };

        Vhtlc::new(params, Network::Regtest).expect("valid VHTLC")
    }

    fn test_vtxo_input(vhtlc: &Vhtlc, amount: Amount) -> VtxoInput {
        let claim_script = vhtlc.claim_script();
        let control_block = vhtlc
            .spend_info()
            .control_block(&(claim_script.clone(), LeafVersion::TapScript))
            .expect("claim leaf in tree");

        VtxoInput::new(
            claim_script,
            None,
            control_block,
            vhtlc.tapscripts(),
            vhtlc.script_pubkey(),
            amount,
            OutPoint {
                txid: Txid::from_str(
                    "2222222222222222222222222222222222222222222222222222222222222222",
                )
                .expect("valid txid"),
                vout: 0,
            },
        )
    }

    fn destination() -> ArkAddress {
        let server = keypair(3).x_only_public_key().0;
        let vtxo = bitcoin::key::TweakedPublicKey::dangerous_assume_tweaked(
            keypair(4).x_only_public_key().0,
        );
        ArkAddress::new(Network::Regtest, server, vtxo)
    }

    fn exit_script() -> ScriptBuf {
        csv_sig_script(Sequence::from_height(144), keypair(3).x_only_public_key().0)
    }

    #[test]
    fn builds_one_checkpoint_per_input() {
        let vhtlc = test_vhtlc();
        let input = test_vtxo_input(&vhtlc, Amount::from_sat(50_000));
        let address = destination();

        let OffchainTransactions { ark_tx, checkpoints } = build_offchain_transactions(
            &[(&address, Amount::from_sat(50_000))],
            None,
            std::slice::from_ref(&input),
            &exit_script(),
            Amount::from_sat(546),
        )
        .expect("valid transactions");

        assert_eq!(checkpoints.len(), 1);
        assert_eq!(ark_tx.unsigned_tx.input.len(), 1);
        // Destination plus the anchor.
        assert_eq!(ark_tx.unsigned_tx.output.len(), 2);
        assert_eq!(
            ark_tx.unsigned_tx.input[0].previous_output,
            checkpoints[0].outpoint()
        );
        assert_eq!(ark_tx.unsigned_tx.output[0].value, Amount::from_sat(50_000));
    }

    #[test]
    fn rejects_outputs_exceeding_inputs() {
        let vhtlc = test_vhtlc();
        let input = test_vtxo_input(&vhtlc, Amount::from_sat(1_000));
        let address = destination();

        let result = build_offchain_transactions(
            &[(&address, Amount::from_sat(2_000))],
            None,
            std::slice::from_ref(&input),
            &exit_script(),
            Amount::from_sat(546),
        );

        assert!(result.is_err());
    }

    #[test]
    fn sub_dust_output_uses_op_return_form() {
        let vhtlc = test_vhtlc();
        let input = test_vtxo_input(&vhtlc, Amount::from_sat(400));
        let address = destination();

        let OffchainTransactions { ark_tx, .. } = build_offchain_transactions(
            &[(&address, Amount::from_sat(400))],
            None,
            std::slice::from_ref(&input),
            &exit_script(),
            Amount::from_sat(546),
        )
        .expect("valid transactions");

        assert!(ark_tx.unsigned_tx.output[0].script_pubkey.is_op_return());
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let vhtlc = test_vhtlc();
        let input = test_vtxo_input(&vhtlc, Amount::from_sat(50_000));
        let address = destination();
        let receiver = keypair(2);

        let OffchainTransactions {
            mut ark_tx,
            checkpoints,
        } = build_offchain_transactions(
            &[(&address, Amount::from_sat(50_000))],
            None,
            std::slice::from_ref(&input),
            &exit_script(),
            Amount::from_sat(546),
        )
        .expect("valid transactions");

        let sign_fn = |_: &mut psbt::Input,
                       msg: secp256k1::Message|
         -> Result<Vec<(schnorr::Signature, XOnlyPublicKey)>, Error> {
            let sig = Secp256k1::new().sign_schnorr_no_aux_rand(&msg, &receiver);
            Ok(vec![(sig, receiver.x_only_public_key().0)])
        };

        sign_ark_transaction(sign_fn, &mut ark_tx, &checkpoints, 0).expect("signs");

        verify_tap_script_signatures(&ark_tx, &[receiver.x_only_public_key().0])
            .expect("user signature verifies");

        // A signer who never signed must not verify.
        let stranger = keypair(9).x_only_public_key().0;
        assert!(verify_tap_script_signatures(&ark_tx, &[stranger]).is_err());
    }

    #[test]
    fn condition_witness_encoding() {
        let mut input = psbt::Input::default();
        let preimage = [0xaa; 32];

        set_condition_witness(&mut input, &[&preimage]);

        let value = input
            .unknown
            .get(&psbt::raw::Key {
                type_value: 222,
                key: VTXO_CONDITION_KEY.to_vec(),
            })
            .expect("condition key present");

        // One element, 32 bytes long, then the preimage itself.
        assert_eq!(value[0], 1);
        assert_eq!(value[1], 32);
        assert_eq!(&value[2..], &preimage);
    }
}
