use crate::Error;
use bitcoin::opcodes::all::*;
use bitcoin::script::Instruction;
use bitcoin::taproot::TaprootSpendInfo;
use bitcoin::ScriptBuf;
use bitcoin::Sequence;
use bitcoin::XOnlyPublicKey;

/// A conventional 2-of-2 multisignature [`ScriptBuf`].
pub fn multisig_script(pk_0: XOnlyPublicKey, pk_1: XOnlyPublicKey) -> ScriptBuf {
    ScriptBuf::builder()
        .push_x_only_key(&pk_0)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_x_only_key(&pk_1)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// A [`ScriptBuf`] allowing the owner of `pk` to spend after the relative
/// `locktime` has passed since the corresponding output was confirmed.
pub fn csv_sig_script(locktime: Sequence, pk: XOnlyPublicKey) -> ScriptBuf {
    ScriptBuf::builder()
        .push_int(locktime.to_consensus_u32() as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_x_only_key(&pk)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// The script pubkey for the Taproot output corresponding to the given
/// [`TaprootSpendInfo`].
pub fn tr_script_pubkey(spend_info: &TaprootSpendInfo) -> ScriptBuf {
    let output_key = spend_info.output_key();
    ScriptBuf::builder()
        .push_opcode(OP_PUSHNUM_1)
        .push_slice(output_key.serialize())
        .into_script()
}

/// Threshold below which a raw timeout value counts as a number of blocks
/// rather than 512-second units, mirroring BIP68's type flag.
const SECONDS_THRESHOLD: u32 = 512;

/// Interpret a raw timeout value from a swap response as a relative timelock.
///
/// Values below 512 are block counts; everything else is a duration in
/// seconds, rounded down to the 512-second granularity of BIP68.
pub fn parse_delay(value: u32) -> Result<Sequence, Error> {
    if value == 0 {
        return Err(Error::invalid_input("timeout delay must be greater than 0"));
    }

    if value < SECONDS_THRESHOLD {
        let height = u16::try_from(value)
            .map_err(|_| Error::invalid_input(format!("block delay out of range: {value}")))?;
        Ok(Sequence::from_height(height))
    } else {
        Sequence::from_seconds_floor(value)
            .map_err(|e| Error::invalid_input(format!("invalid seconds delay {value}: {e}")))
    }
}

/// Extracts all [`XOnlyPublicKey`]s from checksig patterns in the script.
///
/// Finds all 32-byte data pushes immediately followed by [`OP_CHECKSIG`] or
/// [`OP_CHECKSIGVERIFY`].
pub fn extract_checksig_pubkeys(script: &ScriptBuf) -> Vec<XOnlyPublicKey> {
    let instructions: Vec<_> = script.instructions().filter_map(|inst| inst.ok()).collect();

    let mut pubkeys = Vec::new();

    for window in instructions.windows(2) {
        let (push, checksig) = (&window[0], &window[1]);

        if let Instruction::PushBytes(bytes) = push {
            if bytes.len() != 32 {
                continue;
            }

            let is_checksig = matches!(
                checksig,
                Instruction::Op(op) if *op == OP_CHECKSIG || *op == OP_CHECKSIGVERIFY
            );

            if let Ok(pk) = XOnlyPublicKey::from_slice(bytes.as_bytes()) {
                if is_checksig {
                    pubkeys.push(pk);
                }
            }
        }
    }

    pubkeys
}

/// Recover the CSV [`Sequence`] from a `csv_sig_script`-shaped tapscript.
pub fn extract_sequence_from_csv_sig_script(script: &ScriptBuf) -> Result<Sequence, Error> {
    let bytes = script.to_bytes();

    let csv_index = bytes
        .windows(2)
        .position(|window| *window == [OP_CSV.to_u8(), OP_DROP.to_u8()])
        .ok_or_else(|| Error::protocol("script has no CSV-DROP pattern"))?;

    let before_csv = &bytes[..csv_index];

    // Either `OP_PUSHNUM_X` (a single byte) or `OP_PUSH_BYTES_X BYTES`.
    let sequence = if before_csv.len() > 1 {
        &before_csv[1..]
    } else {
        before_csv
    };

    let mut sequence = sequence.to_vec();
    sequence.reverse();

    if sequence.is_empty() || sequence.len() > 4 {
        return Err(Error::protocol(format!(
            "unexpected CSV encoding length: {}",
            sequence.len()
        )));
    }

    let mut buffer = [0u8; 4];
    buffer[4 - sequence.len()..].copy_from_slice(&sequence);

    let value = u32::from_be_bytes(buffer);

    // OP_PUSHNUM encodes 1..=16 directly as opcodes.
    let value = if sequence.len() == 1 && value >= OP_PUSHNUM_1.to_u8() as u32 {
        value - (OP_PUSHNUM_1.to_u8() as u32 - 1)
    } else {
        value
    };

    Ok(Sequence::from_consensus(value))
}
