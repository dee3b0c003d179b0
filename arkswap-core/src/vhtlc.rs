//! Virtual Hash Time Lock Contracts.
//!
//! A VHTLC is the Taproot output that locks one side of a swap on the Ark
//! layer. It carries a claim path gated on the payment preimage, cooperative
//! refund paths involving the Ark server, and unilateral CSV-delayed exits
//! for every party.

use crate::keys::normalize_xonly;
use crate::keys::script_commitment;
use crate::script::parse_delay;
use crate::script::tr_script_pubkey;
use crate::ArkAddress;
use crate::Error;
use crate::UNSPENDABLE_KEY;
use bitcoin::hashes::ripemd160;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::key::Secp256k1;
use bitcoin::opcodes::all::*;
use bitcoin::taproot::TaprootBuilder;
use bitcoin::taproot::TaprootSpendInfo;
use bitcoin::Network;
use bitcoin::PublicKey;
use bitcoin::ScriptBuf;
use bitcoin::Sequence;
use bitcoin::XOnlyPublicKey;
use serde::Deserialize;
use serde::Serialize;
use std::str::FromStr;

/// The parameters that fully determine a VHTLC.
///
/// Two parties deriving a VHTLC from the same parameters must arrive at the
/// same address; anything else means one of them is lying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhtlcParams {
    pub sender: XOnlyPublicKey,
    pub receiver: XOnlyPublicKey,
    pub server: XOnlyPublicKey,
    /// RIPEMD-160 of the SHA-256 payment hash.
    pub commitment: ripemd160::Hash,
    pub refund_locktime: u32,
    pub unilateral_claim_delay: Sequence,
    pub unilateral_refund_delay: Sequence,
    pub unilateral_refund_without_receiver_delay: Sequence,
}

impl VhtlcParams {
    /// Build parameters from a swap's raw wire values.
    ///
    /// `payment_hash` is the 32-byte SHA-256 digest of the preimage; the
    /// 20-byte script commitment is derived here. Keys are accepted as
    /// 33-byte compressed or 32-byte x-only and normalized; other lengths
    /// are rejected. Raw delays below 512 are block counts, everything else
    /// 512-second units.
    pub fn new(
        payment_hash: sha256::Hash,
        sender: &[u8],
        receiver: &[u8],
        server: &[u8],
        refund_locktime: u32,
        unilateral_claim_delay: u32,
        unilateral_refund_delay: u32,
        unilateral_refund_without_receiver_delay: u32,
    ) -> Result<Self, Error> {
        let params = Self {
            sender: normalize_xonly(sender)?,
            receiver: normalize_xonly(receiver)?,
            server: normalize_xonly(server)?,
            commitment: script_commitment(&payment_hash),
            refund_locktime,
            unilateral_claim_delay: parse_delay(unilateral_claim_delay)?,
            unilateral_refund_delay: parse_delay(unilateral_refund_delay)?,
            unilateral_refund_without_receiver_delay: parse_delay(
                unilateral_refund_without_receiver_delay,
            )?,
        };
        params.validate()?;

        Ok(params)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.refund_locktime == 0 {
            return Err(Error::invalid_input(
                "refund locktime must be greater than 0",
            ));
        }

        for (name, delay) in [
            ("unilateral claim", self.unilateral_claim_delay),
            ("unilateral refund", self.unilateral_refund_delay),
            (
                "unilateral refund without receiver",
                self.unilateral_refund_without_receiver_delay,
            ),
        ] {
            if !delay.is_relative_lock_time() || delay.to_consensus_u32() == 0 {
                return Err(Error::invalid_input(format!(
                    "{name} delay must be a non-zero CSV relative lock time"
                )));
            }
        }

        Ok(())
    }

    /// Claim path: reveal the preimage, receiver and server sign.
    pub fn claim_script(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_opcode(OP_HASH160)
            .push_slice(self.commitment.as_byte_array())
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_VERIFY)
            .push_x_only_key(&self.receiver)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_x_only_key(&self.server)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Cooperative refund: all three parties sign.
    pub fn refund_script(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_x_only_key(&self.sender)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_x_only_key(&self.receiver)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_x_only_key(&self.server)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Refund with the receiver unavailable: CLTV locktime, sender and server
    /// sign.
    pub fn refund_without_receiver_script(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_int(self.refund_locktime as i64)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_x_only_key(&self.sender)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_x_only_key(&self.server)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Unilateral claim: preimage plus receiver signature after a CSV delay,
    /// no server needed.
    pub fn unilateral_claim_script(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_opcode(OP_HASH160)
            .push_slice(self.commitment.as_byte_array())
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_VERIFY)
            .push_int(self.unilateral_claim_delay.to_consensus_u32() as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_x_only_key(&self.receiver)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Unilateral refund: sender and receiver sign after a CSV delay.
    pub fn unilateral_refund_script(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_int(self.unilateral_refund_delay.to_consensus_u32() as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_x_only_key(&self.sender)
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_x_only_key(&self.receiver)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    /// Unilateral refund with the receiver unavailable: sender alone after
    /// the longest CSV delay.
    pub fn unilateral_refund_without_receiver_script(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_int(
                self.unilateral_refund_without_receiver_delay
                    .to_consensus_u32() as i64,
            )
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_x_only_key(&self.sender)
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    fn build_taproot(&self) -> Result<TaprootSpendInfo, Error> {
        let internal_key = PublicKey::from_str(UNSPENDABLE_KEY)
            .map_err(|e| Error::crypto(format!("failed to parse internal key: {e}")))?;
        let internal_key = XOnlyPublicKey::from(internal_key.inner);

        let scripts = vec![
            self.claim_script(),
            self.refund_script(),
            self.refund_without_receiver_script(),
            self.unilateral_claim_script(),
            self.unilateral_refund_script(),
            self.unilateral_refund_without_receiver_script(),
        ];

        let builder = add_balanced(TaprootBuilder::new(), &scripts, 0)?;

        let secp = Secp256k1::new();
        builder
            .finalize(&secp, internal_key)
            .map_err(|e| Error::crypto(format!("failed to finalize taproot tree: {e:?}")))
    }
}

/// Place `scripts` into a balanced subtree rooted at `depth`, splitting each
/// range in half.
fn add_balanced(
    builder: TaprootBuilder,
    scripts: &[ScriptBuf],
    depth: u8,
) -> Result<TaprootBuilder, Error> {
    match scripts {
        [] => Err(Error::crypto("cannot build a taproot tree with no leaves")),
        [script] => builder
            .add_leaf(depth, script.clone())
            .map_err(|e| Error::crypto(format!("failed to add taproot leaf: {e}"))),
        _ => {
            let (left, right) = scripts.split_at(scripts.len() / 2);
            let builder = add_balanced(builder, left, depth + 1)?;
            add_balanced(builder, right, depth + 1)
        }
    }
}

/// A fully constructed VHTLC: the parameters plus the finalized Taproot tree.
pub struct Vhtlc {
    params: VhtlcParams,
    spend_info: TaprootSpendInfo,
    network: Network,
}

impl Vhtlc {
    pub fn new(params: VhtlcParams, network: Network) -> Result<Self, Error> {
        params.validate()?;
        let spend_info = params.build_taproot()?;

        Ok(Self {
            params,
            spend_info,
            network,
        })
    }

    pub fn params(&self) -> &VhtlcParams {
        &self.params
    }

    pub fn spend_info(&self) -> &TaprootSpendInfo {
        &self.spend_info
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        tr_script_pubkey(&self.spend_info)
    }

    pub fn address(&self) -> ArkAddress {
        ArkAddress::new(self.network, self.params.server, self.spend_info.output_key())
    }

    pub fn claim_script(&self) -> ScriptBuf {
        self.params.claim_script()
    }

    pub fn refund_script(&self) -> ScriptBuf {
        self.params.refund_script()
    }

    pub fn refund_without_receiver_script(&self) -> ScriptBuf {
        self.params.refund_without_receiver_script()
    }

    pub fn unilateral_claim_script(&self) -> ScriptBuf {
        self.params.unilateral_claim_script()
    }

    pub fn unilateral_refund_script(&self) -> ScriptBuf {
        self.params.unilateral_refund_script()
    }

    pub fn unilateral_refund_without_receiver_script(&self) -> ScriptBuf {
        self.params.unilateral_refund_without_receiver_script()
    }

    /// Every leaf of the tree, in tree order.
    pub fn tapscripts(&self) -> Vec<ScriptBuf> {
        vec![
            self.claim_script(),
            self.refund_script(),
            self.refund_without_receiver_script(),
            self.unilateral_claim_script(),
            self.unilateral_refund_script(),
            self.unilateral_refund_without_receiver_script(),
        ]
    }

    /// Assert that the address the counterparty handed us is the one these
    /// parameters produce.
    ///
    /// A mismatch means the counterparty tried to point us at an output we do
    /// not control the scripts of. Never recoverable.
    pub fn verify_lockup_address(&self, expected: &ArkAddress) -> Result<(), Error> {
        let derived = self.address();
        if &derived != expected {
            return Err(Error::adversary(format!(
                "counterparty lockup address ({expected}) does not match derived VHTLC address ({derived})"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hex::DisplayHex;

    fn xonly(hex: &str) -> XOnlyPublicKey {
        let pk = PublicKey::from_str(hex).expect("valid public key");
        XOnlyPublicKey::from(pk.inner)
    }

    fn fixture_params() -> VhtlcParams {
        VhtlcParams {
            sender: xonly("030192e796452d6df9697c280542e1560557bcf79a347d925895043136225c7cb4"),
            receiver: xonly("021e1bb85455fe3f5aed60d101aa4dbdb9e7714f6226769a97a17a5331dadcd53b"),
            server: xonly("03aad52d58162e9eefeafc7ad8a1cdca8060b5f01df1e7583362d052e266208f88"),
            commitment: ripemd160::Hash::from_str("4d487dd3753a89bc9fe98401d1196523058251fc")
                .expect("valid hash"),
            refund_locktime: 265,
            unilateral_claim_delay: Sequence::from_height(17),
            unilateral_refund_delay: Sequence::from_height(144),
            unilateral_refund_without_receiver_delay: Sequence::from_height(144),
        }
    }

    #[test]
    fn claim_script_encoding() {
        let vhtlc = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");

        let claim_hex = vhtlc.claim_script().as_bytes().to_lower_hex_string();
        assert_eq!(
            claim_hex,
            "a9144d487dd3753a89bc9fe98401d1196523058251fc8769201e1bb85455fe3f5aed60d101aa4dbdb9e7714f6226769a97a17a5331dadcd53bad20aad52d58162e9eefeafc7ad8a1cdca8060b5f01df1e7583362d052e266208f88ac"
        );
    }

    #[test]
    fn unilateral_claim_script_encoding() {
        let vhtlc = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");

        let hex = vhtlc
            .unilateral_claim_script()
            .as_bytes()
            .to_lower_hex_string();

        // CSV value 17 encodes as 0x0111.
        assert_eq!(
            hex,
            "a9144d487dd3753a89bc9fe98401d1196523058251fc87690111b275201e1bb85455fe3f5aed60d101aa4dbdb9e7714f6226769a97a17a5331dadcd53bac"
        );
    }

    #[test]
    fn address_is_deterministic() {
        let a = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");
        let b = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");

        let address = a.address().encode();
        assert_eq!(address, b.address().encode());
        assert!(address.starts_with("tark1"));
    }

    #[test]
    fn address_changes_with_commitment() {
        let a = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");

        let mut params = fixture_params();
        params.commitment =
            ripemd160::Hash::hash(b"a different preimage commitment entirely");
        let b = Vhtlc::new(params, Network::Testnet).expect("valid VHTLC");

        assert_ne!(a.address().encode(), b.address().encode());
    }

    #[test]
    fn lockup_address_verification() {
        let vhtlc = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");
        let honest = vhtlc.address();

        assert!(vhtlc.verify_lockup_address(&honest).is_ok());

        let mut params = fixture_params();
        params.refund_locktime = 266;
        let other = Vhtlc::new(params, Network::Testnet).expect("valid VHTLC");

        let err = vhtlc.verify_lockup_address(&other.address()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Adversary);
    }

    #[test]
    fn zero_locktime_is_rejected() {
        let mut params = fixture_params();
        params.refund_locktime = 0;

        assert!(Vhtlc::new(params, Network::Testnet).is_err());
    }

    #[test]
    fn params_from_raw_wire_values() {
        let payment_hash = sha256::Hash::hash(&[0xaa; 32]);

        let sender = xonly("030192e796452d6df9697c280542e1560557bcf79a347d925895043136225c7cb4");
        let receiver =
            xonly("021e1bb85455fe3f5aed60d101aa4dbdb9e7714f6226769a97a17a5331dadcd53b");
        let server = xonly("03aad52d58162e9eefeafc7ad8a1cdca8060b5f01df1e7583362d052e266208f88");

        // Compressed and x-only forms normalize to the same key.
        let params = VhtlcParams::new(
            payment_hash,
            &sender.serialize(),
            &receiver.serialize(),
            &server.serialize(),
            144,
            24,
            144,
            86528,
        )
        .expect("valid params");

        assert_eq!(params.sender, sender);
        assert_eq!(
            params.commitment,
            ripemd160::Hash::hash(payment_hash.as_byte_array())
        );
        assert!(params.unilateral_claim_delay.is_height_locked());
        assert!(params
            .unilateral_refund_without_receiver_delay
            .is_time_locked());
    }

    #[test]
    fn bad_key_length_is_rejected() {
        let payment_hash = sha256::Hash::hash(&[0xaa; 32]);
        let good = xonly("030192e796452d6df9697c280542e1560557bcf79a347d925895043136225c7cb4");

        let result = VhtlcParams::new(
            payment_hash,
            &good.serialize()[..31],
            &good.serialize(),
            &good.serialize(),
            144,
            24,
            144,
            288,
        );

        assert!(result.is_err());
    }

    #[test]
    fn all_scripts_are_leaves_of_the_tree() {
        let vhtlc = Vhtlc::new(fixture_params(), Network::Testnet).expect("valid VHTLC");
        let spend_info = vhtlc.spend_info();

        for script in vhtlc.tapscripts() {
            let control = spend_info
                .control_block(&(script, bitcoin::taproot::LeafVersion::TapScript));
            assert!(control.is_some());
        }
    }
}
