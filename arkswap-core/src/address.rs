use crate::Error;
use bech32::Bech32m;
use bech32::Hrp;
use bitcoin::key::TweakedPublicKey;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::opcodes::all::OP_PUSHNUM_1;
use bitcoin::Network;
use bitcoin::ScriptBuf;
use bitcoin::XOnlyPublicKey;
use std::fmt;
use std::str::FromStr;

/// An Ark address: the tuple of the Ark server's public key and the Taproot
/// output key of a VTXO, encoded with bech32m under the network HRP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArkAddress {
    hrp: Hrp,
    server: XOnlyPublicKey,
    vtxo_tap_key: TweakedPublicKey,
}

const MAINNET_HRP: &str = "ark";
const TESTNET_HRP: &str = "tark";

impl ArkAddress {
    pub fn new(network: Network, server: XOnlyPublicKey, vtxo_tap_key: TweakedPublicKey) -> Self {
        let hrp = match network {
            Network::Bitcoin => MAINNET_HRP,
            Network::Testnet | Network::Signet | Network::Regtest => TESTNET_HRP,
            _ => TESTNET_HRP,
        };

        let hrp = Hrp::parse_unchecked(hrp);

        Self {
            hrp,
            server,
            vtxo_tap_key,
        }
    }

    pub fn server(&self) -> XOnlyPublicKey {
        self.server
    }

    pub fn vtxo_tap_key(&self) -> TweakedPublicKey {
        self.vtxo_tap_key
    }

    pub fn encode(&self) -> String {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.server.serialize());
        bytes[32..].copy_from_slice(&self.vtxo_tap_key.serialize());

        bech32::encode::<Bech32m>(self.hrp, bytes.as_slice()).expect("data within length limits")
    }

    pub fn decode(value: &str) -> Result<Self, Error> {
        let (hrp, bytes) = bech32::decode(value)
            .map_err(|e| Error::invalid_input(format!("invalid address encoding: {e}")))?;

        if hrp.as_str() != MAINNET_HRP && hrp.as_str() != TESTNET_HRP {
            return Err(Error::invalid_input(format!(
                "unknown address HRP: {hrp}"
            )));
        }

        if bytes.len() != 64 {
            return Err(Error::invalid_input(format!(
                "invalid address payload length: expected 64 bytes, got {}",
                bytes.len()
            )));
        }

        let server = XOnlyPublicKey::from_slice(&bytes[..32])
            .map_err(|e| Error::invalid_input(format!("invalid server key in address: {e}")))?;

        let vtxo_tap_key = XOnlyPublicKey::from_slice(&bytes[32..])
            .map_err(|e| Error::invalid_input(format!("invalid VTXO key in address: {e}")))?;
        let vtxo_tap_key = TweakedPublicKey::dangerous_assume_tweaked(vtxo_tap_key);

        Ok(Self {
            hrp,
            server,
            vtxo_tap_key,
        })
    }

    /// The script pubkey of the VTXO output this address refers to.
    pub fn to_p2tr_script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_opcode(OP_PUSHNUM_1)
            .push_slice(self.vtxo_tap_key.serialize())
            .into_script()
    }

    /// Sub-dust outputs are not spendable on-chain and are committed to with
    /// an OP_RETURN carrying the VTXO output key instead.
    pub fn to_sub_dust_script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::builder()
            .push_opcode(OP_RETURN)
            .push_slice(self.vtxo_tap_key.serialize())
            .into_script()
    }
}

impl fmt::Display for ArkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for ArkAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::sha256;
    use bitcoin::hashes::Hash;
    use bitcoin::key::Secp256k1;
    use bitcoin::secp256k1::SecretKey;

    fn test_key(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).expect("valid secret key");
        sk.x_only_public_key(&secp).0
    }

    #[test]
    fn encode_decode_round_trip() {
        let server = test_key(1);
        let vtxo = TweakedPublicKey::dangerous_assume_tweaked(test_key(2));

        let address = ArkAddress::new(Network::Regtest, server, vtxo);
        let encoded = address.encode();

        assert!(encoded.starts_with("tark1"));

        let decoded = ArkAddress::decode(&encoded).expect("valid address");
        assert_eq!(decoded, address);
    }

    #[test]
    fn mainnet_hrp() {
        let server = test_key(1);
        let vtxo = TweakedPublicKey::dangerous_assume_tweaked(test_key(2));

        let address = ArkAddress::new(Network::Bitcoin, server, vtxo);
        assert!(address.encode().starts_with("ark1"));
    }

    #[test]
    fn rejects_foreign_hrp() {
        // A valid bech32m string under the wrong HRP.
        let data = sha256::Hash::hash(b"seed").to_byte_array();
        let mut payload = Vec::new();
        payload.extend_from_slice(&data);
        payload.extend_from_slice(&data);
        let encoded =
            bech32::encode::<Bech32m>(Hrp::parse_unchecked("bc"), &payload).expect("encodes");

        assert!(ArkAddress::decode(&encoded).is_err());
    }

    #[test]
    fn rejects_short_payload() {
        let encoded = bech32::encode::<Bech32m>(Hrp::parse_unchecked("tark"), &[0u8; 32])
            .expect("encodes");

        assert!(ArkAddress::decode(&encoded).is_err());
    }
}
