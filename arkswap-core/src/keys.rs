use crate::Error;
use bitcoin::hashes::ripemd160;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::XOnlyPublicKey;

/// Normalize a public key given as either a 33-byte compressed key or a
/// 32-byte x-only key into its x-only form.
///
/// Any other length is rejected.
pub fn normalize_xonly(bytes: &[u8]) -> Result<XOnlyPublicKey, Error> {
    match bytes.len() {
        32 => XOnlyPublicKey::from_slice(bytes)
            .map_err(|e| Error::invalid_input(format!("invalid x-only public key: {e}"))),
        33 => {
            let pk = bitcoin::PublicKey::from_slice(bytes)
                .map_err(|e| Error::invalid_input(format!("invalid compressed public key: {e}")))?;
            Ok(pk.inner.x_only_public_key().0)
        }
        n => Err(Error::invalid_input(format!(
            "invalid public key length: expected 32 or 33 bytes, got {n}"
        ))),
    }
}

/// The SHA-256 digest committed to in the Lightning payment hash.
pub fn preimage_sha256(preimage: &[u8; 32]) -> sha256::Hash {
    sha256::Hash::hash(preimage)
}

/// The 20-byte commitment used inside VHTLC scripts: RIPEMD-160 of the
/// SHA-256 payment hash.
pub fn script_commitment(payment_hash: &sha256::Hash) -> ripemd160::Hash {
    ripemd160::Hash::hash(payment_hash.as_byte_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hex::FromHex;

    const COMPRESSED: &str = "030192e796452d6df9697c280542e1560557bcf79a347d925895043136225c7cb4";

    #[test]
    fn normalizes_compressed_key() {
        let bytes = Vec::from_hex(COMPRESSED).expect("valid hex");
        let xonly = normalize_xonly(&bytes).expect("valid key");
        assert_eq!(xonly.serialize().to_vec(), bytes[1..]);
    }

    #[test]
    fn accepts_xonly_key() {
        let bytes = Vec::from_hex(COMPRESSED).expect("valid hex");
        let xonly = normalize_xonly(&bytes[1..]).expect("valid key");
        assert_eq!(xonly.serialize().to_vec(), bytes[1..]);
    }

    #[test]
    fn rejects_other_lengths() {
        assert!(normalize_xonly(&[0u8; 31]).is_err());
        assert!(normalize_xonly(&[0u8; 34]).is_err());
        assert!(normalize_xonly(&[]).is_err());
    }

    #[test]
    fn commitment_is_ripemd_of_sha() {
        let preimage = [0xaa; 32];
        let payment_hash = preimage_sha256(&preimage);
        let commitment = script_commitment(&payment_hash);

        assert_eq!(
            commitment,
            ripemd160::Hash::hash(sha256::Hash::hash(&preimage).as_byte_array())
        );
    }
}
