use crate::Error;

/// Convert a `bitcoin` public key into the key type of the MuSig2-capable
/// secp256k1 fork.
pub fn to_musig_pk(pk: bitcoin::secp256k1::PublicKey) -> ::musig::PublicKey {
    ::musig::PublicKey::from_slice(&pk.serialize()).expect("valid public key bytes")
}

/// Convert a MuSig2 x-only key back into the `bitcoin` key type.
pub fn from_musig_xonly(pk: ::musig::XOnlyPublicKey) -> bitcoin::XOnlyPublicKey {
    bitcoin::XOnlyPublicKey::from_slice(&pk.serialize()).expect("valid x-only key bytes")
}

/// Convert a `bitcoin` keypair into the keypair type of the MuSig2-capable
/// secp256k1 fork.
pub fn to_musig_keypair(
    _secp: &::musig::Secp256k1<::musig::All>,
    keypair: &bitcoin::key::Keypair,
) -> Result<::musig::Keypair, Error> {
    ::musig::Keypair::from_seckey_slice(&keypair.secret_bytes())
        .map_err(|e| Error::crypto(format!("invalid keypair: {e}")))
}
