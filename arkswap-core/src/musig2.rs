//! A chainable MuSig2 signing session for cooperative key-path spends.
//!
//! The session walks through the MuSig2 protocol in a fixed order: aggregate
//! the key set, optionally apply a single Taproot tweak, fix the message,
//! generate our nonce, aggregate everyone's nonces, produce and collect
//! partial signatures, and finally aggregate them into a Schnorr signature.
//! Each step checks that the prior steps have happened; partial signatures
//! are verified against their signer before they are accepted.

use crate::conversions::from_musig_xonly;
use crate::conversions::to_musig_keypair;
use crate::conversions::to_musig_pk;
use crate::Error;
use bitcoin::XOnlyPublicKey;
use musig::musig;
use rand::CryptoRng;
use rand::Rng;
use std::collections::BTreeMap;

pub struct MusigSigningSession {
    secp: ::musig::Secp256k1<::musig::All>,
    keypair: ::musig::Keypair,
    /// The cosigner set, frozen at construction. Sorted by serialization so
    /// that all parties agree on signer indexes.
    pubkeys: Vec<::musig::PublicKey>,
    own_index: usize,
    key_agg_cache: musig::KeyAggCache,
    tweaked: bool,
    message: Option<[u8; 32]>,
    secret_nonce: Option<musig::SecretNonce>,
    public_nonce: Option<musig::PublicNonce>,
    nonces: BTreeMap<usize, musig::PublicNonce>,
    session: Option<musig::Session>,
    partial_sigs: BTreeMap<usize, musig::PartialSignature>,
}

impl MusigSigningSession {
    /// Start a session for `keypair` over the given cosigner set.
    ///
    /// The set must contain at least two distinct keys, one of which is our
    /// own; it is frozen here and cannot change for the lifetime of the
    /// session.
    pub fn new(
        keypair: &bitcoin::key::Keypair,
        cosigners: &[bitcoin::secp256k1::PublicKey],
    ) -> Result<Self, Error> {
        if cosigners.len() < 2 {
            return Err(Error::invalid_input(format!(
                "MuSig2 requires at least two cosigners, got {}",
                cosigners.len()
            )));
        }

        let mut sorted = cosigners.to_vec();
        sorted.sort_by_key(|k| k.serialize());
        sorted.dedup();
        if sorted.len() != cosigners.len() {
            return Err(Error::invalid_input(
                "MuSig2 cosigner set contains duplicate keys",
            ));
        }

        let own_pk = keypair.public_key();
        let own_index = sorted
            .iter()
            .position(|pk| *pk == own_pk)
            .ok_or_else(|| Error::invalid_input("own key missing from MuSig2 cosigner set"))?;

        let secp = ::musig::Secp256k1::new();
        let keypair = to_musig_keypair(&secp, keypair)?;

        let pubkeys = sorted.into_iter().map(to_musig_pk).collect::<Vec<_>>();
        let key_agg_cache = musig::KeyAggCache::new(&pubkeys.iter().collect::<Vec<_>>());

        Ok(Self {
            secp,
            keypair,
            pubkeys,
            own_index,
            key_agg_cache,
            tweaked: false,
            message: None,
            secret_nonce: None,
            public_nonce: None,
            nonces: BTreeMap::new(),
            session: None,
            partial_sigs: BTreeMap::new(),
        })
    }

    /// As [`MusigSigningSession::new`], but over serialized 33-byte keys as
    /// they arrive off the wire.
    pub fn from_key_bytes<K>(
        keypair: &bitcoin::key::Keypair,
        cosigners: &[K],
    ) -> Result<Self, Error>
    where
        K: AsRef<[u8]>,
    {
        let cosigners = cosigners
            .iter()
            .map(|bytes| {
                let bytes = bytes.as_ref();
                if bytes.len() != 33 {
                    return Err(Error::invalid_input(format!(
                        "MuSig2 cosigner key must be 33 bytes, got {}",
                        bytes.len()
                    )));
                }

                bitcoin::secp256k1::PublicKey::from_slice(bytes)
                    .map_err(|e| Error::invalid_input(format!("invalid cosigner key: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(keypair, &cosigners)
    }

    pub fn cosigner_count(&self) -> usize {
        self.pubkeys.len()
    }

    /// The current aggregate key (post-tweak once a tweak is applied).
    pub fn aggregate_key(&self) -> XOnlyPublicKey {
        from_musig_xonly(self.key_agg_cache.agg_pk())
    }

    /// Apply an x-only Taproot tweak to the aggregate key.
    ///
    /// A session accepts at most one tweak; asking twice is a programming
    /// error on the caller's side and is rejected.
    pub fn tweak_xonly(&mut self, tweak: &[u8; 32]) -> Result<XOnlyPublicKey, Error> {
        if self.tweaked {
            return Err(Error::state("MuSig2 session is already tweaked"));
        }
        if self.session.is_some() {
            return Err(Error::state("cannot tweak after session initialization"));
        }

        let tweak = ::musig::Scalar::from(
            ::musig::SecretKey::from_byte_array(*tweak)
                .map_err(|e| Error::crypto(format!("invalid tweak: {e}")))?,
        );

        self.key_agg_cache
            .pubkey_xonly_tweak_add(&tweak)
            .map_err(|e| Error::crypto(format!("failed to tweak aggregate key: {e}")))?;
        self.tweaked = true;

        Ok(self.aggregate_key())
    }

    /// Fix the 32-byte digest this session signs.
    pub fn set_message(&mut self, digest: [u8; 32]) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::state(
                "cannot change message after session initialization",
            ));
        }

        self.message = Some(digest);
        Ok(())
    }

    /// Generate our nonce pair for the fixed message.
    pub fn generate_nonce<R>(&mut self, rng: &mut R) -> Result<musig::PublicNonce, Error>
    where
        R: Rng + CryptoRng,
    {
        let msg = self
            .message
            .ok_or_else(|| Error::state("message must be set before nonce generation"))?;

        let session_secrand = musig::SessionSecretRand::assume_unique_per_nonce_gen(rng.gen());
        let extra_rand: [u8; 32] = rng.gen();

        let (secret, public) = self.key_agg_cache.nonce_gen(
            session_secrand,
            self.keypair.public_key(),
            &msg,
            Some(extra_rand),
        );

        self.secret_nonce = Some(secret);
        self.public_nonce = Some(public);
        self.nonces.insert(self.own_index, public);

        Ok(public)
    }

    /// Record the public nonces of the other cosigners and aggregate.
    ///
    /// Our own nonce is added if the caller did not include it; the full set
    /// must cover every cosigner.
    pub fn aggregate_nonces(
        &mut self,
        nonces: &[(bitcoin::secp256k1::PublicKey, musig::PublicNonce)],
    ) -> Result<(), Error> {
        if self.public_nonce.is_none() {
            return Err(Error::state(
                "own nonce must be generated before aggregation",
            ));
        }

        for (pk, nonce) in nonces {
            let index = self.index_of(*pk)?;
            self.nonces.insert(index, *nonce);
        }

        if self.nonces.len() != self.pubkeys.len() {
            return Err(Error::state(format!(
                "nonce set incomplete: have {}, need {}",
                self.nonces.len(),
                self.pubkeys.len()
            )));
        }

        Ok(())
    }

    /// Create the signing session from the aggregated nonces and the message.
    pub fn initialize_session(&mut self) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::state("MuSig2 session is already initialized"));
        }

        let msg = self
            .message
            .ok_or_else(|| Error::state("message must be set before initialization"))?;

        if self.nonces.len() != self.pubkeys.len() {
            return Err(Error::state("nonces must be aggregated before initialization"));
        }

        let nonces = self.nonces.values().collect::<Vec<_>>();
        let aggregated = musig::AggregatedNonce::new(&nonces);

        self.session = Some(musig::Session::new(&self.key_agg_cache, aggregated, &msg));

        Ok(())
    }

    /// Produce our partial signature, consuming our secret nonce.
    pub fn partial_sign(&mut self) -> Result<musig::PartialSignature, Error> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::state("session must be initialized before signing"))?;

        let secret_nonce = self
            .secret_nonce
            .take()
            .ok_or_else(|| Error::state("secret nonce already consumed"))?;

        let sig = session.partial_sign(secret_nonce, &self.keypair, &self.key_agg_cache);

        self.partial_sigs.insert(self.own_index, sig);

        Ok(sig)
    }

    /// Accept a cosigner's partial signature after verifying it against their
    /// key and nonce.
    pub fn add_partial(
        &mut self,
        cosigner: bitcoin::secp256k1::PublicKey,
        sig: musig::PartialSignature,
    ) -> Result<(), Error> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::state("session must be initialized before verification"))?;

        let index = self.index_of(cosigner)?;
        let nonce = self
            .nonces
            .get(&index)
            .copied()
            .ok_or_else(|| Error::state(format!("no nonce recorded for cosigner {cosigner}")))?;

        let valid = session.partial_verify(
            &self.key_agg_cache,
            &sig,
            &nonce,
            self.pubkeys[index],
        );
        if !valid {
            return Err(Error::adversary(format!(
                "invalid partial signature from cosigner {cosigner}"
            )));
        }

        self.partial_sigs.insert(index, sig);

        Ok(())
    }

    /// Aggregate all partial signatures into the final Schnorr signature.
    ///
    /// Every cosigner must have contributed; the aggregate is verified
    /// against the (tweaked) aggregate key before it is returned.
    pub fn aggregate_partials(&self) -> Result<bitcoin::secp256k1::schnorr::Signature, Error> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::state("session must be initialized before aggregation"))?;

        if self.partial_sigs.len() != self.pubkeys.len() {
            return Err(Error::state(format!(
                "partial signature set incomplete: have {}, need {}",
                self.partial_sigs.len(),
                self.pubkeys.len()
            )));
        }

        let sigs = self.partial_sigs.values().collect::<Vec<_>>();
        let aggregated = session.partial_sig_agg(&sigs);

        let sig = aggregated.assume_valid();
        let sig = bitcoin::secp256k1::schnorr::Signature::from_slice(&sig.serialize())
            .map_err(|e| Error::crypto(format!("invalid aggregated signature: {e}")))?;

        Ok(sig)
    }

    fn index_of(&self, pk: bitcoin::secp256k1::PublicKey) -> Result<usize, Error> {
        let pk = to_musig_pk(pk);
        self.pubkeys
            .iter()
            .position(|candidate| *candidate == pk)
            .ok_or_else(|| Error::state(format!("key {pk} is not part of this MuSig2 session")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::key::Keypair;
    use bitcoin::key::Secp256k1;
    use bitcoin::secp256k1::PublicKey;
    use bitcoin::secp256k1::SecretKey;

    fn keypair(byte: u8) -> Keypair {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).expect("valid secret key");
        Keypair::from_secret_key(&secp, &sk)
    }

    #[test]
    fn rejects_single_key() {
        let kp = keypair(1);
        let result = MusigSigningSession::new(&kp, &[kp.public_key()]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let kp = keypair(1);
        let result = MusigSigningSession::new(&kp, &[kp.public_key(), kp.public_key()]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_own_key() {
        let kp = keypair(1);
        let other_0 = keypair(2).public_key();
        let other_1 = keypair(3).public_key();

        let result = MusigSigningSession::new(&kp, &[other_0, other_1]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_wrong_key_length() {
        let kp = keypair(1);
        let short = kp.public_key().serialize()[..32].to_vec();
        let full = kp.public_key().serialize().to_vec();

        let result = MusigSigningSession::from_key_bytes(&kp, &[short, full]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_double_tweak() {
        let kp = keypair(1);
        let other = keypair(2).public_key();

        let mut session =
            MusigSigningSession::new(&kp, &[kp.public_key(), other]).expect("valid session");

        session.tweak_xonly(&[7u8; 32]).expect("first tweak");
        assert!(session.tweak_xonly(&[8u8; 32]).is_err());
    }

    #[test]
    fn two_party_signing_round_trip() {
        let kp_a = keypair(1);
        let kp_b = keypair(2);
        let pubkeys = [kp_a.public_key(), kp_b.public_key()];
        let digest = [42u8; 32];

        let mut alice = MusigSigningSession::new(&kp_a, &pubkeys).expect("valid session");
        let mut bob = MusigSigningSession::new(&kp_b, &pubkeys).expect("valid session");

        assert_eq!(alice.aggregate_key(), bob.aggregate_key());

        alice.set_message(digest).expect("message");
        bob.set_message(digest).expect("message");

        let mut rng = rand::thread_rng();
        let nonce_a = alice.generate_nonce(&mut rng).expect("nonce");
        let nonce_b = bob.generate_nonce(&mut rng).expect("nonce");

        alice
            .aggregate_nonces(&[(kp_b.public_key(), nonce_b)])
            .expect("aggregate");
        bob.aggregate_nonces(&[(kp_a.public_key(), nonce_a)])
            .expect("aggregate");

        alice.initialize_session().expect("session");
        bob.initialize_session().expect("session");

        let sig_a = alice.partial_sign().expect("partial");
        let sig_b = bob.partial_sign().expect("partial");

        alice
            .add_partial(kp_b.public_key(), sig_b)
            .expect("valid partial");
        bob.add_partial(kp_a.public_key(), sig_a)
            .expect("valid partial");

        let final_a = alice.aggregate_partials().expect("aggregate");
        let final_b = bob.aggregate_partials().expect("aggregate");
        assert_eq!(final_a, final_b);

        let secp = Secp256k1::new();
        let msg = bitcoin::secp256k1::Message::from_digest(digest);
        secp.verify_schnorr(&final_a, &msg, &alice.aggregate_key())
            .expect("signature verifies under the aggregate key");
    }

    #[test]
    fn aggregate_rejects_missing_partials() {
        let kp_a = keypair(1);
        let kp_b = keypair(2);
        let pubkeys = [kp_a.public_key(), kp_b.public_key()];

        let mut alice = MusigSigningSession::new(&kp_a, &pubkeys).expect("valid session");
        let mut bob = MusigSigningSession::new(&kp_b, &pubkeys).expect("valid session");

        alice.set_message([9u8; 32]).expect("message");
        bob.set_message([9u8; 32]).expect("message");

        let mut rng = rand::thread_rng();
        let nonce_a = alice.generate_nonce(&mut rng).expect("nonce");
        let nonce_b = bob.generate_nonce(&mut rng).expect("nonce");

        alice
            .aggregate_nonces(&[(kp_b.public_key(), nonce_b)])
            .expect("aggregate");
        let _ = nonce_a;

        alice.initialize_session().expect("session");
        alice.partial_sign().expect("partial");

        // Bob's partial never arrives.
        assert!(alice.aggregate_partials().is_err());
    }

    #[test]
    fn rejects_partial_from_stranger() {
        let kp_a = keypair(1);
        let kp_b = keypair(2);
        let stranger = keypair(3);
        let pubkeys = [kp_a.public_key(), kp_b.public_key()];

        let mut alice = MusigSigningSession::new(&kp_a, &pubkeys).expect("valid session");
        let mut bob = MusigSigningSession::new(&kp_b, &pubkeys).expect("valid session");

        alice.set_message([1u8; 32]).expect("message");
        bob.set_message([1u8; 32]).expect("message");

        let mut rng = rand::thread_rng();
        let nonce_a = alice.generate_nonce(&mut rng).expect("nonce");
        let nonce_b = bob.generate_nonce(&mut rng).expect("nonce");

        alice
            .aggregate_nonces(&[(kp_b.public_key(), nonce_b)])
            .expect("aggregate");
        bob.aggregate_nonces(&[(kp_a.public_key(), nonce_a)])
            .expect("aggregate");

        alice.initialize_session().expect("session");
        bob.initialize_session().expect("session");

        let sig_b = bob.partial_sign().expect("partial");

        assert!(alice.add_partial(stranger.public_key(), sig_b).is_err());
    }
}
