//! Key provisioning for the engine.

use arkswap_core::Error;
use bitcoin::key::Keypair;
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::SecretKey;
use bitcoin::XOnlyPublicKey;
use std::sync::Mutex;

/// Provides keypairs for signing operations.
///
/// Implementations range from a single static keypair to HD wallets; the
/// engine only needs fresh keys for new swaps and lookup by public key for
/// signing restored ones.
pub trait KeyProvider: Send + Sync {
    /// A keypair for the next swap.
    fn next_keypair(&self) -> Result<Keypair, Error>;

    /// The keypair behind a previously handed-out public key.
    fn keypair_for_pk(&self, pk: &XOnlyPublicKey) -> Result<Keypair, Error>;
}

/// A [`KeyProvider`] over a fixed list of secret keys, handing them out in
/// order and recycling the last one.
pub struct StaticKeyProvider {
    keypairs: Vec<Keypair>,
    next: Mutex<usize>,
}

impl StaticKeyProvider {
    pub fn new(secret_keys: Vec<SecretKey>) -> Result<Self, Error> {
        if secret_keys.is_empty() {
            return Err(Error::invalid_input(
                "static key provider needs at least one key",
            ));
        }

        let secp = Secp256k1::new();
        let keypairs = secret_keys
            .into_iter()
            .map(|sk| Keypair::from_secret_key(&secp, &sk))
            .collect();

        Ok(Self {
            keypairs,
            next: Mutex::new(0),
        })
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypairs: vec![keypair],
            next: Mutex::new(0),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn next_keypair(&self) -> Result<Keypair, Error> {
        let mut next = self.next.lock().expect("key index lock");

        let keypair = self.keypairs[(*next).min(self.keypairs.len() - 1)];
        *next += 1;

        Ok(keypair)
    }

    fn keypair_for_pk(&self, pk: &XOnlyPublicKey) -> Result<Keypair, Error> {
        self.keypairs
            .iter()
            .find(|kp| kp.x_only_public_key().0 == *pk)
            .copied()
            .ok_or_else(|| Error::state(format!("no keypair known for public key {pk}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_keys_in_order_then_recycles() {
        let sk_a = SecretKey::from_slice(&[1u8; 32]).expect("valid key");
        let sk_b = SecretKey::from_slice(&[2u8; 32]).expect("valid key");
        let provider = StaticKeyProvider::new(vec![sk_a, sk_b]).expect("valid provider");

        let first = provider.next_keypair().expect("keypair");
        let second = provider.next_keypair().expect("keypair");
        let third = provider.next_keypair().expect("keypair");

        assert_ne!(first.public_key(), second.public_key());
        assert_eq!(second.public_key(), third.public_key());
    }

    #[test]
    fn lookup_by_public_key() {
        let sk = SecretKey::from_slice(&[3u8; 32]).expect("valid key");
        let provider = StaticKeyProvider::new(vec![sk]).expect("valid provider");

        let kp = provider.next_keypair().expect("keypair");
        let found = provider
            .keypair_for_pk(&kp.x_only_public_key().0)
            .expect("found");
        assert_eq!(found.public_key(), kp.public_key());

        let secp = Secp256k1::new();
        let other = Keypair::from_secret_key(
            &secp,
            &SecretKey::from_slice(&[4u8; 32]).expect("valid key"),
        );
        assert!(provider.keypair_for_pk(&other.x_only_public_key().0).is_err());
    }
}
