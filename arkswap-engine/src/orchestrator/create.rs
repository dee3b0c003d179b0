//! Swap creation: derive keys and secrets, call the provider, verify what it
//! returns, and produce the record the engine will monitor.

use super::Orchestrator;
use crate::ark::ArkClient;
use crate::keys::KeyProvider;
use crate::model::ChainDirection;
use crate::model::ChainSwap;
use crate::model::ReverseSwap;
use crate::model::SubmarineSwap;
use crate::model::SwapRecord;
use arkswap_core::Error;
use arkswap_core::ErrorContext;
use arkswap_provider::model::Asset;
use arkswap_provider::model::CreateChainSwapRequest;
use arkswap_provider::model::CreateReverseSwapRequest;
use arkswap_provider::model::CreateSubmarineSwapRequest;
use arkswap_provider::SwapStatus;
use bitcoin::hashes::sha256;
use bitcoin::hashes::Hash;
use bitcoin::Amount;
use bitcoin::PublicKey;
use lightning_invoice::Bolt11Invoice;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

fn unix_now() -> Result<u64, Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::state(format!("system clock before epoch: {e}")))
        .map(|d| d.as_secs())
}

impl<A, K> Orchestrator<A, K>
where
    A: ArkClient,
    K: KeyProvider,
{
    /// Set up a reverse swap: we will receive `invoice_amount` over
    /// Lightning and claim the VHTLC with a freshly drawn preimage.
    ///
    /// The returned record carries the invoice to hand to the payer; add it
    /// to the engine to have the claim run automatically.
    pub async fn create_reverse_swap(
        &self,
        invoice_amount: Amount,
        description: Option<String>,
        invoice_expiry_secs: Option<u64>,
    ) -> Result<SwapRecord, Error> {
        if invoice_amount == Amount::ZERO {
            return Err(Error::invalid_input("swap amount must be greater than 0"));
        }

        let preimage: [u8; 32] = rand::random();
        let preimage_hash = sha256::Hash::hash(&preimage);

        let keypair = self.keys.next_keypair()?;
        let claim_public_key = PublicKey::new(keypair.public_key());

        let request = CreateReverseSwapRequest {
            from: Asset::Btc,
            to: Asset::Ark,
            invoice_amount: Some(invoice_amount),
            onchain_amount: None,
            claim_public_key,
            preimage_hash,
            description: description.clone(),
            invoice_expiry: invoice_expiry_secs,
        };

        let response = self.provider.create_reverse_swap(&request).await?;

        // The address the counterparty claims to have locked to must be the
        // one our parameters produce, before we share the invoice with
        // anyone.
        let vhtlc = self.build_vhtlc(
            preimage_hash,
            &response.refund_public_key.inner.serialize(),
            &keypair.x_only_public_key().0.serialize(),
            &response.timeout_block_heights,
        )?;
        vhtlc.verify_lockup_address(&response.lockup_address)?;

        let onchain_amount = response.onchain_amount.ok_or_else(|| {
            Error::protocol("reverse swap response is missing the onchain amount")
        })?;

        let record = SwapRecord::Reverse(ReverseSwap {
            id: response.id.clone(),
            status: SwapStatus::Created,
            created_at: unix_now()?,
            preimage: Some(preimage),
            preimage_hash,
            claim_public_key,
            refund_public_key: response.refund_public_key,
            invoice: response.invoice,
            onchain_amount,
            lockup_address: response.lockup_address,
            timeout_block_heights: response.timeout_block_heights,
            description,
        });

        tracing::info!(
            swap_id = response.id,
            amount = %invoice_amount,
            "Created reverse swap"
        );

        Ok(record)
    }

    /// Set up a submarine swap paying `invoice`: the returned record names
    /// the VHTLC address and amount to fund.
    pub async fn create_submarine_swap(
        &self,
        invoice: Bolt11Invoice,
    ) -> Result<SwapRecord, Error> {
        let keypair = self.keys.next_keypair()?;
        let refund_public_key = PublicKey::new(keypair.public_key());

        let preimage_hash = sha256::Hash::from_byte_array(
            invoice.payment_hash().to_byte_array(),
        );

        let request = CreateSubmarineSwapRequest {
            from: Asset::Ark,
            to: Asset::Btc,
            invoice: invoice.clone(),
            refund_public_key,
        };

        let response = self.provider.create_submarine_swap(&request).await?;

        let vhtlc = self.build_vhtlc(
            preimage_hash,
            &keypair.x_only_public_key().0.serialize(),
            &response.claim_public_key.inner.serialize(),
            &response.timeout_block_heights,
        )?;
        vhtlc
            .verify_lockup_address(&response.address)
            .context("refusing to fund an address we cannot refund from")?;

        let record = SwapRecord::Submarine(SubmarineSwap {
            id: response.id.clone(),
            status: SwapStatus::Created,
            created_at: unix_now()?,
            invoice,
            preimage_hash,
            refund_public_key,
            claim_public_key: response.claim_public_key,
            expected_amount: response.expected_amount,
            accept_zero_conf: response.accept_zero_conf,
            lockup_address: response.address,
            timeout_block_heights: response.timeout_block_heights,
        });

        tracing::info!(
            swap_id = response.id,
            amount = %response.expected_amount,
            "Created submarine swap"
        );

        Ok(record)
    }

    /// Set up a chain swap between Ark and on-chain BTC.
    ///
    /// `to_address` receives the claimed funds: a Bitcoin address for
    /// ARK→BTC, an Ark address for BTC→ARK.
    pub async fn create_chain_swap(
        &self,
        direction: ChainDirection,
        user_lock_amount: Amount,
        to_address: String,
        fee_sats_per_vbyte: u64,
    ) -> Result<SwapRecord, Error> {
        if user_lock_amount == Amount::ZERO {
            return Err(Error::invalid_input("swap amount must be greater than 0"));
        }
        if to_address.is_empty() {
            return Err(Error::invalid_input("destination address must be set"));
        }

        let preimage: [u8; 32] = rand::random();
        let preimage_hash = sha256::Hash::hash(&preimage);

        let claim_keypair = self.keys.next_keypair()?;
        let refund_keypair = self.keys.next_keypair()?;

        let (from, to) = match direction {
            ChainDirection::ArkToBtc => (Asset::Ark, Asset::Btc),
            ChainDirection::BtcToArk => (Asset::Btc, Asset::Ark),
        };

        let request = CreateChainSwapRequest {
            from,
            to,
            preimage_hash,
            claim_public_key: PublicKey::new(claim_keypair.public_key()),
            refund_public_key: PublicKey::new(refund_keypair.public_key()),
            user_lock_amount: Some(user_lock_amount),
            server_lock_amount: None,
        };

        let response = self.provider.create_chain_swap(&request).await?;

        // Whichever side is on Ark must decode and rebuild to our
        // parameters.
        let ark_details = match direction {
            ChainDirection::ArkToBtc => &response.lockup_details,
            ChainDirection::BtcToArk => &response.claim_details,
        };

        if let (Some(timeouts), Some(server_public_key)) = (
            ark_details.timeout_block_heights,
            ark_details.server_public_key,
        ) {
            let (sender, receiver) = match direction {
                ChainDirection::ArkToBtc => (
                    refund_keypair.x_only_public_key().0,
                    server_public_key.inner.x_only_public_key().0,
                ),
                ChainDirection::BtcToArk => (
                    server_public_key.inner.x_only_public_key().0,
                    claim_keypair.x_only_public_key().0,
                ),
            };

            let vhtlc =
                self.build_vhtlc(preimage_hash, &sender.serialize(), &receiver.serialize(), &timeouts)?;

            let expected = arkswap_core::ArkAddress::decode(&ark_details.lockup_address)
                .map_err(|e| Error::protocol(format!("invalid Ark lockup address: {e}")))?;
            vhtlc.verify_lockup_address(&expected)?;
        } else {
            return Err(Error::protocol(
                "chain swap response is missing the Ark side parameters",
            ));
        }

        let record = SwapRecord::Chain(ChainSwap {
            id: response.id.clone(),
            status: SwapStatus::Created,
            created_at: unix_now()?,
            direction,
            preimage: Some(preimage),
            preimage_hash,
            claim_public_key: PublicKey::new(claim_keypair.public_key()),
            refund_public_key: PublicKey::new(refund_keypair.public_key()),
            to_address,
            amount: user_lock_amount,
            fee_sats_per_vbyte,
            lockup_details: response.lockup_details,
            claim_details: response.claim_details,
            btc_tx_hex: None,
        });

        tracing::info!(
            swap_id = response.id,
            amount = %user_lock_amount,
            ?direction,
            "Created chain swap"
        );

        Ok(record)
    }
}
