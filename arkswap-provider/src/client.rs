//! The typed HTTP client for the swap counterparty.

use crate::model::BroadcastTransactionRequest;
use crate::model::BroadcastTransactionResponse;
use crate::model::ChainClaimDetails;
use crate::model::CreateChainSwapRequest;
use crate::model::CreateChainSwapResponse;
use crate::model::CreateReverseSwapRequest;
use crate::model::CreateReverseSwapResponse;
use crate::model::CreateSubmarineSwapRequest;
use crate::model::CreateSubmarineSwapResponse;
use crate::model::GetChainFeesResponse;
use crate::model::GetChainLimitsResponse;
use crate::model::GetReverseSwapTxIdResponse;
use crate::model::GetSwapStatusResponse;
use crate::model::PartialSignatureDetails;
use crate::model::PostChainClaimRequest;
use crate::model::RefundSubmarineSwapRequest;
use crate::model::RefundSubmarineSwapResponse;
use arkswap_core::Error;
use arkswap_core::ErrorContext;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed client for the counterparty's v2 REST API.
#[derive(Clone)]
pub struct ProviderClient {
    base_url: String,
    client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The URL of the real-time stream, derived from the base URL by scheme
    /// substitution.
    pub fn ws_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };

        format!("{ws_base}/v2/ws")
    }

    pub async fn get_swap_status(&self, swap_id: &str) -> Result<GetSwapStatusResponse, Error> {
        self.get(&format!("/v2/swap/{swap_id}"))
            .await
            .with_context(|| format!("failed to fetch status of swap {swap_id}"))
    }

    pub async fn create_reverse_swap(
        &self,
        request: &CreateReverseSwapRequest,
    ) -> Result<CreateReverseSwapResponse, Error> {
        self.post("/v2/swap/reverse", request)
            .await
            .context("failed to create reverse swap")
    }

    pub async fn create_submarine_swap(
        &self,
        request: &CreateSubmarineSwapRequest,
    ) -> Result<CreateSubmarineSwapResponse, Error> {
        self.post("/v2/swap/submarine", request)
            .await
            .context("failed to create submarine swap")
    }

    pub async fn create_chain_swap(
        &self,
        request: &CreateChainSwapRequest,
    ) -> Result<CreateChainSwapResponse, Error> {
        self.post("/v2/swap/chain", request)
            .await
            .context("failed to create chain swap")
    }

    /// Ask the counterparty to cooperatively sign our submarine refund.
    ///
    /// Takes and returns base64 PSBTs of the refund transaction and its
    /// checkpoint.
    pub async fn refund_submarine_swap(
        &self,
        swap_id: &str,
        refund_psbt: String,
        checkpoint_psbt: String,
    ) -> Result<RefundSubmarineSwapResponse, Error> {
        let response: RefundSubmarineSwapResponse = self
            .post(
                &format!("/v2/swap/submarine/{swap_id}/refund/ark"),
                &RefundSubmarineSwapRequest {
                    transaction: refund_psbt,
                    checkpoint: checkpoint_psbt,
                },
            )
            .await
            .with_context(|| format!("failed to request refund signatures for swap {swap_id}"))?;

        if let Some(error) = response.error.as_deref() {
            return Err(Error::protocol(format!(
                "counterparty rejected refund of swap {swap_id}: {error}"
            )));
        }

        Ok(response)
    }

    pub async fn get_reverse_swap_tx_id(
        &self,
        swap_id: &str,
    ) -> Result<GetReverseSwapTxIdResponse, Error> {
        self.get(&format!("/v2/swap/reverse/{swap_id}/transaction"))
            .await
            .with_context(|| format!("failed to fetch transaction of swap {swap_id}"))
    }

    /// The counterparty's half of the cooperative chain-claim exchange.
    pub async fn get_chain_claim_details(
        &self,
        swap_id: &str,
    ) -> Result<ChainClaimDetails, Error> {
        self.get(&format!("/v2/swap/chain/{swap_id}/claim"))
            .await
            .with_context(|| format!("failed to fetch claim details of swap {swap_id}"))
    }

    /// Complete the cooperative chain-claim exchange: reveal the preimage,
    /// hand over our partial signature on their claim, and receive theirs on
    /// ours.
    pub async fn post_chain_claim(
        &self,
        swap_id: &str,
        request: &PostChainClaimRequest,
    ) -> Result<PartialSignatureDetails, Error> {
        self.post(&format!("/v2/swap/chain/{swap_id}/claim"), request)
            .await
            .with_context(|| format!("failed to exchange claim signatures for swap {swap_id}"))
    }

    pub async fn get_chain_fees(&self, from: &str, to: &str) -> Result<GetChainFeesResponse, Error> {
        self.get(&format!("/v2/swap/chain/fees?from={from}&to={to}"))
            .await
            .context("failed to fetch chain swap fees")
    }

    pub async fn get_chain_limits(
        &self,
        from: &str,
        to: &str,
    ) -> Result<GetChainLimitsResponse, Error> {
        self.get(&format!("/v2/swap/chain/limits?from={from}&to={to}"))
            .await
            .context("failed to fetch chain swap limits")
    }

    /// Broadcast a raw transaction through the counterparty's node.
    pub async fn broadcast_transaction(
        &self,
        currency: &str,
        tx_hex: String,
    ) -> Result<BroadcastTransactionResponse, Error> {
        self.post(
            &format!("/v2/chain/{currency}/transaction"),
            &BroadcastTransactionRequest { hex: tx_hex },
        )
        .await
        .context("failed to broadcast transaction")
    }

    async fn get<T>(&self, path: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("GET {url} failed: {e}")))?;

        Self::parse_response(response).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::network(format!("POST {url} failed: {e}")))?;

        Self::parse_response(response).await
    }

    async fn parse_response<T>(response: reqwest::Response) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());

            return Err(Error::network(format!(
                "counterparty returned {status}: {error_text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::protocol(format!("failed to deserialize response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_substitutes_scheme() {
        let client = ProviderClient::new("https://api.swaps.example.org");
        assert_eq!(client.ws_url(), "wss://api.swaps.example.org/v2/ws");

        let client = ProviderClient::new("http://localhost:9001/");
        assert_eq!(client.ws_url(), "ws://localhost:9001/v2/ws");
    }
}
