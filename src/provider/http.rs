use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{
    AcceptAuthenticatedQuoteRequest, AcceptQuoteRequest, LiquidityProvider, LiquidityProviderApi,
    LpError, LpErrorBody, QuoteStatusReport, RawAcceptance,
};
use crate::quote::{
    Direction, PeginQuoteRequest, PegoutQuoteRequest, QuoteHash, RawPeginQuoteResponse,
    RawPegoutQuoteResponse,
};
use crate::signer::QuoteSignature;

/// JSON-over-HTTP client for one provider's API.
#[derive(Debug, Clone)]
pub struct HttpLiquidityProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLiquidityProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LpError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, LpError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "provider GET");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, LpError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "provider POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(response).await
    }
}

fn transport_error(err: reqwest::Error) -> LpError {
    if err.is_timeout() {
        LpError::Timeout
    } else {
        LpError::Transport(err.to_string())
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LpError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(transport_error)?;

    if !status.is_success() {
        let body = serde_json::from_slice::<LpErrorBody>(&bytes).unwrap_or_else(|_| LpErrorBody {
            message: String::from_utf8_lossy(&bytes).into_owned(),
            ..LpErrorBody::default()
        });
        return Err(LpError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| LpError::Decode(e.to_string()))
}

#[async_trait]
impl LiquidityProviderApi for HttpLiquidityProvider {
    async fn providers(&self) -> Result<Vec<LiquidityProvider>, LpError> {
        self.get_json("/providers", &[]).await
    }

    async fn pegin_quotes(
        &self,
        request: &PeginQuoteRequest,
    ) -> Result<Vec<RawPeginQuoteResponse>, LpError> {
        self.post_json("/pegin/getQuote", request).await
    }

    async fn pegout_quotes(
        &self,
        request: &PegoutQuoteRequest,
    ) -> Result<Vec<RawPegoutQuoteResponse>, LpError> {
        self.post_json("/pegout/getQuotes", request).await
    }

    async fn accept_quote(
        &self,
        direction: Direction,
        quote_hash: &QuoteHash,
    ) -> Result<RawAcceptance, LpError> {
        let body = AcceptQuoteRequest {
            quote_hash: *quote_hash,
        };
        self.post_json(&format!("/{direction}/acceptQuote"), &body)
            .await
    }

    async fn accept_authenticated_quote(
        &self,
        direction: Direction,
        quote_hash: &QuoteHash,
        signature: &QuoteSignature,
    ) -> Result<RawAcceptance, LpError> {
        let body = AcceptAuthenticatedQuoteRequest {
            quote_hash: *quote_hash,
            signature: signature.clone(),
        };
        self.post_json(&format!("/{direction}/acceptAuthenticatedQuote"), &body)
            .await
    }

    async fn quote_status(
        &self,
        direction: Direction,
        quote_hash: &QuoteHash,
    ) -> Result<QuoteStatusReport, LpError> {
        self.get_json(
            &format!("/{direction}/status"),
            &[("quoteHash", quote_hash.to_string())],
        )
        .await
    }
}
