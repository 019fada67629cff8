use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bitcoin::Network;
use clap::{Parser as _, Subcommand};
use flyover_swap::amount::Wei;
use flyover_swap::clock::SystemClock;
use flyover_swap::config::EngineConfig;
use flyover_swap::provider::{HttpLiquidityProvider, LiquidityProviderApi, find_provider};
use flyover_swap::quote::{
    QuoteHash, QuoteRequestBuilder, QuoteValidator, ValidatedQuote, fetch_quotes,
};
use flyover_swap::signer::{QuoteSigner as _, Secp256k1Signer, sign_quote};
use flyover_swap::swap::{AcceptanceEngine, AcceptedQuote, SqliteQuoteStore};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    lp_url: String,

    #[arg(long, default_value = "flyover.sqlite3")]
    store_path: PathBuf,

    /// JSON engine configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured bitcoin network.
    #[arg(long)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Providers,
    PeginQuote {
        #[arg(long)]
        provider_id: u64,

        /// RSK address receiving the value (EOA or contract).
        #[arg(long)]
        destination: String,

        #[arg(long)]
        value_wei: Wei,

        #[arg(long)]
        rsk_refund_address: String,

        /// Hex call data forwarded to the destination contract.
        #[arg(long)]
        data: Option<String>,
    },
    PegoutQuote {
        #[arg(long)]
        provider_id: u64,

        /// Bitcoin address receiving the value.
        #[arg(long)]
        to: String,

        #[arg(long)]
        value_wei: Wei,

        #[arg(long)]
        rsk_refund_address: String,
    },
    Accept {
        #[arg(long)]
        quote_hash: String,

        /// Accept with a client signature produced by this key.
        #[arg(long)]
        private_key_hex: Option<String>,
    },
    Sign {
        #[arg(long)]
        quote_hash: String,

        #[arg(long)]
        private_key_hex: String,
    },
    Show {
        #[arg(long)]
        quote_hash: String,
    },
    ListAccepted,
    Status {
        #[arg(long)]
        quote_hash: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    flyover_swap::logging::init().ok();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(network) = args.network {
        config.network = network;
    }

    let out = match args.command {
        Command::Providers => {
            let lp = http_provider(&args.lp_url, &config)?;
            let providers = lp.providers().await.context("GET /providers")?;
            serde_json::to_value(providers).context("encode providers")?
        }
        Command::PeginQuote {
            provider_id,
            destination,
            value_wei,
            rsk_refund_address,
            data,
        } => {
            let request = QuoteRequestBuilder::new(config.network).pegin(
                &destination,
                value_wei,
                &rsk_refund_address,
                data.as_deref(),
            )?;
            request_quotes(&args.lp_url, &args.store_path, &config, provider_id, request).await?
        }
        Command::PegoutQuote {
            provider_id,
            to,
            value_wei,
            rsk_refund_address,
        } => {
            let request = QuoteRequestBuilder::new(config.network).pegout(
                &to,
                value_wei,
                &rsk_refund_address,
            )?;
            request_quotes(&args.lp_url, &args.store_path, &config, provider_id, request).await?
        }
        Command::Accept {
            quote_hash,
            private_key_hex,
        } => {
            let hash = parse_hash(&quote_hash)?;
            let store = Arc::new(SqliteQuoteStore::open(args.store_path.clone())?);
            let quote = store
                .get_quote(&hash)?
                .with_context(|| format!("quote not found: {hash}"))?;

            let lp = Arc::new(http_provider(&args.lp_url, &config)?);
            let providers = lp.providers().await.context("GET /providers")?;
            let provider = find_provider(&providers, quote.provider_id())?.clone();

            let mut engine = AcceptanceEngine::new(
                provider,
                lp,
                store.clone(),
                Arc::new(SystemClock),
                config.acceptance(),
            );
            let accepted = match private_key_hex {
                Some(key) => {
                    engine = engine.with_signer(Arc::new(Secp256k1Signer::from_hex(&key)?));
                    engine.accept_authenticated(&quote).await?
                }
                None => engine.accept(&quote).await?,
            };
            accepted_json(&accepted)
        }
        Command::Sign {
            quote_hash,
            private_key_hex,
        } => {
            let hash = parse_hash(&quote_hash)?;
            let signer = Secp256k1Signer::from_hex(&private_key_hex)?;
            let signature = sign_quote(&signer, &hash)?;
            json!({
              "quote_hash": hash.to_string(),
              "signer": signer.address().to_string(),
              "signature": signature.to_string(),
            })
        }
        Command::Show { quote_hash } => {
            let hash = parse_hash(&quote_hash)?;
            let store = SqliteQuoteStore::open(args.store_path.clone())?;
            match store.get_accepted(&hash)? {
                Some(accepted) => accepted_json(&accepted),
                None => {
                    let quote = store
                        .get_quote(&hash)?
                        .with_context(|| format!("quote not found: {hash}"))?;
                    quote_json(&quote)
                }
            }
        }
        Command::ListAccepted => {
            let store = SqliteQuoteStore::open(args.store_path.clone())?;
            let accepted = store.list_accepted()?;
            json!(accepted.iter().map(accepted_json).collect::<Vec<_>>())
        }
        Command::Status { quote_hash } => {
            let hash = parse_hash(&quote_hash)?;
            let store = SqliteQuoteStore::open(args.store_path.clone())?;
            let quote = store
                .get_quote(&hash)?
                .with_context(|| format!("quote not found: {hash}"))?;
            let lp = http_provider(&args.lp_url, &config)?;
            let status = lp
                .quote_status(quote.direction(), &hash)
                .await
                .with_context(|| format!("GET /{}/status", quote.direction()))?;
            json!({
              "quote_hash": hash.to_string(),
              "direction": quote.direction(),
              "status": status,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn http_provider(lp_url: &str, config: &EngineConfig) -> Result<HttpLiquidityProvider> {
    HttpLiquidityProvider::new(lp_url, config.provider_timeout()).context("build provider client")
}

fn parse_hash(value: &str) -> Result<QuoteHash> {
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid quote hash {value:?}: {e}"))
}

async fn request_quotes(
    lp_url: &str,
    store_path: &std::path::Path,
    config: &EngineConfig,
    provider_id: u64,
    request: flyover_swap::quote::QuoteRequest,
) -> Result<serde_json::Value> {
    let lp = http_provider(lp_url, config)?;
    let providers = lp.providers().await.context("GET /providers")?;
    let provider = find_provider(&providers, provider_id)?;
    let validator = QuoteValidator::new(config.network, provider)?;
    let quotes = fetch_quotes(&lp, &validator, &request).await?;

    let store = SqliteQuoteStore::open(store_path.to_path_buf())?;
    for quote in &quotes {
        store.insert_quote(quote)?;
    }
    Ok(json!(quotes.iter().map(quote_json).collect::<Vec<_>>()))
}

fn quote_json(quote: &ValidatedQuote) -> serde_json::Value {
    json!({
      "quote_hash": quote.hash().to_string(),
      "provider_id": quote.provider_id(),
      "direction": quote.direction(),
      "total_wei": quote.quote().total().map(|t| t.to_string()),
      "quote": quote.quote(),
    })
}

fn accepted_json(accepted: &AcceptedQuote) -> serde_json::Value {
    json!({
      "quote_hash": accepted.hash().to_string(),
      "provider_id": accepted.quote().provider_id(),
      "direction": accepted.direction(),
      "deposit_address": accepted.deposit_address(),
      "signature": accepted.signature().to_string(),
      "client_signature": accepted.client_signature().map(ToString::to_string),
      "quote": accepted.quote().quote(),
    })
}
