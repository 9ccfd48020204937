use alloy::primitives::B256;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use chrono::DateTime;
use reality_fetch::config::{ChainRegistry, Config};
use reality_fetch::fetch::{FetchQuestionParams, Fetcher};
use reality_fetch::onchain::OnChainFetcher;
use reality_fetch::subgraph::SubgraphFetcher;
use reality_fetch::watch::QuestionWatcher;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = if Path::new("reality.toml").exists() {
        Config::load(Path::new("reality.toml"))?
    } else {
        info!("no reality.toml found, using env-only config");
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("reality-fetch v{} starting", env!("CARGO_PKG_VERSION"));

    let registry = ChainRegistry::from_config(&config)?;

    // Connect over WebSocket so block subscriptions work.
    let ws = WsConnect::new(&config.node.ws_url);
    let provider = ProviderBuilder::new().connect_ws(ws).await?;
    let chain_id = provider.get_chain_id().await?;
    let settings = registry.require(chain_id)?;

    info!(
        chain_id = chain_id,
        reality = %settings.reality_address,
        subgraph = ?settings.subgraph_url,
        prefer_decentralization = config.fetch.prefer_decentralization,
        "chain resolved"
    );

    let onchain = OnChainFetcher::new(provider.clone(), settings.reality_address);
    let subgraph = settings.subgraph_url.as_deref().map(SubgraphFetcher::new);
    let fetcher = Arc::new(Fetcher::new(
        chain_id,
        config.fetch.prefer_decentralization,
        onchain,
        subgraph,
    ));

    let question_id = match &config.fetch.question_id {
        Some(raw) => Some(B256::from_str(raw)?),
        None => None,
    };
    let params = FetchQuestionParams {
        question_id,
        question: config.fetch.question.clone(),
        template_id: config.fetch.template_id,
    };

    // One-shot fetch before watching.
    match fetcher.fetch_question(&params).await? {
        Some(question) => {
            let finalizes = DateTime::from_timestamp(i64::from(question.finalization_timestamp), 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            info!(
                question_id = %question.id,
                best_answer = %question.best_answer,
                bond = %question.bond,
                finalizes_at = %finalizes,
                pending_arbitration = question.pending_arbitration,
                "question state"
            );

            let history = fetcher.fetch_answers_history(Some(question.id)).await?;
            info!(answers = history.len(), "answer history loaded");
        }
        None => {
            warn!("question not found (or question id/text missing in config)");
            return Ok(());
        }
    }

    // Re-fetch on every new block until interrupted.
    let watcher = QuestionWatcher::new(provider, fetcher, params);
    let (mut updates, handle) = watcher.start();

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Some(update) => info!(
                        block = update.block_number,
                        best_answer = %update.question.best_answer,
                        bond = %update.question.bond,
                        "question updated"
                    ),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    drop(updates);
    handle.abort();
    Ok(())
}
