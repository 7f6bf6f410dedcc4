use oracle_watcher::config::{Config, EvaluatorBackendKind};
use oracle_watcher::content::ContentFetcher;
use oracle_watcher::evaluator::{EvaluatorBackend, LlmEvaluator, RuleEvaluator};
use oracle_watcher::onchain::{AlloyLedger, Challenger};
use oracle_watcher::registry::RegistryQueryClient;
use oracle_watcher::shutdown::ShutdownController;
use oracle_watcher::store::{PersistenceError, ProcessedSet};
use oracle_watcher::watcher::{Watcher, WatcherSettings};
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("WATCHER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("watcher.toml"));
    let from_file = config_path.exists();
    let config = if from_file {
        Config::load(&config_path)?
    } else {
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

    info!("oracle-watcher v{} starting", env!("CARGO_PKG_VERSION"));
    if !from_file {
        info!(path = %config_path.display(), "no config file found, using env-only config");
    }

    // Missing key, RPC endpoint or registry address stops us here.
    let settings = config.validate()?;

    // --- Processed-hash state ---
    let max = config.watcher.max_processed;
    let processed = match config.state_path() {
        Some(path) => match ProcessedSet::open(path, max) {
            Ok(set) => set,
            Err(e @ PersistenceError::Corrupt { .. }) => {
                warn!(error = %e, "state file unreadable, starting with an empty processed set");
                ProcessedSet::with_path(path, max)
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            info!("persistence disabled, processed hashes are kept in memory only");
            ProcessedSet::in_memory(max)
        }
    };

    // --- Off-chain clients ---
    let registry = RegistryQueryClient::new(
        &config.query.gateway_url,
        &config.query.api_key,
        &config.query.subgraph_id,
        settings.call_timeout,
    )?;
    let fetcher = ContentFetcher::new(
        &config.content.gateway_url,
        config.content.max_document_bytes,
        settings.call_timeout,
    )?;
    let evaluator = match config.evaluator.backend {
        EvaluatorBackendKind::Llm => EvaluatorBackend::Llm(LlmEvaluator::new(
            &config.evaluator.endpoint,
            &config.evaluator.model,
            &config.evaluator.api_key,
            settings.call_timeout,
        )?),
        EvaluatorBackendKind::Rules => EvaluatorBackend::Rules(RuleEvaluator::new()),
    };
    info!(backend = ?config.evaluator.backend, "evaluator ready");

    // --- Chain ---
    let ledger = AlloyLedger::connect(
        &config.chain.rpc_url,
        &config.chain.private_key,
        settings.oracle,
        config.chain.chain_id,
        settings.receipt_timeout,
    )
    .await?;
    info!(
        signer = %ledger.signer_address(),
        oracle = %settings.oracle,
        min_bond_wei = %settings.min_bond,
        challenge_answer = %settings.challenge_answer,
        "challenger ready"
    );
    let challenger = Challenger::new(ledger, settings.min_bond, settings.challenge_answer);

    // --- Run ---
    let shutdown = ShutdownController::new();
    let shutdown_rx = shutdown.subscribe();
    let signals = tokio::spawn(async move { shutdown.wait_for_signal().await });

    let watcher = Watcher::new(
        registry,
        fetcher,
        evaluator,
        challenger,
        processed,
        WatcherSettings::from(&settings),
    );
    let processed = watcher.run(shutdown_rx).await;

    signals.abort();
    info!(tracked = processed.len(), "oracle-watcher stopped");
    Ok(())
}
