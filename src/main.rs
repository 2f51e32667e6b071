//! Binary entry point: parse flags, wire up the engines, run the server.

use clap::Parser;
use lgtm_bot::config::{Args, BotConfig};
use lgtm_bot::db::{self, ApprovalStore};
use lgtm_bot::services::approval_gate::ApprovalGate;
use lgtm_bot::services::auto_tag::AutoTagEngine;
use lgtm_bot::services::dispatcher;
use lgtm_bot::services::gitlab_client::{GitLabApi, GitLabClient, GitLabClientConfig};
use lgtm_bot::services::mr_cache::MrCache;
use lgtm_bot::services::webhook::{self, AppState};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(BotConfig::from_args(&args)?);

    let pool = db::initialize(Path::new(&args.db_path)).await?;
    let store = Arc::new(ApprovalStore::new(pool));

    let client = Arc::new(GitLabClient::new(GitLabClientConfig {
        base_url: args.gitlab_url.clone(),
        token: args.token.clone(),
        timeout_secs: args.request_timeout_secs,
    })?);

    // Fail fast on bad credentials; everything after this point only logs.
    let user = client.validate_token().await?;
    info!(
        username = %user.username,
        gitlab = %args.gitlab_url,
        "authenticated"
    );

    let cache = Arc::new(MrCache::new(config.snapshot_ttl));
    let api: Arc<dyn GitLabApi> = client.clone();

    let gate = Arc::new(ApprovalGate::new(
        api.clone(),
        store,
        cache,
        config.clone(),
    ));
    let tagger = Arc::new(AutoTagEngine::new(api, config.clone()));

    let dispatch = dispatcher::start(gate, tagger, args.workers, args.queue_capacity);

    let state = AppState {
        dispatch,
        client,
        config,
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    webhook::serve(args.port, state, shutdown).await?;

    Ok(())
}
