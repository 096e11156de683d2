use std::sync::Arc;

use anyhow::{Context, bail};
use judge_runtime::{
    EventStream, JudgeConfig, JudgeService, ProblemCatalog, ProcessRunner, namespaces_available,
};
use openjudge_server::{
    api::{AppState, create_router},
    auth::{PasswordHasher, TokenService},
    db::init_pool_and_migrate,
    repository::{SeaOrmSubmissionRepository, SeaOrmUserRepository},
    settings::Settings,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    info!("starting openjudge server");
    let settings = Settings::from_env().context("failed to read server settings")?;

    let config = match &settings.judge_config {
        Some(path) => {
            info!(path = %path.display(), "loading judge config");
            JudgeConfig::from_file(path)
                .with_context(|| format!("failed to load judge config from {}", path.display()))?
        }
        None => {
            warn!("no judge config found, using built-in defaults");
            JudgeConfig::default()
        }
    };

    if config.sandbox.uses_namespaces() {
        if !namespaces_available() {
            bail!(
                "sandbox isolation needs unprivileged user namespaces; enable them on this host \
                 or set sandbox.deny_network and sandbox.isolate_filesystem to false"
            );
        }
        info!(
            deny_network = config.sandbox.deny_network,
            isolate_filesystem = config.sandbox.isolate_filesystem,
            "sandbox namespaces available"
        );
    } else {
        warn!("sandbox isolation disabled, submissions can reach the host filesystem and network");
    }

    info!(path = %settings.problems.display(), "loading problem catalog");
    let catalog = ProblemCatalog::from_file(&settings.problems).with_context(|| {
        format!(
            "failed to load problem catalog from {}",
            settings.problems.display()
        )
    })?;
    if catalog.is_empty() {
        warn!("problem catalog is empty");
    }

    let db = init_pool_and_migrate(&settings.database_url).await?;
    info!("database ready");

    let runner = Arc::new(ProcessRunner::new(config.sandbox.clone()));
    let judge = Arc::new(
        JudgeService::new(
            config,
            catalog,
            Arc::new(SeaOrmSubmissionRepository::new(db.clone())),
            runner,
        )
        .context("failed to initialize judge service")?,
    );

    let events = tokio::spawn(log_events(judge.subscribe_events()));
    let recovered = judge.start().await.context("failed to start judge service")?;
    info!(
        requeued = recovered.requeued,
        failed = recovered.failed,
        "judge service started"
    );

    let state = Arc::new(AppState::new(
        judge.clone(),
        Arc::new(SeaOrmUserRepository::new(db)),
        TokenService::new(&settings.secret_key),
        PasswordHasher::new(settings.bcrypt_cost),
    ));
    let app = create_router(state, &settings.cors_origins);

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!(addr = %settings.bind, "server is ready, press Ctrl+C to shut down");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("draining judge workers");
    judge.shutdown().await;
    events.abort();

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, stopping server");
}

async fn log_events(mut event_stream: EventStream) {
    loop {
        match event_stream.recv().await {
            Ok(event) => info!(?event, "judge event"),
            Err(err) => match err.downcast_ref::<RecvError>() {
                Some(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "judge event log lagging behind");
                }
                _ => break,
            },
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}
