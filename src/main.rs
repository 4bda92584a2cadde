use futures::future::join_all;
use position_indexer::config::{self, IndexerConfig};
use position_indexer::db;
use position_indexer::indexer::{ChainIndexer, ChainIndexerConfig};
use position_indexer::log_source::LogSourceClient;
use position_indexer::metrics;
use position_indexer::telemetry::{self, TelemetryConfig};
use tokio_util::sync::CancellationToken;

/// Exit codes per the external-interfaces contract: 0 graceful, 1
/// unrecoverable config/startup error, 2 persistent source failure.
const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_PERSISTENT_FAILURE: i32 = 2;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    if let Err(e) = telemetry::init_tracing(TelemetryConfig::default()) {
        eprintln!("failed to initialize logging: {e}");
        return EXIT_CONFIG_ERROR;
    }

    if let Err(e) = config::init_global_config() {
        tracing::error!(error = %e, "fatal configuration error at startup");
        return EXIT_CONFIG_ERROR;
    }
    let cfg = config::get_global_config();

    if let Err(e) = metrics::init_metrics() {
        tracing::error!(error = %e, "failed to register metrics");
        return EXIT_CONFIG_ERROR;
    }

    let pool = match db::build_pool(&cfg.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return EXIT_CONFIG_ERROR;
        }
    };
    if let Err(e) = db::bootstrap_schema(&pool).await {
        tracing::error!(error = %e, "failed to bootstrap schema");
        return EXIT_CONFIG_ERROR;
    }

    let shutdown = CancellationToken::new();
    let handles = spawn_chain_workers(cfg, &pool, &shutdown);

    let worker_set = join_all(handles);
    tokio::pin!(worker_set);

    let results = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, stopping chain workers");
            shutdown.cancel();
            worker_set.await
        }
        results = &mut worker_set => results,
    };

    let mut exit_code = EXIT_OK;
    for result in results {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "chain indexer stopped after persistent source failure");
                exit_code = EXIT_PERSISTENT_FAILURE;
            }
            Err(e) => {
                tracing::error!(error = %e, "chain indexer task panicked");
                exit_code = EXIT_PERSISTENT_FAILURE;
            }
        }
    }
    exit_code
}

fn spawn_chain_workers(
    cfg: &'static IndexerConfig,
    pool: &sqlx::PgPool,
    shutdown: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<Result<(), position_indexer::error::IndexerLoopError>>> {
    cfg.configured_chains()
        .map(|&chain| {
            let chain_cfg = cfg
                .chain(chain)
                .expect("configured_chains only yields chains present in the map")
                .clone();
            let client = LogSourceClient::new(cfg.max_retries, cfg.base_backoff);
            let worker_cfg = ChainIndexerConfig {
                poll_interval: cfg.poll_interval,
                safety_lag: cfg.safety_lag,
                window_depth: cfg.window_depth,
                max_range: cfg.max_range,
                chain_cfg,
            };
            let mut worker = ChainIndexer::new(chain, pool.clone(), client, worker_cfg);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect()
}
