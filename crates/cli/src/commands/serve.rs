use std::sync::Arc;

use quorum_core::config::LoadOptions;
use quorum_core::scheduler::spawn_timeout_sweeper;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::runtime::{approval_service, open_pool, prepare};
use crate::commands::{CommandError, CommandResult};

/// Runs the timeout sweeper in the foreground until Ctrl-C.
pub fn run(options: &LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("serve"),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = async {
            let service = Arc::new(approval_service(&config, &pool));
            let restored = service.restore_timers().await?;

            let cancel = CancellationToken::new();
            let sweeper =
                spawn_timeout_sweeper(service, config.engine.sweep_interval(), cancel.clone());
            info!(
                event_name = "system.serve.started",
                restored_executions = restored,
                sweep_interval_secs = config.engine.sweep_interval_secs,
                "quorum sweeper running"
            );

            let signal = tokio::signal::ctrl_c().await;
            info!(event_name = "system.serve.stopping", "quorum sweeper stopping");
            cancel.cancel();
            sweeper
                .await
                .map_err(|error| CommandError::new("internal", error.to_string(), 9))?;
            signal.map_err(|error| CommandError::new("signal", error.to_string(), 9))?;
            Ok::<_, CommandError>(restored)
        }
        .await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(restored) => CommandResult::success(
            "serve",
            format!("sweeper stopped after tracking {restored} pending execution(s)"),
        ),
        Err(error) => error.into_result("serve"),
    }
}
