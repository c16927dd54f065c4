use quorum_core::config::LoadOptions;
use quorum_core::domain::chain::ChainId;

use crate::commands::runtime::{approval_service, open_pool, prepare};
use crate::commands::{CommandError, CommandResult};

pub fn run(options: &LoadOptions, chain_id: &str) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("stats"),
    };
    let chain_id = ChainId(chain_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let stats = approval_service(&config, &pool).chain_stats(&chain_id).await;
        pool.close().await;
        Ok::<_, CommandError>(stats?)
    });

    match result {
        Ok(stats) => CommandResult::success_with_data(
            "stats",
            format!("chain `{}` completed {} execution(s)", chain_id.0, stats.usage_count),
            &stats,
        ),
        Err(error) => error.into_result("stats"),
    }
}
