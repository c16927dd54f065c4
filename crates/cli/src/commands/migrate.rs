use quorum_core::config::LoadOptions;

use crate::commands::runtime::{open_pool, prepare};
use crate::commands::{CommandError, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("migrate"),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        pool.close().await;
        Ok::<(), CommandError>(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(error) => error.into_result("migrate"),
    }
}
