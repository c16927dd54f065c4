use quorum_core::config::LoadOptions;

use crate::commands::runtime::{approval_service, open_pool, prepare};
use crate::commands::{CommandError, CommandResult};

/// One timeout sweep over every pending execution in the store.
pub fn run(options: &LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("sweep"),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let swept = approval_service(&config, &pool).sweep().await;
        pool.close().await;
        Ok::<_, CommandError>(swept?)
    });

    match result {
        Ok(applied) => {
            CommandResult::success("sweep", format!("applied {applied} due timeout(s)"))
        }
        Err(error) => error.into_result("sweep"),
    }
}
