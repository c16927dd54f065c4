use std::path::Path;

use quorum_core::config::LoadOptions;
use quorum_core::domain::chain::ChainId;

use crate::commands::runtime::{approval_service, open_pool, prepare, read_request};
use crate::commands::{CommandError, CommandResult};

/// Dry-runs a request file against one chain without persisting anything.
pub fn run(options: &LoadOptions, chain_id: &str, request: &Path) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("preview"),
    };
    let request = match read_request(request, &config) {
        Ok(request) => request,
        Err(error) => return CommandError::input(error).into_result("preview"),
    };
    let chain_id = ChainId(chain_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let report = approval_service(&config, &pool).test_chain(&chain_id, &request).await;
        pool.close().await;
        Ok::<_, CommandError>(report?)
    });

    match result {
        Ok(report) => {
            let message = match report.status {
                Some(status) => format!(
                    "chain `{}` would start {} with {} participating step(s)",
                    chain_id.0,
                    status.as_str(),
                    report.participating_steps
                ),
                None => format!(
                    "chain `{}` is invalid: {}",
                    chain_id.0,
                    report.validation.errors.join("; ")
                ),
            };
            CommandResult::success_with_data("preview", message, &report)
        }
        Err(error) => error.into_result("preview"),
    }
}
