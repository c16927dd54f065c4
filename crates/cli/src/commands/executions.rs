use std::path::Path;

use clap::ValueEnum;
use quorum_core::config::LoadOptions;
use quorum_core::domain::chain::ChainId;
use quorum_core::domain::execution::{ApprovalExecution, ExecutionId, ExecutionTransition};
use quorum_core::engine::StepResponse;

use crate::commands::runtime::{approval_service, open_pool, prepare, read_request};
use crate::commands::{CommandError, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, serde::Serialize)]
struct ExecutionView {
    execution: ApprovalExecution,
    #[serde(skip_serializing_if = "Option::is_none")]
    transitions: Option<Vec<ExecutionTransition>>,
}

/// Starts an execution for a request file, on `chain_id` or on the best-matching chain.
pub fn run_start(options: &LoadOptions, request: &Path, chain_id: Option<&str>) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("start"),
    };
    let request = match read_request(request, &config) {
        Ok(request) => request,
        Err(error) => return CommandError::input(error).into_result("start"),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let service = approval_service(&config, &pool);
        let created = match chain_id {
            Some(chain_id) => {
                let chain_id = ChainId(chain_id.to_string());
                service.create_execution_for_chain(&chain_id, &request).await
            }
            None => service.create_execution(&request).await,
        };
        pool.close().await;
        Ok::<_, CommandError>(created?)
    });

    match result {
        Ok(execution) => CommandResult::success_with_data(
            "start",
            execution_message(&execution),
            &ExecutionView { execution, transitions: None },
        ),
        Err(error) => error.into_result("start"),
    }
}

pub fn run_respond(
    options: &LoadOptions,
    execution_id: &str,
    order: u32,
    approver: &str,
    decision: Decision,
    comments: Option<String>,
) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("respond"),
    };
    let execution_id = ExecutionId(execution_id.to_string());
    let response = StepResponse {
        step_order: order,
        approver_id: approver.to_string(),
        approved: decision == Decision::Approve,
        comments,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let responded = approval_service(&config, &pool).respond(&execution_id, response).await;
        pool.close().await;
        Ok::<_, CommandError>(responded?)
    });

    match result {
        Ok(execution) => CommandResult::success_with_data(
            "respond",
            execution_message(&execution),
            &ExecutionView { execution, transitions: None },
        ),
        Err(error) => error.into_result("respond"),
    }
}

pub fn run_show(options: &LoadOptions, execution_id: &str) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("show"),
    };
    let execution_id = ExecutionId(execution_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = async {
            let service = approval_service(&config, &pool);
            let execution = service.execution(&execution_id).await?;
            let transitions = service.transitions(&execution_id).await?;
            Ok::<_, CommandError>(ExecutionView { execution, transitions: Some(transitions) })
        }
        .await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(view) => {
            CommandResult::success_with_data("show", execution_message(&view.execution), &view)
        }
        Err(error) => error.into_result("show"),
    }
}

fn execution_message(execution: &ApprovalExecution) -> String {
    match execution.current_step_order {
        Some(order) if !execution.status.is_terminal() => format!(
            "execution `{}` is {} at step order {order}",
            execution.id.0,
            execution.status.as_str()
        ),
        _ => format!("execution `{}` is {}", execution.id.0, execution.status.as_str()),
    }
}
