use std::path::Path;

use chrono::Utc;
use quorum_core::config::LoadOptions;
use quorum_core::domain::chain::{ApprovalType, TenantId};
use quorum_core::domain::request::RequestContext;
use quorum_core::selector::{rank_chains, ChainScore};
use quorum_core::service::ChainCatalog;
use quorum_db::SqlChainRepository;
use serde::Serialize;

use crate::commands::runtime::{approval_service, open_pool, prepare, read_json};
use crate::commands::{CommandError, CommandResult};

#[derive(Debug, Serialize)]
struct SelectionOutput {
    selected_chain_id: String,
    selected_code: String,
    ranking: Vec<ChainScore>,
}

pub fn run(
    options: &LoadOptions,
    approval_type: &str,
    tenant: Option<&str>,
    context: Option<&Path>,
) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("select"),
    };
    let Some(approval_type) = ApprovalType::parse(approval_type) else {
        return CommandResult::failure(
            "select",
            "invalid_input",
            format!("unknown approval type `{approval_type}`"),
            7,
        );
    };
    let mut context = match context.map(read_json::<RequestContext>).transpose() {
        Ok(context) => context.unwrap_or_default(),
        Err(error) => return CommandError::input(error).into_result("select"),
    };
    context.submitted_at.get_or_insert_with(Utc::now);
    let tenant = TenantId(tenant.unwrap_or(&config.engine.default_tenant).to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = async {
            let service = approval_service(&config, &pool);
            let selected = service.select_chain(&tenant, &approval_type, &context).await?;
            let candidates = SqlChainRepository::new(pool.clone())
                .list_chains(&tenant, &approval_type)
                .await
                .map_err(|error| CommandError::new("persistence", error.to_string(), 4))?;
            Ok::<_, CommandError>(SelectionOutput {
                selected_chain_id: selected.id.0.clone(),
                selected_code: selected.code.clone(),
                ranking: rank_chains(&candidates, &approval_type, &context, &tenant),
            })
        }
        .await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(selection) => CommandResult::success_with_data(
            "select",
            format!(
                "selected chain `{}` out of {} candidate(s)",
                selection.selected_chain_id,
                selection.ranking.len()
            ),
            &selection,
        ),
        Err(error) => error.into_result("select"),
    }
}
