use std::path::Path;

use chrono::Utc;
use quorum_core::config::LoadOptions;
use quorum_core::domain::chain::{ApprovalChain, ChainId, TenantId};
use quorum_core::validation::validate_configuration;
use quorum_db::{ChainRepository, DbPool, SqlChainRepository};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commands::runtime::{approval_service, open_pool, prepare, read_json};
use crate::commands::{CommandError, CommandResult};

/// Accepted shapes for `quorum import`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChainFile {
    Dataset { chains: Vec<ApprovalChain> },
    Many(Vec<ApprovalChain>),
    One(Box<ApprovalChain>),
}

impl ChainFile {
    fn into_chains(self) -> Vec<ApprovalChain> {
        match self {
            Self::Dataset { chains } | Self::Many(chains) => chains,
            Self::One(chain) => vec![*chain],
        }
    }
}

#[derive(Debug, Serialize)]
struct ChainSummary {
    chain_id: String,
    code: String,
    approval_type: &'static str,
    mode: &'static str,
    status: &'static str,
    steps: usize,
}

impl From<&ApprovalChain> for ChainSummary {
    fn from(chain: &ApprovalChain) -> Self {
        Self {
            chain_id: chain.id.0.clone(),
            code: chain.code.clone(),
            approval_type: chain.approval_type.as_str(),
            mode: chain.mode.as_str(),
            status: chain.status.as_str(),
            steps: chain.steps.len(),
        }
    }
}

pub fn run_import(options: &LoadOptions, file: &Path) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("import"),
    };
    let chains = match read_json::<ChainFile>(file) {
        Ok(parsed) => parsed.into_chains(),
        Err(error) => return CommandError::input(error).into_result("import"),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = import_chains(&pool, chains).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(imported) => CommandResult::success_with_data(
            "import",
            format!("imported {} approval chain(s)", imported.len()),
            &imported,
        ),
        Err(error) => error.into_result("import"),
    }
}

async fn import_chains(
    pool: &DbPool,
    chains: Vec<ApprovalChain>,
) -> Result<Vec<ChainSummary>, CommandError> {
    let repo = SqlChainRepository::new(pool.clone());
    let mut imported = Vec::with_capacity(chains.len());

    for chain in chains {
        if chain.is_active() {
            let report = validate_configuration(&chain);
            if !report.is_valid {
                let message = format!(
                    "chain `{}` is active but invalid: {}",
                    chain.id.0,
                    report.errors.join("; ")
                );
                return Err(CommandError::new("invalid_chain", message, 7));
            }
        }
        let existing = repo.find_by_code(&chain.tenant_id, &chain.code).await.map_err(store)?;
        if let Some(existing) = existing.filter(|existing| existing.id != chain.id) {
            return Err(CommandError::new(
                "conflict",
                format!(
                    "code `{}` is already used by chain `{}` in tenant `{}`",
                    chain.code, existing.id.0, chain.tenant_id.0
                ),
                7,
            ));
        }

        let summary = ChainSummary::from(&chain);
        repo.save(chain).await.map_err(store)?;
        info!(
            event_name = "cli.chain.imported",
            chain_id = %summary.chain_id,
            status = summary.status,
            "approval chain imported"
        );
        imported.push(summary);
    }

    Ok(imported)
}

pub fn run_list(options: &LoadOptions, tenant: Option<&str>) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("chains"),
    };
    let tenant = TenantId(tenant.unwrap_or(&config.engine.default_tenant).to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let repo = SqlChainRepository::new(pool.clone());
        let listed = repo.list_for_tenant(&tenant).await.map_err(store);
        pool.close().await;
        listed
    });

    match result {
        Ok(chains) => {
            let summaries: Vec<ChainSummary> = chains.iter().map(ChainSummary::from).collect();
            CommandResult::success_with_data(
                "chains",
                format!("{} approval chain(s) for tenant `{}`", summaries.len(), tenant.0),
                &summaries,
            )
        }
        Err(error) => error.into_result("chains"),
    }
}

pub fn run_validate(options: &LoadOptions, chain_id: &str) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("validate"),
    };
    let chain_id = ChainId(chain_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let report = approval_service(&config, &pool).validate_configuration(&chain_id).await;
        pool.close().await;
        Ok::<_, CommandError>(report?)
    });

    match result {
        Ok(report) if report.is_valid => CommandResult::success_with_data(
            "validate",
            format!("chain `{}` is valid ({} warning(s))", chain_id.0, report.warnings.len()),
            &report,
        ),
        Ok(report) => CommandResult::failure(
            "validate",
            "invalid_chain",
            format!("chain `{}` is invalid: {}", chain_id.0, report.errors.join("; ")),
            7,
        ),
        Err(error) => error.into_result("validate"),
    }
}

pub fn run_activate(options: &LoadOptions, chain_id: &str) -> CommandResult {
    set_status(options, "activate", chain_id, true)
}

pub fn run_deactivate(options: &LoadOptions, chain_id: &str) -> CommandResult {
    set_status(options, "deactivate", chain_id, false)
}

fn set_status(
    options: &LoadOptions,
    command: &str,
    chain_id: &str,
    active: bool,
) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result(command),
    };
    let chain_id = ChainId(chain_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let outcome = update_status(&pool, &chain_id, active).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(chain) => CommandResult::success_with_data(
            command,
            format!("chain `{}` is now {}", chain.id.0, chain.status.as_str()),
            &ChainSummary::from(&chain),
        ),
        Err(error) => error.into_result(command),
    }
}

async fn update_status(
    pool: &DbPool,
    chain_id: &ChainId,
    active: bool,
) -> Result<ApprovalChain, CommandError> {
    let repo = SqlChainRepository::new(pool.clone());
    let mut chain = repo.find_by_id(chain_id).await.map_err(store)?.ok_or_else(|| {
        CommandError::new("not_found", format!("chain not found: `{}`", chain_id.0), 8)
    })?;

    let now = Utc::now();
    if active {
        chain
            .activate(now)
            .map_err(|error| CommandError::new("invalid_chain", error.to_string(), 7))?;
    } else {
        chain.deactivate(now);
    }
    repo.save(chain.clone()).await.map_err(store)?;
    Ok(chain)
}

fn store(error: quorum_db::RepositoryError) -> CommandError {
    CommandError::new("persistence", error.to_string(), 4)
}
