use quorum_core::config::LoadOptions;
use quorum_db::{ChainSeedInfo, DemoChainDataset, SeedCheck};

use crate::commands::runtime::{open_pool, prepare};
use crate::commands::{CommandError, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let (config, runtime) = match prepare(options) {
        Ok(prepared) => prepared,
        Err(error) => return error.into_result("seed"),
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;

        let seed_result = DemoChainDataset::load(&pool)
            .await
            .map_err(|error| CommandError::new("seed_execution", error.to_string(), 5))?;
        let verification = DemoChainDataset::verify(&pool)
            .await
            .map_err(|error| CommandError::new("seed_verification", error.to_string(), 6))?;

        let run_result = if verification.all_present {
            Ok(seed_result.chains_seeded)
        } else {
            let message = verification_message(&verification.checks);
            Err(CommandError::new("seed_verification", message, 6))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(chains) => CommandResult::success("seed", seed_message(&chains)),
        Err(error) => error.into_result("seed"),
    }
}

fn seed_message(chains: &[ChainSeedInfo]) -> String {
    let lines: Vec<String> = chains
        .iter()
        .map(|chain| {
            format!(
                "  - {}: {} ({}, {})",
                chain.approval_type, chain.chain_id.0, chain.code, chain.mode
            )
        })
        .collect();
    format!("demo approval chains loaded:\n{}", lines.join("\n"))
}

fn verification_message(checks: &[SeedCheck]) -> String {
    let failed: Vec<String> = checks
        .iter()
        .filter(|check| !check.passed)
        .map(|check| format!("{}:{}", check.chain_id.0, check.label))
        .collect();
    if failed.is_empty() {
        "some demo chains failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}
