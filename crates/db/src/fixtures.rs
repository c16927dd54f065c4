use serde::Deserialize;

use quorum_core::domain::chain::{ApprovalChain, ChainId, ChainStatus, TenantId};
use quorum_core::validation::validate_configuration;

use crate::connection::DbPool;
use crate::repositories::{ChainRepository, RepositoryError, SqlChainRepository};

/// Demo chains covering every aggregation mode the engine supports.
pub struct DemoChainDataset;

#[derive(Debug, Deserialize)]
struct DemoChainFile {
    dataset_version: String,
    tenant_id: TenantId,
    chains: Vec<ApprovalChain>,
}

impl DemoChainDataset {
    pub const JSON: &'static str = include_str!("../../../config/fixtures/demo_chains.json");

    pub fn chains() -> Result<Vec<ApprovalChain>, RepositoryError> {
        Ok(Self::parse()?.chains)
    }

    pub fn tenant() -> Result<TenantId, RepositoryError> {
        Ok(Self::parse()?.tenant_id)
    }

    pub fn dataset_version() -> Result<String, RepositoryError> {
        Ok(Self::parse()?.dataset_version)
    }

    fn parse() -> Result<DemoChainFile, RepositoryError> {
        serde_json::from_str(Self::JSON)
            .map_err(|error| RepositoryError::Decode(format!("demo chain fixture: {error}")))
    }

    /// Upserts the demo chains. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let repo = SqlChainRepository::new(pool.clone());
        let mut chains_seeded = Vec::new();

        for chain in Self::chains()? {
            chains_seeded.push(ChainSeedInfo {
                chain_id: chain.id.clone(),
                code: chain.code.clone(),
                mode: chain.mode.as_str(),
                approval_type: chain.approval_type.as_str(),
            });
            repo.save(chain).await?;
        }

        Ok(SeedResult { chains_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let repo = SqlChainRepository::new(pool.clone());
        let mut checks = Vec::new();

        for expected in Self::chains()? {
            let stored = repo.find_by_id(&expected.id).await?;
            let present = stored.is_some();
            let active = stored.as_ref().is_some_and(|chain| chain.status == ChainStatus::Active);
            let valid =
                stored.as_ref().is_some_and(|chain| validate_configuration(chain).is_valid);

            for (label, passed) in [("present", present), ("active", active), ("valid", valid)] {
                checks.push(SeedCheck { chain_id: expected.id.clone(), label, passed });
            }
        }

        let all_present = checks.iter().all(|check| check.passed);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let ids: Vec<String> = Self::chains()?.into_iter().map(|chain| chain.id.0).collect();
        let mut tx = pool.begin().await?;

        for id in &ids {
            sqlx::query("DELETE FROM chain_usage_event WHERE chain_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "DELETE FROM execution_transition WHERE execution_id IN
                    (SELECT id FROM approval_execution WHERE chain_id = ?)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM approval_execution WHERE chain_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM approval_chain WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SeedResult {
    pub chains_seeded: Vec<ChainSeedInfo>,
}

#[derive(Clone, Debug)]
pub struct ChainSeedInfo {
    pub chain_id: ChainId,
    pub code: String,
    pub mode: &'static str,
    pub approval_type: &'static str,
}

#[derive(Clone, Debug)]
pub struct SeedCheck {
    pub chain_id: ChainId,
    pub label: &'static str,
    pub passed: bool,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<SeedCheck>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use quorum_core::domain::chain::AggregationMode;
    use quorum_core::validation::validate_configuration;

    use super::DemoChainDataset;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn fixture_parses_and_every_chain_validates() {
        let chains = DemoChainDataset::chains().expect("fixture parses");
        let tenant = DemoChainDataset::tenant().expect("tenant");

        assert_eq!(chains.len(), 4);
        for chain in &chains {
            assert_eq!(chain.tenant_id, tenant, "chain {} belongs to the demo tenant", chain.id.0);
            let report = validate_configuration(chain);
            assert!(report.is_valid, "chain {} should validate: {:?}", chain.id.0, report.errors);
        }

        let modes: HashSet<AggregationMode> = chains.iter().map(|chain| chain.mode).collect();
        assert!(modes.contains(&AggregationMode::Sequential));
        assert!(modes.contains(&AggregationMode::Parallel));
        assert!(modes.contains(&AggregationMode::Majority));
        assert!(modes.contains(&AggregationMode::FirstResponse));
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = DemoChainDataset::load(&pool).await.expect("first load");
        let second = DemoChainDataset::load(&pool).await.expect("second load");
        assert_eq!(first.chains_seeded.len(), second.chains_seeded.len());

        let verification = DemoChainDataset::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        DemoChainDataset::clean(&pool).await.expect("clean");
        let after_clean = DemoChainDataset::verify(&pool).await.expect("verify after clean");
        assert!(!after_clean.all_present);

        pool.close().await;
    }
}
