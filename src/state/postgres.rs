//! PostgreSQL block checkpoints

use super::BlockStore;
use crate::config::DatabaseConfig;
use crate::error::RelayerResult;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Block store persisting the last processed block of each domain
pub struct PgBlockStore {
    pool: PgPool,
}

impl PgBlockStore {
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the checkpoint table if missing
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_checkpoints (
                domain_id SMALLINT PRIMARY KEY,
                block_number BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BlockStore for PgBlockStore {
    async fn last_stored_block(&self, domain_id: u8) -> RelayerResult<Option<u64>> {
        let row = sqlx::query("SELECT block_number FROM chain_checkpoints WHERE domain_id = $1")
            .bind(domain_id as i16)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<i64, _>("block_number") as u64))
    }

    async fn store_block(&self, domain_id: u8, block: u64) -> RelayerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_checkpoints (domain_id, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (domain_id)
            DO UPDATE SET block_number = $2, updated_at = NOW()
            "#,
        )
        .bind(domain_id as i16)
        .bind(block as i64)
        .execute(&self.pool)
        .await?;

        debug!("Saved checkpoint for domain {}: block {}", domain_id, block);
        Ok(())
    }
}
