//! Block checkpoints for restart recovery

mod postgres;

pub use postgres::PgBlockStore;

use crate::error::RelayerResult;

use async_trait::async_trait;

/// Last processed block per domain
#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn last_stored_block(&self, domain_id: u8) -> RelayerResult<Option<u64>>;

    async fn store_block(&self, domain_id: u8, block: u64) -> RelayerResult<()>;

    /// Block a listener should start from; `None` means the chain head.
    ///
    /// `latest` wins over everything. `fresh_start` ignores the stored block.
    /// Otherwise the listener resumes after the stored block, but never before
    /// the configured start block.
    async fn get_start_block(
        &self,
        domain_id: u8,
        configured: Option<u64>,
        latest: bool,
        fresh_start: bool,
    ) -> RelayerResult<Option<u64>> {
        if latest {
            return Ok(None);
        }
        if fresh_start {
            return Ok(configured);
        }

        let resume = self
            .last_stored_block(domain_id)
            .await?
            .map(|block| block.saturating_add(1));

        Ok(match (configured, resume) {
            (Some(configured), Some(resume)) => Some(configured.max(resume)),
            (configured, resume) => configured.or(resume),
        })
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryBlockStore;
