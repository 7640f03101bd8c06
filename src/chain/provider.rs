//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    domain_id: u8,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: &ChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for domain {}: {}", config.domain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                domain_id: config.domain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            domain_id: config.domain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Domain {} failover to provider {}", self.domain_id, next);
    }

    /// Run a read-only request against each provider in turn until one answers
    async fn with_failover<T, F, Fut>(&self, operation: &str, request: F) -> RelayerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        for _ in 0..self.http_providers.len() {
            match request(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to {} on domain {}: {}", operation, self.domain_id, e);
                    self.failover();
                }
            }
        }

        Err(RelayerError::ChainConnection {
            domain_id: self.domain_id,
            message: format!("All providers failed to {}", operation),
        })
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        self.with_failover("get block number", |p| async move {
            p.get_block_number().await
        })
        .await
        .map(|b| b.as_u64())
    }

    /// Get logs for a filter
    pub async fn get_logs(&self, filter: &Filter) -> RelayerResult<Vec<Log>> {
        self.with_failover("get logs", |p| async move { p.get_logs(filter).await })
            .await
    }

    pub async fn get_chain_id(&self) -> RelayerResult<u64> {
        self.with_failover("get chain id", |p| async move { p.get_chainid().await })
            .await
            .map(|id| id.as_u64())
    }

    /// Transaction count including pending transactions
    pub async fn get_pending_nonce(&self, address: Address) -> RelayerResult<U256> {
        self.with_failover("get pending nonce", |p| async move {
            p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
        })
        .await
    }

    /// Read-only contract call against the latest block
    pub async fn call(&self, tx: &TypedTransaction) -> RelayerResult<Bytes> {
        self.with_failover("call contract", |p| async move { p.call(tx, None).await })
            .await
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> RelayerResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| RelayerError::GasEstimation(e.to_string()))
    }

    /// Broadcast a signed transaction once, without failover
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ProviderError> {
        let pending = self.http().send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> RelayerResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| RelayerError::ChainConnection {
                domain_id: self.domain_id,
                message: e.to_string(),
            })
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for domain {}: {}", self.domain_id, e);
                false
            }
        }
    }

    pub fn domain_id(&self) -> u8 {
        self.domain_id
    }
}
