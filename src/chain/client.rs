//! Chain access for one signing key: nonce ownership, signing, broadcast,
//! and receipt polling.

use super::ChainProvider;
use crate::error::{RelayerResult, TransactError};
use crate::tx::{CallParameters, GasEstimator};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Local nonce counter for one account, unset until first read
#[derive(Debug, Default)]
pub struct NonceState {
    current: Option<U256>,
}

impl NonceState {
    pub fn new(current: Option<U256>) -> Self {
        Self { current }
    }

    /// Next nonce to use, `None` until seeded
    pub fn current(&self) -> Option<U256> {
        self.current
    }

    /// Seed the counter from the chain
    pub fn set(&mut self, nonce: U256) {
        self.current = Some(nonce);
    }

    /// Advance by one, returning the next nonce to use
    pub fn increase(&mut self) -> Result<U256, TransactError> {
        let current = self
            .current
            .ok_or_else(|| TransactError::NonceRead("nonce was never read".into()))?;
        let next = current
            .checked_add(U256::one())
            .ok_or_else(|| TransactError::NonceRead("nonce overflow".into()))?;
        self.current = Some(next);
        Ok(next)
    }
}

/// The single lock guarding a dispatcher's [`NonceState`]
///
/// `&mut NonceState` is only reachable through the guard, so every nonce read
/// and increment happens while the lock is held.
#[derive(Debug, Default)]
pub struct NonceLock(Mutex<NonceState>);

impl NonceLock {
    pub fn new(state: NonceState) -> Self {
        Self(Mutex::new(state))
    }

    /// Wait for exclusive access to the counter
    pub async fn lock(&self) -> MutexGuard<'_, NonceState> {
        self.0.lock().await
    }
}

/// Chain access used by the transactor
#[async_trait]
pub trait ClientDispatcher: Send + Sync {
    /// Signing account
    fn address(&self) -> Address;

    fn nonce_lock(&self) -> &NonceLock;

    /// Current nonce; seeds the counter from the chain on first use
    async fn unsafe_nonce(&self, state: &mut NonceState) -> Result<U256, TransactError>;

    fn unsafe_increase_nonce(&self, state: &mut NonceState) -> Result<U256, TransactError> {
        state.increase()
    }

    async fn sign_and_send_transaction(&self, tx: TypedTransaction) -> Result<H256, TransactError>;

    async fn wait_and_return_tx_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<TransactionReceipt, TransactError>;
}

/// [`ClientDispatcher`] over a [`ChainProvider`] and a local wallet
pub struct EvmClient {
    provider: Arc<ChainProvider>,
    /// Signer bound to the chain id reported by the provider
    wallet: LocalWallet,
    /// Counter for `wallet`'s account; the only nonce source
    nonce: NonceLock,
    /// Upper bound on a receipt wait
    receipt_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl EvmClient {
    /// Query the chain id and bind `wallet` to it
    pub async fn new(
        provider: Arc<ChainProvider>,
        wallet: LocalWallet,
        receipt_timeout: Duration,
        receipt_poll_interval: Duration,
    ) -> RelayerResult<Self> {
        let chain_id = provider.get_chain_id().await?;
        let wallet = wallet.with_chain_id(chain_id);

        info!(
            "Client for domain {} using wallet {:?} on chain id {}",
            provider.domain_id(),
            wallet.address(),
            chain_id
        );

        Ok(Self {
            provider,
            wallet,
            nonce: NonceLock::default(),
            receipt_timeout,
            receipt_poll_interval,
        })
    }
}

#[async_trait]
impl ClientDispatcher for EvmClient {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    fn nonce_lock(&self) -> &NonceLock {
        &self.nonce
    }

    async fn unsafe_nonce(&self, state: &mut NonceState) -> Result<U256, TransactError> {
        if let Some(nonce) = state.current() {
            return Ok(nonce);
        }

        let nonce = self
            .provider
            .get_pending_nonce(self.wallet.address())
            .await
            .map_err(|e| TransactError::NonceRead(e.to_string()))?;
        state.set(nonce);

        debug!(
            "Seeded nonce for domain {}: {}",
            self.provider.domain_id(),
            nonce
        );
        Ok(nonce)
    }

    async fn sign_and_send_transaction(
        &self,
        mut tx: TypedTransaction,
    ) -> Result<H256, TransactError> {
        tx.set_from(self.wallet.address());
        tx.set_chain_id(self.wallet.chain_id());

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| TransactError::Broadcast(format!("signing failed: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        self.provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| TransactError::Broadcast(e.to_string()))
    }

    async fn wait_and_return_tx_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<TransactionReceipt, TransactError> {
        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => warn!("Failed to fetch receipt for {:?}: {}", tx_hash, e),
                }
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        };

        let receipt = tokio::time::timeout(self.receipt_timeout, poll)
            .await
            .map_err(|_| TransactError::ReceiptTimeout {
                tx_hash,
                message: format!("no receipt after {:?}", self.receipt_timeout),
            })?;

        if receipt.status != Some(1u64.into()) {
            return Err(TransactError::Reverted { tx_hash });
        }

        Ok(receipt)
    }
}

#[async_trait]
impl GasEstimator for EvmClient {
    async fn estimate_gas(&self, call: &CallParameters) -> RelayerResult<U256> {
        self.provider.estimate_gas(&call.to_transaction()).await
    }
}
