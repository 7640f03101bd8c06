//! Nonce-synchronized sign-and-send
//!
//! The nonce lock is held from the nonce read until the transaction is either
//! broadcast (and the counter advanced) or abandoned. A failed broadcast never
//! consumes a nonce. The receipt wait happens after the lock is released, so
//! several votes can be awaiting confirmation at once while nonces are still
//! handed out strictly in lock order.

use super::fabric::TransactionFabric;
use super::pricer::{GasPrice, GasPricer, Priority};
use crate::chain::ClientDispatcher;
use crate::error::TransactError;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Gas limit used when a caller leaves it at zero
pub const DEFAULT_GAS_LIMIT: u64 = 2_000_000;

/// Per-call transaction parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactOptions {
    pub gas_limit: u64,
    pub gas_price: Option<GasPrice>,
    pub value: U256,
    /// The dispatcher's counter is authoritative; a differing value is ignored
    pub nonce: Option<U256>,
    pub chain_id: Option<u64>,
    pub priority: Priority,
}

impl TransactOptions {
    /// Fill every zero or empty field from `defaults`, keeping the rest
    pub fn merge(mut self, defaults: &TransactOptions) -> Self {
        if self.gas_limit == 0 {
            self.gas_limit = defaults.gas_limit;
        }
        if self.gas_price.map_or(true, |p| p.is_zero()) {
            self.gas_price = defaults.gas_price;
        }
        if self.value.is_zero() {
            self.value = defaults.value;
        }
        if self.nonce.is_none() {
            self.nonce = defaults.nonce;
        }
        if self.chain_id.is_none() {
            self.chain_id = defaults.chain_id;
        }
        if self.priority == Priority::default() {
            self.priority = defaults.priority;
        }
        self
    }
}

/// `{ gas_limit: 2_000_000, gas_price: 0, value: 0 }`
pub fn default_transaction_options() -> TransactOptions {
    TransactOptions {
        gas_limit: DEFAULT_GAS_LIMIT,
        gas_price: Some(GasPrice::Legacy(U256::zero())),
        value: U256::zero(),
        ..Default::default()
    }
}

/// Signs and submits a transaction, returning its hash once confirmed
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transactor: Send + Sync {
    async fn transact(
        &self,
        to: Address,
        data: Bytes,
        opts: TransactOptions,
    ) -> Result<H256, TransactError>;
}

pub struct SignAndSendTransactor {
    domain_id: u8,
    fabric: Arc<dyn TransactionFabric>,
    gas_pricer: Arc<dyn GasPricer>,
    client: Arc<dyn ClientDispatcher>,
}

impl SignAndSendTransactor {
    pub fn new(
        domain_id: u8,
        fabric: Arc<dyn TransactionFabric>,
        gas_pricer: Arc<dyn GasPricer>,
        client: Arc<dyn ClientDispatcher>,
    ) -> Self {
        Self {
            domain_id,
            fabric,
            gas_pricer,
            client,
        }
    }

    /// Steps up to and including broadcast, under the nonce lock
    async fn send_locked(
        &self,
        to: Address,
        data: Bytes,
        opts: TransactOptions,
    ) -> Result<H256, TransactError> {
        let mut nonce_state = self.client.nonce_lock().lock().await;

        let nonce = self.client.unsafe_nonce(&mut nonce_state).await?;

        let opts = opts.merge(&default_transaction_options());
        if let Some(requested) = opts.nonce.filter(|n| *n != nonce) {
            warn!(
                domain_id = self.domain_id,
                "Ignoring requested nonce {}, next account nonce is {}", requested, nonce
            );
        }

        let gas_price = match opts.gas_price {
            Some(price) if !price.is_zero() => price,
            _ => self.gas_pricer.gas_price(opts.priority)?,
        };

        let tx = self.fabric.build(
            nonce,
            to,
            opts.value,
            opts.gas_limit,
            &gas_price,
            data,
        )?;

        let tx_hash = match self.client.sign_and_send_transaction(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                error!(domain_id = self.domain_id, %nonce, "Broadcast failed: {}", e);
                return Err(e);
            }
        };

        let next = self
            .client
            .unsafe_increase_nonce(&mut nonce_state)
            .map_err(|e| TransactError::NonceIncrement {
                tx_hash,
                message: e.to_string(),
            })?;

        info!(
            domain_id = self.domain_id,
            %nonce,
            gas_limit = opts.gas_limit,
            gas_price = %gas_price.max_per_gas(),
            "Transaction sent: {:?}",
            tx_hash
        );
        crate::metrics::record_nonce(self.domain_id, next);

        Ok(tx_hash)
    }
}

#[async_trait]
impl Transactor for SignAndSendTransactor {
    async fn transact(
        &self,
        to: Address,
        data: Bytes,
        opts: TransactOptions,
    ) -> Result<H256, TransactError> {
        let started = Instant::now();

        let result = async {
            let tx_hash = self.send_locked(to, data, opts).await?;
            crate::metrics::record_tx_submitted(self.domain_id);

            self.client.wait_and_return_tx_receipt(tx_hash).await?;
            debug!(domain_id = self.domain_id, "Transaction {:?} confirmed", tx_hash);
            Ok::<_, TransactError>(tx_hash)
        }
        .await;

        match &result {
            Ok(_) => crate::metrics::record_tx_latency(
                self.domain_id,
                started.elapsed().as_secs_f64(),
            ),
            Err(e) => crate::metrics::record_tx_failed(self.domain_id, e.class()),
        }

        result
    }
}
