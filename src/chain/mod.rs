//! Chain module - connections, contracts and event listening for one EVM chain
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Signing client owning the relayer account's nonce
//! - Bridge contract calls and deposit event polling
//! - [`EvmChain`], the per-chain unit driven by the relay engine

pub mod bridge;
pub mod client;
pub mod listener;
pub mod provider;

pub use bridge::{
    encode_vote_proposal, BridgeContract, HandlerMatcher, RESOURCE_HANDLER_SIGNATURE,
    VOTE_PROPOSAL_SIGNATURE,
};
pub use client::{ClientDispatcher, EvmClient, NonceLock, NonceState};
pub use listener::{DepositListener, DepositSource, EventListener};
pub use provider::ChainProvider;

#[cfg(test)]
pub use bridge::MockHandlerMatcher;

use crate::config::ChainConfig;
use crate::coordination::RelayedChain;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{Message, TransferType};
use crate::executor::{handler_for, MessageHandlerRegistry, WriteOrchestrator};
use crate::state::BlockStore;
use crate::tx::{
    EvmTransactionFabric, GasOracle, GasStationResolver, HttpGasOracle, SignAndSendTransactor,
    StaticTierPricer,
};

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Listener, writer and checkpoint store for one chain
pub struct EvmChain {
    provider: Arc<ChainProvider>,
    listener: Arc<dyn EventListener>,
    writer: WriteOrchestrator,
    block_store: Arc<dyn BlockStore>,
    config: ChainConfig,
}

impl EvmChain {
    pub fn new(
        provider: Arc<ChainProvider>,
        listener: Arc<dyn EventListener>,
        writer: WriteOrchestrator,
        block_store: Arc<dyn BlockStore>,
        config: ChainConfig,
    ) -> Self {
        Self {
            provider,
            listener,
            writer,
            block_store,
            config,
        }
    }

    /// Wire up provider, signing client, contracts and listener from config
    pub async fn connect(
        config: &ChainConfig,
        wallet: LocalWallet,
        block_store: Arc<dyn BlockStore>,
    ) -> RelayerResult<Self> {
        info!(
            "Initializing chain {} (domain {})",
            config.name, config.domain_id
        );

        let provider = Arc::new(ChainProvider::new(config)?);
        let client = Arc::new(
            EvmClient::new(
                provider.clone(),
                wallet,
                Duration::from_secs(config.receipt_timeout_secs),
                Duration::from_millis(config.receipt_poll_interval_ms),
            )
            .await?,
        );

        let bridge_address = config
            .bridge()
            .map_err(|e| RelayerError::Config(e.to_string()))?;
        let bridge = Arc::new(BridgeContract::new(bridge_address, provider.clone()));

        let mut registry = MessageHandlerRegistry::new(bridge.clone());
        let handlers = config
            .handlers()
            .map_err(|e| RelayerError::Config(e.to_string()))?;
        let transfer_types = [
            TransferType::Fungible,
            TransferType::NonFungible,
            TransferType::Generic,
        ];
        for (address, transfer_type) in handlers.into_iter().zip(transfer_types) {
            if let Some(address) = address {
                registry.register_message_handler(address, handler_for(transfer_type));
            }
        }

        let oracle = match &config.gas_station_url {
            Some(url) => {
                let oracle = HttpGasOracle::new(
                    url.as_str(),
                    Duration::from_millis(config.gas_station_timeout_ms),
                )
                .map_err(|e| RelayerError::Config(format!("Gas station client: {}", e)))?;
                Some(Arc::new(oracle) as Arc<dyn GasOracle>)
            }
            None => None,
        };
        let gas = GasStationResolver::new(config, oracle, client.clone());

        let transactor = Arc::new(SignAndSendTransactor::new(
            config.domain_id,
            Arc::new(EvmTransactionFabric),
            Arc::new(StaticTierPricer),
            client.clone(),
        ));

        let writer = WriteOrchestrator::new(
            config.domain_id,
            bridge_address,
            client.address(),
            registry,
            gas,
            transactor,
        );

        let listener = Arc::new(DepositListener::new(
            config,
            provider.clone(),
            bridge,
            block_store.clone(),
        )?);

        info!("Chain {} initialized successfully", config.name);
        Ok(Self::new(
            provider,
            listener,
            writer,
            block_store,
            config.clone(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub async fn health_check(&self) -> bool {
        let healthy = self.provider.health_check().await;
        crate::metrics::record_chain_health(self.config.domain_id, healthy);
        healthy
    }
}

#[async_trait]
impl RelayedChain for EvmChain {
    fn domain_id(&self) -> u8 {
        self.config.domain_id
    }

    fn poll_events(
        &self,
        token: CancellationToken,
        err_tx: mpsc::Sender<RelayerError>,
        msg_tx: mpsc::Sender<Message>,
    ) -> JoinHandle<()> {
        let listener = self.listener.clone();
        let block_store = self.block_store.clone();
        let domain_id = self.config.domain_id;
        let configured = self.config.start_block;
        let latest = self.config.latest_block;
        let fresh_start = self.config.fresh_start;

        tokio::spawn(async move {
            let start_block = match block_store
                .get_start_block(domain_id, configured, latest, fresh_start)
                .await
            {
                Ok(start_block) => start_block,
                Err(e) => {
                    error!("Domain {}: failed to get last stored block: {}", domain_id, e);
                    let _ = err_tx.send(e).await;
                    return;
                }
            };

            listener
                .listen_to_events(token, start_block, msg_tx, err_tx)
                .await;
        })
    }

    async fn write(&self, msg: &Message) -> RelayerResult<H256> {
        self.writer.write(msg).await
    }
}
