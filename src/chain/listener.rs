//! Deposit event listener polling the source bridge over HTTP

use super::{ChainProvider, HandlerMatcher};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{DepositEvent, Message, TransferType, DEPOSIT_TOPIC};
use crate::state::BlockStore;

use async_trait::async_trait;
use ethers::types::{Address, Filter, Log};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source of relay messages for one chain
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Runs until `token` is cancelled or a fatal error occurs, then sends
    /// exactly one error on `err_tx`
    async fn listen_to_events(
        &self,
        token: CancellationToken,
        start_block: Option<u64>,
        msg_tx: mpsc::Sender<Message>,
        err_tx: mpsc::Sender<RelayerError>,
    );
}

/// Block and log queries the listener needs from a chain
#[async_trait]
pub trait DepositSource: Send + Sync {
    async fn latest_block(&self) -> RelayerResult<u64>;

    async fn deposit_logs(&self, bridge: Address, from: u64, to: u64) -> RelayerResult<Vec<Log>>;
}

#[async_trait]
impl DepositSource for ChainProvider {
    async fn latest_block(&self) -> RelayerResult<u64> {
        self.get_block_number().await
    }

    async fn deposit_logs(&self, bridge: Address, from: u64, to: u64) -> RelayerResult<Vec<Log>> {
        let filter = Filter::new()
            .address(bridge)
            .topic0(*DEPOSIT_TOPIC)
            .from_block(from)
            .to_block(to);
        self.get_logs(&filter).await
    }
}

/// Polls the bridge for `Deposit` logs behind a confirmation lag
pub struct DepositListener {
    domain_id: u8,
    bridge: Address,
    handlers: HashMap<Address, TransferType>,
    source: Arc<dyn DepositSource>,
    matcher: Arc<dyn HandlerMatcher>,
    block_store: Arc<dyn BlockStore>,
    block_confirmations: u64,
    max_block_range: u64,
    poll_interval: Duration,
}

impl DepositListener {
    pub fn new(
        config: &ChainConfig,
        source: Arc<dyn DepositSource>,
        matcher: Arc<dyn HandlerMatcher>,
        block_store: Arc<dyn BlockStore>,
    ) -> RelayerResult<Self> {
        let bridge = config
            .bridge()
            .map_err(|e| RelayerError::Config(e.to_string()))?;
        let [erc20, erc721, generic] = config
            .handlers()
            .map_err(|e| RelayerError::Config(e.to_string()))?;

        let handlers = [
            (erc20, TransferType::Fungible),
            (erc721, TransferType::NonFungible),
            (generic, TransferType::Generic),
        ]
        .into_iter()
        .filter_map(|(address, transfer_type)| address.map(|a| (a, transfer_type)))
        .collect();

        Ok(Self {
            domain_id: config.domain_id,
            bridge,
            handlers,
            source,
            matcher,
            block_store,
            block_confirmations: config.block_confirmations,
            max_block_range: config.max_block_range.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }

    /// Polling loop; returns the reason it stopped
    async fn poll(
        &self,
        token: &CancellationToken,
        start_block: Option<u64>,
        msg_tx: &mpsc::Sender<Message>,
    ) -> RelayerError {
        let mut next_block = start_block;
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return RelayerError::ListenerStopped { domain_id: self.domain_id };
                }
                _ = ticker.tick() => {}
            }

            let head = match self.source.latest_block().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("Domain {}: failed to get block number: {}", self.domain_id, e);
                    continue;
                }
            };
            crate::metrics::record_block_height(self.domain_id, head);

            let from_block = *next_block.get_or_insert_with(|| {
                info!("Domain {}: starting at chain head {}", self.domain_id, head);
                head
            });

            // Only process blocks that have enough confirmations
            let safe_head = head.saturating_sub(self.block_confirmations);
            if safe_head < from_block {
                continue;
            }
            let to_block = safe_head.min(from_block + self.max_block_range - 1);

            debug!(
                "Domain {}: processing blocks {} to {}",
                self.domain_id, from_block, to_block
            );

            let messages = match self.collect_messages(from_block, to_block).await {
                Ok(messages) => messages,
                Err(e) => {
                    // Range is retried on the next tick; nothing was emitted
                    warn!(
                        "Domain {}: failed to process blocks {} to {}: {}",
                        self.domain_id, from_block, to_block, e
                    );
                    continue;
                }
            };

            for msg in messages {
                crate::metrics::record_deposit(self.domain_id, msg.transfer_type);
                // A full queue must not hold off cancellation
                let sent = tokio::select! {
                    _ = token.cancelled() => {
                        return RelayerError::ListenerStopped { domain_id: self.domain_id };
                    }
                    sent = msg_tx.send(msg) => sent,
                };
                if sent.is_err() {
                    return RelayerError::Internal(format!(
                        "Message queue closed for domain {}",
                        self.domain_id
                    ));
                }
            }

            if let Err(e) = self.block_store.store_block(self.domain_id, to_block).await {
                warn!("Domain {}: failed to save checkpoint: {}", self.domain_id, e);
            }
            next_block = Some(to_block + 1);
        }
    }

    /// Decode every deposit in `[from, to]`, failing if any handler lookup fails
    async fn collect_messages(&self, from: u64, to: u64) -> RelayerResult<Vec<Message>> {
        let logs = self.source.deposit_logs(self.bridge, from, to).await?;
        let mut messages = Vec::with_capacity(logs.len());

        for log in logs {
            let deposit = match DepositEvent::parse_log(&log) {
                Ok(deposit) => deposit,
                Err(e) => {
                    error!("Domain {}: skipping log: {}", self.domain_id, e);
                    continue;
                }
            };

            let handler = match self.matcher.handler_address(deposit.resource_id).await {
                Ok(handler) => handler,
                Err(RelayerError::Handler(e)) => {
                    error!(
                        "Domain {}: skipping deposit {}: {}",
                        self.domain_id, deposit.deposit_nonce, e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(transfer_type) = self.handlers.get(&handler).copied() else {
                error!(
                    "Domain {}: deposit {} uses unknown handler {:?}",
                    self.domain_id, deposit.deposit_nonce, handler
                );
                continue;
            };

            match Message::from_deposit(self.domain_id, transfer_type, &deposit) {
                Ok(msg) => {
                    info!(
                        "Domain {}: deposit {} to domain {} ({}) in block {}",
                        self.domain_id,
                        msg.deposit_nonce,
                        msg.destination,
                        transfer_type.name(),
                        deposit.block_number
                    );
                    messages.push(msg);
                }
                Err(e) => error!(
                    "Domain {}: skipping deposit {}: {}",
                    self.domain_id, deposit.deposit_nonce, e
                ),
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl EventListener for DepositListener {
    async fn listen_to_events(
        &self,
        token: CancellationToken,
        start_block: Option<u64>,
        msg_tx: mpsc::Sender<Message>,
        err_tx: mpsc::Sender<RelayerError>,
    ) {
        info!(
            "Listening for deposits on domain {} from {:?}",
            self.domain_id, start_block
        );

        let reason = self.poll(&token, start_block, &msg_tx).await;
        match &reason {
            RelayerError::ListenerStopped { .. } => info!("{}", reason),
            _ => error!("Listener for domain {} failed: {}", self.domain_id, reason),
        }

        let _ = err_tx.send(reason).await;
    }
}
