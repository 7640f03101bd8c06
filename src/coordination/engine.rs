//! Relay engine: runs every chain's listener and routes messages to the
//! destination chain's writer

use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::Message;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::H256;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A chain the relayer listens on and writes to
#[async_trait]
pub trait RelayedChain: Send + Sync {
    fn domain_id(&self) -> u8;

    /// Start the chain's listener as an independent task
    fn poll_events(
        &self,
        token: CancellationToken,
        err_tx: mpsc::Sender<RelayerError>,
        msg_tx: mpsc::Sender<Message>,
    ) -> JoinHandle<()>;

    async fn write(&self, msg: &Message) -> RelayerResult<H256>;
}

pub struct RelayEngine {
    chains: DashMap<u8, Arc<dyn RelayedChain>>,
    message_queue_size: usize,
}

impl RelayEngine {
    pub fn new(config: &RelayerConfig) -> Self {
        Self {
            chains: DashMap::new(),
            message_queue_size: config.message_queue_size.max(1),
        }
    }

    pub fn add_chain(&self, chain: Arc<dyn RelayedChain>) -> RelayerResult<()> {
        let domain_id = chain.domain_id();
        if self.chains.contains_key(&domain_id) {
            return Err(RelayerError::Config(format!(
                "Domain {} registered twice",
                domain_id
            )));
        }
        self.chains.insert(domain_id, chain);
        Ok(())
    }

    pub fn domains(&self) -> Vec<u8> {
        let mut domains: Vec<u8> = self.chains.iter().map(|e| *e.key()).collect();
        domains.sort_unstable();
        domains
    }

    /// Run until `token` is cancelled or a listener fails
    ///
    /// Each routed message is written in its own task, so independent votes
    /// only contend on the destination's nonce lock.
    pub async fn run(&self, token: CancellationToken) -> RelayerResult<()> {
        let (msg_tx, mut msg_rx) = mpsc::channel(self.message_queue_size);
        let (err_tx, mut err_rx) = mpsc::channel(self.chains.len().max(1));
        let listeners_token = token.child_token();

        let handles: Vec<_> = self
            .chains
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .poll_events(listeners_token.clone(), err_tx.clone(), msg_tx.clone())
            })
            .collect();
        drop((msg_tx, err_tx));

        info!("Relay engine started for domains {:?}", self.domains());

        let result = loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break Ok(()),

                err = err_rx.recv() => match err {
                    Some(e) => {
                        error!("Stopping relay engine: {}", e);
                        break Err(e);
                    }
                    None => {
                        warn!("All listeners exited");
                        break Ok(());
                    }
                },

                Some(msg) = msg_rx.recv() => self.route(msg),
            }
        };

        listeners_token.cancel();
        // Unblocks listeners still waiting on queue space
        drop(msg_rx);
        futures::future::join_all(handles).await;
        info!("Relay engine stopped");

        result
    }

    fn route(&self, msg: Message) {
        let Some(chain) = self.chains.get(&msg.destination).map(|c| c.value().clone()) else {
            warn!(
                "Dropping deposit {} from domain {}: no chain for destination {}",
                msg.deposit_nonce, msg.source, msg.destination
            );
            crate::metrics::record_unroutable(msg.source, msg.destination);
            return;
        };

        debug!(
            "Routing deposit {} from domain {} to domain {}",
            msg.deposit_nonce, msg.source, msg.destination
        );

        tokio::spawn(async move {
            if let Err(e) = chain.write(&msg).await {
                error!(
                    destination = msg.destination,
                    source = msg.source,
                    deposit_nonce = msg.deposit_nonce,
                    retryable = e.is_retryable(),
                    "Failed to relay deposit: {}",
                    e
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransferType;

    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Emits a fixed set of messages, then waits for cancellation
    struct FakeChain {
        domain_id: u8,
        outgoing: Vec<Message>,
        fail_with: Option<String>,
        written: StdMutex<Vec<Message>>,
        wrote: Notify,
    }

    impl FakeChain {
        fn new(domain_id: u8, outgoing: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                domain_id,
                outgoing,
                fail_with: None,
                written: StdMutex::new(Vec::new()),
                wrote: Notify::new(),
            })
        }

        fn written_nonces(&self) -> Vec<u64> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.deposit_nonce)
                .collect()
        }
    }

    #[async_trait]
    impl RelayedChain for FakeChain {
        fn domain_id(&self) -> u8 {
            self.domain_id
        }

        fn poll_events(
            &self,
            token: CancellationToken,
            err_tx: mpsc::Sender<RelayerError>,
            msg_tx: mpsc::Sender<Message>,
        ) -> JoinHandle<()> {
            let outgoing = self.outgoing.clone();
            let fail_with = self.fail_with.clone();
            let domain_id = self.domain_id;
            tokio::spawn(async move {
                for msg in outgoing {
                    if msg_tx.send(msg).await.is_err() {
                        return;
                    }
                }
                if let Some(reason) = fail_with {
                    let _ = err_tx.send(RelayerError::Internal(reason)).await;
                    return;
                }
                token.cancelled().await;
                let _ = err_tx.send(RelayerError::ListenerStopped { domain_id }).await;
            })
        }

        async fn write(&self, msg: &Message) -> RelayerResult<H256> {
            self.written.lock().unwrap().push(msg.clone());
            self.wrote.notify_one();
            Ok(H256::zero())
        }
    }

    fn message(destination: u8, deposit_nonce: u64) -> Message {
        Message {
            source: 1,
            destination,
            deposit_nonce,
            resource_id: [0; 32],
            transfer_type: TransferType::Generic,
            payload: vec![],
        }
    }

    fn engine() -> Arc<RelayEngine> {
        Arc::new(RelayEngine::new(&RelayerConfig::default()))
    }

    #[tokio::test]
    async fn test_routes_by_destination() {
        let source = FakeChain::new(1, vec![message(2, 10), message(9, 11), message(2, 12)]);
        let destination = FakeChain::new(2, vec![]);

        let engine = engine();
        engine.add_chain(source.clone()).unwrap();
        engine.add_chain(destination.clone()).unwrap();
        assert_eq!(engine.domains(), vec![1, 2]);

        let token = CancellationToken::new();
        let run = tokio::spawn({
            let engine = engine.clone();
            let token = token.clone();
            async move { engine.run(token).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while destination.written_nonces().len() < 2 {
                destination.wrote.notified().await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        tokio_test::assert_ok!(run.await.unwrap());

        let mut nonces = destination.written_nonces();
        nonces.sort_unstable();
        assert_eq!(nonces, vec![10, 12]);
        assert!(source.written_nonces().is_empty());
    }

    #[tokio::test]
    async fn test_listener_failure_stops_engine() {
        let failing = Arc::new(FakeChain {
            domain_id: 1,
            outgoing: vec![],
            fail_with: Some("rpc gone".into()),
            written: StdMutex::new(Vec::new()),
            wrote: Notify::new(),
        });
        let healthy = FakeChain::new(2, vec![]);

        let engine = engine();
        engine.add_chain(failing).unwrap();
        engine.add_chain(healthy).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run(CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(RelayerError::Internal(_))));
    }

    #[tokio::test]
    async fn test_duplicate_domain_rejected() {
        let engine = engine();
        engine.add_chain(FakeChain::new(4, vec![])).unwrap();
        assert!(engine.add_chain(FakeChain::new(4, vec![])).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_with_backlogged_listener() {
        let config = RelayerConfig {
            message_queue_size: 1,
            ..Default::default()
        };
        let engine = RelayEngine::new(&config);
        let backlog = (0..10).map(|nonce| message(7, nonce)).collect();
        engine.add_chain(FakeChain::new(1, backlog)).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), engine.run(token))
            .await
            .expect("engine waited on a blocked listener");
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_cancellation_stops_cleanly() {
        let engine = engine();
        engine.add_chain(FakeChain::new(1, vec![])).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(engine.run(token).await.is_ok());
    }
}
