//! Vote submission for routed messages

use super::MessageHandlerRegistry;
use crate::chain::encode_vote_proposal;
use crate::error::RelayerResult;
use crate::events::Message;
use crate::tx::{CallParameters, GasStationResolver, Transactor};

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::{error, info};

/// Turns routed messages into `voteProposal` transactions on one chain
pub struct WriteOrchestrator {
    /// Destination domain this writer votes on
    domain_id: u8,
    /// Bridge contract receiving the votes
    bridge: Address,
    /// Relayer account, used as `from` for gas estimation
    sender: Address,
    /// Builds proposals from messages
    registry: MessageHandlerRegistry,
    /// Gas limit and price for each vote
    gas: GasStationResolver,
    /// Nonce-synchronized submission
    transactor: Arc<dyn Transactor>,
}

impl WriteOrchestrator {
    pub fn new(
        domain_id: u8,
        bridge: Address,
        sender: Address,
        registry: MessageHandlerRegistry,
        gas: GasStationResolver,
        transactor: Arc<dyn Transactor>,
    ) -> Self {
        Self {
            domain_id,
            bridge,
            sender,
            registry,
            gas,
            transactor,
        }
    }

    /// Vote on `msg` on this chain's bridge, returning the confirmed vote hash
    ///
    /// Gas resolution never fails; the transactor is called at most once.
    pub async fn write(&self, msg: &Message) -> RelayerResult<H256> {
        let calldata = self
            .registry
            .handle_message(msg)
            .await
            .map(|proposal| encode_vote_proposal(&proposal))
            .map_err(|e| {
                error!(
                    domain_id = self.domain_id,
                    source = msg.source,
                    deposit_nonce = msg.deposit_nonce,
                    "Failed to build proposal: {}",
                    e
                );
                e
            });

        let call = calldata.as_ref().ok().map(|data| CallParameters {
            from: self.sender,
            to: self.bridge,
            data: data.clone(),
            value: U256::zero(),
        });
        let gas = self.gas.resolve(call.as_ref()).await;

        let calldata = calldata?;
        let tx_hash = self
            .transactor
            .transact(self.bridge, calldata, gas.into_options())
            .await?;

        crate::metrics::record_vote_submitted(self.domain_id, msg.transfer_type);
        info!(
            domain_id = self.domain_id,
            source = msg.source,
            deposit_nonce = msg.deposit_nonce,
            "Voted on proposal: {:?}",
            tx_hash
        );

        Ok(tx_hash)
    }
}
