//! Bridge contract calls used by the relayer

use super::ChainProvider;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{keccak256, ResourceId};
use crate::executor::Proposal;

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use std::sync::Arc;

pub const VOTE_PROPOSAL_SIGNATURE: &str = "voteProposal(uint8,uint64,bytes32,bytes)";
pub const RESOURCE_HANDLER_SIGNATURE: &str = "_resourceIDToHandlerAddress(bytes32)";

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut calldata = selector(signature).to_vec();
    calldata.extend(ethers::abi::encode(tokens));
    Bytes::from(calldata)
}

/// `voteProposal(source, depositNonce, resourceID, data)` calldata
pub fn encode_vote_proposal(proposal: &Proposal) -> Bytes {
    encode_call(
        VOTE_PROPOSAL_SIGNATURE,
        &[
            Token::Uint(U256::from(proposal.source)),
            Token::Uint(U256::from(proposal.deposit_nonce)),
            Token::FixedBytes(proposal.resource_id.to_vec()),
            Token::Bytes(proposal.data.to_vec()),
        ],
    )
}

/// Resolves the handler contract registered for a resource id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HandlerMatcher: Send + Sync {
    async fn handler_address(&self, resource_id: ResourceId) -> RelayerResult<Address>;
}

/// Bridge contract deployed on one chain
pub struct BridgeContract {
    address: Address,
    provider: Arc<ChainProvider>,
}

impl BridgeContract {
    pub fn new(address: Address, provider: Arc<ChainProvider>) -> Self {
        Self { address, provider }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl HandlerMatcher for BridgeContract {
    async fn handler_address(&self, resource_id: ResourceId) -> RelayerResult<Address> {
        let calldata = encode_call(
            RESOURCE_HANDLER_SIGNATURE,
            &[Token::FixedBytes(resource_id.to_vec())],
        );
        let call: TypedTransaction = TransactionRequest::new().to(self.address).data(calldata).into();

        let output = self.provider.call(&call).await?;
        let address = decode_address(&output)?;
        if address.is_zero() {
            return Err(RelayerError::Handler(format!(
                "No handler registered on bridge {:?} for resource {}",
                self.address,
                hex::encode(resource_id)
            )));
        }
        Ok(address)
    }
}

fn decode_address(output: &[u8]) -> RelayerResult<Address> {
    match ethers::abi::decode(&[ParamType::Address], output)
        .map_err(|e| RelayerError::Contract(format!("Invalid handler address output: {}", e)))?
        .pop()
    {
        Some(Token::Address(address)) => Ok(address),
        other => Err(RelayerError::Contract(format!(
            "Unexpected handler address token: {:?}",
            other
        ))),
    }
}
