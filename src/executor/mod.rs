//! Proposal execution on the destination chain
//!
//! A routed [`Message`](crate::events::Message) is turned into a
//! [`Proposal`] by the handler registered for its resource id, encoded as a
//! `voteProposal` call, priced by the gas station resolver, and handed to the
//! transactor.

mod handlers;
mod writer;

pub use handlers::{
    handler_for, Erc20Handler, Erc721Handler, GenericHandler, MessageHandler,
    MessageHandlerRegistry,
};
pub use writer::WriteOrchestrator;

use crate::events::ResourceId;
use ethers::types::Bytes;

/// Vote payload for the destination bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub source: u8,
    pub destination: u8,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    pub data: Bytes,
}
