//! Message handlers: turn a relay message into the proposal data expected by
//! the destination chain's asset handler contract

use super::Proposal;
use crate::chain::HandlerMatcher;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{length_word, pad_word, Message, TransferType};

use ethers::types::{Address, Bytes};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, msg: &Message) -> RelayerResult<Proposal>;
}

fn expect_payload<'a>(msg: &'a Message, len: usize, kind: &str) -> RelayerResult<&'a [Bytes]> {
    if msg.payload.len() != len {
        return Err(RelayerError::Handler(format!(
            "{} message {} from domain {} has {} payload items, expected {}",
            kind,
            msg.deposit_nonce,
            msg.source,
            msg.payload.len(),
            len
        )));
    }
    Ok(&msg.payload)
}

fn proposal(msg: &Message, data: Vec<u8>) -> Proposal {
    Proposal {
        source: msg.source,
        destination: msg.destination,
        deposit_nonce: msg.deposit_nonce,
        resource_id: msg.resource_id,
        data: Bytes::from(data),
    }
}

/// `amount | len(recipient) | recipient`
#[derive(Debug, Default)]
pub struct Erc20Handler;

impl MessageHandler for Erc20Handler {
    fn handle_message(&self, msg: &Message) -> RelayerResult<Proposal> {
        let payload = expect_payload(msg, 2, "Fungible")?;
        let (amount, recipient) = (&payload[0], &payload[1]);

        let mut data = Vec::with_capacity(64 + recipient.len());
        data.extend_from_slice(&pad_word(amount));
        data.extend_from_slice(&length_word(recipient.len()));
        data.extend_from_slice(recipient);

        Ok(proposal(msg, data))
    }
}

/// `tokenId | len(recipient) | recipient | len(metadata) | metadata`
#[derive(Debug, Default)]
pub struct Erc721Handler;

impl MessageHandler for Erc721Handler {
    fn handle_message(&self, msg: &Message) -> RelayerResult<Proposal> {
        let payload = expect_payload(msg, 3, "Non-fungible")?;
        let (token_id, recipient, metadata) = (&payload[0], &payload[1], &payload[2]);

        let mut data = Vec::with_capacity(96 + recipient.len() + metadata.len());
        data.extend_from_slice(&pad_word(token_id));
        data.extend_from_slice(&length_word(recipient.len()));
        data.extend_from_slice(recipient);
        data.extend_from_slice(&length_word(metadata.len()));
        data.extend_from_slice(metadata);

        Ok(proposal(msg, data))
    }
}

/// `len(metadata) | metadata`
#[derive(Debug, Default)]
pub struct GenericHandler;

impl MessageHandler for GenericHandler {
    fn handle_message(&self, msg: &Message) -> RelayerResult<Proposal> {
        let payload = expect_payload(msg, 1, "Generic")?;
        let metadata = &payload[0];

        let mut data = Vec::with_capacity(32 + metadata.len());
        data.extend_from_slice(&length_word(metadata.len()));
        data.extend_from_slice(metadata);

        Ok(proposal(msg, data))
    }
}

/// Handler for a transfer type, used when wiring configured handler addresses
pub fn handler_for(transfer_type: TransferType) -> Arc<dyn MessageHandler> {
    match transfer_type {
        TransferType::Fungible => Arc::new(Erc20Handler),
        TransferType::NonFungible => Arc::new(Erc721Handler),
        TransferType::Generic => Arc::new(GenericHandler),
    }
}

/// Dispatches messages to handlers by the handler contract registered for
/// their resource id on the destination bridge
pub struct MessageHandlerRegistry {
    matcher: Arc<dyn HandlerMatcher>,
    handlers: HashMap<Address, Arc<dyn MessageHandler>>,
}

impl MessageHandlerRegistry {
    pub fn new(matcher: Arc<dyn HandlerMatcher>) -> Self {
        Self {
            matcher,
            handlers: HashMap::new(),
        }
    }

    /// Route messages whose resource resolves to `address` through `handler`
    pub fn register_message_handler(&mut self, address: Address, handler: Arc<dyn MessageHandler>) {
        debug!("Registered message handler for {:?}", address);
        self.handlers.insert(address, handler);
    }

    /// Resolve the message's handler on the bridge and build its proposal
    pub async fn handle_message(&self, msg: &Message) -> RelayerResult<Proposal> {
        let address = self.matcher.handler_address(msg.resource_id).await?;

        let handler = self.handlers.get(&address).ok_or_else(|| {
            RelayerError::Handler(format!(
                "No message handler registered for {:?} (resource {})",
                address,
                hex::encode(msg.resource_id)
            ))
        })?;

        handler.handle_message(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockHandlerMatcher;
    use crate::events::{decode_deposit_data, WORD};

    use ethers::types::U256;

    fn message(transfer_type: TransferType, payload: Vec<Vec<u8>>) -> Message {
        Message {
            source: 1,
            destination: 2,
            deposit_nonce: 5,
            resource_id: [0x11; 32],
            transfer_type,
            payload: payload.into_iter().map(Bytes::from).collect(),
        }
    }

    #[test]
    fn test_erc20_layout() {
        let recipient = vec![0xab; 20];
        let msg = message(
            TransferType::Fungible,
            vec![pad_word(&1_000u64.to_be_bytes()).to_vec(), recipient.clone()],
        );

        let proposal = Erc20Handler.handle_message(&msg).unwrap();
        assert_eq!(proposal.data.len(), 2 * WORD + 20);
        assert_eq!(U256::from_big_endian(&proposal.data[..WORD]), U256::from(1_000));
        assert_eq!(U256::from_big_endian(&proposal.data[WORD..2 * WORD]), U256::from(20));
        assert_eq!(&proposal.data[2 * WORD..], &recipient[..]);
        assert_eq!(proposal.deposit_nonce, 5);
    }

    #[test]
    fn test_erc20_pads_short_amount() {
        let msg = message(TransferType::Fungible, vec![vec![0x03, 0xe8], vec![0xab; 20]]);
        let proposal = Erc20Handler.handle_message(&msg).unwrap();
        assert_eq!(U256::from_big_endian(&proposal.data[..WORD]), U256::from(1_000));
    }

    #[test]
    fn test_erc721_data_matches_deposit_layout() {
        let msg = message(
            TransferType::NonFungible,
            vec![vec![9], vec![0xab; 20], b"ipfs://token".to_vec()],
        );

        let proposal = Erc721Handler.handle_message(&msg).unwrap();
        let payload = decode_deposit_data(TransferType::NonFungible, &proposal.data).unwrap();
        assert_eq!(payload[0][31], 9);
        assert_eq!(payload[1].to_vec(), vec![0xab; 20]);
        assert_eq!(payload[2].to_vec(), b"ipfs://token".to_vec());
    }

    #[test]
    fn test_generic_layout() {
        let msg = message(TransferType::Generic, vec![vec![1, 2, 3]]);
        let proposal = GenericHandler.handle_message(&msg).unwrap();
        assert_eq!(U256::from_big_endian(&proposal.data[..WORD]), U256::from(3));
        assert_eq!(&proposal.data[WORD..], &[1, 2, 3]);
    }

    #[test]
    fn test_wrong_payload_arity() {
        let msg = message(TransferType::Fungible, vec![vec![1]]);
        assert!(matches!(
            Erc20Handler.handle_message(&msg),
            Err(RelayerError::Handler(_))
        ));
        assert!(GenericHandler
            .handle_message(&message(TransferType::Generic, vec![]))
            .is_err());
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_handler_address() {
        let erc20 = Address::repeat_byte(0x20);
        let mut matcher = MockHandlerMatcher::new();
        matcher
            .expect_handler_address()
            .withf(|id| *id == [0x11; 32])
            .returning(move |_| Ok(erc20));

        let mut registry = MessageHandlerRegistry::new(Arc::new(matcher));
        registry.register_message_handler(erc20, handler_for(TransferType::Fungible));
        registry.register_message_handler(
            Address::repeat_byte(0x72),
            handler_for(TransferType::NonFungible),
        );

        let msg = message(TransferType::Fungible, vec![vec![1], vec![0xab; 20]]);
        let proposal = registry.handle_message(&msg).await.unwrap();
        assert_eq!(proposal.data.len(), 2 * WORD + 20);
    }

    #[tokio::test]
    async fn test_registry_unknown_handler() {
        let mut matcher = MockHandlerMatcher::new();
        matcher
            .expect_handler_address()
            .returning(|_| Ok(Address::repeat_byte(0x99)));
        let registry = MessageHandlerRegistry::new(Arc::new(matcher));

        let msg = message(TransferType::Generic, vec![vec![1]]);
        let err = registry.handle_message(&msg).await.unwrap_err();
        assert!(err.to_string().contains("No message handler"));
    }
}
