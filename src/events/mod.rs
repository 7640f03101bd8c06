//! Bridge deposit events and the relay messages derived from them
//!
//! A `Deposit` log on the source chain's bridge contract is decoded into a
//! [`DepositEvent`], and its opaque deposit data is split into payload items
//! according to the asset class of the handler that accepted the deposit.

use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};

/// Identifier correlating a cross-chain asset with its handler
pub type ResourceId = [u8; 32];

/// Width of every length-prefix and amount word in deposit data
pub const WORD: usize = 32;

/// Event signature emitted by the bridge contract on deposit
pub const DEPOSIT_SIGNATURE: &str = "Deposit(uint8,bytes32,uint64,address,bytes,bytes)";

lazy_static! {
    pub static ref DEPOSIT_TOPIC: H256 = H256::from(keccak256(DEPOSIT_SIGNATURE.as_bytes()));
}

pub(crate) fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Asset class of a transfer, selecting its handler strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Fungible,
    NonFungible,
    Generic,
}

impl TransferType {
    pub fn name(&self) -> &'static str {
        match self {
            TransferType::Fungible => "fungible",
            TransferType::NonFungible => "non_fungible",
            TransferType::Generic => "generic",
        }
    }
}

/// Relay unit of work, immutable once produced by a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: u8,
    pub destination: u8,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    pub transfer_type: TransferType,
    pub payload: Vec<Bytes>,
}

impl Message {
    pub fn from_deposit(
        source: u8,
        transfer_type: TransferType,
        deposit: &DepositEvent,
    ) -> RelayerResult<Self> {
        Ok(Self {
            source,
            destination: deposit.destination_domain_id,
            deposit_nonce: deposit.deposit_nonce,
            resource_id: deposit.resource_id,
            transfer_type,
            payload: decode_deposit_data(transfer_type, &deposit.data)?,
        })
    }
}

/// Decoded `Deposit` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub destination_domain_id: u8,
    pub resource_id: ResourceId,
    pub deposit_nonce: u64,
    pub user: Address,
    pub data: Bytes,
    pub handler_response: Bytes,
    pub block_number: u64,
    pub tx_hash: H256,
}

impl DepositEvent {
    /// Parse a bridge log into a deposit
    pub fn parse_log(log: &Log) -> RelayerResult<Self> {
        let topic = log.topics.first().copied().unwrap_or_default();
        if topic != *DEPOSIT_TOPIC {
            return Err(RelayerError::EventParsing(format!(
                "Not a deposit event: {:?}",
                topic
            )));
        }

        let user = log
            .topics
            .get(1)
            .map(|t| Address::from_slice(&t.0[12..32]))
            .ok_or_else(|| RelayerError::EventParsing("Deposit log missing user topic".into()))?;

        let tokens = ethers::abi::decode(
            &[
                ParamType::Uint(8),
                ParamType::FixedBytes(32),
                ParamType::Uint(64),
                ParamType::Bytes,
                ParamType::Bytes,
            ],
            &log.data,
        )
        .map_err(|e| RelayerError::EventParsing(format!("Invalid deposit data: {}", e)))?;

        let mut tokens = tokens.into_iter();
        let destination_domain_id = uint_token(tokens.next(), u8::MAX as u64)? as u8;
        let resource_id = match tokens.next() {
            Some(Token::FixedBytes(b)) if b.len() == 32 => {
                let mut id = [0u8; 32];
                id.copy_from_slice(&b);
                id
            }
            other => {
                return Err(RelayerError::EventParsing(format!(
                    "Invalid resource id token: {:?}",
                    other
                )))
            }
        };
        let deposit_nonce = uint_token(tokens.next(), u64::MAX)?;
        let data = bytes_token(tokens.next())?;
        let handler_response = bytes_token(tokens.next())?;

        Ok(Self {
            destination_domain_id,
            resource_id,
            deposit_nonce,
            user,
            data,
            handler_response,
            block_number: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
            tx_hash: log.transaction_hash.unwrap_or_default(),
        })
    }
}

fn uint_token(token: Option<Token>, max: u64) -> RelayerResult<u64> {
    match token {
        Some(Token::Uint(v)) if v <= U256::from(max) => Ok(v.low_u64()),
        other => Err(RelayerError::EventParsing(format!(
            "Invalid integer token: {:?}",
            other
        ))),
    }
}

fn bytes_token(token: Option<Token>) -> RelayerResult<Bytes> {
    match token {
        Some(Token::Bytes(b)) => Ok(Bytes::from(b)),
        other => Err(RelayerError::EventParsing(format!(
            "Invalid bytes token: {:?}",
            other
        ))),
    }
}

/// Read a 32-byte big-endian length word at `offset` and return the
/// `length` bytes that follow it.
fn length_prefixed(data: &[u8], offset: usize) -> RelayerResult<(&[u8], usize)> {
    let word = data.get(offset..offset + WORD).ok_or_else(|| {
        RelayerError::EventParsing(format!("Deposit data truncated at offset {}", offset))
    })?;
    let len = U256::from_big_endian(word);
    let start = offset + WORD;
    let remaining = data.len() - start;
    if len > U256::from(remaining) {
        return Err(RelayerError::EventParsing(format!(
            "Length {} exceeds remaining {} bytes",
            len, remaining
        )));
    }
    let end = start + len.as_usize();
    Ok((&data[start..end], end))
}

/// Split raw deposit data into the payload items of a [`Message`]
///
/// * fungible: `amount | len | recipient` -> `[amount, recipient]`
/// * non-fungible: `token id | len | recipient | len | metadata`
///   -> `[token id, recipient, metadata]`
/// * generic: `len | metadata` -> `[metadata]`
pub fn decode_deposit_data(transfer_type: TransferType, data: &[u8]) -> RelayerResult<Vec<Bytes>> {
    match transfer_type {
        TransferType::Fungible => {
            if data.len() < 84 {
                return Err(RelayerError::EventParsing(format!(
                    "Fungible deposit data too short: {} bytes",
                    data.len()
                )));
            }
            let amount = &data[..WORD];
            let (recipient, _) = length_prefixed(data, WORD)?;
            Ok(vec![
                Bytes::from(amount.to_vec()),
                Bytes::from(recipient.to_vec()),
            ])
        }
        TransferType::NonFungible => {
            if data.len() < 2 * WORD {
                return Err(RelayerError::EventParsing(format!(
                    "Non-fungible deposit data too short: {} bytes",
                    data.len()
                )));
            }
            let token_id = &data[..WORD];
            let (recipient, next) = length_prefixed(data, WORD)?;
            let metadata = if next < data.len() {
                length_prefixed(data, next)?.0
            } else {
                &[][..]
            };
            Ok(vec![
                Bytes::from(token_id.to_vec()),
                Bytes::from(recipient.to_vec()),
                Bytes::from(metadata.to_vec()),
            ])
        }
        TransferType::Generic => {
            let (metadata, _) = length_prefixed(data, 0)?;
            Ok(vec![Bytes::from(metadata.to_vec())])
        }
    }
}

/// Left-pad a big-endian integer to a 32-byte word
pub fn pad_word(value: &[u8]) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    let value = if value.len() > WORD {
        &value[value.len() - WORD..]
    } else {
        value
    };
    word[WORD - value.len()..].copy_from_slice(value);
    word
}

/// 32-byte word holding `len`
pub fn length_word(len: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    U256::from(len).to_big_endian(&mut word);
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Vec<u8> {
        vec![0xab; 20]
    }

    fn fungible_data(amount: u64) -> Vec<u8> {
        let mut data = pad_word(&amount.to_be_bytes()).to_vec();
        data.extend_from_slice(&length_word(20));
        data.extend_from_slice(&recipient());
        data
    }

    fn deposit_log(destination: u8, nonce: u64, data: Vec<u8>) -> Log {
        let encoded = ethers::abi::encode(&[
            Token::Uint(U256::from(destination)),
            Token::FixedBytes(vec![0x11; 32]),
            Token::Uint(U256::from(nonce)),
            Token::Bytes(data),
            Token::Bytes(vec![]),
        ]);
        let mut user_topic = [0u8; 32];
        user_topic[12..].copy_from_slice(&[0x22; 20]);
        Log {
            topics: vec![*DEPOSIT_TOPIC, H256::from(user_topic)],
            data: encoded.into(),
            block_number: Some(42u64.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_deposit_topic_matches_signature_hash() {
        assert_eq!(
            *DEPOSIT_TOPIC,
            H256::from(ethers::utils::keccak256(DEPOSIT_SIGNATURE))
        );
    }

    #[test]
    fn test_parse_deposit_log() {
        let log = deposit_log(2, 7, fungible_data(1_000));
        let deposit = DepositEvent::parse_log(&log).unwrap();

        assert_eq!(deposit.destination_domain_id, 2);
        assert_eq!(deposit.deposit_nonce, 7);
        assert_eq!(deposit.resource_id, [0x11; 32]);
        assert_eq!(deposit.user, Address::from([0x22; 20]));
        assert_eq!(deposit.block_number, 42);

        let message = Message::from_deposit(1, TransferType::Fungible, &deposit).unwrap();
        assert_eq!(message.source, 1);
        assert_eq!(message.destination, 2);
        assert_eq!(message.payload.len(), 2);
        assert_eq!(U256::from_big_endian(&message.payload[0]), U256::from(1_000));
        assert_eq!(message.payload[1].to_vec(), recipient());
    }

    #[test]
    fn test_rejects_foreign_topic() {
        let mut log = deposit_log(2, 7, fungible_data(1));
        log.topics[0] = H256::repeat_byte(0x99);
        assert!(matches!(
            DepositEvent::parse_log(&log),
            Err(RelayerError::EventParsing(_))
        ));
    }

    #[test]
    fn test_fungible_data_too_short() {
        let err = decode_deposit_data(TransferType::Fungible, &[0u8; 64]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_length_word_beyond_data_is_rejected() {
        let mut data = vec![0u8; WORD];
        data.extend_from_slice(&length_word(500));
        data.extend_from_slice(&[1u8; 40]);
        assert!(decode_deposit_data(TransferType::Fungible, &data).is_err());
    }

    #[test]
    fn test_non_fungible_with_metadata() {
        let mut data = pad_word(&[9]).to_vec();
        data.extend_from_slice(&length_word(20));
        data.extend_from_slice(&recipient());
        data.extend_from_slice(&length_word(3));
        data.extend_from_slice(b"uri");

        let payload = decode_deposit_data(TransferType::NonFungible, &data).unwrap();
        assert_eq!(payload[0][31], 9);
        assert_eq!(payload[1].to_vec(), recipient());
        assert_eq!(payload[2].to_vec(), b"uri".to_vec());
    }

    #[test]
    fn test_non_fungible_without_metadata() {
        let mut data = pad_word(&[9]).to_vec();
        data.extend_from_slice(&length_word(20));
        data.extend_from_slice(&recipient());

        let payload = decode_deposit_data(TransferType::NonFungible, &data).unwrap();
        assert!(payload[2].is_empty());
    }

    #[test]
    fn test_generic_payload() {
        let mut data = length_word(4).to_vec();
        data.extend_from_slice(&[1, 2, 3, 4]);
        let payload = decode_deposit_data(TransferType::Generic, &data).unwrap();
        assert_eq!(payload, vec![Bytes::from(vec![1, 2, 3, 4])]);
    }
}
