//! Unsigned transaction construction

use super::pricer::GasPrice;
use crate::error::TransactError;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};

/// Builds an unsigned transaction from its parts
pub trait TransactionFabric: Send + Sync {
    fn build(
        &self,
        nonce: U256,
        to: Address,
        value: U256,
        gas_limit: u64,
        gas_price: &GasPrice,
        data: Bytes,
    ) -> Result<TypedTransaction, TransactError>;
}

/// Legacy transactions for single prices, type-2 for tip + fee cap quotes
#[derive(Debug, Clone, Copy, Default)]
pub struct EvmTransactionFabric;

impl TransactionFabric for EvmTransactionFabric {
    fn build(
        &self,
        nonce: U256,
        to: Address,
        value: U256,
        gas_limit: u64,
        gas_price: &GasPrice,
        data: Bytes,
    ) -> Result<TypedTransaction, TransactError> {
        if gas_limit == 0 {
            return Err(TransactError::TxBuild("gas limit must be positive".into()));
        }

        let tx = match gas_price {
            GasPrice::Legacy(price) => {
                let tx = TransactionRequest::new()
                    .to(to)
                    .value(value)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .gas_price(*price);
                TypedTransaction::Legacy(tx)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                if max_priority_fee_per_gas > max_fee_per_gas {
                    return Err(TransactError::TxBuild(format!(
                        "priority fee {} exceeds fee cap {}",
                        max_priority_fee_per_gas, max_fee_per_gas
                    )));
                }
                let tx = Eip1559TransactionRequest::new()
                    .to(to)
                    .value(value)
                    .data(data)
                    .nonce(nonce)
                    .gas(gas_limit)
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas);
                TypedTransaction::Eip1559(tx)
            }
        };

        Ok(tx)
    }
}
