//! Gas price quotes and priority-tier pricing

use crate::error::TransactError;

use ethers::types::U256;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    pub fn is_zero(&self) -> bool {
        match self {
            GasPrice::Legacy(price) => price.is_zero(),
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => max_fee_per_gas.is_zero(),
        }
    }

    /// Price list view: `[price]` for legacy, `[tip, fee cap]` for type-2
    pub fn to_vec(&self) -> Vec<U256> {
        match self {
            GasPrice::Legacy(price) => vec![*price],
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => vec![*max_priority_fee_per_gas, *max_fee_per_gas],
        }
    }

    /// Upper bound paid per unit of gas
    pub fn max_per_gas(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Caller-selected speed/cost class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    #[default]
    Slow,
    Medium,
    Fast,
}

impl From<u8> for Priority {
    /// Unrecognized tiers are priced as slow
    fn from(tier: u8) -> Self {
        match tier {
            1 => Priority::Medium,
            2 => Priority::Fast,
            _ => Priority::Slow,
        }
    }
}

/// Maps a priority tier to a gas price quote
#[cfg_attr(test, mockall::automock)]
pub trait GasPricer: Send + Sync {
    fn gas_price(&self, priority: Priority) -> Result<GasPrice, TransactError>;
}

pub const FAST_GAS_PRICE: u64 = 140_000_000_000;
pub const MEDIUM_GAS_PRICE: u64 = 80_000_000_000;
pub const SLOW_GAS_PRICE: u64 = 50_000_000_000;

/// Fixed price per tier, no I/O
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTierPricer;

impl GasPricer for StaticTierPricer {
    fn gas_price(&self, priority: Priority) -> Result<GasPrice, TransactError> {
        let price = match priority {
            Priority::Fast => FAST_GAS_PRICE,
            Priority::Medium => MEDIUM_GAS_PRICE,
            Priority::Slow => SLOW_GAS_PRICE,
        };
        Ok(GasPrice::Legacy(U256::from(price)))
    }
}
