//! Transaction submission: gas resolution, transaction building, and
//! nonce-synchronized sign-and-send

mod fabric;
mod gas;
mod pricer;
mod transactor;

pub use fabric::{EvmTransactionFabric, TransactionFabric};
pub use gas::{
    CallParameters, GasEstimator, GasOracle, GasParameters, GasSource, GasStationResolver,
    HttpGasOracle, OracleError, OracleQuote,
};
pub use pricer::{GasPrice, GasPricer, Priority, StaticTierPricer};
pub use transactor::{SignAndSendTransactor, TransactOptions, Transactor};

#[cfg(test)]
pub use gas::MockGasEstimator;
#[cfg(test)]
pub use transactor::MockTransactor;
