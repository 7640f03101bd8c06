//! Cross-chain message routing
//!
//! The relay engine:
//! 1. Starts the deposit listener of every configured chain
//! 2. Routes each message to the chain named by its destination domain
//! 3. Stops on shutdown or on the first listener failure

pub mod engine;

pub use engine::{RelayEngine, RelayedChain};
