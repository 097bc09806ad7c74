//! chainpilot: confirmation-gated on-chain operations for conversational
//! agents.
//!
//! A user message that asks for a balance, a transfer, or an NFT action is
//! turned into a pending request and echoed back for confirmation. Only an
//! explicit "yes" (or a confirm button) executes it, exactly once, against an
//! EVM chain through a failover pool of JSON-RPC endpoints.

pub mod agent;
pub mod bootstrap;
pub mod chain;
pub mod channels;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod ops;
pub mod settings;
pub mod testing;

pub use error::{Error, Result};
