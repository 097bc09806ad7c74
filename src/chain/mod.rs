//! EVM chain access: signing identity, endpoint failover, JSON-RPC,
//! transaction building, contract bindings, and the precondition and
//! authorization checks built on top of them.

pub mod account;
pub mod authorization;
pub mod client;
pub mod contracts;
pub mod endpoints;
pub mod preconditions;
pub mod rpc;
pub mod tx;
pub mod units;

pub use account::Account;
pub use authorization::{AuthorizationOutcome, Authorized, AutoAuthorizer};
pub use client::{ChainClient, ChainClientConfig, FeeQuote, RemoteCall, Settlement, TxHandle};
pub use contracts::{ContractBook, ContractRole};
pub use endpoints::{EndpointPool, with_failover};
pub use preconditions::{PreconditionVerifier, Resource, TokenRef};
pub use rpc::{HttpTransport, RpcTransport};
pub use units::EtherAmount;
