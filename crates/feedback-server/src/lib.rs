//! HTTP front end of the feedback broker: a JSON-RPC endpoint for agents and
//! token-gated session routes for the human on the other end.

pub mod api;
pub mod config;
pub mod rpc;
pub mod server;

pub use config::BrokerConfig;
pub use server::{router, run};
