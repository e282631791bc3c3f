//! SimpleBank Gateway
//!
//! Everything that sits in front of the transfer engine: caller
//! authorization, request validation against account ownership and currency,
//! and the `TransferService` that ties them to the ledger.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod validator;

pub use auth::{Authorizer, Identity, TokenRegistry};
pub use config::{GatewayConfig, LogFormat};
pub use error::{GatewayError, GatewayResult};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use service::{CreateTransferRequest, ListAccountsRequest, TransferService};
pub use validator::TransferValidator;
