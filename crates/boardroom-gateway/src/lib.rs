//! boardroom-gateway: HTTP surface of the AI boardroom
//!
//! Per-provider endpoints stream one adapter call as NDJSON, `/api/boardroom`
//! streams a full two-round run as server-sent events, and `/api/health`
//! reports which upstream credentials are configured.

pub mod protocol;
pub mod server;

pub use server::{GatewayServer, GatewayState};
