//! Generic transactional PDU bearer over one fixed channel
//!
//! ATT and SM share a request/response structure: opcoded PDUs, one
//! outstanding transaction per category, strict matching of responses
//! to requests, a transaction timer whose expiry kills the channel.
//! This module implements that engine once, parameterized by a
//! [`ProtocolTable`] instead of a type hierarchy.

mod engine;
mod tests;
mod types;

pub use self::engine::{
    Bearer, BearerConfig, ClosedCallback, ErrorCallback, RemoteHandler, SuccessCallback,
};
pub use self::types::{
    BearerError, ErrorDetails, ErrorResponse, HandlerId, MethodType, ProtocolTable,
    ShutdownReason, TransactionId,
};
