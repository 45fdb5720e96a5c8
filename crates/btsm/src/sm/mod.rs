//! Security Manager implementation
//!
//! This module implements the Bluetooth Security Manager pairing
//! engine, which is responsible for:
//! - Negotiating pairing features with the peer (phase one)
//! - Running the LE legacy confirm/random exchange (phase two)
//! - Deriving the short term key that encrypts the link
//!
//! Key distribution (phase three) is performed by the layer above once
//! the link is encrypted with the STK.

pub mod constants;
mod crypto;
mod features;
mod manager;
mod pdu;
mod phase2;
mod types;

// Re-export public API
pub use self::features::PasskeySide;
pub use self::manager::{SecurityManager, SecurityManagerConfig};
pub use self::pdu::{PairingConfirm, PairingFailed, PairingParams, PairingRandom, SecurityRequest};
pub use self::types::*;
