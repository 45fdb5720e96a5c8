//! btsm - A Rust library for Bluetooth LE pairing
//!
//! This library implements the Security Manager pairing engine for
//! Bluetooth Low Energy links: a generic transactional bearer over one
//! fixed L2CAP channel, the SMP feature exchange, and the LE legacy
//! confirm/random exchange that derives the short term key. The owner
//! supplies the channel transport and drives inbound PDUs and timers.

pub mod bearer;
pub mod channel;
pub mod sm;

// Re-export common types for convenience
pub use bearer::{Bearer, BearerConfig, BearerError, MethodType, ProtocolTable, ShutdownReason};
pub use channel::Channel;
pub use sm::{
    AuthRequirements, DeviceAddress, IoCapability, KeyDistribution, PairingFeatures,
    PairingMethod, PairingPreferences, PairingRole, SecurityLevel, SecurityManager,
    SecurityManagerConfig, SmError, SmEvent,
};
