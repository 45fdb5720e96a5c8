//! Wire codecs for the Security Manager PDUs
//!
//! Multi-octet fields are transmitted least significant octet first.
//! The codecs here reverse 128-bit values on the way in and out so the
//! rest of the crate works in value order (most significant byte
//! first), matching the form the pairing crypto uses.

use super::constants::*;
use super::types::*;

/// Pairing request/response parameter block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingParams {
    /// IO capability
    pub io_capability: u8,
    /// OOB data flag
    pub oob_data_present: u8,
    /// Authentication requirements
    pub auth_req: u8,
    /// Maximum encryption key size
    pub max_key_size: u8,
    /// Initiator key distribution
    pub initiator_key_dist: u8,
    /// Responder key distribution
    pub responder_key_dist: u8,
}

impl PairingParams {
    /// Build from local preferences.
    pub fn from_preferences(prefs: &PairingPreferences) -> Self {
        Self {
            io_capability: prefs.io_capability.to_u8(),
            oob_data_present: if prefs.oob_data.is_some() { 1 } else { 0 },
            auth_req: prefs.auth_req.to_u8(),
            max_key_size: prefs.max_key_size,
            initiator_key_dist: prefs.initiator_key_dist.to_u8(),
            responder_key_dist: prefs.responder_key_dist.to_u8(),
        }
    }

    /// Parse from a raw packet. The length must be exact and the fixed
    /// fields in range; anything else is `InvalidParameters`.
    pub fn parse(data: &[u8]) -> SmResult<Self> {
        if data.len() != 7 {
            return Err(SmError::InvalidParameters);
        }
        let params = Self {
            io_capability: data[1],
            oob_data_present: data[2],
            auth_req: data[3],
            max_key_size: data[4],
            initiator_key_dist: data[5],
            responder_key_dist: data[6],
        };
        if IoCapability::from_u8(params.io_capability).is_none() {
            return Err(SmError::InvalidParameters);
        }
        if params.oob_data_present > 1 {
            return Err(SmError::InvalidParameters);
        }
        // Values above 16 are reserved. Sizes below the minimum are
        // well-formed on the wire; feature resolution rejects them
        // with the key size reason.
        if params.max_key_size > SMP_MAX_ENCRYPTION_KEY_SIZE {
            return Err(SmError::InvalidParameters);
        }
        Ok(params)
    }

    /// Serialize to a raw packet
    pub fn serialize(&self, opcode: u8) -> Vec<u8> {
        let mut packet = Vec::with_capacity(7);

        packet.push(opcode);
        packet.push(self.io_capability);
        packet.push(self.oob_data_present);
        packet.push(self.auth_req);
        packet.push(self.max_key_size);
        packet.push(self.initiator_key_dist);
        packet.push(self.responder_key_dist);

        packet
    }

    /// The seven PDU bytes in transmitted order, as the confirm value
    /// generation function consumes them.
    pub fn to_bytes(&self, opcode: u8) -> [u8; 7] {
        [
            opcode,
            self.io_capability,
            self.oob_data_present,
            self.auth_req,
            self.max_key_size,
            self.initiator_key_dist,
            self.responder_key_dist,
        ]
    }
}

/// Pairing confirm packet, value in most-significant-byte-first order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfirm {
    /// Confirm value
    pub confirm_value: [u8; 16],
}

impl PairingConfirm {
    pub fn new(confirm_value: [u8; 16]) -> Self {
        Self { confirm_value }
    }

    /// Parse from a raw packet
    pub fn parse(data: &[u8]) -> SmResult<Self> {
        Ok(Self {
            confirm_value: parse_value_128(data)?,
        })
    }

    /// Serialize to a raw packet
    pub fn serialize(&self) -> Vec<u8> {
        serialize_value_128(SMP_PAIRING_CONFIRM, &self.confirm_value)
    }
}

/// Pairing random packet, value in most-significant-byte-first order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingRandom {
    /// Random value
    pub random_value: [u8; 16],
}

impl PairingRandom {
    pub fn new(random_value: [u8; 16]) -> Self {
        Self { random_value }
    }

    /// Parse from a raw packet
    pub fn parse(data: &[u8]) -> SmResult<Self> {
        Ok(Self {
            random_value: parse_value_128(data)?,
        })
    }

    /// Serialize to a raw packet
    pub fn serialize(&self) -> Vec<u8> {
        serialize_value_128(SMP_PAIRING_RANDOM, &self.random_value)
    }
}

/// Pairing failed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFailed {
    /// Reason code
    pub reason: u8,
}

impl PairingFailed {
    pub fn new(error: SmError) -> Self {
        Self {
            reason: error.reason_code(),
        }
    }

    /// Parse from a raw packet
    pub fn parse(data: &[u8]) -> SmResult<Self> {
        if data.len() != 2 {
            return Err(SmError::InvalidParameters);
        }
        Ok(Self { reason: data[1] })
    }

    /// Serialize to a raw packet
    pub fn serialize(&self) -> Vec<u8> {
        vec![SMP_PAIRING_FAILED, self.reason]
    }

    /// Map the reason code to an error
    pub fn to_error(&self) -> SmError {
        SmError::from_reason(self.reason)
    }
}

/// Security request packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityRequest {
    /// Authentication requirements
    pub auth_req: u8,
}

impl SecurityRequest {
    pub fn new(auth_req: AuthRequirements) -> Self {
        Self {
            auth_req: auth_req.to_u8(),
        }
    }

    /// Parse from a raw packet
    pub fn parse(data: &[u8]) -> SmResult<Self> {
        if data.len() != 2 {
            return Err(SmError::InvalidParameters);
        }
        Ok(Self { auth_req: data[1] })
    }

    /// Serialize to a raw packet
    pub fn serialize(&self) -> Vec<u8> {
        vec![SMP_SECURITY_REQUEST, self.auth_req]
    }
}

fn parse_value_128(data: &[u8]) -> SmResult<[u8; 16]> {
    if data.len() != 17 {
        return Err(SmError::InvalidParameters);
    }
    let mut value = [0u8; 16];
    for (i, b) in data[1..17].iter().enumerate() {
        value[15 - i] = *b;
    }
    Ok(value)
}

fn serialize_value_128(opcode: u8, value: &[u8; 16]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(17);
    packet.push(opcode);
    packet.extend(value.iter().rev());
    packet
}
