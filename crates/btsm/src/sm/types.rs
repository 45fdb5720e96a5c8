//! Type definitions for the Security Manager
use super::constants::*;
use std::fmt;
use thiserror::Error;

/// SM error types. The first group mirrors the Pairing Failed reason
/// codes and crosses the wire; the rest are local conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SmError {
    #[error("Passkey entry failed")]
    PasskeyEntryFailed,

    #[error("OOB data not available")]
    OobNotAvailable,

    #[error("Authentication requirements not met")]
    AuthenticationRequirements,

    #[error("Confirm value failed")]
    ConfirmValueFailed,

    #[error("Pairing not supported")]
    PairingNotSupported,

    #[error("Encryption key size issue")]
    EncryptionKeySize,

    #[error("Command not supported")]
    CommandNotSupported,

    #[error("Unspecified reason")]
    UnspecifiedReason,

    #[error("Too many pairing attempts")]
    RepeatedAttempts,

    #[error("Invalid parameters")]
    InvalidParameters,

    #[error("Operation timeout")]
    Timeout,

    #[error("Link disconnected")]
    LinkDisconnected,

    #[error("Operation not supported in this role")]
    NotSupported,

    #[error("Invalid state for operation")]
    InvalidState,
}

impl SmError {
    /// The Pairing Failed reason code for this error. Local-only errors
    /// map to the unspecified reason when they must cross the wire.
    pub fn reason_code(&self) -> u8 {
        match self {
            SmError::PasskeyEntryFailed => SMP_REASON_PASSKEY_ENTRY_FAILED,
            SmError::OobNotAvailable => SMP_REASON_OOB_NOT_AVAILABLE,
            SmError::AuthenticationRequirements => SMP_REASON_AUTHENTICATION_REQUIREMENTS,
            SmError::ConfirmValueFailed => SMP_REASON_CONFIRM_VALUE_FAILED,
            SmError::PairingNotSupported => SMP_REASON_PAIRING_NOT_SUPPORTED,
            SmError::EncryptionKeySize => SMP_REASON_ENCRYPTION_KEY_SIZE,
            SmError::CommandNotSupported => SMP_REASON_COMMAND_NOT_SUPPORTED,
            SmError::RepeatedAttempts => SMP_REASON_REPEATED_ATTEMPTS,
            SmError::InvalidParameters => SMP_REASON_INVALID_PARAMETERS,
            _ => SMP_REASON_UNSPECIFIED_REASON,
        }
    }

    /// Convert a peer's Pairing Failed reason code.
    pub fn from_reason(code: u8) -> Self {
        match code {
            SMP_REASON_PASSKEY_ENTRY_FAILED => SmError::PasskeyEntryFailed,
            SMP_REASON_OOB_NOT_AVAILABLE => SmError::OobNotAvailable,
            SMP_REASON_AUTHENTICATION_REQUIREMENTS => SmError::AuthenticationRequirements,
            SMP_REASON_CONFIRM_VALUE_FAILED => SmError::ConfirmValueFailed,
            SMP_REASON_PAIRING_NOT_SUPPORTED => SmError::PairingNotSupported,
            SMP_REASON_ENCRYPTION_KEY_SIZE => SmError::EncryptionKeySize,
            SMP_REASON_COMMAND_NOT_SUPPORTED => SmError::CommandNotSupported,
            SMP_REASON_REPEATED_ATTEMPTS => SmError::RepeatedAttempts,
            SMP_REASON_INVALID_PARAMETERS => SmError::InvalidParameters,
            _ => SmError::UnspecifiedReason,
        }
    }
}

/// Result type for SM operations
pub type SmResult<T> = Result<T, SmError>;

/// IO Capability types for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCapability {
    /// Display only capability
    DisplayOnly,
    /// Display with yes/no capability
    DisplayYesNo,
    /// Keyboard only
    KeyboardOnly,
    /// No input, no output
    NoInputNoOutput,
    /// Both keyboard and display
    KeyboardDisplay,
}

impl IoCapability {
    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        match self {
            IoCapability::DisplayOnly => SMP_IO_CAPABILITY_DISPLAY_ONLY,
            IoCapability::DisplayYesNo => SMP_IO_CAPABILITY_DISPLAY_YES_NO,
            IoCapability::KeyboardOnly => SMP_IO_CAPABILITY_KEYBOARD_ONLY,
            IoCapability::NoInputNoOutput => SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT,
            IoCapability::KeyboardDisplay => SMP_IO_CAPABILITY_KEYBOARD_DISPLAY,
        }
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            SMP_IO_CAPABILITY_DISPLAY_ONLY => Some(IoCapability::DisplayOnly),
            SMP_IO_CAPABILITY_DISPLAY_YES_NO => Some(IoCapability::DisplayYesNo),
            SMP_IO_CAPABILITY_KEYBOARD_ONLY => Some(IoCapability::KeyboardOnly),
            SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT => Some(IoCapability::NoInputNoOutput),
            SMP_IO_CAPABILITY_KEYBOARD_DISPLAY => Some(IoCapability::KeyboardDisplay),
            _ => None,
        }
    }

    /// Whether this capability can show a passkey to the user
    pub fn can_display(&self) -> bool {
        matches!(
            self,
            IoCapability::DisplayOnly | IoCapability::DisplayYesNo | IoCapability::KeyboardDisplay
        )
    }

    /// Whether this capability can take a passkey from the user
    pub fn can_input(&self) -> bool {
        matches!(
            self,
            IoCapability::KeyboardOnly | IoCapability::KeyboardDisplay
        )
    }
}

impl fmt::Display for IoCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoCapability::DisplayOnly => write!(f, "Display Only"),
            IoCapability::DisplayYesNo => write!(f, "Display Yes/No"),
            IoCapability::KeyboardOnly => write!(f, "Keyboard Only"),
            IoCapability::NoInputNoOutput => write!(f, "No Input No Output"),
            IoCapability::KeyboardDisplay => write!(f, "Keyboard Display"),
        }
    }
}

/// Pairing methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMethod {
    /// Just Works method - no user interaction
    JustWorks,
    /// Passkey Entry - one device enters a passkey
    PasskeyEntry,
    /// Numeric Comparison - user confirms matching numbers
    NumericComparison,
    /// Out of Band data
    OutOfBand,
}

impl PairingMethod {
    /// Whether the method protects against man-in-the-middle attacks
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, PairingMethod::JustWorks)
    }
}

impl fmt::Display for PairingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingMethod::JustWorks => write!(f, "Just Works"),
            PairingMethod::PasskeyEntry => write!(f, "Passkey Entry"),
            PairingMethod::NumericComparison => write!(f, "Numeric Comparison"),
            PairingMethod::OutOfBand => write!(f, "Out of Band"),
        }
    }
}

/// Authentication requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRequirements {
    /// Whether bonding is required
    pub bonding: bool,
    /// Whether MITM protection is required
    pub mitm: bool,
    /// Whether Secure Connections is supported
    pub secure_connections: bool,
    /// Whether keypress notifications are required
    pub keypress_notifications: bool,
    /// Whether CT2 feature is supported
    pub ct2: bool,
}

impl AuthRequirements {
    /// Create new authentication requirements
    pub fn new(bonding: bool, mitm: bool, secure_connections: bool) -> Self {
        Self {
            bonding,
            mitm,
            secure_connections,
            keypress_notifications: false,
            ct2: false,
        }
    }

    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        let mut value = 0;

        if self.bonding {
            value |= SMP_AUTH_REQ_BONDING;
        }

        if self.mitm {
            value |= SMP_AUTH_REQ_MITM;
        }

        if self.secure_connections {
            value |= SMP_AUTH_REQ_SC;
        }

        if self.keypress_notifications {
            value |= SMP_AUTH_REQ_KEYPRESS;
        }

        if self.ct2 {
            value |= SMP_AUTH_REQ_CT2;
        }

        value
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Self {
        Self {
            bonding: (value & SMP_AUTH_REQ_BONDING) != 0,
            mitm: (value & SMP_AUTH_REQ_MITM) != 0,
            secure_connections: (value & SMP_AUTH_REQ_SC) != 0,
            keypress_notifications: (value & SMP_AUTH_REQ_KEYPRESS) != 0,
            ct2: (value & SMP_AUTH_REQ_CT2) != 0,
        }
    }
}

impl Default for AuthRequirements {
    fn default() -> Self {
        Self {
            bonding: true,
            mitm: false,
            secure_connections: false,
            keypress_notifications: false,
            ct2: false,
        }
    }
}

/// Key distribution preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDistribution {
    /// Encryption key (LTK, EDIV, RAND)
    pub encryption_key: bool,
    /// Identity key (IRK, public address)
    pub identity_key: bool,
    /// Signing key (CSRK)
    pub signing_key: bool,
    /// Link key derivation
    pub link_key: bool,
}

impl KeyDistribution {
    /// Create with default values (all LE keys distributed)
    pub fn all() -> Self {
        Self {
            encryption_key: true,
            identity_key: true,
            signing_key: true,
            link_key: false,
        }
    }

    /// Create with all keys disabled
    pub fn none() -> Self {
        Self {
            encryption_key: false,
            identity_key: false,
            signing_key: false,
            link_key: false,
        }
    }

    /// Keep only the keys both sides agreed to distribute
    pub fn intersect(&self, other: &KeyDistribution) -> Self {
        Self {
            encryption_key: self.encryption_key && other.encryption_key,
            identity_key: self.identity_key && other.identity_key,
            signing_key: self.signing_key && other.signing_key,
            link_key: self.link_key && other.link_key,
        }
    }

    /// Convert to u8 value for protocol
    pub fn to_u8(&self) -> u8 {
        let mut value = 0;

        if self.encryption_key {
            value |= SMP_KEY_DIST_ENC_KEY;
        }

        if self.identity_key {
            value |= SMP_KEY_DIST_ID_KEY;
        }

        if self.signing_key {
            value |= SMP_KEY_DIST_SIGN_KEY;
        }

        if self.link_key {
            value |= SMP_KEY_DIST_LINK_KEY;
        }

        value
    }

    /// Convert from u8 value from protocol
    pub fn from_u8(value: u8) -> Self {
        Self {
            encryption_key: (value & SMP_KEY_DIST_ENC_KEY) != 0,
            identity_key: (value & SMP_KEY_DIST_ID_KEY) != 0,
            signing_key: (value & SMP_KEY_DIST_SIGN_KEY) != 0,
            link_key: (value & SMP_KEY_DIST_LINK_KEY) != 0,
        }
    }
}

/// Pairing Role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingRole {
    /// Initiator of the pairing (the Central device)
    Initiator,
    /// Responder to pairing (the Peripheral device)
    Responder,
}

/// LE address type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Public,
    Random,
}

impl AddressType {
    pub fn to_u8(&self) -> u8 {
        match self {
            AddressType::Public => SMP_ADDR_TYPE_PUBLIC,
            AddressType::Random => SMP_ADDR_TYPE_RANDOM,
        }
    }
}

/// A device address as used by the pairing confirm computation, most
/// significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    pub addr_type: AddressType,
    pub addr: [u8; 6],
}

impl DeviceAddress {
    pub fn public(addr: [u8; 6]) -> Self {
        Self {
            addr_type: AddressType::Public,
            addr,
        }
    }

    pub fn random(addr: [u8; 6]) -> Self {
        Self {
            addr_type: AddressType::Random,
            addr,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.addr[4], self.addr[5]
        )
    }
}

/// Local pairing preferences advertised in the feature exchange
#[derive(Debug, Clone)]
pub struct PairingPreferences {
    /// IO Capability
    pub io_capability: IoCapability,
    /// OOB temporary key shared over another transport, if any
    pub oob_data: Option<[u8; 16]>,
    /// Authentication requirements
    pub auth_req: AuthRequirements,
    /// Maximum encryption key size (7-16)
    pub max_key_size: u8,
    /// Keys offered for the initiator to distribute
    pub initiator_key_dist: KeyDistribution,
    /// Keys offered for the responder to distribute
    pub responder_key_dist: KeyDistribution,
}

impl Default for PairingPreferences {
    fn default() -> Self {
        Self {
            io_capability: IoCapability::NoInputNoOutput,
            oob_data: None,
            auth_req: AuthRequirements::default(),
            max_key_size: SMP_MAX_ENCRYPTION_KEY_SIZE,
            initiator_key_dist: KeyDistribution::all(),
            responder_key_dist: KeyDistribution::all(),
        }
    }
}

/// The result of the feature exchange, fixed for the rest of the
/// pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingFeatures {
    /// Local role in this pairing
    pub role: PairingRole,
    /// Selected association method
    pub method: PairingMethod,
    /// Both sides set the Secure Connections bit
    pub secure_connections: bool,
    /// The pairing yields an authenticated key
    pub mitm: bool,
    /// Negotiated encryption key size, min of the two maxima
    pub encryption_key_size: u8,
    /// Keys the initiator will distribute
    pub initiator_key_dist: KeyDistribution,
    /// Keys the responder will distribute
    pub responder_key_dist: KeyDistribution,
}

/// Security level of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    /// No security (unencrypted)
    None = 0,
    /// Encryption without authentication (Just Works)
    EncryptionOnly = 1,
    /// Encryption with authentication (MITM protection)
    EncryptionWithAuthentication = 2,
}

impl SecurityLevel {
    /// Check if this security level includes encryption
    pub fn is_encrypted(&self) -> bool {
        *self >= SecurityLevel::EncryptionOnly
    }

    /// Check if this security level includes authentication
    pub fn is_authenticated(&self) -> bool {
        *self >= SecurityLevel::EncryptionWithAuthentication
    }
}

/// SM event types for callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmEvent {
    /// Feature exchange finished; phase two is starting
    FeatureExchangeComplete(PairingFeatures),
    /// Pairing finished successfully
    PairingComplete(PairingFeatures),
    /// Pairing ended in failure
    PairingFailed(SmError),
    /// Short term key ready for link encryption
    StkReady {
        stk: [u8; 16],
        encryption_key_size: u8,
    },
    /// Show this passkey to the user; the peer will enter it
    DisplayPasskey(u32),
    /// Ask the user for the passkey shown on the peer, then call
    /// `provide_passkey`
    PasskeyRequest,
    /// Peer peripheral asked for security with these requirements
    PeerSecurityRequest(AuthRequirements),
}

/// Callback for SM events
pub type EventCallback = Box<dyn FnMut(&SmEvent)>;

/// Callback resolving one `update_security` call
pub type SecurityResultCallback = Box<dyn FnOnce(SmResult<()>)>;
