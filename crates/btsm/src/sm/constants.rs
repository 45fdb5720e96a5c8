//! Constants for the Security Manager Protocol

// SMP command codes
pub const SMP_PAIRING_REQUEST: u8 = 0x01;
pub const SMP_PAIRING_RESPONSE: u8 = 0x02;
pub const SMP_PAIRING_CONFIRM: u8 = 0x03;
pub const SMP_PAIRING_RANDOM: u8 = 0x04;
pub const SMP_PAIRING_FAILED: u8 = 0x05;
pub const SMP_SECURITY_REQUEST: u8 = 0x0B;

// SMP fixed channel ID on LE links
pub const SMP_CID: u16 = 0x0006;

// IO Capability values
pub const SMP_IO_CAPABILITY_DISPLAY_ONLY: u8 = 0x00;
pub const SMP_IO_CAPABILITY_DISPLAY_YES_NO: u8 = 0x01;
pub const SMP_IO_CAPABILITY_KEYBOARD_ONLY: u8 = 0x02;
pub const SMP_IO_CAPABILITY_NO_INPUT_NO_OUTPUT: u8 = 0x03;
pub const SMP_IO_CAPABILITY_KEYBOARD_DISPLAY: u8 = 0x04;

// Authentication Requirements bit masks
pub const SMP_AUTH_REQ_BONDING: u8 = 0x01;
pub const SMP_AUTH_REQ_MITM: u8 = 0x04;
pub const SMP_AUTH_REQ_SC: u8 = 0x08;
pub const SMP_AUTH_REQ_KEYPRESS: u8 = 0x10;
pub const SMP_AUTH_REQ_CT2: u8 = 0x20;

// Pairing Failed reason codes
pub const SMP_REASON_PASSKEY_ENTRY_FAILED: u8 = 0x01;
pub const SMP_REASON_OOB_NOT_AVAILABLE: u8 = 0x02;
pub const SMP_REASON_AUTHENTICATION_REQUIREMENTS: u8 = 0x03;
pub const SMP_REASON_CONFIRM_VALUE_FAILED: u8 = 0x04;
pub const SMP_REASON_PAIRING_NOT_SUPPORTED: u8 = 0x05;
pub const SMP_REASON_ENCRYPTION_KEY_SIZE: u8 = 0x06;
pub const SMP_REASON_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SMP_REASON_UNSPECIFIED_REASON: u8 = 0x08;
pub const SMP_REASON_REPEATED_ATTEMPTS: u8 = 0x09;
pub const SMP_REASON_INVALID_PARAMETERS: u8 = 0x0A;

// SMP key distribution bit masks
pub const SMP_KEY_DIST_ENC_KEY: u8 = 0x01;
pub const SMP_KEY_DIST_ID_KEY: u8 = 0x02;
pub const SMP_KEY_DIST_SIGN_KEY: u8 = 0x04;
pub const SMP_KEY_DIST_LINK_KEY: u8 = 0x08;

// SMP encryption key size limits
pub const SMP_MIN_ENCRYPTION_KEY_SIZE: u8 = 7;
pub const SMP_MAX_ENCRYPTION_KEY_SIZE: u8 = 16;

// Smallest MTU an SMP channel may use on LE
pub const SMP_MIN_MTU: u16 = 23;

// SMP timeout values (in milliseconds)
pub const SMP_TIMEOUT_GENERAL: u64 = 30000; // 30 seconds between pairing PDUs
pub const SMP_TIMEOUT_TRANSACTION: u64 = 30000; // 30 seconds per request

// Largest passkey value: six decimal digits
pub const SMP_MAX_PASSKEY: u32 = 999_999;

// SMP address types
pub const SMP_ADDR_TYPE_PUBLIC: u8 = 0x00;
pub const SMP_ADDR_TYPE_RANDOM: u8 = 0x01;
