//! Type definitions for the transactional PDU bearer
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use thiserror::Error;

/// How a PDU participates in the request/response flow, derived from
/// its opcode by the protocol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodType {
    /// Fire-and-forget, no response expected
    Command,
    /// Local or peer request, answered by a Response
    Request,
    /// Answer to a Request
    Response,
    /// Unsolicited data, no acknowledgement
    Notification,
    /// Unsolicited data, acknowledged by a Confirmation
    Indication,
    /// Acknowledgement of an Indication
    Confirmation,
    /// Opcode not defined by the protocol
    Invalid,
}

impl MethodType {
    /// Whether a locally initiated PDU of this type awaits a peer reply.
    pub fn expects_response(&self) -> bool {
        matches!(self, MethodType::Request | MethodType::Indication)
    }
}

/// Identifier for a registered peer-PDU handler. `INVALID` (zero) is
/// returned when registration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

impl HandlerId {
    pub const INVALID: HandlerId = HandlerId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// Identifier for a peer-initiated transaction awaiting a local reply.
/// Handlers for commands and notifications receive `INVALID` since no
/// reply is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub(crate) u64);

impl TransactionId {
    pub const INVALID: TransactionId = TransactionId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a bearer stopped operating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Voluntary `shutdown()` or the channel closed underneath us
    Closed,
    /// A transaction timer fired without a completion
    TimedOut,
    /// The peer violated the request/response protocol
    ProtocolViolation,
    /// The channel refused a send
    LinkError,
}

/// Terminal status delivered to a local transaction's error callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BearerError {
    #[error("bearer closed")]
    Closed,

    #[error("transaction timed out")]
    TimedOut,

    #[error("peer error response: code {code:#04x}, handle {handle:#06x}")]
    Peer { code: u8, handle: u16 },
}

impl BearerError {
    pub(crate) fn from_shutdown(reason: ShutdownReason) -> Self {
        match reason {
            ShutdownReason::TimedOut => BearerError::TimedOut,
            _ => BearerError::Closed,
        }
    }
}

/// Decoded error-response payload. `target` is the opcode the error
/// answers; `None` means the protocol's error PDU does not name one and
/// the error applies to whatever request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDetails {
    pub target: Option<u8>,
    pub handle: u16,
    pub code: u8,
}

/// ATT-style Error Response body:
/// `request_opcode(1) | attribute_handle(2, LE) | error_code(1)`.
///
/// Protocols with this error form (ATT and its relatives) can use these
/// codecs directly in their table functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub request_opcode: u8,
    pub attribute_handle: u16,
    pub error_code: u8,
}

impl ErrorResponse {
    /// Parse from a full PDU (error-response opcode at byte 0).
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != 5 {
            return None;
        }
        Some(Self {
            request_opcode: data[1],
            attribute_handle: LittleEndian::read_u16(&data[2..4]),
            error_code: data[4],
        })
    }

    /// Serialize to a full PDU with the given error-response opcode.
    pub fn serialize(&self, error_opcode: u8) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(5);
        pdu.push(error_opcode);
        pdu.push(self.request_opcode);
        let mut handle = [0u8; 2];
        LittleEndian::write_u16(&mut handle, self.attribute_handle);
        pdu.extend_from_slice(&handle);
        pdu.push(self.error_code);
        pdu
    }
}

/// Everything protocol-specific the bearer needs, as data. One bearer
/// type serves ATT-style and SM-style channels by swapping tables.
#[derive(Clone, Copy)]
pub struct ProtocolTable {
    /// Protocol name, for logs
    pub name: &'static str,
    /// Smallest MTU the protocol permits
    pub min_mtu: u16,
    /// Opcode classification
    pub classify: fn(u8) -> MethodType,
    /// Response/confirmation opcode back to its originating opcode
    pub request_for_response: fn(u8) -> Option<u8>,
    /// Request/indication opcode to the opcode that answers it
    pub response_for_request: fn(u8) -> Option<u8>,
    /// Opcode of the protocol's error-response PDU, if it has one
    pub error_opcode: Option<u8>,
    /// Decode an error-response PDU; `None` means malformed
    pub decode_error: fn(&[u8]) -> Option<ErrorDetails>,
    /// Build an error-response PDU for (target opcode, handle, code).
    /// Absent for protocols without an error form.
    pub encode_error: Option<fn(u8, u16, u8) -> Vec<u8>>,
    /// Error code meaning "request not supported"
    pub not_supported_code: u8,
}

impl fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolTable")
            .field("name", &self.name)
            .field("min_mtu", &self.min_mtu)
            .finish()
    }
}
