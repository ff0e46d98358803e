use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::packet::Reject;

/// Core errors: wire decoding, account lookups, and configuration.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("wrong packet type: expected {expected}, got {actual}")]
    WrongPacketType { expected: u8, actual: u8 },

    #[error("invalid length prefix: {0}")]
    InvalidLength(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid utf-8 in field {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid field value: {0}")]
    InvalidField(String),

    #[error("unknown account id: {0}")]
    UnknownAccount(String),

    #[error("account already exists: {0}")]
    DuplicateAccount(String),

    #[error("can't generate child address for account that isn't a child: {0}")]
    NotAChild(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid rate: {0}")]
    InvalidRate(String),

    #[error("arithmetic overflow while computing {0}")]
    Overflow(&'static str),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("config encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

/// Transport-level failures raised by a plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin is not connected")]
    NotConnected,

    #[error("no handler registered on the remote end")]
    NoHandler,

    #[error("a {0} handler is already registered")]
    HandlerAlreadyRegistered(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Ilp(#[from] IlpError),
}

/// ILP error codes as carried in Reject packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    F00BadRequest,
    F01InvalidPacket,
    F02Unreachable,
    F03InvalidAmount,
    F04InsufficientDestinationAmount,
    F05WrongCondition,
    F06UnexpectedPayment,
    F07CannotReceive,
    F08AmountTooLarge,
    F99ApplicationError,
    T00InternalError,
    T01PeerUnreachable,
    T02PeerBusy,
    T03ConnectorBusy,
    T04InsufficientLiquidity,
    T05RateLimited,
    T99ApplicationError,
    R00TransferTimedOut,
    R01InsufficientSourceAmount,
    R02InsufficientTimeout,
    R99ApplicationError,
    /// A code this node does not know by name, kept verbatim.
    Other([u8; 3]),
}

impl ErrorCode {
    /// The three-character wire form, e.g. `F02`.
    pub fn as_bytes(&self) -> [u8; 3] {
        let s: &[u8; 3] = match self {
            Self::F00BadRequest => b"F00",
            Self::F01InvalidPacket => b"F01",
            Self::F02Unreachable => b"F02",
            Self::F03InvalidAmount => b"F03",
            Self::F04InsufficientDestinationAmount => b"F04",
            Self::F05WrongCondition => b"F05",
            Self::F06UnexpectedPayment => b"F06",
            Self::F07CannotReceive => b"F07",
            Self::F08AmountTooLarge => b"F08",
            Self::F99ApplicationError => b"F99",
            Self::T00InternalError => b"T00",
            Self::T01PeerUnreachable => b"T01",
            Self::T02PeerBusy => b"T02",
            Self::T03ConnectorBusy => b"T03",
            Self::T04InsufficientLiquidity => b"T04",
            Self::T05RateLimited => b"T05",
            Self::T99ApplicationError => b"T99",
            Self::R00TransferTimedOut => b"R00",
            Self::R01InsufficientSourceAmount => b"R01",
            Self::R02InsufficientTimeout => b"R02",
            Self::R99ApplicationError => b"R99",
            Self::Other(raw) => raw,
        };
        *s
    }

    /// Parse the three-byte wire form. Unknown codes are preserved as `Other`.
    pub fn from_bytes(raw: [u8; 3]) -> Self {
        match &raw {
            b"F00" => Self::F00BadRequest,
            b"F01" => Self::F01InvalidPacket,
            b"F02" => Self::F02Unreachable,
            b"F03" => Self::F03InvalidAmount,
            b"F04" => Self::F04InsufficientDestinationAmount,
            b"F05" => Self::F05WrongCondition,
            b"F06" => Self::F06UnexpectedPayment,
            b"F07" => Self::F07CannotReceive,
            b"F08" => Self::F08AmountTooLarge,
            b"F99" => Self::F99ApplicationError,
            b"T00" => Self::T00InternalError,
            b"T01" => Self::T01PeerUnreachable,
            b"T02" => Self::T02PeerBusy,
            b"T03" => Self::T03ConnectorBusy,
            b"T04" => Self::T04InsufficientLiquidity,
            b"T05" => Self::T05RateLimited,
            b"T99" => Self::T99ApplicationError,
            b"R00" => Self::R00TransferTimedOut,
            b"R01" => Self::R01InsufficientSourceAmount,
            b"R02" => Self::R02InsufficientTimeout,
            b"R99" => Self::R99ApplicationError,
            _ => Self::Other(raw),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.as_bytes();
        write!(f, "{}", String::from_utf8_lossy(&raw))
    }
}

/// A protocol-level failure that is reported to the sender as an ILP Reject.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct IlpError {
    pub code: ErrorCode,
    pub message: String,
    /// Address of the node that raised the error. Filled in with this
    /// node's own address when converted to a Reject, if absent.
    pub triggered_by: Option<String>,
    pub data: Bytes,
}

impl IlpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            triggered_by: None,
            data: Bytes::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::F00BadRequest, message)
    }

    pub fn invalid_packet(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::F01InvalidPacket, message)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::F02Unreachable, message)
    }

    pub fn wrong_condition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::F05WrongCondition, message)
    }

    pub fn amount_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::F08AmountTooLarge, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::T00InternalError, message)
    }

    pub fn peer_unreachable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::T01PeerUnreachable, message)
    }

    pub fn insufficient_liquidity(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::T04InsufficientLiquidity, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::T05RateLimited, message)
    }

    pub fn transfer_timed_out(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::R00TransferTimedOut, message)
    }

    pub fn insufficient_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::R02InsufficientTimeout, message)
    }

    /// Attach opaque data to be carried in the Reject.
    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    /// Build the Reject packet for this error, as seen from `own_address`.
    pub fn to_reject(&self, own_address: &str) -> Reject {
        Reject {
            code: self.code,
            triggered_by: self
                .triggered_by
                .clone()
                .unwrap_or_else(|| own_address.to_string()),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

impl From<Reject> for IlpError {
    fn from(reject: Reject) -> Self {
        Self {
            code: reject.code,
            message: reject.message,
            triggered_by: Some(reject.triggered_by),
            data: reject.data,
        }
    }
}

impl From<CoreError> for IlpError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnexpectedEof { .. }
            | CoreError::WrongPacketType { .. }
            | CoreError::InvalidLength(_)
            | CoreError::InvalidTimestamp(_)
            | CoreError::InvalidUtf8(_)
            | CoreError::InvalidField(_) => IlpError::invalid_packet(err.to_string()),
            CoreError::UnknownAccount(_) => IlpError::unreachable(err.to_string()),
            _ => IlpError::internal(err.to_string()),
        }
    }
}
