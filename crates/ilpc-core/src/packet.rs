//! ILP Prepare / Fulfill / Reject packets and their OER envelope.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

use crate::error::{CoreError, ErrorCode};
use crate::oer::{OerReader, OerWriteExt};

/// Length of the GeneralizedTime expiry field, `YYYYMMDDHHmmssSSS`.
const TIMESTAMP_LEN: usize = 17;

/// Offset of the execution condition inside a Prepare's contents
/// (amount + expiry). Everything after it is stable across retries.
pub const PREPARE_STATIC_DATA_OFFSET: usize = 8 + TIMESTAMP_LEN;

/// Packet type byte leading every ILP envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

impl PacketType {
    /// Peek at the type of a serialized packet without decoding it.
    pub fn of(data: &[u8]) -> Option<Self> {
        data.first().and_then(|b| Self::try_from(*b).ok())
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            12 => Ok(Self::Prepare),
            13 => Ok(Self::Fulfill),
            14 => Ok(Self::Reject),
            other => Err(CoreError::InvalidField(format!("unknown packet type: {}", other))),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "Prepare"),
            Self::Fulfill => write!(f, "Fulfill"),
            Self::Reject => write!(f, "Reject"),
        }
    }
}

/// Split an envelope into its type byte and contents.
pub fn read_envelope(data: &[u8]) -> Result<(u8, &[u8]), CoreError> {
    let mut reader = OerReader::new(data);
    let packet_type = reader.read_u8()?;
    let contents = reader.read_var_octet_string()?;
    Ok((packet_type, contents))
}

fn expect_envelope(data: &[u8], expected: PacketType) -> Result<&[u8], CoreError> {
    let (actual, contents) = read_envelope(data)?;
    if actual != expected as u8 {
        return Err(CoreError::WrongPacketType {
            expected: expected as u8,
            actual,
        });
    }
    Ok(contents)
}

fn write_envelope(packet_type: PacketType, contents: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(contents.len() + 4);
    out.put_u8(packet_type as u8);
    out.put_var_octet_string(contents);
    out.freeze()
}

fn write_timestamp(buf: &mut BytesMut, at: &DateTime<Utc>) {
    let formatted = at.format("%Y%m%d%H%M%S%3f").to_string();
    buf.put_slice(formatted.as_bytes());
}

fn read_timestamp(reader: &mut OerReader<'_>) -> Result<DateTime<Utc>, CoreError> {
    let raw = reader.read_bytes(TIMESTAMP_LEN)?;
    let text = std::str::from_utf8(raw).map_err(|_| CoreError::InvalidUtf8("expires_at"))?;
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::InvalidTimestamp(text.to_string()));
    }
    let seconds = NaiveDateTime::parse_from_str(&text[..14], "%Y%m%d%H%M%S")
        .map_err(|e| CoreError::InvalidTimestamp(format!("{}: {}", text, e)))?;
    let millis: i64 = text[14..]
        .parse()
        .map_err(|_| CoreError::InvalidTimestamp(text.to_string()))?;
    Ok(Utc.from_utc_datetime(&seconds) + Duration::milliseconds(millis))
}

/// An ILP Prepare: a conditional transfer offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub execution_condition: [u8; 32],
    pub destination: String,
    pub data: Bytes,
}

impl Prepare {
    pub fn to_bytes(&self) -> Bytes {
        let mut contents = BytesMut::with_capacity(64 + self.destination.len() + self.data.len());
        contents.put_u64(self.amount);
        write_timestamp(&mut contents, &self.expires_at);
        contents.put_slice(&self.execution_condition);
        contents.put_var_octet_string(self.destination.as_bytes());
        contents.put_var_octet_string(&self.data);
        write_envelope(PacketType::Prepare, &contents)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        let contents = expect_envelope(data, PacketType::Prepare)?;
        let mut reader = OerReader::new(contents);
        let amount = reader.read_u64()?;
        let expires_at = read_timestamp(&mut reader)?;
        let execution_condition = reader.read_array::<32>()?;
        let destination = reader.read_var_str("destination")?;
        let data = Bytes::copy_from_slice(reader.read_var_octet_string()?);
        Ok(Self {
            amount,
            expires_at,
            execution_condition,
            destination,
            data,
        })
    }
}

/// An ILP Fulfill: the preimage releasing a Prepare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfill {
    pub fulfillment: [u8; 32],
    pub data: Bytes,
}

impl Fulfill {
    pub fn to_bytes(&self) -> Bytes {
        let mut contents = BytesMut::with_capacity(34 + self.data.len());
        contents.put_slice(&self.fulfillment);
        contents.put_var_octet_string(&self.data);
        write_envelope(PacketType::Fulfill, &contents)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        let contents = expect_envelope(data, PacketType::Fulfill)?;
        let mut reader = OerReader::new(contents);
        let fulfillment = reader.read_array::<32>()?;
        let data = Bytes::copy_from_slice(reader.read_var_octet_string()?);
        Ok(Self { fulfillment, data })
    }
}

/// An ILP Reject: a Prepare refused by some node on the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub code: ErrorCode,
    pub triggered_by: String,
    pub message: String,
    pub data: Bytes,
}

impl Reject {
    pub fn to_bytes(&self) -> Bytes {
        let mut contents = BytesMut::with_capacity(
            8 + self.triggered_by.len() + self.message.len() + self.data.len(),
        );
        contents.put_slice(&self.code.as_bytes());
        contents.put_var_octet_string(self.triggered_by.as_bytes());
        contents.put_var_octet_string(self.message.as_bytes());
        contents.put_var_octet_string(&self.data);
        write_envelope(PacketType::Reject, &contents)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        let contents = expect_envelope(data, PacketType::Reject)?;
        let mut reader = OerReader::new(contents);
        let code = ErrorCode::from_bytes(reader.read_array::<3>()?);
        let triggered_by = reader.read_var_str("triggered_by")?;
        let message = reader.read_var_str("message")?;
        let data = Bytes::copy_from_slice(reader.read_var_octet_string()?);
        Ok(Self {
            code,
            triggered_by,
            message,
            data,
        })
    }
}

/// Any decoded ILP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Prepare(Prepare),
    Fulfill(Fulfill),
    Reject(Reject),
}

impl Packet {
    pub fn from_bytes(data: &[u8]) -> Result<Self, CoreError> {
        let first = *data.first().ok_or(CoreError::UnexpectedEof {
            needed: 1,
            remaining: 0,
        })?;
        match PacketType::try_from(first)? {
            PacketType::Prepare => Prepare::from_bytes(data).map(Packet::Prepare),
            PacketType::Fulfill => Fulfill::from_bytes(data).map(Packet::Fulfill),
            PacketType::Reject => Reject::from_bytes(data).map(Packet::Reject),
        }
    }
}
