//! Connector-to-Connector Protocol (CCP) messages.
//!
//! Route control and route update requests travel as zero-amount Prepares
//! addressed to `peer.route.*` and are acknowledged with a Fulfill carrying
//! the all-zero peer-protocol fulfillment.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::oer::{OerReader, OerWriteExt};
use crate::packet::{Fulfill, Prepare};

pub const CCP_CONTROL_DESTINATION: &str = "peer.route.control";
pub const CCP_UPDATE_DESTINATION: &str = "peer.route.update";

/// Expiry applied to peer-protocol requests.
pub const PEER_PROTOCOL_EXPIRY_MS: i64 = 60_000;

pub const PEER_PROTOCOL_FULFILLMENT: [u8; 32] = [0u8; 32];

/// SHA-256 of [`PEER_PROTOCOL_FULFILLMENT`].
pub const PEER_PROTOCOL_CONDITION: [u8; 32] = [
    0x66, 0x68, 0x7a, 0xad, 0xf8, 0x62, 0xbd, 0x77, 0x6c, 0x8f, 0xc1, 0x8b, 0x8e, 0x9f, 0x8e, 0x20,
    0x08, 0x97, 0x14, 0x85, 0x6e, 0xe2, 0x33, 0xb3, 0x90, 0x2a, 0x59, 0x1d, 0x0d, 0x5f, 0x29, 0x25,
];

/// Build a peer-protocol Prepare for `destination` carrying `data`.
pub fn peer_protocol_prepare(destination: &str, data: Bytes) -> Prepare {
    Prepare {
        amount: 0,
        expires_at: Utc::now() + Duration::milliseconds(PEER_PROTOCOL_EXPIRY_MS),
        execution_condition: PEER_PROTOCOL_CONDITION,
        destination: destination.to_string(),
        data,
    }
}

/// The acknowledgement returned for every accepted CCP request.
pub fn ccp_response() -> Bytes {
    Fulfill {
        fulfillment: PEER_PROTOCOL_FULFILLMENT,
        data: Bytes::new(),
    }
    .to_bytes()
}

/// Routing mode a peer asks us to use when sending it updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Idle = 0,
    Sync = 1,
}

impl TryFrom<u8> for Mode {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Idle),
            1 => Ok(Self::Sync),
            other => Err(CoreError::InvalidField(format!("unknown ccp mode: {}", other))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Sync => write!(f, "SYNC"),
        }
    }
}

/// `peer.route.control`: sets the sender's mode and resync point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteControlRequest {
    pub mode: Mode,
    pub last_known_routing_table_id: Uuid,
    pub last_known_epoch: u32,
    pub features: Vec<String>,
}

impl RouteControlRequest {
    /// Serialize as a full ILP Prepare packet.
    pub fn to_prepare_bytes(&self) -> Bytes {
        let mut data = BytesMut::new();
        data.put_u8(self.mode as u8);
        data.put_slice(self.last_known_routing_table_id.as_bytes());
        data.put_u32(self.last_known_epoch);
        data.put_var_uint(self.features.len() as u64);
        for feature in &self.features {
            data.put_var_octet_string(feature.as_bytes());
        }
        peer_protocol_prepare(CCP_CONTROL_DESTINATION, data.freeze()).to_bytes()
    }

    /// Decode from the data field of a `peer.route.control` Prepare.
    pub fn from_prepare(prepare: &Prepare) -> Result<Self, CoreError> {
        expect_destination(prepare, CCP_CONTROL_DESTINATION)?;
        let mut reader = OerReader::new(&prepare.data);
        let mode = Mode::try_from(reader.read_u8()?)?;
        let last_known_routing_table_id = Uuid::from_bytes(reader.read_array::<16>()?);
        let last_known_epoch = reader.read_u32()?;
        let count = reader.read_var_uint()?;
        let mut features = Vec::new();
        for _ in 0..count {
            features.push(reader.read_var_str("feature")?);
        }
        Ok(Self {
            mode,
            last_known_routing_table_id,
            last_known_epoch,
            features,
        })
    }
}

/// An optional route property attached to an advertised route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteProp {
    pub is_optional: bool,
    pub is_transitive: bool,
    pub is_partial: bool,
    pub is_utf8: bool,
    pub id: u16,
    pub value: Bytes,
}

/// A route as carried in a route update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcpRoute {
    pub prefix: String,
    pub path: Vec<String>,
    pub auth: [u8; 32],
    pub props: Vec<RouteProp>,
}

/// `peer.route.update`: a contiguous slice of the sender's epoch log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdateRequest {
    pub routing_table_id: Uuid,
    pub current_epoch_index: u32,
    pub from_epoch_index: u32,
    pub to_epoch_index: u32,
    pub hold_down_time: u32,
    pub speaker: String,
    pub new_routes: Vec<CcpRoute>,
    pub withdrawn_routes: Vec<String>,
}

impl RouteUpdateRequest {
    /// Serialize as a full ILP Prepare packet.
    pub fn to_prepare_bytes(&self) -> Bytes {
        let mut data = BytesMut::new();
        data.put_slice(self.routing_table_id.as_bytes());
        data.put_u32(self.current_epoch_index);
        data.put_u32(self.from_epoch_index);
        data.put_u32(self.to_epoch_index);
        data.put_u32(self.hold_down_time);
        data.put_var_octet_string(self.speaker.as_bytes());

        data.put_var_uint(self.new_routes.len() as u64);
        for route in &self.new_routes {
            data.put_var_octet_string(route.prefix.as_bytes());
            data.put_var_uint(route.path.len() as u64);
            for hop in &route.path {
                data.put_var_octet_string(hop.as_bytes());
            }
            data.put_slice(&route.auth);
            data.put_var_uint(route.props.len() as u64);
            for prop in &route.props {
                let meta = (prop.is_optional as u8) << 7
                    | (prop.is_transitive as u8) << 6
                    | (prop.is_partial as u8) << 5
                    | (prop.is_utf8 as u8) << 4;
                data.put_u8(meta);
                data.put_u16(prop.id);
                data.put_var_octet_string(&prop.value);
            }
        }

        data.put_var_uint(self.withdrawn_routes.len() as u64);
        for prefix in &self.withdrawn_routes {
            data.put_var_octet_string(prefix.as_bytes());
        }
        peer_protocol_prepare(CCP_UPDATE_DESTINATION, data.freeze()).to_bytes()
    }

    /// Decode from the data field of a `peer.route.update` Prepare.
    pub fn from_prepare(prepare: &Prepare) -> Result<Self, CoreError> {
        expect_destination(prepare, CCP_UPDATE_DESTINATION)?;
        let mut reader = OerReader::new(&prepare.data);
        let routing_table_id = Uuid::from_bytes(reader.read_array::<16>()?);
        let current_epoch_index = reader.read_u32()?;
        let from_epoch_index = reader.read_u32()?;
        let to_epoch_index = reader.read_u32()?;
        let hold_down_time = reader.read_u32()?;
        let speaker = reader.read_var_str("speaker")?;

        let route_count = reader.read_var_uint()?;
        let mut new_routes = Vec::new();
        for _ in 0..route_count {
            let prefix = reader.read_var_str("prefix")?;
            let path_len = reader.read_var_uint()?;
            let mut path = Vec::new();
            for _ in 0..path_len {
                path.push(reader.read_var_str("path")?);
            }
            let auth = reader.read_array::<32>()?;
            let prop_count = reader.read_var_uint()?;
            let mut props = Vec::new();
            for _ in 0..prop_count {
                let meta = reader.read_u8()?;
                let id = reader.read_u16()?;
                let value = Bytes::copy_from_slice(reader.read_var_octet_string()?);
                props.push(RouteProp {
                    is_optional: meta & 0x80 != 0,
                    is_transitive: meta & 0x40 != 0,
                    is_partial: meta & 0x20 != 0,
                    is_utf8: meta & 0x10 != 0,
                    id,
                    value,
                });
            }
            new_routes.push(CcpRoute {
                prefix,
                path,
                auth,
                props,
            });
        }

        let withdrawn_count = reader.read_var_uint()?;
        let mut withdrawn_routes = Vec::new();
        for _ in 0..withdrawn_count {
            withdrawn_routes.push(reader.read_var_str("withdrawn prefix")?);
        }

        Ok(Self {
            routing_table_id,
            current_epoch_index,
            from_epoch_index,
            to_epoch_index,
            hold_down_time,
            speaker,
            new_routes,
            withdrawn_routes,
        })
    }
}

fn expect_destination(prepare: &Prepare, expected: &str) -> Result<(), CoreError> {
    if prepare.destination != expected {
        return Err(CoreError::InvalidField(format!(
            "expected destination {}, got {}",
            expected, prepare.destination
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::sha256;

    #[test]
    fn test_peer_protocol_condition_matches_fulfillment() {
        assert_eq!(sha256(&PEER_PROTOCOL_FULFILLMENT), PEER_PROTOCOL_CONDITION);
    }

    #[test]
    fn test_route_control_wire_layout() {
        let control = RouteControlRequest {
            mode: Mode::Sync,
            last_known_routing_table_id: Uuid::nil(),
            last_known_epoch: 7,
            features: vec!["foo".into()],
        };
        let prepare = Prepare::from_bytes(&control.to_prepare_bytes()).unwrap();
        assert_eq!(prepare.destination, CCP_CONTROL_DESTINATION);
        assert_eq!(prepare.amount, 0);
        assert_eq!(prepare.execution_condition, PEER_PROTOCOL_CONDITION);
        assert_eq!(prepare.data[0], 1);
        assert_eq!(&prepare.data[17..21], &7u32.to_be_bytes());
        assert_eq!(RouteControlRequest::from_prepare(&prepare).unwrap(), control);
    }

    #[test]
    fn test_route_update_with_routes_and_props() {
        let update = RouteUpdateRequest {
            routing_table_id: Uuid::new_v4(),
            current_epoch_index: 52,
            from_epoch_index: 0,
            to_epoch_index: 50,
            hold_down_time: 45_000,
            speaker: "test.alice".into(),
            new_routes: vec![CcpRoute {
                prefix: "test.bob".into(),
                path: vec!["test.alice".into(), "test.bob".into()],
                auth: [7; 32],
                props: vec![RouteProp {
                    is_optional: true,
                    is_transitive: false,
                    is_partial: false,
                    is_utf8: true,
                    id: 9,
                    value: Bytes::from_static(b"x"),
                }],
            }],
            withdrawn_routes: vec!["test.carol".into()],
        };
        let prepare = Prepare::from_bytes(&update.to_prepare_bytes()).unwrap();
        assert_eq!(RouteUpdateRequest::from_prepare(&prepare).unwrap(), update);
    }

    #[test]
    fn test_from_prepare_checks_destination() {
        let prepare = peer_protocol_prepare("peer.config", Bytes::new());
        assert!(RouteControlRequest::from_prepare(&prepare).is_err());
    }

    #[test]
    fn test_unknown_mode_fails() {
        let mut data = vec![5u8];
        data.extend_from_slice(&[0; 20]);
        data.push(1);
        data.push(0);
        let prepare = peer_protocol_prepare(CCP_CONTROL_DESTINATION, Bytes::from(data));
        assert!(matches!(
            RouteControlRequest::from_prepare(&prepare),
            Err(CoreError::InvalidField(_))
        ));
    }
}
