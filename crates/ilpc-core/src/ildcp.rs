//! Interledger Dynamic Configuration Protocol (ILDCP).
//!
//! A child asks its parent for its address with a Prepare to `peer.config`;
//! the parent answers with a Fulfill whose data carries the assigned
//! address and the account's asset details.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ccp::{peer_protocol_prepare, PEER_PROTOCOL_FULFILLMENT};
use crate::error::CoreError;
use crate::oer::{OerReader, OerWriteExt};
use crate::packet::{Fulfill, Prepare};

pub const ILDCP_DESTINATION: &str = "peer.config";

/// Build the serialized `peer.config` request.
pub fn request_bytes() -> Bytes {
    peer_protocol_prepare(ILDCP_DESTINATION, Bytes::new()).to_bytes()
}

/// Address and asset details handed to a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IldcpResponse {
    pub client_address: String,
    pub asset_scale: u8,
    pub asset_code: String,
}

impl IldcpResponse {
    /// Serialize as a full Fulfill packet.
    pub fn to_fulfill_bytes(&self) -> Bytes {
        let mut data = BytesMut::new();
        data.put_var_octet_string(self.client_address.as_bytes());
        data.put_u8(self.asset_scale);
        data.put_var_octet_string(self.asset_code.as_bytes());
        Fulfill {
            fulfillment: PEER_PROTOCOL_FULFILLMENT,
            data: data.freeze(),
        }
        .to_bytes()
    }

    /// Decode from a serialized Fulfill.
    pub fn from_fulfill_bytes(raw: &[u8]) -> Result<Self, CoreError> {
        let fulfill = Fulfill::from_bytes(raw)?;
        let mut reader = OerReader::new(&fulfill.data);
        let client_address = reader.read_var_str("client_address")?;
        let asset_scale = reader.read_u8()?;
        let asset_code = reader.read_var_str("asset_code")?;
        Ok(Self {
            client_address,
            asset_scale,
            asset_code,
        })
    }
}

/// Whether a Prepare is an ILDCP request.
pub fn is_request(prepare: &Prepare) -> bool {
    prepare.destination == ILDCP_DESTINATION
}
