use std::sync::Arc;

use bytes::Bytes;
use ilpc_core::ildcp::IldcpResponse;
use ilpc_core::{Accounts, IlpError};

/// Answers `peer.config` requests from children with their address.
pub struct IldcpHostController {
    accounts: Arc<Accounts>,
}

impl IldcpHostController {
    pub fn new(accounts: Arc<Accounts>) -> Self {
        Self { accounts }
    }

    pub fn handle(&self, source_account: &str) -> Result<Bytes, IlpError> {
        let client_address = self.accounts.child_address(source_account)?;
        let info = self.accounts.info(source_account)?;
        tracing::trace!(client_address = %client_address, "responding to ILDCP config request");
        Ok(IldcpResponse {
            client_address,
            asset_scale: info.asset_scale,
            asset_code: info.asset_code,
        }
        .to_fulfill_bytes())
    }
}
