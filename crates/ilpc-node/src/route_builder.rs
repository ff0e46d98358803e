//! Next-hop selection and construction of the outgoing prepare.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ilpc_core::{Accounts, ConnectorConfig, IlpError, Prepare};
use ilpc_routing::RoutingTable;

use crate::rate_backend::RateBackend;

#[derive(Debug, Clone)]
pub struct RouteBuilderConfig {
    /// Time reserved between our outgoing expiry and the incoming one.
    pub min_message_window: Duration,
    pub max_hold_time: Duration,
    /// Allow forwarding a packet back to the account it came from.
    pub reflect_payments: bool,
}

impl RouteBuilderConfig {
    pub fn from_connector_config(config: &ConnectorConfig) -> Self {
        Self {
            min_message_window: Duration::milliseconds(config.min_message_window_ms as i64),
            max_hold_time: Duration::milliseconds(config.max_hold_time_ms as i64),
            reflect_payments: config.reflect_payments,
        }
    }
}

pub struct RouteBuilder {
    accounts: Arc<Accounts>,
    routing_table: Arc<RoutingTable>,
    backend: Arc<dyn RateBackend>,
    config: RouteBuilderConfig,
}

impl RouteBuilder {
    pub fn new(
        accounts: Arc<Accounts>,
        routing_table: Arc<RoutingTable>,
        backend: Arc<dyn RateBackend>,
        config: RouteBuilderConfig,
    ) -> Self {
        Self {
            accounts,
            routing_table,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &RouteBuilderConfig {
        &self.config
    }

    /// The account to forward a packet for `destination` to.
    pub fn get_next_hop(&self, source_account: &str, destination: &str) -> Result<String, IlpError> {
        // routes to ourselves carry no next hop
        let route = self
            .routing_table
            .resolve(destination)
            .filter(|route| !route.next_hop.is_empty())
            .ok_or_else(|| {
                tracing::debug!(destination = %destination, "no route found");
                IlpError::unreachable(format!(
                    "no route found. source={} destination={}",
                    source_account, destination
                ))
            })?;

        if !self.config.reflect_payments && route.next_hop == source_account {
            tracing::debug!(
                source_account = %source_account,
                destination = %destination,
                "refusing to route payments back to sender"
            );
            return Err(IlpError::unreachable(format!(
                "refusing to route payments back to sender. sourceAccount={} destinationAccount={}",
                source_account, destination
            )));
        }
        Ok(route.next_hop)
    }

    /// Pick the next hop and build the prepare to send it, with the
    /// exchanged amount and a shortened expiry.
    pub async fn get_next_hop_packet(
        &self,
        source_account: &str,
        source_packet: &Prepare,
    ) -> Result<(String, Prepare), IlpError> {
        tracing::trace!(
            source_account = %source_account,
            source_amount = source_packet.amount,
            destination = %source_packet.destination,
            "constructing next hop packet"
        );
        if source_packet.destination.is_empty() {
            return Err(IlpError::invalid_packet("missing destination."));
        }

        let next_hop = self.get_next_hop(source_account, &source_packet.destination)?;
        let rate = self.backend.get_rate(source_account, &next_hop).await?;
        tracing::trace!(next_hop = %next_hop, rate = %rate, "determined next hop and local rate");

        if !self.accounts.plugin(&next_hop)?.is_connected() {
            return Err(IlpError::peer_unreachable(format!(
                "no connection to account. account={}",
                next_hop
            )));
        }

        let amount = rate.apply(source_packet.amount)?;
        let expires_at = self.destination_expiry(source_packet.expires_at)?;
        Ok((
            next_hop,
            Prepare {
                amount,
                expires_at,
                execution_condition: source_packet.execution_condition,
                destination: source_packet.destination.clone(),
                data: source_packet.data.clone(),
            },
        ))
    }

    fn destination_expiry(&self, source_expiry: DateTime<Utc>) -> Result<DateTime<Utc>, IlpError> {
        let now = Utc::now();
        if source_expiry < now {
            return Err(IlpError::insufficient_timeout(format!(
                "source transfer has already expired. sourceExpiry={} currentTime={}",
                source_expiry.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        let window = self.config.min_message_window;
        let destination_expiry = (source_expiry - window).min(now + self.config.max_hold_time);
        if destination_expiry - now < window {
            return Err(IlpError::insufficient_timeout(format!(
                "source transfer expires too soon to complete payment. actualSourceExpiry={} requiredSourceExpiry={} currentTime={}",
                source_expiry.to_rfc3339(),
                (now + window * 2).to_rfc3339(),
                now.to_rfc3339()
            )));
        }
        Ok(destination_expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_backend::OneToOneBackend;
    use bytes::Bytes;
    use ilpc_core::{AccountInfo, ErrorCode, MemoryPlugin, Plugin, Rate, Relation};
    use ilpc_routing::Route;

    struct Fixture {
        builder: RouteBuilder,
        _remotes: Vec<MemoryPlugin>,
    }

    async fn fixture(reflect_payments: bool) -> Fixture {
        let accounts = Arc::new(Accounts::new(Some("test.me".into())));
        let mut remotes = Vec::new();
        for (id, scale, connected) in [("alice", 2, true), ("bob", 4, true), ("carl", 2, false)] {
            let (ours, theirs) = MemoryPlugin::pair();
            if connected {
                ours.connect().await.unwrap();
            }
            accounts
                .add(id, AccountInfo::new(Relation::Peer, "USD", scale), Arc::new(ours))
                .unwrap();
            remotes.push(theirs);
        }

        let routing_table = Arc::new(RoutingTable::new());
        routing_table.insert("test.bob", Route::new("bob", vec!["test.bob".into()], [0; 32]));
        routing_table.insert("test.alice", Route::new("alice", vec![], [0; 32]));
        routing_table.insert("test.carl", Route::new("carl", vec![], [0; 32]));
        routing_table.insert("test.me", Route::local([0; 32]));

        let backend = OneToOneBackend::new(accounts.clone(), Rate::from_decimal_str("0").unwrap());
        backend.connect().await.unwrap();
        let config = RouteBuilderConfig {
            min_message_window: Duration::seconds(1),
            max_hold_time: Duration::seconds(30),
            reflect_payments,
        };
        Fixture {
            builder: RouteBuilder::new(accounts, routing_table, Arc::new(backend), config),
            _remotes: remotes,
        }
    }

    fn prepare(destination: &str, amount: u64, expires_in: Duration) -> Prepare {
        Prepare {
            amount,
            expires_at: Utc::now() + expires_in,
            execution_condition: [9; 32],
            destination: destination.into(),
            data: Bytes::from_static(b"payload"),
        }
    }

    #[tokio::test]
    async fn test_next_hop_by_longest_prefix() {
        let f = fixture(true).await;
        assert_eq!(f.builder.get_next_hop("alice", "test.bob.wallet").unwrap(), "bob");
        let err = f.builder.get_next_hop("alice", "test.nowhere").unwrap_err();
        assert_eq!(err.code, ErrorCode::F02Unreachable);
        assert_eq!(err.message, "no route found. source=alice destination=test.nowhere");
        let err = f.builder.get_next_hop("alice", "test.me.nobody").unwrap_err();
        assert_eq!(err.code, ErrorCode::F02Unreachable);
        // reflection allowed
        assert_eq!(f.builder.get_next_hop("bob", "test.bob.x").unwrap(), "bob");
    }

    #[tokio::test]
    async fn test_reflection_refused_when_disabled() {
        let f = fixture(false).await;
        let err = f.builder.get_next_hop("bob", "test.bob.x").unwrap_err();
        assert_eq!(err.code, ErrorCode::F02Unreachable);
        assert!(err.message.starts_with("refusing to route payments back to sender."));
    }

    #[tokio::test]
    async fn test_packet_converts_amount_and_shortens_expiry() {
        let f = fixture(true).await;
        let source = prepare("test.bob.wallet", 250, Duration::seconds(10));
        let (next_hop, packet) = f.builder.get_next_hop_packet("alice", &source).await.unwrap();
        assert_eq!(next_hop, "bob");
        assert_eq!(packet.amount, 25_000);
        assert_eq!(packet.expires_at, source.expires_at - Duration::seconds(1));
        assert_eq!(packet.execution_condition, source.execution_condition);
        assert_eq!(packet.data, source.data);
    }

    #[tokio::test]
    async fn test_expiry_capped_by_max_hold_time() {
        let f = fixture(true).await;
        let source = prepare("test.alice", 1, Duration::seconds(120));
        let before = Utc::now();
        let (_, packet) = f.builder.get_next_hop_packet("bob", &source).await.unwrap();
        assert!(packet.expires_at <= Utc::now() + Duration::seconds(30));
        assert!(packet.expires_at >= before + Duration::seconds(30));
        // equal scales without spread keep the amount
        assert_eq!(packet.amount, 1);
    }

    #[tokio::test]
    async fn test_expired_or_short_source_is_r02() {
        let f = fixture(true).await;
        let expired = prepare("test.bob", 1, Duration::seconds(-1));
        let err = f.builder.get_next_hop_packet("alice", &expired).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::R02InsufficientTimeout);
        assert!(err.message.starts_with("source transfer has already expired."));

        let short = prepare("test.bob", 1, Duration::milliseconds(1500));
        let err = f.builder.get_next_hop_packet("alice", &short).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::R02InsufficientTimeout);
        assert!(err.message.starts_with("source transfer expires too soon"));
    }

    #[tokio::test]
    async fn test_empty_destination_and_disconnected_hop() {
        let f = fixture(true).await;
        let err = f
            .builder
            .get_next_hop_packet("alice", &prepare("", 1, Duration::seconds(10)))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::F01InvalidPacket);

        let err = f
            .builder
            .get_next_hop_packet("alice", &prepare("test.carl", 1, Duration::seconds(10)))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::T01PeerUnreachable);
        assert_eq!(err.message, "no connection to account. account=carl");
    }
}
