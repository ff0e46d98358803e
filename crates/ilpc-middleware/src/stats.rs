//! In-process counters and gauges, keyed by metric, account and labels.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Metric {
    IncomingDataPackets,
    IncomingDataPacketValue,
    OutgoingDataPackets,
    OutgoingDataPacketValue,
    IncomingMoney,
    OutgoingMoney,
    RateLimitedPackets,
    RateLimitedMoney,
    Balance,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::IncomingDataPackets => "ilp_connector_incoming_ilp_packets",
            Metric::IncomingDataPacketValue => "ilp_connector_incoming_ilp_packet_value",
            Metric::OutgoingDataPackets => "ilp_connector_outgoing_ilp_packets",
            Metric::OutgoingDataPacketValue => "ilp_connector_outgoing_ilp_packet_value",
            Metric::IncomingMoney => "ilp_connector_incoming_money",
            Metric::OutgoingMoney => "ilp_connector_outgoing_money",
            Metric::RateLimitedPackets => "ilp_connector_rate_limited_ilp_packets",
            Metric::RateLimitedMoney => "ilp_connector_rate_limited_money",
            Metric::Balance => "ilp_connector_balance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    metric: Metric,
    account: String,
    labels: BTreeMap<String, String>,
}

impl SeriesKey {
    fn new(metric: Metric, account: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            metric,
            account: account.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// One series in a [`Stats::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub metric: &'static str,
    pub account: String,
    pub labels: BTreeMap<String, String>,
    pub value: i128,
}

/// Registry shared by every middleware instance.
#[derive(Default)]
pub struct Stats {
    series: DashMap<SeriesKey, i128>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to a counter.
    pub fn increment(&self, metric: Metric, account: &str, labels: &[(&str, &str)], value: u64) {
        *self
            .series
            .entry(SeriesKey::new(metric, account, labels))
            .or_insert(0) += i128::from(value);
    }

    /// Overwrite a gauge.
    pub fn set(&self, metric: Metric, account: &str, labels: &[(&str, &str)], value: i128) {
        self.series.insert(SeriesKey::new(metric, account, labels), value);
    }

    pub fn get(&self, metric: Metric, account: &str, labels: &[(&str, &str)]) -> Option<i128> {
        self.series
            .get(&SeriesKey::new(metric, account, labels))
            .map(|v| *v)
    }

    /// Every series, ordered by metric, account and labels.
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut entries: Vec<(SeriesKey, i128)> = self
            .series
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
            .into_iter()
            .map(|(key, value)| Sample {
                metric: key.metric.name(),
                account: key.account,
                labels: key.labels,
                value,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_label_set() {
        let stats = Stats::new();
        stats.increment(Metric::IncomingDataPackets, "alice", &[("result", "fulfilled")], 1);
        stats.increment(Metric::IncomingDataPackets, "alice", &[("result", "fulfilled")], 1);
        stats.increment(Metric::IncomingDataPackets, "alice", &[("result", "rejected")], 1);
        assert_eq!(
            stats.get(Metric::IncomingDataPackets, "alice", &[("result", "fulfilled")]),
            Some(2)
        );
        assert_eq!(stats.get(Metric::IncomingDataPackets, "bob", &[("result", "fulfilled")]), None);
    }

    #[test]
    fn test_gauge_overwrites_and_snapshot_is_ordered() {
        let stats = Stats::new();
        stats.set(Metric::Balance, "bob", &[], 5);
        stats.set(Metric::Balance, "bob", &[], -3);
        stats.set(Metric::Balance, "alice", &[], 1);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].account, "alice");
        assert_eq!(snapshot[1].value, -3);
        assert_eq!(snapshot[1].metric, "ilp_connector_balance");
    }
}
