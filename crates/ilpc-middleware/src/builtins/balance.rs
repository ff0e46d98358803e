use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use ilpc_core::{BalanceSettings, IlpError, MiddlewareKind, PacketType, Prepare};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::stats::Metric;
use crate::traits::{Middleware, MiddlewareServices};

/// A bounded signed balance. Updates that would leave the bounds fail and
/// leave the balance untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    balance: i128,
    minimum: i128,
    maximum: i128,
    /// Settlement amounts sent but not yet confirmed.
    settling: i128,
}

impl Balance {
    /// Starts at zero. A missing minimum means unbounded below.
    pub fn new(settings: &BalanceSettings) -> Self {
        Self {
            balance: 0,
            minimum: settings.minimum.map_or(i128::MIN, i128::from),
            maximum: i128::from(settings.maximum),
            settling: 0,
        }
    }

    pub fn value(&self) -> i128 {
        self.balance
    }

    pub fn add(&mut self, amount: i128) -> Result<(), IlpError> {
        let new_balance = self.balance.saturating_add(amount);
        if new_balance > self.maximum {
            tracing::error!(
                old_balance = %self.balance,
                new_balance = %new_balance,
                amount = %amount,
                "rejected balance update"
            );
            return Err(IlpError::insufficient_liquidity("exceeded maximum balance."));
        }
        self.balance = new_balance;
        Ok(())
    }

    pub fn subtract(&mut self, amount: i128) -> Result<(), IlpError> {
        let new_balance = self.balance.saturating_sub(amount);
        if new_balance < self.minimum {
            tracing::error!(
                old_balance = %self.balance,
                new_balance = %new_balance,
                amount = %amount,
                "rejected balance update"
            );
            return Err(IlpError::insufficient_liquidity(format!(
                "insufficient funds. oldBalance={} proposedBalance={}",
                self.balance, new_balance
            )));
        }
        self.balance = new_balance;
        Ok(())
    }

    /// Claim what it takes to bring the balance back up to `settle_to` once
    /// it is below `threshold`. Settlements already in flight count as paid.
    pub fn reserve_settlement(&mut self, threshold: i128, settle_to: i128) -> Option<i128> {
        let expected = self.balance.saturating_add(self.settling);
        if threshold <= expected {
            return None;
        }
        let amount = settle_to.saturating_sub(expected);
        if amount <= 0 {
            return None;
        }
        self.settling += amount;
        Some(amount)
    }

    pub fn release_settlement(&mut self, amount: i128) {
        self.settling -= amount;
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        let bound = |v: i128, unbounded: i128, label: &str| {
            if v == unbounded {
                label.to_string()
            } else {
                v.to_string()
            }
        };
        BalanceSnapshot {
            balance: self.balance.to_string(),
            minimum: bound(self.minimum, i128::MIN, "-Infinity"),
            maximum: self.maximum.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub balance: String,
    pub minimum: String,
    pub maximum: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceStatus {
    pub accounts: BTreeMap<String, BalanceSnapshot>,
}

/// Per-account handle shared by that account's pipeline entries.
#[derive(Clone)]
struct AccountBalance {
    account_id: String,
    settings: BalanceSettings,
    balance: Arc<Mutex<Balance>>,
    services: MiddlewareServices,
}

impl AccountBalance {
    fn value(&self) -> i128 {
        self.balance.lock().value()
    }

    fn publish(&self, value: i128) {
        self.services.stats.set(Metric::Balance, &self.account_id, &[], value);
    }

    fn add(&self, amount: i128) -> Result<i128, IlpError> {
        let value = {
            let mut balance = self.balance.lock();
            balance.add(amount)?;
            balance.value()
        };
        self.publish(value);
        Ok(value)
    }

    fn subtract(&self, amount: i128) -> Result<i128, IlpError> {
        let value = {
            let mut balance = self.balance.lock();
            balance.subtract(amount)?;
            balance.value()
        };
        self.publish(value);
        Ok(value)
    }

    fn count_value(&self, metric: Metric, result: &str, amount: u64) {
        self.services
            .stats
            .increment(metric, &self.account_id, &[("result", result)], amount);
    }

    /// Settle in the background if the balance fell below the threshold.
    fn maybe_settle(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.settle().await });
    }

    async fn settle(&self) {
        let Some(threshold) = self.settings.settle_threshold else {
            return;
        };
        let (balance, reserved) = {
            let mut balance = self.balance.lock();
            let reserved = balance.reserve_settlement(i128::from(threshold), i128::from(self.settings.settle_to));
            (balance.value(), reserved)
        };
        let Some(reserved) = reserved else {
            return;
        };
        let amount = match u64::try_from(reserved) {
            Ok(amount) => amount,
            Err(_) => {
                tracing::warn!(
                    account_id = %self.account_id,
                    settle_amount = %reserved,
                    "settlement amount out of range, skipping"
                );
                self.balance.lock().release_settlement(reserved);
                return;
            }
        };
        tracing::debug!(
            account_id = %self.account_id,
            balance = %balance,
            settle_amount = amount,
            "settlement triggered"
        );
        if let Err(e) = self.services.outgoing.send_money(&self.account_id, amount).await {
            tracing::error!(
                account_id = %self.account_id,
                settle_amount = amount,
                error = %e,
                "error occurred during settlement"
            );
        }
        self.balance.lock().release_settlement(reserved);
    }
}

/// Tracks what each account owes us and triggers settlement.
pub struct BalanceMiddleware {
    services: MiddlewareServices,
    balances: DashMap<String, AccountBalance>,
}

impl BalanceMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self {
            services,
            balances: DashMap::new(),
        }
    }

    pub fn balance_of(&self, account_id: &str) -> Option<i128> {
        self.balances.get(account_id).map(|b| b.value().value())
    }

    pub fn status(&self) -> BalanceStatus {
        BalanceStatus {
            accounts: self
                .balances
                .iter()
                .map(|e| (e.key().clone(), e.value().balance.lock().snapshot()))
                .collect(),
        }
    }

    /// Adjust a balance by hand. Negative adjustments may trigger settlement.
    pub fn modify_balance(&self, account_id: &str, diff: i128) -> Result<i128, PipelineError> {
        let handle = self
            .balances
            .get(account_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| PipelineError::NoBalance(account_id.to_string()))?;
        tracing::warn!(account_id = %account_id, amount = %diff, "modifying balance");
        if diff >= 0 {
            Ok(handle.add(diff)?)
        } else {
            let value = handle.subtract(-diff)?;
            handle.maybe_settle();
            Ok(value)
        }
    }
}

impl Middleware for BalanceMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let info = self.services.accounts.info(account_id)?;
        let Some(settings) = info.balance else {
            tracing::warn!(
                account_id = %account_id,
                "(!!!) balance middleware NOT enabled for account, this account can spend UNLIMITED funds"
            );
            return Ok(());
        };
        tracing::info!(
            account_id = %account_id,
            minimum = ?settings.minimum,
            maximum = settings.maximum,
            "initializing balance for account"
        );
        let handle = AccountBalance {
            account_id: account_id.to_string(),
            balance: Arc::new(Mutex::new(Balance::new(&settings))),
            settings,
            services: self.services.clone(),
        };
        self.balances.insert(account_id.to_string(), handle.clone());
        let name = MiddlewareKind::Balance.name();

        let account = handle.clone();
        pipelines.startup.insert_last(PipelineEntry::new(name, move |_: (), next: Next<(), ()>| {
            account.maybe_settle();
            account.publish(account.value());
            next.run(())
        }));

        let account = handle.clone();
        pipelines.incoming_data.insert_last(PipelineEntry::new(name, move |data: Bytes, next: Next<Bytes, Bytes>| {
            let account = account.clone();
            async move {
                if PacketType::of(&data) != Some(PacketType::Prepare) {
                    return next.run(data).await;
                }
                let amount = Prepare::from_bytes(&data)?.amount;
                if amount == 0 {
                    return next.run(data).await;
                }
                let new_balance = account.add(i128::from(amount))?;
                tracing::trace!(
                    account_id = %account.account_id,
                    amount,
                    new_balance = %new_balance,
                    "balance increased due to incoming ilp prepare"
                );

                let refund = |reason: &str| match account.subtract(i128::from(amount)) {
                    Ok(new_balance) => tracing::debug!(
                        account_id = %account.account_id,
                        amount,
                        new_balance = %new_balance,
                        "incoming packet refunded due to {}",
                        reason
                    ),
                    Err(e) => tracing::error!(
                        account_id = %account.account_id,
                        amount,
                        error = %e,
                        "failed to refund incoming packet"
                    ),
                };

                match next.run(data).await {
                    Err(e) => {
                        refund("error");
                        account.count_value(Metric::IncomingDataPacketValue, "failed", amount);
                        Err(e)
                    }
                    Ok(response) => {
                        match PacketType::of(&response) {
                            Some(PacketType::Reject) => {
                                refund("ilp reject");
                                account.count_value(Metric::IncomingDataPacketValue, "rejected", amount);
                            }
                            Some(PacketType::Fulfill) => {
                                account.maybe_settle();
                                account.count_value(Metric::IncomingDataPacketValue, "fulfilled", amount);
                            }
                            _ => {}
                        }
                        Ok(response)
                    }
                }
            }
        }));

        let account = handle.clone();
        pipelines.incoming_money.insert_last(PipelineEntry::new(name, move |amount: u64, next: Next<u64, ()>| {
            let result = account.subtract(i128::from(amount)).map(|new_balance| {
                tracing::trace!(
                    account_id = %account.account_id,
                    amount,
                    new_balance = %new_balance,
                    "balance reduced due to incoming settlement"
                );
            });
            let account = account.clone();
            async move {
                result?;
                let sent = next.run(amount).await;
                if sent.is_err() {
                    if let Err(e) = account.subtract(i128::from(amount)) {
                        tracing::error!(
                            account_id = %account.account_id,
                            amount,
                            error = %e,
                            "could not refund failed settlement"
                        );
                    }
                }
                sent
            }
        }));

        let account = handle.clone();
        pipelines.outgoing_data.insert_last(PipelineEntry::new(name, move |data: Bytes, next: Next<Bytes, Bytes>| {
            let account = account.clone();
            async move {
                if PacketType::of(&data) != Some(PacketType::Prepare) {
                    return next.run(data).await;
                }
                let amount = Prepare::from_bytes(&data)?.amount;
                if amount == 0 {
                    return next.run(data).await;
                }
                match next.run(data).await {
                    Err(e) => {
                        tracing::debug!(
                            account_id = %account.account_id,
                            amount,
                            "outgoing packet not applied due to error"
                        );
                        account.count_value(Metric::OutgoingDataPacketValue, "failed", amount);
                        Err(e)
                    }
                    Ok(response) => {
                        match PacketType::of(&response) {
                            Some(PacketType::Reject) => {
                                tracing::debug!(
                                    account_id = %account.account_id,
                                    amount,
                                    "outgoing packet not applied due to ilp reject"
                                );
                                account.count_value(Metric::OutgoingDataPacketValue, "rejected", amount);
                            }
                            Some(PacketType::Fulfill) => {
                                let new_balance = account.subtract(i128::from(amount))?;
                                account.maybe_settle();
                                tracing::trace!(
                                    account_id = %account.account_id,
                                    amount,
                                    new_balance = %new_balance,
                                    "balance decreased due to outgoing ilp fulfill"
                                );
                                account.count_value(Metric::OutgoingDataPacketValue, "fulfilled", amount);
                            }
                            _ => {}
                        }
                        Ok(response)
                    }
                }
            }
        }));

        let account = handle;
        pipelines.outgoing_money.insert_last(PipelineEntry::new(name, move |amount: u64, next: Next<u64, ()>| {
            let result = account.add(i128::from(amount)).map(|new_balance| {
                tracing::trace!(
                    account_id = %account.account_id,
                    amount,
                    new_balance = %new_balance,
                    "balance increased due to outgoing settlement"
                );
            });
            async move {
                result?;
                next.run(amount).await
            }
        }));

        Ok(())
    }
}
