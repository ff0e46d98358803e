//! Per-account pipeline assembly and the outgoing send path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use ilpc_core::{Accounts, ConnectorConfig, IlpError, MiddlewareKind, Plugin, PluginError};

use crate::builtins::{
    AlertMiddleware, BalanceMiddleware, DeduplicateMiddleware, ErrorHandlerMiddleware, ExpireMiddleware,
    MaxPacketAmountMiddleware, PacketLogMiddleware, RateLimitMiddleware, StatsMiddleware,
    ThroughputMiddleware, ValidateFulfillmentMiddleware,
};
use crate::error::PipelineError;
use crate::pipeline::{compose, handler, Handler, Pipelines};
use crate::stats::Stats;
use crate::traits::{DataProcessor, Middleware, MiddlewareServices};

#[derive(Default)]
struct HandlerTable {
    startup: DashMap<String, Handler<(), ()>>,
    teardown: DashMap<String, Handler<(), ()>>,
    outgoing_data: DashMap<String, Handler<Bytes, Bytes>>,
    outgoing_money: DashMap<String, Handler<u64, ()>>,
}

/// Send side of the manager: the composed outgoing pipelines per account.
///
/// Holds the table weakly, so middlewares and the packet dispatcher can
/// keep a copy without keeping the manager alive.
#[derive(Clone)]
pub struct OutgoingHandlers {
    table: Weak<HandlerTable>,
}

impl OutgoingHandlers {
    /// Handlers that reach no account.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { table: Weak::new() }
    }

    pub async fn send_data(&self, account_id: &str, data: Bytes) -> Result<Bytes, IlpError> {
        let handler = self
            .table
            .upgrade()
            .and_then(|t| t.outgoing_data.get(account_id).map(|h| h.value().clone()))
            .ok_or_else(|| {
                IlpError::unreachable(format!(
                    "tried to send data to non-existent account. accountId={}",
                    account_id
                ))
            })?;
        handler(data).await
    }

    pub async fn send_money(&self, account_id: &str, amount: u64) -> Result<(), IlpError> {
        let handler = self
            .table
            .upgrade()
            .and_then(|t| t.outgoing_money.get(account_id).map(|h| h.value().clone()))
            .ok_or_else(|| {
                IlpError::unreachable(format!(
                    "tried to send money to non-existent account. accountId={}",
                    account_id
                ))
            })?;
        handler(amount).await
    }
}

fn plugin_error(err: PluginError) -> IlpError {
    match err {
        PluginError::Ilp(e) => e,
        other => IlpError::unreachable(other.to_string()),
    }
}

/// Builds and owns the six pipelines of every attached account.
pub struct MiddlewareManager {
    accounts: Arc<Accounts>,
    stats: Arc<Stats>,
    processor: Arc<dyn DataProcessor>,
    middlewares: Vec<(String, Arc<dyn Middleware>)>,
    balance: Option<Arc<BalanceMiddleware>>,
    alert: Option<Arc<AlertMiddleware>>,
    handlers: Arc<HandlerTable>,
    started: AtomicBool,
}

impl MiddlewareManager {
    pub fn new(
        config: &ConnectorConfig,
        accounts: Arc<Accounts>,
        stats: Arc<Stats>,
        processor: Arc<dyn DataProcessor>,
    ) -> Result<Self, PipelineError> {
        let handlers = Arc::new(HandlerTable::default());
        let services = MiddlewareServices {
            accounts: accounts.clone(),
            stats: stats.clone(),
            outgoing: OutgoingHandlers {
                table: Arc::downgrade(&handlers),
            },
        };

        let mut middlewares: Vec<(String, Arc<dyn Middleware>)> = Vec::new();
        let mut balance = None;
        let mut alert = None;
        for kind in MiddlewareKind::BUILTIN {
            if config.disable_middleware.contains(&kind) {
                tracing::info!(middleware = %kind, "built-in middleware disabled");
                continue;
            }
            let middleware: Arc<dyn Middleware> = match kind {
                MiddlewareKind::Balance => {
                    let m = Arc::new(BalanceMiddleware::new(services.clone()));
                    balance = Some(m.clone());
                    m
                }
                MiddlewareKind::Alert => {
                    let m = Arc::new(AlertMiddleware::new());
                    alert = Some(m.clone());
                    m
                }
                other => construct(other, &services),
            };
            middlewares.push((kind.name().to_string(), middleware));
        }

        for (name, custom) in &config.middlewares {
            if middlewares.iter().any(|(existing, _)| existing == name) {
                return Err(PipelineError::NameCollision(name.clone()));
            }
            tracing::info!(middleware = %name, kind = %custom.kind, "loading custom middleware");
            middlewares.push((name.clone(), construct(custom.kind, &services)));
        }

        Ok(Self {
            accounts,
            stats,
            processor,
            middlewares,
            balance,
            alert,
            handlers,
            started: AtomicBool::new(false),
        })
    }

    /// Names of the installed middlewares in application order.
    pub fn middleware_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn balance(&self) -> Option<&Arc<BalanceMiddleware>> {
        self.balance.as_ref()
    }

    pub fn alert(&self) -> Option<&Arc<AlertMiddleware>> {
        self.alert.as_ref()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn outgoing(&self) -> OutgoingHandlers {
        OutgoingHandlers {
            table: Arc::downgrade(&self.handlers),
        }
    }

    /// Attach every configured account.
    pub async fn setup(&self) -> Result<(), PipelineError> {
        for account_id in self.accounts.account_ids() {
            self.add_plugin(&account_id).await?;
        }
        Ok(())
    }

    /// Run every account's startup pipeline. Accounts attached later run
    /// theirs on attach.
    pub async fn startup(&self) -> Result<(), PipelineError> {
        self.started.store(true, Ordering::SeqCst);
        let startup: Vec<Handler<(), ()>> = self
            .handlers
            .startup
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for handler in startup {
            handler(()).await?;
        }
        Ok(())
    }

    /// Build an account's pipelines and register its incoming handlers.
    pub async fn add_plugin(&self, account_id: &str) -> Result<(), PipelineError> {
        let plugin = self.accounts.plugin(account_id)?;

        let mut pipelines = Pipelines::default();
        for (name, middleware) in &self.middlewares {
            if let Err(e) = middleware.apply(account_id, &mut pipelines) {
                tracing::error!(
                    middleware = %name,
                    account_id = %account_id,
                    error = %e,
                    "failed to apply middleware to account"
                );
                return Err(PipelineError::Apply {
                    middleware: name.clone(),
                    account_id: account_id.to_string(),
                    source: Box::new(e),
                });
            }
        }

        let noop = || handler(|_: ()| async { Ok::<_, IlpError>(()) });
        let startup = compose(pipelines.startup.methods(), noop());
        let teardown = compose(pipelines.teardown.methods(), noop());

        let send_plugin = plugin.clone();
        let submit_data = handler(move |data: Bytes| {
            let plugin = send_plugin.clone();
            async move {
                plugin.send_data(data).await.map_err(|e| {
                    let mut err = plugin_error(e);
                    err.message = format!("failed to send packet: {}", err.message);
                    err
                })
            }
        });
        let money_plugin = plugin.clone();
        let submit_money = handler(move |amount: u64| {
            let plugin = money_plugin.clone();
            async move { plugin.send_money(amount).await.map_err(plugin_error) }
        });
        let outgoing_data = compose(pipelines.outgoing_data.methods(), submit_data);
        let outgoing_money = compose(pipelines.outgoing_money.methods(), submit_money);

        let id = account_id.to_string();
        self.handlers.startup.insert(id.clone(), startup.clone());
        self.handlers.teardown.insert(id.clone(), teardown);
        self.handlers.outgoing_data.insert(id.clone(), outgoing_data);
        self.handlers.outgoing_money.insert(id.clone(), outgoing_money);

        let processor = self.processor.clone();
        let outbound = self.outgoing();
        let handle_data = handler(move |data: Bytes| {
            let processor = processor.clone();
            let outbound = outbound.clone();
            let id = id.clone();
            async move { processor.process_data(data, &id, &outbound).await }
        });
        let handle_money = handler(|_: u64| async { Ok::<_, IlpError>(()) });
        let incoming_data = compose(pipelines.incoming_data.methods(), handle_data);
        let incoming_money = compose(pipelines.incoming_money.methods(), handle_money);

        plugin.register_data_handler(incoming_data)?;
        plugin.register_money_handler(incoming_money)?;
        tracing::debug!(account_id = %account_id, "attached middleware pipelines");

        if self.started.load(Ordering::SeqCst) {
            startup(()).await?;
        }
        Ok(())
    }

    /// Detach an account: deregister its handlers and run its teardown
    /// pipeline once.
    pub async fn remove_plugin(&self, account_id: &str) -> Result<(), PipelineError> {
        if let Ok(plugin) = self.accounts.plugin(account_id) {
            plugin.deregister_data_handler();
            plugin.deregister_money_handler();
        }
        self.handlers.startup.remove(account_id);
        let teardown = self.handlers.teardown.remove(account_id).map(|(_, h)| h);
        let result = match teardown {
            Some(teardown) => teardown(()).await.map_err(PipelineError::from),
            None => Ok(()),
        };
        self.handlers.outgoing_data.remove(account_id);
        self.handlers.outgoing_money.remove(account_id);
        tracing::debug!(account_id = %account_id, "detached middleware pipelines");
        result
    }

    pub async fn send_data(&self, account_id: &str, data: Bytes) -> Result<Bytes, IlpError> {
        self.outgoing().send_data(account_id, data).await
    }

    pub async fn send_money(&self, account_id: &str, amount: u64) -> Result<(), IlpError> {
        self.outgoing().send_money(account_id, amount).await
    }
}

/// Instantiate a middleware by kind.
fn construct(kind: MiddlewareKind, services: &MiddlewareServices) -> Arc<dyn Middleware> {
    match kind {
        MiddlewareKind::ErrorHandler => Arc::new(ErrorHandlerMiddleware::new(services.clone())),
        MiddlewareKind::RateLimit => Arc::new(RateLimitMiddleware::new(services.clone())),
        MiddlewareKind::MaxPacketAmount => Arc::new(MaxPacketAmountMiddleware::new(services.clone())),
        MiddlewareKind::Throughput => Arc::new(ThroughputMiddleware::new(services.clone())),
        MiddlewareKind::Balance => Arc::new(BalanceMiddleware::new(services.clone())),
        MiddlewareKind::Deduplicate => Arc::new(DeduplicateMiddleware::new(services.clone())),
        MiddlewareKind::Expire => Arc::new(ExpireMiddleware::new()),
        MiddlewareKind::ValidateFulfillment => Arc::new(ValidateFulfillmentMiddleware::new()),
        MiddlewareKind::Stats => Arc::new(StatsMiddleware::new(services.clone())),
        MiddlewareKind::Alert => Arc::new(AlertMiddleware::new()),
        MiddlewareKind::PacketLog => Arc::new(PacketLogMiddleware::new()),
    }
}
