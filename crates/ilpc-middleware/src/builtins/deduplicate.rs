use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use ilpc_core::hashing::sha256;
use ilpc_core::packet::{read_envelope, PREPARE_STATIC_DATA_OFFSET};
use ilpc_core::{CoreError, IlpError, MiddlewareKind, PacketType, Prepare};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::error::PipelineError;
use crate::pipeline::{Next, PipelineEntry, Pipelines};
use crate::traits::{Middleware, MiddlewareServices};

type SharedResponse = Shared<BoxFuture<'static, Result<Bytes, IlpError>>>;
type PacketCache = DashMap<[u8; 16], CachedPacket>;

struct CachedPacket {
    amount: u64,
    expires_at: DateTime<Utc>,
    response: SharedResponse,
}

/// Cache key: the first 16 bytes of SHA-256 over everything in the
/// prepare after amount and expiry.
fn packet_key(data: &[u8]) -> Result<[u8; 16], CoreError> {
    let (_, contents) = read_envelope(data)?;
    let stable = contents
        .get(PREPARE_STATIC_DATA_OFFSET..)
        .ok_or(CoreError::UnexpectedEof {
            needed: PREPARE_STATIC_DATA_OFFSET,
            remaining: contents.len(),
        })?;
    let digest = sha256(stable);
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    Ok(key)
}

fn cleanup_cache(cache: &PacketCache, packet_lifetime: chrono::Duration) {
    let now = Utc::now();
    cache.retain(|_, cached| cached.expires_at + packet_lifetime >= now);
}

/// Collapses retransmissions of the same outgoing prepare onto one
/// in-flight request.
pub struct DeduplicateMiddleware {
    services: MiddlewareServices,
    cache: Arc<PacketCache>,
    cleanups: Arc<DashMap<String, JoinHandle<()>>>,
}

impl DeduplicateMiddleware {
    pub fn new(services: MiddlewareServices) -> Self {
        Self {
            services,
            cache: Arc::new(DashMap::new()),
            cleanups: Arc::new(DashMap::new()),
        }
    }

    pub fn cached_packets(&self) -> usize {
        self.cache.len()
    }
}

impl Drop for DeduplicateMiddleware {
    fn drop(&mut self) {
        for entry in self.cleanups.iter() {
            entry.value().abort();
        }
    }
}

impl Middleware for DeduplicateMiddleware {
    fn apply(&self, account_id: &str, pipelines: &mut Pipelines) -> Result<(), PipelineError> {
        let settings = self.services.accounts.info(account_id)?.deduplicate;
        let cleanup_interval = Duration::from_millis(settings.cleanup_interval_ms.max(1));
        let packet_lifetime = chrono::Duration::milliseconds(settings.packet_lifetime_ms as i64);
        let name = MiddlewareKind::Deduplicate.name();

        let cache = self.cache.clone();
        let cleanups = self.cleanups.clone();
        let id = account_id.to_string();
        pipelines.startup.insert_last(PipelineEntry::new(name, move |_: (), next: Next<(), ()>| {
            let weak = Arc::downgrade(&cache);
            let task = tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + cleanup_interval, cleanup_interval);
                loop {
                    ticker.tick().await;
                    let Some(cache) = weak.upgrade() else {
                        return;
                    };
                    cleanup_cache(&cache, packet_lifetime);
                }
            });
            if let Some(previous) = cleanups.insert(id.clone(), task) {
                previous.abort();
            }
            next.run(())
        }));

        let cleanups = self.cleanups.clone();
        let id = account_id.to_string();
        pipelines.teardown.insert_last(PipelineEntry::new(name, move |_: (), next: Next<(), ()>| {
            if let Some((_, task)) = cleanups.remove(&id) {
                task.abort();
            }
            next.run(())
        }));

        let cache = self.cache.clone();
        let id = account_id.to_string();
        pipelines.outgoing_data.insert_last(PipelineEntry::new(
            name,
            move |data: Bytes, next: Next<Bytes, Bytes>| {
                let cache = cache.clone();
                let id = id.clone();
                async move {
                    if PacketType::of(&data) != Some(PacketType::Prepare) {
                        return next.run(data).await;
                    }
                    let key = packet_key(&data)?;
                    let Prepare {
                        amount, expires_at, ..
                    } = Prepare::from_bytes(&data)?;

                    // Lookup and insert happen under one shard lock so
                    // concurrent retransmissions join a single request.
                    let (response, hit) = match cache.entry(key) {
                        Entry::Occupied(cached)
                            if cached.get().amount >= amount && cached.get().expires_at >= expires_at =>
                        {
                            (cached.get().response.clone(), true)
                        }
                        entry => {
                            let response = next.run(data).shared();
                            let cached = CachedPacket {
                                amount,
                                expires_at,
                                response: response.clone(),
                            };
                            match entry {
                                Entry::Occupied(mut entry) => {
                                    entry.insert(cached);
                                }
                                Entry::Vacant(entry) => {
                                    entry.insert(cached);
                                }
                            }
                            (response, false)
                        }
                    };
                    if hit {
                        tracing::warn!(
                            account_id = %id,
                            amount,
                            elapsed_ms = (expires_at - Utc::now()).num_milliseconds(),
                            "deduplicate packet cache hit"
                        );
                    }
                    response.await
                }
            },
        ));

        Ok(())
    }
}
