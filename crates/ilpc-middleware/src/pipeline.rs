//! Ordered, named middleware chains and their composition into a handler.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use ilpc_core::IlpError;

use crate::error::PipelineError;

/// A fully composed pipeline, or a terminal.
pub type Handler<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, IlpError>> + Send + Sync>;

/// One step in a pipeline. Receives the input and the rest of the chain.
pub type MiddlewareMethod<I, O> =
    Arc<dyn Fn(I, Next<I, O>) -> BoxFuture<'static, Result<O, IlpError>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler<I, O, F, Fut>(f: F) -> Handler<I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, IlpError>> + Send + 'static,
{
    Arc::new(move |input| f(input).boxed())
}

pub struct PipelineEntry<I, O> {
    pub name: String,
    pub method: MiddlewareMethod<I, O>,
}

impl<I, O> PipelineEntry<I, O> {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I, Next<I, O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, IlpError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            method: Arc::new(move |input, next| f(input, next).boxed()),
        }
    }
}

pub struct MiddlewarePipeline<I, O> {
    entries: Vec<PipelineEntry<I, O>>,
}

impl<I, O> MiddlewarePipeline<I, O> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert_first(&mut self, entry: PipelineEntry<I, O>) {
        self.entries.insert(0, entry);
    }

    pub fn insert_last(&mut self, entry: PipelineEntry<I, O>) {
        self.entries.push(entry);
    }

    pub fn insert_before(&mut self, anchor: &str, entry: PipelineEntry<I, O>) -> Result<(), PipelineError> {
        let index = self.position("before", anchor)?;
        self.entries.insert(index, entry);
        Ok(())
    }

    pub fn insert_after(&mut self, anchor: &str, entry: PipelineEntry<I, O>) -> Result<(), PipelineError> {
        let index = self.position("after", anchor)?;
        self.entries.insert(index + 1, entry);
        Ok(())
    }

    /// Entry names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn methods(&self) -> Vec<MiddlewareMethod<I, O>> {
        self.entries.iter().map(|e| e.method.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, position: &'static str, anchor: &str) -> Result<usize, PipelineError> {
        self.entries
            .iter()
            .position(|e| e.name == anchor)
            .ok_or_else(|| PipelineError::AnchorNotFound {
                position,
                name: anchor.to_string(),
            })
    }
}

impl<I, O> Default for MiddlewarePipeline<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

struct Chain<I, O> {
    methods: Vec<MiddlewareMethod<I, O>>,
    terminal: Handler<I, O>,
}

/// The remainder of a pipeline, as seen from one entry.
///
/// Each invocation of a composed handler tracks the highest position
/// dispatched so far; dispatching the same position twice panics.
pub struct Next<I, O> {
    chain: Arc<Chain<I, O>>,
    index: usize,
    dispatched: Arc<AtomicUsize>,
}

impl<I, O> Clone for Next<I, O> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            index: self.index,
            dispatched: self.dispatched.clone(),
        }
    }
}

impl<I, O> Next<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Run the rest of the chain.
    pub fn run(self, input: I) -> BoxFuture<'static, Result<O, IlpError>> {
        let previous = self.dispatched.fetch_max(self.index + 1, Ordering::SeqCst);
        if previous > self.index {
            panic!("next() called multiple times.");
        }
        match self.chain.methods.get(self.index) {
            Some(method) => {
                let method = method.clone();
                let rest = Next {
                    chain: self.chain.clone(),
                    index: self.index + 1,
                    dispatched: self.dispatched.clone(),
                };
                method(input, rest)
            }
            None => (self.chain.terminal)(input),
        }
    }
}

/// Compose `methods` in order in front of `terminal`.
pub fn compose<I, O>(methods: Vec<MiddlewareMethod<I, O>>, terminal: Handler<I, O>) -> Handler<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    let chain = Arc::new(Chain { methods, terminal });
    Arc::new(move |input| {
        let next = Next {
            chain: chain.clone(),
            index: 0,
            dispatched: Arc::new(AtomicUsize::new(0)),
        };
        next.run(input)
    })
}

pub type DataPipeline = MiddlewarePipeline<Bytes, Bytes>;
pub type MoneyPipeline = MiddlewarePipeline<u64, ()>;
pub type LifecyclePipeline = MiddlewarePipeline<(), ()>;

/// The six pipelines built for every account.
#[derive(Default)]
pub struct Pipelines {
    pub startup: LifecyclePipeline,
    pub teardown: LifecyclePipeline,
    pub incoming_data: DataPipeline,
    pub incoming_money: MoneyPipeline,
    pub outgoing_data: DataPipeline,
    pub outgoing_money: MoneyPipeline,
}
