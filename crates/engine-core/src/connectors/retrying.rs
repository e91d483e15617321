use crate::{
    connectors::classify_store_error,
    metrics::Metrics,
    retry::{RetryError, RetryPolicy},
};
use async_trait::async_trait;
use connectors::{error::StoreError, store::ObjectStore};
use model::pagination::{cursor::Cursor, page::ListPage};
use std::{future::Future, path::Path, time::Duration};

/// Wraps a store so every call carries a deadline and is retried with backoff.
///
/// Callers above this layer never retry on their own.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    metrics: Option<Metrics>,
}

impl<S: ObjectStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            timeout: None,
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.timeout;
        let mut calls = 0u64;

        let result = self
            .policy
            .run(
                operation,
                || {
                    calls += 1;
                    let fut = f();
                    async move {
                        match timeout {
                            Some(after) => tokio::time::timeout(after, fut).await.map_err(|_| {
                                StoreError::Timeout {
                                    op: operation.to_string(),
                                    after,
                                }
                            })?,
                            None => fut.await,
                        }
                    }
                },
                classify_store_error,
            )
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.increment_retries(calls.saturating_sub(1));
        }

        result.map_err(|e| match e {
            RetryError::Fatal(err) => err,
            RetryError::AttemptsExceeded(err) => StoreError::RetriesExhausted {
                attempts: self.policy.max_attempts,
                source: Box::new(err),
            },
        })
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        self.call("list", || self.inner.list_page(prefix, cursor, max_keys))
            .await
    }

    async fn get_object(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        self.call("get", || self.inner.get_object(key, dest)).await
    }

    async fn put_object(&self, src: &Path, key: &str) -> Result<(), StoreError> {
        self.call("put", || self.inner.put_object(src, key)).await
    }
}
