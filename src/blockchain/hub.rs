//! Multi-endpoint chain reader.
//!
//! The hub keeps every configured endpoint, probes them on [`Hub::rebalance`]
//! and ranks the responders by their latest height. Reads walk the ranked
//! list until one endpoint answers with data at least as fresh as the height
//! that was asked for.

use crate::blockchain::client::{ChainReader, ClientError, Endpoint, RpcClient};
use crate::blockchain::models::{
    BlockResponse, BlockResultsResponse, Heighted, RestResponse, StatusResponse,
    ValidatorsResponse,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// An endpoint that answered the last rebalance, with the height it reported.
pub struct ActiveClient<C> {
    pub client: Arc<C>,
    pub height: i64,
}

impl<C> Clone for ActiveClient<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Budget {
    PerAttempt(Duration),
    Until(Instant),
}

pub struct Hub<C = RpcClient> {
    clients: Vec<Arc<C>>,
    active: Mutex<Arc<Vec<ActiveClient<C>>>>,
    timeout: Duration,
}

impl Hub<RpcClient> {
    pub fn from_endpoints(
        endpoints: &[Endpoint],
        timeout: Duration,
        rate_limit: Option<u32>,
    ) -> Result<Self, ClientError> {
        let clients = endpoints
            .iter()
            .cloned()
            .map(|endpoint| RpcClient::new(endpoint, rate_limit))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(clients, timeout))
    }
}

impl<C: ChainReader + 'static> Hub<C> {
    /// Builds a hub with an empty active set; call [`Hub::rebalance`] before
    /// reading.
    pub fn new(clients: Vec<C>, timeout: Duration) -> Self {
        Self {
            clients: clients.into_iter().map(Arc::new).collect(),
            active: Mutex::new(Arc::new(Vec::new())),
            timeout,
        }
    }

    /// Probes every endpoint and replaces the active set with the responders,
    /// highest reported height first. Fails only when nobody responded; the
    /// previous active set is kept in that case.
    pub async fn rebalance(&self) -> Result<(), ClientError> {
        let probes = self.clients.iter().map(|client| {
            let client = client.clone();
            let limit = self.timeout;
            async move {
                let result = match timeout(limit, client.status()).await {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::Timeout {
                        endpoint: client.name().to_string(),
                        timeout: limit,
                    }),
                };
                (client, result)
            }
        });

        let mut active = Vec::with_capacity(self.clients.len());
        for (client, result) in join_all(probes).await {
            match result {
                Ok(status) => active.push(ActiveClient {
                    height: status.height(),
                    client,
                }),
                Err(e) => warn!("Endpoint {} dropped from active set: {}", client.name(), e),
            }
        }

        if active.is_empty() {
            return Err(ClientError::NoEndpointResponded {
                attempted: self.clients.len(),
            });
        }

        active.sort_by(|a, b| b.height.cmp(&a.height));
        info!(
            "Rebalanced RPC hub: {}/{} endpoints active, top height {}",
            active.len(),
            self.clients.len(),
            active[0].height
        );

        *self.active.lock().await = Arc::new(active);
        Ok(())
    }

    /// Snapshot of the ranked active set. The lock is released before the
    /// snapshot is used, so readers never hold it across network I/O.
    pub async fn active_clients(&self) -> Arc<Vec<ActiveClient<C>>> {
        self.active.lock().await.clone()
    }

    /// A view of this hub whose reads share one overall deadline instead of
    /// a timeout per endpoint attempt.
    pub fn with_deadline(&self, deadline: Instant) -> DeadlineHub<'_, C> {
        DeadlineHub { hub: self, deadline }
    }

    async fn first_fresh<T, F, Fut>(
        &self,
        budget: Budget,
        requested: Option<i64>,
        method: &str,
        call: F,
    ) -> Result<T, ClientError>
    where
        T: Heighted + Send,
        F: Fn(Arc<C>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ClientError>> + Send,
    {
        let snapshot = self.active_clients().await;
        if snapshot.is_empty() {
            return Err(ClientError::NoActiveEndpoints);
        }

        let mut stale = 0usize;
        let mut best = i64::MIN;
        let mut last_error = None;

        for active in snapshot.iter() {
            let attempt = call(active.client.clone());
            let result = match budget {
                Budget::PerAttempt(limit) => match timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::Timeout {
                        endpoint: active.client.name().to_string(),
                        timeout: limit,
                    }),
                },
                Budget::Until(deadline) => match timeout_at(deadline, attempt).await {
                    Ok(result) => result,
                    Err(_) => return Err(ClientError::DeadlineExceeded),
                },
            };

            match result {
                Ok(value) => match requested {
                    Some(requested) if value.height() < requested => {
                        debug!(
                            "{} from {} is stale: requested {}, got {}",
                            method,
                            active.client.name(),
                            requested,
                            value.height()
                        );
                        stale += 1;
                        best = best.max(value.height());
                    }
                    _ => return Ok(value),
                },
                Err(e) => {
                    warn!("{} via {} failed: {}", method, active.client.name(), e);
                    // A transient failure anywhere keeps the whole read retryable.
                    if last_error.as_ref().map_or(true, |prev: &ClientError| !prev.is_retryable()) {
                        last_error = Some(e);
                    }
                }
            }
        }

        // Any stale answer means the data exists nowhere yet; that is a sync
        // lag, not an availability problem.
        if stale > 0 {
            return Err(ClientError::AllStale {
                count: stale,
                requested: requested.unwrap_or_default(),
                best,
            });
        }

        Err(ClientError::AllFailed {
            count: snapshot.len(),
            last: Box::new(last_error.unwrap_or(ClientError::NoActiveEndpoints)),
        })
    }

    async fn read_status(&self, budget: Budget) -> Result<StatusResponse, ClientError> {
        self.first_fresh(budget, None, "status", |client| async move {
            client.status().await
        })
        .await
    }

    async fn read_block(&self, budget: Budget, height: i64) -> Result<BlockResponse, ClientError> {
        self.first_fresh(budget, Some(height), "block", move |client| async move {
            client.block(height).await
        })
        .await
    }

    async fn read_block_results(
        &self,
        budget: Budget,
        height: i64,
    ) -> Result<BlockResultsResponse, ClientError> {
        self.first_fresh(budget, Some(height), "block_results", move |client| async move {
            client.block_results(height).await
        })
        .await
    }

    async fn read_validators(
        &self,
        budget: Budget,
        height: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ValidatorsResponse, ClientError> {
        self.first_fresh(budget, Some(height), "validators", move |client| async move {
            client.validators(height, page, per_page).await
        })
        .await
    }

    async fn read_rest(
        &self,
        budget: Budget,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RestResponse, ClientError> {
        self.first_fresh(budget, None, "rest_get", |client| {
            let path = path.to_owned();
            let query = query.to_vec();
            async move { client.rest_get(&path, &query).await }
        })
        .await
    }
}

#[async_trait]
impl<C: ChainReader + 'static> ChainReader for Hub<C> {
    fn name(&self) -> &str {
        "hub"
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.read_status(Budget::PerAttempt(self.timeout)).await
    }

    async fn block(&self, height: i64) -> Result<BlockResponse, ClientError> {
        self.read_block(Budget::PerAttempt(self.timeout), height).await
    }

    async fn block_results(&self, height: i64) -> Result<BlockResultsResponse, ClientError> {
        self.read_block_results(Budget::PerAttempt(self.timeout), height)
            .await
    }

    async fn validators(
        &self,
        height: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ValidatorsResponse, ClientError> {
        self.read_validators(Budget::PerAttempt(self.timeout), height, page, per_page)
            .await
    }

    async fn rest_get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RestResponse, ClientError> {
        self.read_rest(Budget::PerAttempt(self.timeout), path, query)
            .await
    }
}

/// Hub reads bounded by a single deadline across all endpoint attempts.
pub struct DeadlineHub<'a, C> {
    hub: &'a Hub<C>,
    deadline: Instant,
}

#[async_trait]
impl<'a, C: ChainReader + 'static> ChainReader for DeadlineHub<'a, C> {
    fn name(&self) -> &str {
        "hub"
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.hub.read_status(Budget::Until(self.deadline)).await
    }

    async fn block(&self, height: i64) -> Result<BlockResponse, ClientError> {
        self.hub.read_block(Budget::Until(self.deadline), height).await
    }

    async fn block_results(&self, height: i64) -> Result<BlockResultsResponse, ClientError> {
        self.hub
            .read_block_results(Budget::Until(self.deadline), height)
            .await
    }

    async fn validators(
        &self,
        height: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ValidatorsResponse, ClientError> {
        self.hub
            .read_validators(Budget::Until(self.deadline), height, page, per_page)
            .await
    }

    async fn rest_get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<RestResponse, ClientError> {
        self.hub
            .read_rest(Budget::Until(self.deadline), path, query)
            .await
    }
}
