//! # Session Driver
//!
//! Performs the requests a [`Workspace`] hands out and feeds the answers
//! back, tagged with the `local_id` captured when the request was issued.
//! Each in-flight request is bounded by a timeout and can be cancelled
//! through its own token; all of them hang off one root token so the whole
//! driver can be shut down at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use elsa_core::{
    FailureReason, Notifier, PendingRequest, QueryResponse, ResultRenderer, SessionError,
    SessionRequest, SessionState, Workspace,
};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::client::ElsaClient;

/// One finished request: the session it belongs to and what came back.
pub type Completion = (u64, Result<QueryResponse, FailureReason>);

/// Runs `request` under `timeout`, mapping every failure to a
/// [`FailureReason`].
pub async fn fetch(
    client: &ElsaClient,
    timeout: Duration,
    request: &SessionRequest,
) -> Result<QueryResponse, FailureReason> {
    match tokio::time::timeout(timeout, client.run(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(e.into_failure()),
        Err(_) => Err(FailureReason::Timeout),
    }
}

#[derive(Clone)]
pub struct SessionDriver {
    client: ElsaClient,
    timeout: Duration,
    root: CancellationToken,
    tokens: Arc<Mutex<HashMap<u64, CancellationToken>>>,
}

impl SessionDriver {
    pub fn new(client: ElsaClient, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            root: CancellationToken::new(),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn client(&self) -> &ElsaClient {
        &self.client
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn register(&self, local_id: u64) -> CancellationToken {
        let token = self.root.child_token();
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.insert(local_id, token.clone());
        token
    }

    fn release(&self, local_id: u64) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(&local_id);
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Cancels the in-flight request of session `local_id`. Returns false
    /// when nothing is running for it.
    pub fn cancel(&self, local_id: u64) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        match tokens.get(&local_id) {
            Some(token) => {
                tracing::info!("cancelling request for result {}", local_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight request, including ones started later.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Performs one pending request.
    pub async fn execute(&self, pending: PendingRequest) -> Completion {
        let local_id = pending.local_id;
        let token = self.register(local_id);
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(FailureReason::Cancelled),
            res = fetch(&self.client, self.timeout, &pending.request) => res,
        };
        self.release(local_id);
        match &outcome {
            Ok(_) => tracing::debug!("request for result {} answered", local_id),
            Err(reason) => tracing::warn!("request for result {} failed: {}", local_id, reason),
        }
        (local_id, outcome)
    }

    /// Performs `pending` and completes its session.
    pub async fn run<N: Notifier>(
        &self,
        workspace: &mut Workspace<N>,
        pending: PendingRequest,
        renderer: &mut dyn ResultRenderer,
    ) -> Result<SessionState, SessionError> {
        let (local_id, outcome) = self.execute(pending).await;
        workspace.complete(local_id, outcome, renderer)
    }

    /// Performs all requests concurrently and completes the sessions in
    /// the order their answers arrive.
    pub async fn run_all<N: Notifier>(
        &self,
        workspace: &mut Workspace<N>,
        pending: Vec<PendingRequest>,
        renderer: &mut dyn ResultRenderer,
    ) -> Vec<(u64, Result<SessionState, SessionError>)> {
        let mut in_flight: FuturesUnordered<_> =
            pending.into_iter().map(|p| self.execute(p)).collect();
        let mut done = Vec::new();
        while let Some((local_id, outcome)) = in_flight.next().await {
            done.push((local_id, workspace.complete(local_id, outcome, renderer)));
        }
        done
    }

    /// Asks the server to cancel the batch behind session `local_id` and
    /// applies the answer.
    pub async fn cancel_batch<N: Notifier>(
        &self,
        workspace: &mut Workspace<N>,
        local_id: u64,
    ) -> Result<(), SessionError> {
        let batch_id = workspace.cancel_batch(local_id)?;
        tracing::info!("cancelling batch query {}", batch_id);
        let acknowledged = self
            .client
            .cancel_query(batch_id)
            .await
            .map_err(|e| e.to_string());
        workspace.confirm_cancel(local_id, acknowledged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elsa_core::{FieldCatalog, QueryPayload, ResultBinding, WorkspaceConfig};

    struct Null;
    impl ResultRenderer for Null {
        fn render(
            &mut self,
            _label: &str,
            _binding: &ResultBinding,
        ) -> Result<(), elsa_core::RenderError> {
            Ok(())
        }
    }

    // Nothing listens on port 9; connections are refused or hang, and either
    // way the request never succeeds.
    fn unreachable_driver(timeout: Duration) -> SessionDriver {
        SessionDriver::new(ElsaClient::new("http://127.0.0.1:9/", None), timeout)
    }

    #[tokio::test]
    async fn test_cancel_before_answer() {
        let driver = unreachable_driver(Duration::from_secs(30));
        let mut ws = Workspace::new(FieldCatalog::default(), Vec::new(), WorkspaceConfig::default());
        let pending = ws.submit_payload(QueryPayload::new("sshd", Default::default()));
        let local_id = pending.local_id;

        driver.shutdown();
        let (id, outcome) = driver.execute(pending).await;
        assert_eq!(id, local_id);
        assert!(outcome.is_err());
        assert_eq!(driver.in_flight(), 0);

        let state = ws.complete(id, outcome, &mut Null).unwrap();
        assert!(matches!(state, SessionState::Failed { .. }));
        assert!(ws.registry().get(local_id).is_none());
        assert_eq!(ws.notifier().len(), 1);
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let driver = unreachable_driver(Duration::from_secs(1));
        assert!(!driver.cancel(42));
    }
}
