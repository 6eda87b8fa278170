//! # Result Sessions
//!
//! One submitted query from request to tab close. A session is created
//! `Pending`, resolved exactly once by [`ResultSession::complete`] and then
//! rendered; closing its tab retires it.

use serde::Serialize;
use thiserror::Error;

use crate::error::SessionError;
use crate::payload::QueryPayload;
use crate::response::{LogRow, QueryResponse, ResponseKind, ResultBinding, RowSet};
use crate::view::ResultRenderer;

/// Why a request never produced a bindable response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum FailureReason {
    #[error("Query failed: {0}")]
    Transport(String),
    #[error("{0}")]
    Server(String),
    #[error("No response text")]
    EmptyResponse,
    #[error("{0}")]
    Malformed(String),
    #[error("Query timed out")]
    Timeout,
    #[error("Query cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Loaded,
    BatchSubmitted { batch_id: i64 },
    Failed { reason: FailureReason },
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loaded => "loaded",
            Self::BatchSubmitted { .. } => "batch_submitted",
            Self::Failed { .. } => "failed",
            Self::Closed => "closed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// How a session obtains its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Presentation {
    /// Runs the sent payload through `Query/query`.
    Live,
    /// Fetches a stored result with `Query/get_saved_result`.
    Saved { qid: i64 },
    /// Rows handed over locally; no request.
    GivenData,
}

/// The request a pending session is waiting on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    Query(QueryPayload),
    SavedResult { qid: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultSession {
    local_id: u64,
    tab_id: Option<usize>,
    server_id: Option<i64>,
    sent_payload: QueryPayload,
    state: SessionState,
    presentation: Presentation,
    label: String,
    response: Option<QueryResponse>,
    binding: Option<ResultBinding>,
    render_failed: bool,
}

impl ResultSession {
    pub fn live(local_id: u64, sent_payload: QueryPayload) -> Self {
        let label = sent_payload.query_string.trim().to_string();
        Self::pending(local_id, Presentation::Live, sent_payload, label)
    }

    pub fn saved(local_id: u64, qid: i64) -> Self {
        Self::pending(
            local_id,
            Presentation::Saved { qid },
            QueryPayload::default(),
            format!("Saved Query {}", qid),
        )
    }

    /// A session over rows the caller already holds. Born `Loaded`.
    pub fn given(local_id: u64, label: impl Into<String>, rows: Vec<LogRow>) -> Self {
        let total = i64::try_from(rows.len()).ok();
        Self {
            local_id,
            tab_id: None,
            server_id: None,
            sent_payload: QueryPayload::default(),
            state: SessionState::Loaded,
            presentation: Presentation::GivenData,
            label: label.into(),
            response: None,
            binding: Some(ResultBinding::Rows(RowSet {
                rows,
                total_records: total,
                ..RowSet::default()
            })),
            render_failed: false,
        }
    }

    fn pending(
        local_id: u64,
        presentation: Presentation,
        sent_payload: QueryPayload,
        label: String,
    ) -> Self {
        Self {
            local_id,
            tab_id: None,
            server_id: None,
            sent_payload,
            state: SessionState::Pending,
            presentation,
            label,
            response: None,
            binding: None,
            render_failed: false,
        }
    }

    pub fn local_id(&self) -> u64 {
        self.local_id
    }

    pub fn tab_id(&self) -> Option<usize> {
        self.tab_id
    }

    pub(crate) fn set_tab_id(&mut self, tab_id: Option<usize>) {
        self.tab_id = tab_id;
    }

    pub fn server_id(&self) -> Option<i64> {
        self.server_id
    }

    pub fn sent_payload(&self) -> &QueryPayload {
        &self.sent_payload
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn response(&self) -> Option<&QueryResponse> {
        self.response.as_ref()
    }

    pub fn binding(&self) -> Option<&ResultBinding> {
        self.binding.as_ref()
    }

    pub fn render_failed(&self) -> bool {
        self.render_failed
    }

    pub fn request(&self) -> Option<SessionRequest> {
        match self.presentation {
            Presentation::Live => Some(SessionRequest::Query(self.sent_payload.clone())),
            Presentation::Saved { qid } => Some(SessionRequest::SavedResult { qid }),
            Presentation::GivenData => None,
        }
    }

    /// Resolves a pending session with the outcome of its request.
    pub fn complete(
        &mut self,
        outcome: Result<QueryResponse, FailureReason>,
    ) -> Result<&SessionState, SessionError> {
        if !self.state.is_pending() {
            return Err(SessionError::InvalidState {
                id: self.local_id,
                state: self.state.name(),
                expected: "pending",
            });
        }

        let response = match outcome {
            Ok(response) => response,
            Err(reason) => {
                tracing::warn!("query {} failed: {}", self.local_id, reason);
                self.state = SessionState::Failed { reason };
                return Ok(&self.state);
            }
        };

        match response.classify() {
            ResponseKind::Error(message) => {
                tracing::warn!("query {} returned error: {}", self.local_id, message);
                self.state = SessionState::Failed {
                    reason: FailureReason::Server(message),
                };
            }
            ResponseKind::Batch(batch_id) => {
                tracing::info!("query {} batched as {}", self.local_id, batch_id);
                self.label.push_str(" [batched]");
                self.binding = Some(ResultBinding::Batch { batch_id });
                self.state = SessionState::BatchSubmitted { batch_id };
                self.response = Some(response);
            }
            ResponseKind::Loaded => {
                self.server_id = response.qid;
                if let Some(echoed) = response.echoed_payload() {
                    if let Presentation::Saved { qid } = self.presentation {
                        self.label = format!("Saved Query {}: {}", qid, echoed.query_string);
                    }
                    self.sent_payload = echoed;
                }
                let binding = ResultBinding::bind(&response, &self.sent_payload);
                if let Some(total) = response.total_records {
                    self.label.push_str(&format!(" ({})", total));
                }
                let grouped = binding.group_fields();
                if !grouped.is_empty() {
                    self.label
                        .push_str(&format!(" [Grouped by {}]", grouped.join(",")));
                }
                tracing::info!(
                    "query {} loaded, qid {:?}, {:?} records",
                    self.local_id,
                    self.server_id,
                    response.total_records
                );
                self.binding = Some(binding);
                self.response = Some(response);
                self.state = SessionState::Loaded;
            }
        }
        Ok(&self.state)
    }

    /// Hands the binding to `renderer`. Render errors are logged and
    /// flagged, never propagated.
    pub fn render(&mut self, renderer: &mut dyn ResultRenderer) {
        let Some(binding) = &self.binding else {
            return;
        };
        if let Err(e) = renderer.render(&self.label, binding) {
            tracing::error!("rendering result {} failed: {}", self.local_id, e);
            self.render_failed = true;
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.tab_id = None;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RenderError;
    use serde_json::json;

    fn response(value: serde_json::Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    struct Broken;

    impl ResultRenderer for Broken {
        fn render(&mut self, _: &str, _: &ResultBinding) -> Result<(), RenderError> {
            Err(RenderError("no such column".into()))
        }
    }

    #[test]
    fn test_live_load() {
        let mut s = ResultSession::live(1, QueryPayload::new(" sshd", Default::default()));
        assert!(matches!(s.request(), Some(SessionRequest::Query(_))));
        let state = s
            .complete(Ok(response(json!({"qid": 44, "totalRecords": 0, "results": []}))))
            .unwrap();
        assert_eq!(state, &SessionState::Loaded);
        assert_eq!(s.server_id(), Some(44));
        assert_eq!(s.label(), "sshd (0)");
    }

    #[test]
    fn test_server_error_fails() {
        let mut s = ResultSession::live(1, QueryPayload::default());
        s.complete(Ok(response(json!({"error": "Invalid query"})))).unwrap();
        assert_eq!(
            s.state(),
            &SessionState::Failed {
                reason: FailureReason::Server("Invalid query".into())
            }
        );
        assert!(s.binding().is_none());
    }

    #[test]
    fn test_batch_never_binds_rows() {
        let mut s = ResultSession::live(1, QueryPayload::new("x", Default::default()));
        s.complete(Ok(response(json!({"batch_query": 812, "results": [{"id": 1}]}))))
            .unwrap();
        assert_eq!(s.state(), &SessionState::BatchSubmitted { batch_id: 812 });
        assert_eq!(s.binding(), Some(&ResultBinding::Batch { batch_id: 812 }));
        assert_eq!(s.server_id(), None);
        assert!(s.label().ends_with("[batched]"));
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let mut s = ResultSession::live(3, QueryPayload::default());
        s.complete(Err(FailureReason::Timeout)).unwrap();
        let err = s.complete(Ok(QueryResponse::default())).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                id: 3,
                state: "failed",
                expected: "pending"
            }
        );
    }

    #[test]
    fn test_saved_result_replaces_sent_payload() {
        let mut s = ResultSession::saved(2, 77);
        assert_eq!(s.request(), Some(SessionRequest::SavedResult { qid: 77 }));
        s.complete(Ok(response(json!({
            "qid": 77,
            "query_string": "host=a",
            "query_meta_params": {"groupby": ["host"]},
            "results": {"host": [{"@groupby": "a", "@count": 2}]},
            "totalRecords": 2
        }))))
        .unwrap();
        assert_eq!(s.sent_payload().query_string, "host=a");
        assert_eq!(s.label(), "Saved Query 77: host=a (2) [Grouped by host]");
    }

    #[test]
    fn test_render_failure_is_contained() {
        let mut s = ResultSession::given(5, "given", vec![LogRow::default()]);
        assert_eq!(s.state(), &SessionState::Loaded);
        assert!(s.request().is_none());
        s.render(&mut Broken);
        assert!(s.render_failed());
        assert_eq!(s.state(), &SessionState::Loaded);
    }
}
