//! # Workspace
//!
//! The application context: the field catalog, the query being edited, the
//! result registry and the notification channel, owned together. Every UI
//! action goes through here so validation errors and failed requests reach
//! the user exactly once.
//!
//! The workspace does no I/O. [`Workspace::submit`] and friends hand back a
//! [`PendingRequest`]; whoever performs it feeds the outcome to
//! [`Workspace::complete`] under the same `local_id`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use crate::error::{QueryError, SessionError};
use crate::field::FieldCatalog;
use crate::grouping::{
    apply_group_by, group_by_label, qualified_group_field, GroupBySelection, LOCAL_GROUP_BY_LIMIT,
};
use crate::meta::{self, SearchMode, DEFAULT_LIMIT};
use crate::payload::QueryPayload;
use crate::query::{Query, TermInput, TermOutcome, TermSource, TimeRange};
use crate::registry::ResultRegistry;
use crate::response::{LogRow, QueryResponse};
use crate::session::{FailureReason, ResultSession, SessionRequest, SessionState};
use crate::view::{Notifier, ResultRenderer};

fn inline_groupby() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*groupby[:=]([\w.]+)\s*").expect("groupby regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub default_limit: u64,
    pub local_groupby_limit: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            local_groupby_limit: LOCAL_GROUP_BY_LIMIT,
        }
    }
}

/// A request the caller must perform for session `local_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub local_id: u64,
    pub tab_id: Option<usize>,
    pub request: SessionRequest,
}

/// Control values restored when a result tab is reselected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryControls {
    pub query_text: String,
    pub time_range: TimeRange,
    pub group_by_label: String,
    pub search_mode: SearchMode,
}

pub struct Workspace<N: Notifier> {
    catalog: FieldCatalog,
    query: Query,
    registry: ResultRegistry,
    notifier: N,
    config: WorkspaceConfig,
}

impl<N: Notifier> Workspace<N> {
    pub fn new(catalog: FieldCatalog, notifier: N, config: WorkspaceConfig) -> Self {
        Self {
            catalog,
            query: Self::fresh_query(&config),
            registry: ResultRegistry::new(),
            notifier,
            config,
        }
    }

    fn fresh_query(config: &WorkspaceConfig) -> Query {
        let mut query = Query::new();
        query.metas_mut().set(meta::LIMIT, json!(config.default_limit));
        query
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn set_catalog(&mut self, catalog: FieldCatalog) {
        self.catalog = catalog;
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }

    pub fn registry(&self) -> &ResultRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    fn report<T, E: std::fmt::Display>(&mut self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.notifier.notify(&e.to_string());
        }
        result
    }

    // =========================================================================
    // Query editing
    // =========================================================================

    pub fn add_term(&mut self, input: TermInput) -> Result<TermOutcome, QueryError> {
        let result = self.query.add_term(input, &self.catalog);
        self.report(result)
    }

    pub fn add_term_from(
        &mut self,
        input: TermInput,
        source: &mut dyn TermSource,
    ) -> Result<TermOutcome, QueryError> {
        let result = self.query.add_term_from(input, &self.catalog, source);
        self.report(result)
    }

    pub fn set_boolean(&mut self, token: &str) -> Result<(), QueryError> {
        let result = self.query.set_boolean(token);
        self.report(result)
    }

    pub fn set_time_range(&mut self, range: TimeRange) {
        self.query.set_time_range(range);
    }

    pub fn select_group_by(&mut self, selection: &GroupBySelection) -> String {
        apply_group_by(
            self.query.metas_mut(),
            selection,
            &self.catalog,
            self.config.default_limit,
            self.config.local_groupby_limit,
        );
        group_by_label(self.query.metas())
    }

    pub fn set_search_mode(&mut self, mode: SearchMode) {
        mode.apply(self.query.metas_mut());
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Submits the current query in a new tab, then clears its terms.
    pub fn submit(&mut self) -> Result<PendingRequest, QueryError> {
        let prepared = self.query.prepare_submission();
        let payload = self.report(prepared)?;
        let pending = self.submit_payload(payload);
        self.query.reset_terms();
        Ok(pending)
    }

    /// Opens a tab for an already serialized payload.
    pub fn submit_payload(&mut self, payload: QueryPayload) -> PendingRequest {
        let local_id = self.registry.allocate_id();
        tracing::info!("submitting query {}: {}", local_id, payload.query_string);
        let session = ResultSession::live(local_id, payload);
        self.issue(session)
    }

    /// Opens a tab that loads a saved result.
    pub fn open_saved(&mut self, qid: i64) -> PendingRequest {
        let local_id = self.registry.allocate_id();
        tracing::info!("opening saved result {} as {}", qid, local_id);
        self.issue(ResultSession::saved(local_id, qid))
    }

    fn issue(&mut self, session: ResultSession) -> PendingRequest {
        let local_id = session.local_id();
        let request = match session.request() {
            Some(request) => request,
            None => SessionRequest::Query(session.sent_payload().clone()),
        };
        let tab_id = self.registry.register(session, true);
        PendingRequest {
            local_id,
            tab_id,
            request,
        }
    }

    /// Shows rows the caller already holds. No request, no tab.
    pub fn open_given(
        &mut self,
        label: &str,
        rows: Vec<LogRow>,
        renderer: &mut dyn ResultRenderer,
    ) -> u64 {
        let local_id = self.registry.allocate_id();
        let mut session = ResultSession::given(local_id, label, rows);
        session.render(renderer);
        self.registry.register(session, false);
        local_id
    }

    /// Resolves session `local_id`. Failures are reported and close the tab;
    /// late completions for closed sessions are dropped.
    pub fn complete(
        &mut self,
        local_id: u64,
        outcome: Result<QueryResponse, FailureReason>,
        renderer: &mut dyn ResultRenderer,
    ) -> Result<SessionState, SessionError> {
        let Some(session) = self.registry.get_mut(local_id) else {
            tracing::warn!("dropping response for unknown result {}", local_id);
            return Err(SessionError::UnknownSession(local_id));
        };
        let state = match session.complete(outcome) {
            Ok(state) => state.clone(),
            Err(e) => {
                tracing::warn!("dropping response for result {}: {}", local_id, e);
                return Err(e);
            }
        };
        match &state {
            SessionState::Failed { reason } => {
                self.notifier.notify(&reason.to_string());
                self.registry.unregister(local_id);
            }
            _ => session.render(renderer),
        }
        Ok(state)
    }

    pub fn close_tab(&mut self, tab_id: usize) -> Result<ResultSession, SessionError> {
        self.registry.close_tab(tab_id)
    }

    pub fn close_session(&mut self, local_id: u64) -> Result<ResultSession, SessionError> {
        self.registry
            .unregister(local_id)
            .ok_or(SessionError::UnknownSession(local_id))
    }

    /// Loads the query behind tab `tab_id` back into the editor and returns
    /// the control values to display. Issues no request.
    pub fn reselect_tab(&mut self, tab_id: usize) -> Result<QueryControls, SessionError> {
        let session = self
            .registry
            .lookup_by_tab(tab_id)
            .ok_or(SessionError::UnknownTab(tab_id))?;
        let sent = session.sent_payload().clone();
        let response = session.response().cloned();

        self.query.deserialize(&sent);
        let metas = self.query.metas_mut();

        if !metas.contains(meta::GROUPBY) {
            if let Some(resp) = response.as_ref().filter(|r| !r.groupby.is_empty()) {
                tracing::debug!("setting groupby from results: {:?}", resp.groupby);
                metas.set_groupby(resp.groupby.clone());
            }
        }

        let mut label = None;
        let groupby = metas.groupby();
        if let Some(first) = groupby.first() {
            let inline = inline_groupby()
                .captures(&sent.query_string)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str());
            if inline == Some(first.as_str()) {
                // already carried by the query string
                metas.set_groupby(groupby[1..].to_vec());
            } else {
                label = Some(qualified_group_field(metas, first));
            }
        }
        let group_by_label = label.unwrap_or_else(|| group_by_label(metas));

        if !metas.contains(meta::ARCHIVE) {
            let archived = response
                .as_ref()
                .and_then(|r| r.query_meta_params.as_ref())
                .and_then(|m| m.get(meta::ARCHIVE).cloned());
            if let Some(archive) = archived {
                metas.set(meta::ARCHIVE, archive);
            }
        }

        let time_range = TimeRange::from_metas(metas);
        let search_mode = SearchMode::from_metas(metas);
        self.query.set_time_range(time_range);

        Ok(QueryControls {
            query_text: sent.query_string,
            time_range,
            group_by_label,
            search_mode,
        })
    }

    /// Starts cancelling a batch query; returns the id to send to
    /// `Query/cancel_query`. The session stays open until
    /// [`Self::confirm_cancel`].
    pub fn cancel_batch(&mut self, local_id: u64) -> Result<i64, SessionError> {
        let session = self
            .registry
            .get(local_id)
            .ok_or(SessionError::UnknownSession(local_id))?;
        match session.state() {
            SessionState::BatchSubmitted { batch_id } => Ok(*batch_id),
            other => Err(SessionError::InvalidState {
                id: local_id,
                state: other.name(),
                expected: "batch_submitted",
            }),
        }
    }

    /// Applies the server's answer to a cancel request.
    pub fn confirm_cancel(
        &mut self,
        local_id: u64,
        acknowledged: Result<(), String>,
    ) -> Result<(), SessionError> {
        let batch_id = self.cancel_batch(local_id)?;
        match acknowledged {
            Ok(()) => {
                self.notifier.notify(&format!(
                    "Cancelling query with ID {}.  You will be able to issue a new archive query soon.",
                    batch_id
                ));
                self.registry.unregister(local_id);
            }
            Err(e) => {
                tracing::warn!("cancel of batch {} failed: {}", batch_id, e);
                self.notifier.notify("Query cancel failed!");
            }
        }
        Ok(())
    }
}
