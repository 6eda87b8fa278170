//! # ELSA HTTP Client
//!
//! Thin async wrapper over the `Query/*` endpoints. Every body is checked
//! for `{error: ...}` before it is decoded; the server reports failures
//! that way rather than through status codes.

use elsa_core::{FormParams, QueryPayload, QueryResponse, SessionRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::records::{
    ExportFormat, PreviousQuery, RecordPage, SavedQuery, ScheduleRequest, ScheduledQuery,
};

/// Fails on empty bodies and on `{error: ...}` documents.
pub fn check_error(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(ClientError::EmptyResponse);
    }
    let value: Value = serde_json::from_str(text)?;
    if let Some(error) = value.get("error").filter(|e| elsa_core::meta::is_truthy(e)) {
        let message = error
            .as_str()
            .map(ToString::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ClientError::Server(message));
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct ElsaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ElsaClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.server.base_url.clone(),
            api_key: config.server.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_request(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);
        let mut req = self.http.get(&url).query(params);
        if let Some(k) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", k));
        }
        let resp = req.send().await?.error_for_status()?;
        Ok(resp.text().await?)
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);
        let mut req = self.http.post(&url).form(form);
        if let Some(k) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", k));
        }
        Ok(req.send().await?.error_for_status()?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let text = self.get_request(path, params).await?;
        Ok(serde_json::from_value(check_error(&text)?)?)
    }

    async fn post_json(&self, path: &str, form: &[(&str, String)]) -> Result<Value> {
        let text = self.post_form(path, form).await?.text().await?;
        check_error(&text)
    }

    fn page_params(start: Option<usize>, results: Option<usize>) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(s) = start {
            params.push(("startIndex", s.to_string()));
        }
        if let Some(r) = results {
            params.push(("results", r.to_string()));
        }
        params
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// `GET Query/query?q=<payload json>`.
    pub async fn query(&self, payload: &QueryPayload) -> Result<QueryResponse> {
        let q = payload.to_json()?;
        self.get_json("Query/query", &[("q", q)]).await
    }

    pub async fn get_saved_result(&self, qid: i64) -> Result<QueryResponse> {
        self.get_json("Query/get_saved_result", &[("qid", qid.to_string())])
            .await
    }

    /// Performs whatever a pending session waits on.
    pub async fn run(&self, request: &SessionRequest) -> Result<QueryResponse> {
        match request {
            SessionRequest::Query(payload) => self.query(payload).await,
            SessionRequest::SavedResult { qid } => self.get_saved_result(*qid).await,
        }
    }

    pub async fn cancel_query(&self, qid: i64) -> Result<()> {
        let text = self
            .get_request("Query/cancel_query", &[("qid", qid.to_string())])
            .await?;
        // an empty acknowledgement is fine here
        if !text.trim().is_empty() {
            check_error(&text)?;
        }
        Ok(())
    }

    /// The qid of the archive query currently running for this user.
    pub async fn get_running_archive_query(&self) -> Result<Option<i64>> {
        let value: Value = self.get_json("Query/get_running_archive_query", &[]).await?;
        Ok(value
            .get("qid")
            .and_then(elsa_core::response::value_as_i64)
            .filter(|qid| *qid != 0))
    }

    pub async fn get_form_params(&self) -> Result<FormParams> {
        self.get_json("Query/get_form_params", &[]).await
    }

    // =========================================================================
    // History, saved results and schedules
    // =========================================================================

    pub async fn get_previous_queries(
        &self,
        start: Option<usize>,
        results: Option<usize>,
    ) -> Result<RecordPage<PreviousQuery>> {
        self.get_json("Query/get_previous_queries", &Self::page_params(start, results))
            .await
    }

    pub async fn get_saved_queries(
        &self,
        start: Option<usize>,
        results: Option<usize>,
    ) -> Result<RecordPage<SavedQuery>> {
        self.get_json("Query/get_saved_queries", &Self::page_params(start, results))
            .await
    }

    pub async fn delete_saved_results(&self, qid: i64) -> Result<()> {
        self.post_json("Query/delete_saved_results", &[("qid", qid.to_string())])
            .await?;
        Ok(())
    }

    /// Stores a result set under `comments`. The server answers `1`.
    pub async fn save_results(&self, comments: &str, results: &Value) -> Result<()> {
        let form = [
            ("comments", comments.to_string()),
            ("results", serde_json::to_string(results)?),
        ];
        match self.post_json("Query/save_results", &form).await? {
            Value::Number(n) if n.as_i64() == Some(1) => Ok(()),
            Value::String(s) if s == "1" => Ok(()),
            other => Err(ClientError::Unexpected(other.to_string())),
        }
    }

    pub async fn get_scheduled_queries(&self) -> Result<RecordPage<ScheduledQuery>> {
        self.get_json("Query/get_scheduled_queries", &[]).await
    }

    /// Sets one property of a schedule. Non-string values are sent as JSON.
    pub async fn update_scheduled_query(
        &self,
        id: i64,
        property: &str,
        value: &Value,
    ) -> Result<Value> {
        let encoded = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        self.post_json(
            "Query/update_scheduled_query",
            &[("id", id.to_string()), (property, encoded)],
        )
        .await
    }

    pub async fn delete_scheduled_query(&self, id: i64) -> Result<()> {
        self.post_json("Query/delete_scheduled_query", &[("id", id.to_string())])
            .await?;
        Ok(())
    }

    pub async fn schedule_query(&self, request: &ScheduleRequest) -> Result<Value> {
        self.post_json("Query/schedule_query", &request.form()).await
    }

    /// Renders `data` with an export plugin and returns the document.
    pub async fn export(&self, format: ExportFormat, data: &Value) -> Result<Vec<u8>> {
        let form = [
            ("plugin", format.plugin().to_string()),
            ("data", serde_json::to_string(data)?),
        ];
        let body = self.post_form("Query/export", &form).await?.bytes().await?;
        if body.is_empty() {
            return Err(ClientError::EmptyResponse);
        }
        if let Ok(text) = std::str::from_utf8(&body) {
            if text.trim_start().starts_with('{') {
                check_error(text)?;
            }
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_error() {
        assert!(matches!(check_error(""), Err(ClientError::EmptyResponse)));
        assert!(matches!(check_error("nope"), Err(ClientError::Json(_))));
        assert!(matches!(
            check_error(r#"{"error":"Invalid qid"}"#),
            Err(ClientError::Server(m)) if m == "Invalid qid"
        ));
        assert!(check_error(r#"{"error":0,"qid":1}"#).is_ok());
        assert_eq!(check_error("1").unwrap(), serde_json::json!(1));
    }

    #[test]
    fn test_url_joins_paths() {
        let client = ElsaClient::new("http://elsa/", None);
        assert_eq!(client.url("Query/query"), "http://elsa/Query/query");
        let client = ElsaClient::new("http://elsa/app", None);
        assert_eq!(client.url("Query/query"), "http://elsa/app/Query/query");
    }

    #[test]
    fn test_error_mapping() {
        use elsa_core::FailureReason;
        assert_eq!(
            ClientError::Server("bad".into()).into_failure(),
            FailureReason::Server("bad".into())
        );
        assert_eq!(ClientError::EmptyResponse.into_failure(), FailureReason::EmptyResponse);
    }
}
