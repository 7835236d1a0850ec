pub mod error;

pub use error::{ClientError, Result};

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use trendline_common::{
    ColumnMapping, Config, ImportPreview, ImportReceipt, NewSignal, NewTrend, NextUnassigned,
    ProcessingStatus, ProjectId, Signal, SignalFilter, SignalId, SignalPage, SignalPatch, Trend,
    TrendDetail, TrendId, TrendPatch, TrendSummary,
};

/// Typed client for the trendline REST backend.
pub struct TrendlineClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl TrendlineClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_url, config.api_token.as_deref(), config.request_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send a request and map non-success statuses onto `ClientError`.
    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        let resp = self.authed(req).send().await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = self.send(req).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(self.client.get(self.url(path))).await
    }

    async fn get_query<T: DeserializeOwned, Q: Serialize + ?Sized>(&self, path: &str, query: &Q) -> Result<T> {
        self.send_json(self.client.get(self.url(path)).query(query)).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.client.post(self.url(path)).json(body)).await
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        self.send(self.client.post(self.url(path))).await?;
        Ok(())
    }

    async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(self.client.patch(self.url(path)).json(body)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.client.delete(self.url(path))).await?;
        Ok(())
    }

    // --- Processing status ---

    pub async fn processing_status(&self, project_id: ProjectId) -> Result<ProcessingStatus> {
        tracing::debug!(%project_id, "Fetching processing status");
        self.get(&format!("/projects/{project_id}/processing-status")).await
    }

    pub async fn resume_processing(&self, project_id: ProjectId) -> Result<()> {
        tracing::info!(%project_id, "Resuming processing");
        self.post_empty(&format!("/projects/{project_id}/processing/resume")).await
    }

    pub async fn retry_failed_verifications(&self, project_id: ProjectId) -> Result<()> {
        tracing::info!(%project_id, "Retrying failed verifications");
        self.post_empty(&format!("/projects/{project_id}/processing/retry-verifications"))
            .await
    }

    // --- Signals ---

    pub async fn list_signals(&self, project_id: ProjectId, filter: &SignalFilter) -> Result<SignalPage> {
        self.get_query(&format!("/projects/{project_id}/signals"), filter).await
    }

    pub async fn next_unassigned(
        &self,
        project_id: ProjectId,
        exclude_id: Option<SignalId>,
    ) -> Result<NextUnassigned> {
        let path = format!("/projects/{project_id}/signals/next-unassigned");
        match exclude_id {
            Some(id) => self.get_query(&path, &[("excludeId", id.to_string())]).await,
            None => self.get(&path).await,
        }
    }

    pub async fn get_signal(&self, signal_id: SignalId) -> Result<Signal> {
        self.get(&format!("/signals/{signal_id}")).await
    }

    pub async fn create_signal(&self, project_id: ProjectId, signal: &NewSignal) -> Result<Signal> {
        self.post(&format!("/projects/{project_id}/signals"), signal).await
    }

    pub async fn update_signal(&self, signal_id: SignalId, patch: &SignalPatch) -> Result<Signal> {
        self.patch(&format!("/signals/{signal_id}"), patch).await
    }

    pub async fn delete_signal(&self, signal_id: SignalId) -> Result<()> {
        self.delete(&format!("/signals/{signal_id}")).await
    }

    // --- Trends ---

    pub async fn list_trends(&self, project_id: ProjectId, include_archived: bool) -> Result<Vec<Trend>> {
        self.get_query(
            &format!("/projects/{project_id}/trends"),
            &[("includeArchived", include_archived)],
        )
        .await
    }

    pub async fn get_trend(&self, trend_id: TrendId) -> Result<TrendDetail> {
        self.get(&format!("/trends/{trend_id}")).await
    }

    pub async fn create_trend(&self, project_id: ProjectId, trend: &NewTrend) -> Result<Trend> {
        tracing::info!(%project_id, members = trend.signal_ids.len(), "Creating trend");
        self.post(&format!("/projects/{project_id}/trends"), trend).await
    }

    pub async fn update_trend(&self, trend_id: TrendId, patch: &TrendPatch) -> Result<Trend> {
        self.patch(&format!("/trends/{trend_id}"), patch).await
    }

    pub async fn delete_trend(&self, trend_id: TrendId) -> Result<()> {
        self.delete(&format!("/trends/{trend_id}")).await
    }

    pub async fn undo_trend(&self, trend_id: TrendId) -> Result<()> {
        self.post_empty(&format!("/trends/{trend_id}/undo")).await
    }

    pub async fn regenerate_trend_summary(&self, trend_id: TrendId) -> Result<TrendSummary> {
        self.post(&format!("/trends/{trend_id}/regenerate-summary"), &serde_json::json!({}))
            .await
    }

    // --- Import ---

    /// Upload a file for server-side parsing. Returns detected columns and sample rows.
    pub async fn preview_import(
        &self,
        project_id: ProjectId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImportPreview> {
        tracing::info!(%project_id, file_name, size = bytes.len(), "Uploading import preview");
        let req = self
            .client
            .post(self.url(&format!("/projects/{project_id}/imports")))
            .query(&[("fileName", file_name)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        self.send_json(req).await
    }

    pub async fn commit_import(
        &self,
        project_id: ProjectId,
        upload_id: Uuid,
        mapping: &ColumnMapping,
    ) -> Result<ImportReceipt> {
        self.post(
            &format!("/projects/{project_id}/imports/{upload_id}/commit"),
            mapping,
        )
        .await
    }
}

/// Pull `{"error": "..."}` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_error_field() {
        assert_eq!(error_message(r#"{"error":"note is required"}"#), "note is required");
        assert_eq!(error_message("upstream timeout\n"), "upstream timeout");
        assert_eq!(error_message(r#"{"detail":"x"}"#), r#"{"detail":"x"}"#);
    }

    #[test]
    fn base_url_is_normalized() {
        let client = TrendlineClient::new("http://localhost:3000/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.url("/trends/1"), "http://localhost:3000/api/trends/1");
    }
}
