//! HTTP client for the local acquisition backend.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use stash_proto::protocol::{
    BackendSettings, CaptureResponse, CaptureStatus, CaptureUpload, DownloadRequest,
    DownloadResponse, ErrorBody, JobId, LogsResponse, ProgressResponse, SaveSettingsRequest,
    SubmitStatus,
};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Acknowledged submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub id: JobId,
    pub total: Option<u32>,
}

#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("backend health check failed: {}", e);
                false
            }
        }
    }

    /// `POST /download`.  An explicit backend refusal becomes
    /// `SubmissionRejected`; anything else that goes wrong is `Unreachable`.
    pub async fn submit(&self, request: &DownloadRequest) -> Result<Submitted> {
        let resp = self
            .client
            .post(self.url("/download"))
            .json(request)
            .send()
            .await
            .map_err(EngineError::transport)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(EngineError::transport)?;

        if let Ok(parsed) = serde_json::from_slice::<DownloadResponse>(&body) {
            return match (parsed.status, parsed.download_id) {
                (SubmitStatus::Started, Some(id)) if status.is_success() => Ok(Submitted {
                    id,
                    total: parsed.total,
                }),
                (_, _) => Err(match parsed.error.filter(|e| !e.trim().is_empty()) {
                    Some(reason) => EngineError::SubmissionRejected(reason),
                    None => EngineError::Unreachable(format!(
                        "backend answered {} without a job id",
                        status
                    )),
                }),
            };
        }

        // Some routes reply with a bare `{"error": "..."}` and a 4xx/5xx.
        if let Ok(err) = serde_json::from_slice::<ErrorBody>(&body) {
            return Err(EngineError::SubmissionRejected(err.error));
        }

        warn!("backend /download returned {} with an unreadable body", status);
        Err(EngineError::Unreachable(format!("unexpected response ({})", status)))
    }

    pub async fn progress(&self, id: &JobId) -> Result<ProgressResponse> {
        let resp = self
            .client
            .get(self.url(&format!("/progress/{}", id)))
            .send()
            .await
            .map_err(EngineError::transport)?;
        if !resp.status().is_success() {
            return Err(EngineError::Unreachable(format!(
                "/progress/{} returned {}",
                id,
                resp.status()
            )));
        }
        resp.json().await.map_err(EngineError::transport)
    }

    pub async fn logs(&self, id: &JobId) -> Result<LogsResponse> {
        let resp = self
            .client
            .get(self.url(&format!("/logs/{}", id)))
            .send()
            .await
            .map_err(EngineError::transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(LogsResponse::default());
        }
        resp.error_for_status()
            .map_err(EngineError::transport)?
            .json()
            .await
            .map_err(EngineError::transport)
    }

    /// `POST /capture-track`.  Returns true when the backend saved the file.
    pub async fn upload_capture(&self, upload: &CaptureUpload) -> Result<bool> {
        let resp = self
            .client
            .post(self.url("/capture-track"))
            .json(upload)
            .send()
            .await
            .map_err(EngineError::transport)?;
        let parsed: CaptureResponse = resp.json().await.map_err(EngineError::transport)?;
        if parsed.status == CaptureStatus::Error {
            warn!(
                "backend refused capture '{}': {}",
                upload.name,
                parsed.error.as_deref().unwrap_or("no reason given")
            );
        }
        Ok(parsed.status == CaptureStatus::Saved)
    }

    pub async fn settings(&self) -> Result<BackendSettings> {
        self.client
            .get(self.url("/config"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(EngineError::transport)?
            .json()
            .await
            .map_err(EngineError::transport)
    }

    pub async fn save_settings(&self, request: &SaveSettingsRequest) -> Result<()> {
        self.client
            .post(self.url("/save-config"))
            .json(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(EngineError::transport)?;
        Ok(())
    }
}
