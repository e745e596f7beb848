//! HTTP task backend implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::processors::Artifact;
use crate::task::{SatelliteEphemeris, Task};

use super::{BackendError, TaskBackend};

/// Task backend talking to the remote scheduling API over HTTP.
pub struct HttpTaskBackend {
    client: Client,
    base_url: String,
    access_token: String,
    telescope_id: String,
}

impl HttpTaskBackend {
    /// Create a new backend client from the API configuration.
    pub fn new(config: &ApiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.base_url(),
            access_token: config.access_token.clone(),
            telescope_id: config.telescope_id.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        // Intermediary error pages can be huge HTML blobs, keep logs short
        Err(BackendError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }

    async fn put_task_status(&self, task_id: &str, body: serde_json::Value) -> Result<(), BackendError> {
        let url = self.url(&format!("/tasks/{}", task_id));
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Uploads one file through the signed-URL flow: request an upload
    /// slot for it, then POST the bytes to the returned URL.
    async fn upload_file(&self, task_id: &str, path: &std::path::Path) -> Result<(), BackendError> {
        let file_size = tokio::fs::metadata(path).await?.len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("task_{}_image.fits", task_id));
        let mime = match path.extension().and_then(|e| e.to_str()) {
            Some("fits") => "application/fits",
            _ => "application/octet-stream",
        };

        let url = self.url(&format!(
            "/my/images?filename={}&telescope_id={}&task_id={}&file_size={}",
            filename, self.telescope_id, task_id, file_size
        ));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let signed: SignedUploadResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidPayload(e.to_string()))?;

        let bytes = tokio::fs::read(path).await?;
        let mut form = reqwest::multipart::Form::new();
        for (key, value) in signed.fields {
            form = form.text(key, value);
        }
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| BackendError::Request(e.to_string()))?;
        form = form.part("file", part);

        let upload_response = self.client.post(&signed.upload_url).multipart(form).send().await?;
        Self::check_status(upload_response).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    async fn fetch_tasks(&self) -> Result<Vec<Task>, BackendError> {
        let _timer = crate::metrics::BACKEND_REQUEST_DURATION
            .with_label_values(&["fetch_tasks"])
            .start_timer();
        let url = self.url(&format!("/telescopes/{}/tasks", self.telescope_id));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let remote: Vec<RemoteTask> = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidPayload(e.to_string()))?;

        debug!(count = remote.len(), "Fetched task list");

        Ok(remote.into_iter().map(Task::from).collect())
    }

    async fn upload_artifact(&self, artifact: &Artifact) -> Result<(), BackendError> {
        let _timer = crate::metrics::BACKEND_REQUEST_DURATION
            .with_label_values(&["upload"])
            .start_timer();
        // Primary frame first, then the extras produced during processing.
        for path in artifact.files() {
            self.upload_file(&artifact.task_id, path).await?;
        }

        debug!(
            task_id = %artifact.task_id,
            files = 1 + artifact.extras.len(),
            "Artifact uploaded"
        );
        Ok(())
    }

    async fn mark_task_complete(&self, task_id: &str) -> Result<(), BackendError> {
        let _timer = crate::metrics::BACKEND_REQUEST_DURATION
            .with_label_values(&["mark_complete"])
            .start_timer();
        self.put_task_status(task_id, json!({ "status": "Succeeded" }))
            .await
    }

    async fn mark_task_failed(&self, task_id: &str, reason: &str) -> Result<(), BackendError> {
        let _timer = crate::metrics::BACKEND_REQUEST_DURATION
            .with_label_values(&["mark_failed"])
            .start_timer();
        self.put_task_status(task_id, json!({ "status": "Failed", "reason": reason }))
            .await
    }

    async fn report_online(&self) -> Result<(), BackendError> {
        let url = self.url(&format!("/telescopes/{}/status", self.telescope_id));
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "online": true, "reported_at": Utc::now() }))
            .send()
            .await;
        match response {
            Ok(r) => {
                Self::check_status(r).await?;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Online report failed");
                Err(e.into())
            }
        }
    }
}

// Remote API wire types
#[derive(Debug, Deserialize)]
struct RemoteTask {
    id: String,
    #[serde(rename = "targetRaDeg")]
    target_ra_deg: f64,
    #[serde(rename = "targetDecDeg")]
    target_dec_deg: f64,
    #[serde(rename = "startAt")]
    start_at: DateTime<Utc>,
    #[serde(rename = "stopAt")]
    stop_at: Option<DateTime<Utc>>,
    #[serde(rename = "filterName")]
    filter_name: Option<String>,
    satellite: Option<RemoteSatellite>,
}

#[derive(Debug, Deserialize)]
struct RemoteSatellite {
    #[serde(rename = "satelliteId")]
    satellite_id: String,
    name: String,
    tle: [String; 2],
}

impl From<RemoteTask> for Task {
    fn from(r: RemoteTask) -> Self {
        Task {
            id: r.id,
            target_ra_deg: r.target_ra_deg,
            target_dec_deg: r.target_dec_deg,
            start_at: r.start_at,
            stop_at: r.stop_at,
            filter_name: r.filter_name,
            satellite: r.satellite.map(|s| SatelliteEphemeris {
                satellite_id: s.satellite_id,
                name: s.name,
                tle: s.tle,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignedUploadResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
    #[serde(default)]
    fields: std::collections::HashMap<String, String>,
}
