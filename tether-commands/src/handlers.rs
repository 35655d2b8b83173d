//! UI command handlers
//!
//! Each command validates its request, checks engine readiness, issues at
//! most one bridge request and answers with the uniform envelope. Internal
//! errors never escape a handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tether_engine::{EngineError, EngineState, RequestBridge, Supervisor};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLog, AuditOperation, AuditStats};
use crate::envelope::CommandResponse;
use crate::error::{CommandError, CommandResult};
use crate::jobs::{new_job_id, JobKind, JobMeta, JobRecord, JobStatus, JobTracker};

/// Worker endpoints
pub mod endpoints {
    pub const VIDEO_INFO: &str = "/api/video/info";
    pub const DOWNLOAD_COMBINED: &str = "/api/video/download-combined";
    pub const DOWNLOAD_AUDIO: &str = "/api/audio/download";
}

/// Command names accepted by [`CommandHandlers::dispatch`]
pub mod commands {
    pub const GET_VIDEO_INFO: &str = "video:get-info";
    pub const DOWNLOAD_COMBINED: &str = "video:download-combined";
    pub const DOWNLOAD_AUDIO: &str = "audio:download";
    pub const CANCEL_DOWNLOAD: &str = "download:cancel";
    pub const GET_DOWNLOAD_STATUS: &str = "download:get-status";
    pub const GET_ALL_DOWNLOADS: &str = "download:get-all";
    pub const SYSTEM_HEALTH: &str = "system:health";
}

const RECENT_AUDIT_EVENTS: usize = 3;
const CHECK_REQUEST: &str = "Please check the request and try again";

/// A clip bound: seconds, or an `HH:MM:SS` / `MM:SS` string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Seconds(f64),
    Clock(String),
}

/// Clip range, forwarded to the worker unchanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeValue,
    pub end: TimeValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoInfoRequest {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinedDownloadRequest {
    pub url: String,
    pub video_format_id: String,
    pub audio_format_id: String,
    pub time_range: Option<TimeRange>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDownloadRequest {
    pub url: String,
    pub format_id: String,
    pub time_range: Option<TimeRange>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobIdRequest {
    #[serde(alias = "downloadId", alias = "download_id")]
    pub job_id: String,
}

impl JobIdRequest {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
        }
    }
}

/// Data returned for a finished download
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadResult {
    pub filename: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<u64>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub download_id: String,
}

impl DownloadResult {
    fn from_worker(body: &Value, kind: JobKind, download_id: String) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            filename: text("filename"),
            file_path: text("file_path"),
            file_size: body.get("file_size").and_then(Value::as_u64),
            kind: kind.prefix(),
            download_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub is_ready: bool,
    pub state: EngineState,
    pub server_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadCounts {
    pub active: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEventSummary {
    pub operation: AuditOperation,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub total_events: usize,
    pub recent_events: Vec<AuditEventSummary>,
}

/// Payload of the system health command
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub timestamp: DateTime<Utc>,
    pub engine: EngineHealth,
    pub downloads: DownloadCounts,
    pub performance: Performance,
    pub audit_summary: AuditSummary,
}

fn require(value: &str, field: &'static str) -> CommandResult<()> {
    if value.trim().is_empty() {
        Err(CommandError::MissingField { field })
    } else {
        Ok(())
    }
}

/// A 2xx reply still fails unless the body says `success: true`
fn worker_outcome(body: Value) -> CommandResult<Value> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }

    let reason = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("Download failed");
    Err(CommandError::WorkerRejected(reason.to_string()))
}

/// Translate a handler error into its envelope
fn failure_envelope(err: &CommandError, message: &str, suggestion: &str) -> CommandResponse {
    match err {
        CommandError::Engine(EngineError::EngineNotReady) => CommandResponse::engine_starting(),
        CommandError::MissingField { .. }
        | CommandError::InvalidPayload(_)
        | CommandError::UnknownCommand(_) => {
            CommandResponse::error(err.to_string(), CHECK_REQUEST, err.code())
        }
        _ => CommandResponse::error(message, suggestion, err.code()),
    }
}

fn job_not_found(job_id: String) -> CommandResponse {
    failure_envelope(
        &CommandError::JobNotFound(job_id),
        "Download not found",
        "Please try again",
    )
}

/// Command surface consumed by the UI layer
pub struct CommandHandlers {
    supervisor: Supervisor,
    bridge: Arc<RequestBridge>,
    jobs: JobTracker,
    audit: Arc<AuditLog>,
    job_expiry: Duration,
    started: Instant,
}

impl CommandHandlers {
    pub fn new(
        supervisor: Supervisor,
        bridge: Arc<RequestBridge>,
        jobs: JobTracker,
        audit: Arc<AuditLog>,
        job_expiry: Duration,
    ) -> Self {
        Self {
            supervisor,
            bridge,
            jobs,
            audit,
            job_expiry,
            started: Instant::now(),
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    /// Route a named command with a JSON payload
    pub async fn dispatch(&self, command: &str, payload: Value) -> CommandResponse {
        debug!(command, "Dispatching command");
        match command {
            commands::GET_VIDEO_INFO => match parse(payload) {
                Ok(request) => self.get_video_info(request).await,
                Err(e) => failure_envelope(&e, "", ""),
            },
            commands::DOWNLOAD_COMBINED => match parse(payload) {
                Ok(request) => self.download_combined(request).await,
                Err(e) => failure_envelope(&e, "", ""),
            },
            commands::DOWNLOAD_AUDIO => match parse(payload) {
                Ok(request) => self.download_audio(request).await,
                Err(e) => failure_envelope(&e, "", ""),
            },
            commands::CANCEL_DOWNLOAD => match parse(payload) {
                Ok(request) => self.cancel_download(request),
                Err(e) => failure_envelope(&e, "", ""),
            },
            commands::GET_DOWNLOAD_STATUS => match parse(payload) {
                Ok(request) => self.get_download_status(request),
                Err(e) => failure_envelope(&e, "", ""),
            },
            commands::GET_ALL_DOWNLOADS => self.get_all_downloads(),
            commands::SYSTEM_HEALTH => self.get_system_health(),
            other => failure_envelope(&CommandError::UnknownCommand(other.to_string()), "", ""),
        }
    }

    pub async fn get_video_info(&self, request: VideoInfoRequest) -> CommandResponse {
        match self.video_info(request).await {
            Ok(info) => CommandResponse::ok(info),
            Err(e) => {
                error!("Video info extraction failed: {}", e);
                failure_envelope(
                    &e,
                    "Failed to get video information",
                    "Please check the URL and try again",
                )
            }
        }
    }

    async fn video_info(&self, request: VideoInfoRequest) -> CommandResult<Value> {
        require(&request.url, "url")?;
        self.ensure_ready()?;

        let id = self.begin_job(JobKind::InfoFetch, JobMeta::new(&request.url));
        let result = self
            .bridge
            .post_json(endpoints::VIDEO_INFO, json!({ "url": request.url }))
            .await
            .map_err(CommandError::from)
            .and_then(|response| match response.body.get("success").and_then(Value::as_bool) {
                Some(false) => worker_outcome(response.body),
                _ => Ok(response.body),
            });
        self.jobs.complete(&id);
        result
    }

    pub async fn download_combined(&self, request: CombinedDownloadRequest) -> CommandResponse {
        let outcome = async {
            require(&request.url, "url")?;
            require(&request.video_format_id, "video_format_id")?;
            require(&request.audio_format_id, "audio_format_id")?;

            let mut body = json!({
                "url": request.url,
                "video_format_id": request.video_format_id,
                "audio_format_id": request.audio_format_id,
            });
            if let Some(range) = &request.time_range {
                body["time_range"] = serde_json::to_value(range)
                    .map_err(|e| CommandError::InvalidPayload(e.to_string()))?;
            }

            let meta = JobMeta {
                title: request.title.clone(),
                source_url: request.url.clone(),
            };
            self.download(JobKind::CombinedDownload, endpoints::DOWNLOAD_COMBINED, meta, body)
                .await
        }
        .await;

        self.download_envelope(outcome)
    }

    pub async fn download_audio(&self, request: AudioDownloadRequest) -> CommandResponse {
        let outcome = async {
            require(&request.url, "url")?;
            require(&request.format_id, "format_id")?;

            let mut body = json!({
                "url": request.url,
                "format_id": request.format_id,
            });
            if let Some(range) = &request.time_range {
                body["time_range"] = serde_json::to_value(range)
                    .map_err(|e| CommandError::InvalidPayload(e.to_string()))?;
            }

            let meta = JobMeta {
                title: request.title.clone(),
                source_url: request.url.clone(),
            };
            self.download(JobKind::AudioDownload, endpoints::DOWNLOAD_AUDIO, meta, body)
                .await
        }
        .await;

        self.download_envelope(outcome)
    }

    fn download_envelope(&self, outcome: CommandResult<DownloadResult>) -> CommandResponse {
        match outcome {
            Ok(result) => CommandResponse::ok_from(&result),
            Err(e) => failure_envelope(&e, "Download failed", "Please try again or check your connection"),
        }
    }

    async fn download(
        &self,
        kind: JobKind,
        endpoint: &str,
        meta: JobMeta,
        body: Value,
    ) -> CommandResult<DownloadResult> {
        self.ensure_ready()?;

        let id = self.begin_job(kind, meta);
        let result = self
            .bridge
            .post_json(endpoint, body)
            .await
            .map_err(CommandError::from)
            .and_then(|response| worker_outcome(response.body));

        if self.jobs.complete(&id).is_none() {
            debug!(job_id = %id, "Job was cancelled or swept before its result arrived");
        }

        match result {
            Ok(body) => {
                self.audit.record_success();
                info!(job_id = %id, "Download finished");
                Ok(DownloadResult::from_worker(&body, kind, id))
            }
            Err(e) => {
                if let CommandError::WorkerRejected(reason) = &e {
                    warn!(job_id = %id, "Worker rejected download: {}", reason);
                }
                if !matches!(e, CommandError::Engine(EngineError::EngineNotReady)) {
                    self.audit.record_failure(e.to_string());
                }
                error!(job_id = %id, "Download failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn cancel_download(&self, request: JobIdRequest) -> CommandResponse {
        if let Err(e) = require(&request.job_id, "job_id") {
            return failure_envelope(&e, "", "");
        }

        if self.jobs.set_status(&request.job_id, JobStatus::Cancelled) {
            // The worker finishes the request on its own
            self.jobs.complete(&request.job_id);
            info!(job_id = %request.job_id, "Download cancelled");
            CommandResponse::ok(json!({ "cancelled": true, "download_id": request.job_id }))
        } else {
            job_not_found(request.job_id)
        }
    }

    pub fn get_download_status(&self, request: JobIdRequest) -> CommandResponse {
        if let Err(e) = require(&request.job_id, "job_id") {
            return failure_envelope(&e, "", "");
        }

        match self.jobs.get(&request.job_id) {
            Some(record) => CommandResponse::ok_from(&record),
            None => job_not_found(request.job_id),
        }
    }

    pub fn get_all_downloads(&self) -> CommandResponse {
        #[derive(Serialize)]
        struct Downloads {
            downloads: Vec<JobRecord>,
        }

        CommandResponse::ok_from(&Downloads {
            downloads: self.jobs.list_all(),
        })
    }

    pub fn system_health(&self) -> SystemHealth {
        let status = self.supervisor.status();
        let recent_events = self
            .audit
            .recent(RECENT_AUDIT_EVENTS)
            .into_iter()
            .map(|entry| AuditEventSummary {
                operation: entry.operation,
                success: entry.success,
                timestamp: entry.timestamp,
            })
            .collect();

        SystemHealth {
            timestamp: Utc::now(),
            engine: EngineHealth {
                is_ready: status.is_ready,
                state: status.state,
                server_url: status.server_url,
            },
            downloads: DownloadCounts {
                active: self.jobs.len(),
                total: self.audit.successful_downloads(),
            },
            performance: Performance {
                uptime_secs: self.started.elapsed().as_secs(),
            },
            audit_summary: AuditSummary {
                total_events: self.audit.len(),
                recent_events,
            },
        }
    }

    pub fn get_system_health(&self) -> CommandResponse {
        CommandResponse::ok_from(&self.system_health())
    }

    fn ensure_ready(&self) -> CommandResult<()> {
        if self.bridge.is_ready() {
            Ok(())
        } else {
            Err(EngineError::EngineNotReady.into())
        }
    }

    fn begin_job(&self, kind: JobKind, meta: JobMeta) -> String {
        self.jobs.sweep_expired(self.job_expiry);
        let id = new_job_id(kind);
        self.jobs.register(id.clone(), kind, meta);
        self.jobs.set_status(&id, JobStatus::Running);
        id
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> CommandResult<T> {
    let payload = if payload.is_null() { json!({}) } else { payload };
    serde_json::from_value(payload).map_err(|e| CommandError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_accepts_seconds_and_clock() {
        let range: TimeRange = serde_json::from_value(json!({"start": 12.5, "end": "01:02:03"})).unwrap();
        assert_eq!(range.start, TimeValue::Seconds(12.5));
        assert_eq!(range.end, TimeValue::Clock("01:02:03".into()));
        assert_eq!(
            serde_json::to_value(&range).unwrap(),
            json!({"start": 12.5, "end": "01:02:03"})
        );
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let request: AudioDownloadRequest = parse(json!({"url": "https://example.com"})).unwrap();
        assert!(request.format_id.is_empty());
        assert!(matches!(
            require(&request.format_id, "format_id"),
            Err(CommandError::MissingField { field: "format_id" })
        ));
    }

    #[test]
    fn test_job_id_aliases() {
        let request: JobIdRequest = parse(json!({"downloadId": "audio_1"})).unwrap();
        assert_eq!(request.job_id, "audio_1");
    }

    #[test]
    fn test_worker_outcome() {
        assert!(worker_outcome(json!({"success": true, "filename": "a.mp3"})).is_ok());

        let err = worker_outcome(json!({"success": false, "error": "format unavailable"})).unwrap_err();
        assert_eq!(err, CommandError::WorkerRejected("format unavailable".into()));

        let err = worker_outcome(json!({})).unwrap_err();
        assert_eq!(err, CommandError::WorkerRejected("Download failed".into()));
    }

    #[test]
    fn test_download_result_from_worker() {
        let body = json!({
            "success": true,
            "filename": "clip.mp4",
            "file_path": "/downloads/clip.mp4",
            "file_size": 1024
        });
        let result = DownloadResult::from_worker(&body, JobKind::CombinedDownload, "combined_1".into());
        assert_eq!(result.filename.as_deref(), Some("clip.mp4"));
        assert_eq!(result.file_size, Some(1024));
        assert_eq!(
            serde_json::to_value(&result).unwrap()["type"],
            json!("combined")
        );
    }

    #[test]
    fn test_validation_envelope() {
        let err = CommandError::MissingField { field: "url" };
        let envelope = failure_envelope(&err, "Download failed", "retry");
        let error = envelope.error.unwrap();
        assert_eq!(error.message, "Missing required field: url");
        assert_eq!(error.code, "VALIDATION_ERROR");
    }
}
