//! In-flight job tracking
//!
//! Records live only while a job is running: `complete` removes them, and
//! `sweep_expired` drops entries whose result never arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    InfoFetch,
    CombinedDownload,
    AudioDownload,
}

impl JobKind {
    /// Prefix of generated job ids
    pub fn prefix(self) -> &'static str {
        match self {
            JobKind::InfoFetch => "info",
            JobKind::CombinedDownload => "combined",
            JobKind::AudioDownload => "audio",
        }
    }
}

/// Status of a tracked job.
///
/// A finished job is removed by `complete`, so success or failure is never
/// stored here; its outcome goes to the audit log instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Cancelled,
}

/// Caller-supplied job details
#[derive(Debug, Clone, Default)]
pub struct JobMeta {
    pub title: Option<String>,
    pub source_url: String,
}

impl JobMeta {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            title: None,
            source_url: source_url.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub title: String,
    pub source_url: String,
    pub started_at: DateTime<Utc>,
    pub status: JobStatus,
}

/// Generate a job id unique for the process lifetime
pub fn new_job_id(kind: JobKind) -> String {
    format!("{}_{}", kind.prefix(), Uuid::new_v4().simple())
}

/// Shared map of in-flight jobs
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; an existing record with the same id is replaced
    pub fn register(&self, id: impl Into<String>, kind: JobKind, meta: JobMeta) -> JobRecord {
        self.register_at(id, kind, meta, Utc::now())
    }

    pub fn register_at(
        &self,
        id: impl Into<String>,
        kind: JobKind,
        meta: JobMeta,
        started_at: DateTime<Utc>,
    ) -> JobRecord {
        let record = JobRecord {
            id: id.into(),
            kind,
            title: meta.title.unwrap_or_else(|| "unknown".to_string()),
            source_url: meta.source_url,
            started_at,
            status: JobStatus::Starting,
        };

        debug!(job_id = %record.id, kind = ?kind, "Registered job");
        self.jobs.write().insert(record.id.clone(), record.clone());
        record
    }

    /// Update the status of a tracked job; `false` if it is not tracked
    pub fn set_status(&self, id: &str, status: JobStatus) -> bool {
        match self.jobs.write().get_mut(id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Remove a finished job
    pub fn complete(&self, id: &str) -> Option<JobRecord> {
        let removed = self.jobs.write().remove(id);
        if removed.is_some() {
            debug!(job_id = id, "Job completed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().get(id).cloned()
    }

    /// All tracked jobs, oldest first
    pub fn list_all(&self) -> Vec<JobRecord> {
        let mut records: Vec<_> = self.jobs.read().values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn clear(&self) {
        self.jobs.write().clear();
    }

    /// Drop jobs older than `max_age`, returning how many were removed
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.sweep_expired_at(Utc::now(), max_age)
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, record| now.signed_duration_since(record.started_at) <= max_age);
        let removed = before - jobs.len();

        if removed > 0 {
            info!(removed, "Swept expired jobs");
        }
        removed
    }

    /// Sweep on a fixed period until the handle is aborted
    pub fn spawn_sweeper(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.sweep_expired(max_age);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_prefixed_and_unique() {
        let a = new_job_id(JobKind::AudioDownload);
        let b = new_job_id(JobKind::AudioDownload);
        assert!(a.starts_with("audio_"));
        assert!(new_job_id(JobKind::InfoFetch).starts_with("info_"));
        assert!(new_job_id(JobKind::CombinedDownload).starts_with("combined_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_overwrites_by_id() {
        let tracker = JobTracker::new();
        tracker.register("job_1", JobKind::AudioDownload, JobMeta::new("https://a"));
        tracker.register(
            "job_1",
            JobKind::CombinedDownload,
            JobMeta::new("https://b").with_title("clip"),
        );

        assert_eq!(tracker.len(), 1);
        let record = tracker.get("job_1").unwrap();
        assert_eq!(record.kind, JobKind::CombinedDownload);
        assert_eq!(record.title, "clip");
        assert_eq!(record.source_url, "https://b");
        assert_eq!(record.status, JobStatus::Starting);
    }

    #[test]
    fn test_complete_removes_record() {
        let tracker = JobTracker::new();
        tracker.register("job_1", JobKind::InfoFetch, JobMeta::new("u"));
        assert!(tracker.set_status("job_1", JobStatus::Running));

        let record = tracker.complete("job_1").unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert!(tracker.get("job_1").is_none());
        assert!(tracker.complete("job_1").is_none());
        assert!(!tracker.set_status("job_1", JobStatus::Cancelled));
    }

    #[test]
    fn test_sweep_drops_stale_jobs() {
        let tracker = JobTracker::new();
        let t = Utc::now();
        tracker.register_at("old", JobKind::AudioDownload, JobMeta::new("u"), t);
        tracker.register_at(
            "fresh",
            JobKind::AudioDownload,
            JobMeta::new("u"),
            t + chrono::Duration::minutes(4),
        );

        let removed =
            tracker.sweep_expired_at(t + chrono::Duration::minutes(6), Duration::from_secs(300));

        assert_eq!(removed, 1);
        let ids: Vec<_> = tracker.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fresh".to_string()]);
    }

    #[test]
    fn test_list_all_oldest_first() {
        let tracker = JobTracker::new();
        let t = Utc::now();
        tracker.register_at("b", JobKind::AudioDownload, JobMeta::new("u"), t + chrono::Duration::seconds(1));
        tracker.register_at("a", JobKind::AudioDownload, JobMeta::new("u"), t);

        let ids: Vec<_> = tracker.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let tracker = JobTracker::new();
        tracker.register_at(
            "abandoned",
            JobKind::CombinedDownload,
            JobMeta::new("u"),
            Utc::now() - chrono::Duration::minutes(10),
        );
        tracker.register("live", JobKind::CombinedDownload, JobMeta::new("u"));

        let sweeper = tracker.spawn_sweeper(Duration::from_millis(10), Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert!(tracker.get("abandoned").is_none());
        assert!(tracker.get("live").is_some());
    }
}
