use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::generation::{has_pending_items, StatusView};

/// Tenant recorded for jobs first seen through a webhook, before the
/// submission write for the same id has landed.
pub const UNASSIGNED_SHOP: &str = "unassigned";

/// Message stored when IMAI reports a failure without a reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Generation failed.";

/// Status of a generation job as tracked by IMAI and mirrored locally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    #[strum(to_string = "queued", serialize = "pending")]
    Queued,
    #[serde(alias = "processing")]
    #[strum(to_string = "running", serialize = "processing")]
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Classify moving from `self` to `next` under the terminal-wins rule.
    fn transition_to(self, next: JobStatus) -> Transition {
        if self == next {
            Transition::Same
        } else if self.is_terminal() || next.rank() < self.rank() {
            Transition::Stale
        } else {
            Transition::Advance
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Advance,
    Same,
    Stale,
}

/// IMAI generation pipeline a job was submitted to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EndpointKind {
    Marketing,
    Design,
    Ecommerce,
}

impl EndpointKind {
    /// E-commerce generation works from a product page, so it needs a URL.
    pub fn requires_url(self) -> bool {
        matches!(self, EndpointKind::Ecommerce)
    }

    pub fn requires_prompt(self) -> bool {
        !self.requires_url()
    }

    /// Path of the IMAI submission endpoint for this pipeline.
    pub fn api_path(self) -> &'static str {
        match self {
            EndpointKind::Marketing => "/api/v1/generate/marketing",
            EndpointKind::Design => "/api/v1/generate/design",
            EndpointKind::Ecommerce => "/api/v1/generate/ecommerce",
        }
    }
}

/// Where an update to a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UpdateSource {
    Submission,
    Webhook,
    StatusQuery,
}

/// Progress of a job as seen by a poller. Splits `completed` into a fully
/// resolved state and one where some batch items are still pending.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum JobPhase {
    Queued,
    Running,
    CompletedWithPending,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn of(status: JobStatus, result: Option<&serde_json::Value>) -> Self {
        match status {
            JobStatus::Queued => JobPhase::Queued,
            JobStatus::Running => JobPhase::Running,
            JobStatus::Failed => JobPhase::Failed,
            JobStatus::Completed => {
                if result.is_some_and(has_pending_items) {
                    JobPhase::CompletedWithPending
                } else {
                    JobPhase::Completed
                }
            }
        }
    }

    /// Whether a poller can stop on this phase.
    pub fn is_final(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

/// One observation about a job, from any of the three sources.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub source: UpdateSource,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub shop: Option<String>,
    pub endpoint_kind: Option<EndpointKind>,
    pub prompt: Option<String>,
    pub image_url: Option<String>,
}

impl JobUpdate {
    pub fn submitted(
        shop: &str,
        kind: EndpointKind,
        prompt: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        Self {
            source: UpdateSource::Submission,
            status: JobStatus::Queued,
            result: None,
            error: None,
            completed_at: None,
            shop: Some(shop.to_string()),
            endpoint_kind: Some(kind),
            prompt,
            image_url,
        }
    }

    pub fn from_webhook(
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            source: UpdateSource::Webhook,
            status,
            result,
            error,
            completed_at,
            shop: None,
            endpoint_kind: None,
            prompt: None,
            image_url: None,
        }
    }

    pub fn from_status_query(shop: &str, view: StatusView) -> Self {
        Self {
            source: UpdateSource::StatusQuery,
            status: view.status,
            result: view.result,
            error: view.error,
            completed_at: None,
            shop: Some(shop.to_string()),
            endpoint_kind: None,
            prompt: None,
            image_url: None,
        }
    }
}

/// What an upsert did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum MergeOutcome {
    Inserted,
    Applied,
    Unchanged,
    /// The update was older than the stored state and was ignored.
    Stale,
}

impl MergeOutcome {
    pub fn mutated(self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Applied)
    }
}

/// A generation job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub shop: String,
    pub endpoint_kind: Option<EndpointKind>,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub webhook_delivered: bool,
    pub prompt: Option<String>,
    pub image_url: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rehosted_keys: Vec<String>,
    pub rehosted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build the record an upsert inserts when `job_id` is unknown.
    pub fn create(job_id: &str, update: &JobUpdate, now: DateTime<Utc>) -> Self {
        let mut job = Self {
            job_id: job_id.to_string(),
            shop: UNASSIGNED_SHOP.to_string(),
            endpoint_kind: None,
            status: JobStatus::Queued,
            result: None,
            error: None,
            webhook_delivered: false,
            prompt: None,
            image_url: None,
            completed_at: None,
            rehosted_keys: Vec::new(),
            rehosted_at: None,
            created_at: now,
            updated_at: now,
        };
        job.merge(update, now);
        job.updated_at = now;
        job
    }

    /// Merge an update into this record.
    ///
    /// Terminal states win: once `completed` or `failed` is stored, no update
    /// moves the job to another status. Applying the same update twice leaves
    /// the record as it was after the first application.
    pub fn merge(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> MergeOutcome {
        let mut changed = self.adopt_context(update);

        let transition = self.status.transition_to(update.status);
        match transition {
            Transition::Advance => {
                self.apply_status(update, now);
                changed = true;
            }
            Transition::Same if self.phase() == JobPhase::CompletedWithPending => {
                // pending batch items resolving after the umbrella job completed
                if let Some(result) = &update.result {
                    if self.result.as_ref() != Some(result) {
                        self.result = Some(result.clone());
                        changed = true;
                    }
                }
            }
            Transition::Same | Transition::Stale => {}
        }

        if update.source == UpdateSource::Webhook
            && update.status.is_terminal()
            && update.status == self.status
            && !self.webhook_delivered
        {
            self.webhook_delivered = true;
            changed = true;
        }

        if changed {
            self.updated_at = now;
            MergeOutcome::Applied
        } else if transition == Transition::Stale {
            MergeOutcome::Stale
        } else {
            MergeOutcome::Unchanged
        }
    }

    fn adopt_context(&mut self, update: &JobUpdate) -> bool {
        let mut changed = false;

        if self.shop == UNASSIGNED_SHOP {
            if let Some(shop) = update.shop.as_deref().filter(|s| *s != UNASSIGNED_SHOP) {
                self.shop = shop.to_string();
                changed = true;
            }
        }
        if self.endpoint_kind.is_none() && update.endpoint_kind.is_some() {
            self.endpoint_kind = update.endpoint_kind;
            changed = true;
        }
        if self.prompt.is_none() && update.prompt.is_some() {
            self.prompt = update.prompt.clone();
            changed = true;
        }
        if self.image_url.is_none() && update.image_url.is_some() {
            self.image_url = update.image_url.clone();
            changed = true;
        }

        changed
    }

    fn apply_status(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        match update.status {
            JobStatus::Completed => {
                self.result = update.result.clone();
                self.error = None;
                self.completed_at = Some(update.completed_at.unwrap_or(now));
            }
            JobStatus::Failed => {
                let message = update
                    .error
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .unwrap_or(DEFAULT_FAILURE_MESSAGE);
                self.result = None;
                self.error = Some(message.to_string());
                self.completed_at = Some(update.completed_at.unwrap_or(now));
            }
            JobStatus::Queued | JobStatus::Running => {
                self.result = None;
                self.error = None;
            }
        }
    }

    pub fn phase(&self) -> JobPhase {
        JobPhase::of(self.status, self.result.as_ref())
    }

    pub fn is_unassigned(&self) -> bool {
        self.shop == UNASSIGNED_SHOP
    }

    /// The `{status, result?, error?}` shape served to pollers.
    pub fn view(&self) -> StatusView {
        StatusView {
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const JOB_ID: &str = "job_1700000000_abc123def";

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn later(secs: i64) -> DateTime<Utc> {
        now() + chrono::Duration::seconds(secs)
    }

    fn submitted() -> JobUpdate {
        JobUpdate::submitted(
            "demo.myshopify.com",
            EndpointKind::Marketing,
            Some("summer banner".to_string()),
            None,
        )
    }

    fn completed_result(pending: &[&str]) -> serde_json::Value {
        json!({
            "urls": ["https://cdn.imai.studio/1.png", "https://cdn.imai.studio/2.png"],
            "assetIds": ["asset_1", "asset_2"],
            "pendingIds": pending,
        })
    }

    fn webhook(status: JobStatus, result: Option<serde_json::Value>) -> JobUpdate {
        JobUpdate::from_webhook(status, result, None, None)
    }

    #[test]
    fn test_status_parses_aliases() {
        assert_eq!("queued".parse::<JobStatus>().unwrap(), JobStatus::Queued);
        assert_eq!("pending".parse::<JobStatus>().unwrap(), JobStatus::Queued);
        assert_eq!("processing".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert_eq!(JobStatus::Running.to_string(), "running");
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_create_from_submission() {
        let job = Job::create(JOB_ID, &submitted(), now());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.shop, "demo.myshopify.com");
        assert_eq!(job.endpoint_kind, Some(EndpointKind::Marketing));
        assert!(!job.webhook_delivered);
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_webhook_completion_applies_and_marks_delivery() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        let outcome = job.merge(
            &webhook(JobStatus::Completed, Some(completed_result(&[]))),
            later(5),
        );

        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.webhook_delivered);
        assert_eq!(job.completed_at, Some(later(5)));
        assert_eq!(job.updated_at, later(5));
        assert_eq!(job.phase(), JobPhase::Completed);
    }

    #[test]
    fn test_duplicate_webhook_is_idempotent() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        let update = webhook(JobStatus::Completed, Some(completed_result(&[])));

        job.merge(&update, later(5));
        let after_first = job.clone();
        let outcome = job.merge(&update, later(30));

        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(job, after_first);
    }

    #[test]
    fn test_terminal_state_is_never_downgraded() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        job.merge(&webhook(JobStatus::Failed, None), later(1));

        for status in [JobStatus::Queued, JobStatus::Running, JobStatus::Completed] {
            let outcome = job.merge(&webhook(status, Some(completed_result(&[]))), later(2));
            assert_eq!(outcome, MergeOutcome::Stale);
            assert_eq!(job.status, JobStatus::Failed);
            assert!(job.result.is_none());
        }
    }

    #[test]
    fn test_lifecycle_is_monotonic_for_all_sequences() {
        let statuses = [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ];
        let sources = [
            UpdateSource::Submission,
            UpdateSource::Webhook,
            UpdateSource::StatusQuery,
        ];
        let updates: Vec<JobUpdate> = statuses
            .iter()
            .flat_map(|status| {
                sources.iter().map(move |source| JobUpdate {
                    source: *source,
                    status: *status,
                    result: (*status == JobStatus::Completed).then(|| completed_result(&[])),
                    error: (*status == JobStatus::Failed).then(|| "boom".to_string()),
                    completed_at: None,
                    shop: Some("demo.myshopify.com".to_string()),
                    endpoint_kind: None,
                    prompt: None,
                    image_url: None,
                })
            })
            .collect();

        for a in &updates {
            for b in &updates {
                for c in &updates {
                    let mut job = Job::create(JOB_ID, a, now());
                    let mut terminal: Option<JobStatus> =
                        job.status.is_terminal().then_some(job.status);
                    for (i, u) in [b, c].into_iter().enumerate() {
                        job.merge(u, later(i as i64 + 1));
                        if let Some(t) = terminal {
                            assert_eq!(job.status, t, "terminal state changed");
                        }
                        if job.status.is_terminal() {
                            terminal = Some(job.status);
                        }
                        assert!(!(job.result.is_some() && job.error.is_some()));
                    }
                }
            }
        }
    }

    #[test]
    fn test_running_does_not_regress_to_queued() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        job.merge(&webhook(JobStatus::Running, None), later(1));
        let outcome = job.merge(&submitted(), later(2));

        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_failure_defaults_message_and_clears_result() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        job.merge(
            &JobUpdate::from_webhook(JobStatus::Failed, Some(json!({"urls": []})), Some("  ".into()), None),
            later(1),
        );

        assert_eq!(job.error.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_pending_items_resolve_after_completion() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        job.merge(
            &webhook(JobStatus::Completed, Some(completed_result(&["asset_2"]))),
            later(1),
        );
        assert_eq!(job.phase(), JobPhase::CompletedWithPending);

        let outcome = job.merge(
            &webhook(JobStatus::Completed, Some(completed_result(&[]))),
            later(2),
        );
        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(job.phase(), JobPhase::Completed);

        // fully resolved results are final
        let outcome = job.merge(
            &webhook(JobStatus::Completed, Some(completed_result(&["asset_9"]))),
            later(3),
        );
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(job.phase(), JobPhase::Completed);
    }

    #[test]
    fn test_webhook_first_then_submission_claims_tenant() {
        let mut job = Job::create(
            JOB_ID,
            &webhook(JobStatus::Completed, Some(completed_result(&[]))),
            now(),
        );
        assert!(job.is_unassigned());
        assert!(job.webhook_delivered);

        let outcome = job.merge(&submitted(), later(1));

        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(job.shop, "demo.myshopify.com");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.prompt.as_deref(), Some("summer banner"));
    }

    #[test]
    fn test_poll_completion_then_webhook_marks_delivery_once() {
        let mut job = Job::create(JOB_ID, &submitted(), now());
        let view = StatusView {
            status: JobStatus::Completed,
            result: Some(completed_result(&[])),
            error: None,
        };
        job.merge(&JobUpdate::from_status_query("demo.myshopify.com", view), later(1));
        assert!(!job.webhook_delivered);

        let update = webhook(JobStatus::Completed, Some(completed_result(&[])));
        assert_eq!(job.merge(&update, later(2)), MergeOutcome::Applied);
        assert!(job.webhook_delivered);
        assert_eq!(job.merge(&update, later(3)), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_phase_for_result_shapes() {
        assert_eq!(JobPhase::of(JobStatus::Completed, None), JobPhase::Completed);
        assert_eq!(
            JobPhase::of(JobStatus::Completed, Some(&json!({"urls": ["a"]}))),
            JobPhase::Completed
        );
        assert_eq!(
            JobPhase::of(JobStatus::Completed, Some(&json!({"pendingIds": ["p1"]}))),
            JobPhase::CompletedWithPending
        );
        assert!(!JobPhase::CompletedWithPending.is_final());
        assert_eq!(JobPhase::CompletedWithPending.to_string(), "completed-with-pending");
    }

    #[test]
    fn test_pending_detected_despite_mistyped_fields() {
        let null_urls = json!({"urls": null, "pendingIds": ["asset_2"]});
        let numeric_version = json!({"urls": ["a"], "versionId": 7, "pendingIds": ["asset_2"]});
        let object_assets = json!({"assetIds": [{"id": "asset_1"}], "pendingIds": ["asset_2"]});
        for result in [&null_urls, &numeric_version, &object_assets] {
            assert_eq!(
                JobPhase::of(JobStatus::Completed, Some(result)),
                JobPhase::CompletedWithPending,
                "{result}"
            );
        }

        let mut job = Job::create(JOB_ID, &submitted(), now());
        job.merge(&webhook(JobStatus::Completed, Some(numeric_version)), later(1));
        assert_eq!(job.phase(), JobPhase::CompletedWithPending);

        let refreshed = json!({"urls": ["a", "b"], "versionId": 7, "pendingIds": []});
        let outcome = job.merge(&webhook(JobStatus::Completed, Some(refreshed.clone())), later(2));
        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(job.result, Some(refreshed));
        assert_eq!(job.phase(), JobPhase::Completed);
    }
}
