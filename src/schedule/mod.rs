// Execution scheduler bridge: hand playbook runs to the external task scheduler

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::hosts::{Actor, HostId};
use crate::output::errors::ControlNodeError;
use crate::output::messages;
use crate::registry::{normalize_path, validate_playbook_path, PathRegistry};

pub mod http;

pub use http::HttpTaskScheduler;

/// Opaque identifier the scheduler assigns to a submitted run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    pub fn new(id: impl Into<String>) -> Self {
        TrackingId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A playbook run as requested at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookRunRequest {
    pub playbook_path: String,
    #[serde(default)]
    pub inventory_path: Option<String>,
    pub control_node: HostId,
    /// Defaults to the submission time
    #[serde(default)]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub flush_cache: bool,
}

impl PlaybookRunRequest {
    pub fn new(control_node: HostId, playbook_path: impl Into<String>) -> Self {
        PlaybookRunRequest {
            playbook_path: playbook_path.into(),
            inventory_path: None,
            control_node,
            earliest: None,
            test_mode: false,
            flush_cache: false,
        }
    }

    pub fn with_inventory(mut self, inventory_path: impl Into<String>) -> Self {
        self.inventory_path = Some(inventory_path.into());
        self
    }

    pub fn with_earliest(mut self, earliest: DateTime<Utc>) -> Self {
        self.earliest = Some(earliest);
        self
    }

    /// Run in ansible check mode
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_flush_cache(mut self, flush_cache: bool) -> Self {
        self.flush_cache = flush_cache;
        self
    }
}

/// What the scheduler receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledExecution {
    pub playbook_path: String,
    pub inventory_path: Option<String>,
    pub control_node: HostId,
    pub earliest: DateTime<Utc>,
    pub actor: Actor,
    pub test_mode: bool,
    pub flush_cache: bool,
}

/// Scheduler-side failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler is down or did not answer
    #[error("task scheduler unavailable: {0}")]
    Unavailable(String),

    /// The scheduler answered but refused the submission
    #[error("task scheduler rejected the request: {0}")]
    Rejected(String),
}

/// The external task scheduler
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn submit(&self, execution: &ScheduledExecution) -> Result<TrackingId, SchedulerError>;
}

/// Validates run requests and submits them to the scheduler
#[derive(Clone)]
pub struct SchedulerBridge {
    registry: PathRegistry,
    scheduler: Arc<dyn TaskScheduler>,
}

impl SchedulerBridge {
    pub fn new(registry: PathRegistry, scheduler: Arc<dyn TaskScheduler>) -> Self {
        SchedulerBridge {
            registry,
            scheduler,
        }
    }

    /// Submit a run and return as soon as the scheduler accepted it
    pub async fn schedule_playbook(
        &self,
        request: PlaybookRunRequest,
        actor: &Actor,
    ) -> Result<TrackingId, ControlNodeError> {
        self.registry.resolve_host(request.control_node, actor)?;

        let playbook_path = validate_playbook_path(&request.playbook_path)?;
        let inventory_path = match request.inventory_path.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(inventory) if inventory.split('/').any(|s| s == "..") => {
                return Err(ControlNodeError::field(
                    "inventoryPath",
                    messages::PATH_TRAVERSAL,
                ));
            }
            Some(inventory) => Some(normalize_path(inventory)),
        };

        let execution = ScheduledExecution {
            playbook_path,
            inventory_path,
            control_node: request.control_node,
            earliest: request.earliest.unwrap_or_else(Utc::now),
            actor: actor.clone(),
            test_mode: request.test_mode,
            flush_cache: request.flush_cache,
        };

        match self.scheduler.submit(&execution).await {
            Ok(tracking_id) => {
                info!(
                    tracking_id = %tracking_id,
                    control_node = execution.control_node,
                    playbook = %execution.playbook_path,
                    earliest = %execution.earliest,
                    actor = %actor.login,
                    "scheduled playbook run"
                );
                Ok(tracking_id)
            }
            Err(SchedulerError::Unavailable(message)) => {
                warn!(%message, "task scheduler unavailable");
                Err(ControlNodeError::SchedulerUnavailable { message })
            }
            Err(SchedulerError::Rejected(message)) => {
                warn!(%message, "task scheduler rejected playbook run");
                Err(ControlNodeError::execution(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, RecordingScheduler};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn bridge(scheduler: Arc<RecordingScheduler>) -> SchedulerBridge {
        SchedulerBridge::new(testing::registry(), scheduler)
    }

    #[tokio::test]
    async fn test_schedule_site_playbook() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let bridge = bridge(scheduler.clone());
        let actor = testing::actor();

        let tracking_id = bridge
            .schedule_playbook(PlaybookRunRequest::new(42, "site.yml"), &actor)
            .await
            .unwrap();

        assert_eq!(tracking_id, TrackingId::new("action-1"));

        let submissions = scheduler.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].control_node, 42);
        assert_eq!(submissions[0].playbook_path, "site.yml");
        assert_eq!(submissions[0].inventory_path, None);
        assert_eq!(submissions[0].actor, actor);
        assert!(!submissions[0].test_mode);
    }

    #[tokio::test]
    async fn test_earliest_defaults_to_now() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let bridge = bridge(scheduler.clone());

        let before = Utc::now();
        bridge
            .schedule_playbook(PlaybookRunRequest::new(42, "site.yml"), &testing::actor())
            .await
            .unwrap();
        let after = Utc::now();

        let earliest = scheduler.submissions()[0].earliest;
        assert!(earliest >= before && earliest <= after);
    }

    #[tokio::test]
    async fn test_explicit_request_fields_pass_through() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let bridge = bridge(scheduler.clone());
        let later = Utc::now() + Duration::hours(2);

        let request = PlaybookRunRequest::new(42, "web//deploy.yml")
            .with_inventory("/srv/ansible/playbooks/web/hosts")
            .with_earliest(later)
            .with_test_mode(true)
            .with_flush_cache(true);
        bridge.schedule_playbook(request, &testing::actor()).await.unwrap();

        let submitted = &scheduler.submissions()[0];
        assert_eq!(submitted.playbook_path, "web/deploy.yml");
        assert_eq!(
            submitted.inventory_path.as_deref(),
            Some("/srv/ansible/playbooks/web/hosts")
        );
        assert_eq!(submitted.earliest, later);
        assert!(submitted.test_mode);
        assert!(submitted.flush_cache);
    }

    #[tokio::test]
    async fn test_invisible_control_node_is_not_found() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let bridge = bridge(scheduler.clone());

        assert!(matches!(
            bridge
                .schedule_playbook(PlaybookRunRequest::new(50, "site.yml"), &testing::actor())
                .await,
            Err(ControlNodeError::NotFound)
        ));
        assert!(scheduler.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_paths_are_validation_failures() {
        let scheduler = Arc::new(RecordingScheduler::new());
        let bridge = bridge(scheduler.clone());
        let actor = testing::actor();

        for request in [
            PlaybookRunRequest::new(42, ""),
            PlaybookRunRequest::new(42, "../site.yml"),
            PlaybookRunRequest::new(42, "/srv/ansible/playbooks/site.yml"),
            PlaybookRunRequest::new(42, "site.yml").with_inventory("../../hosts"),
        ] {
            assert!(matches!(
                bridge.schedule_playbook(request, &actor).await,
                Err(ControlNodeError::Validation(_))
            ));
        }
        assert!(scheduler.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_down() {
        let bridge = bridge(Arc::new(RecordingScheduler::down()));

        assert!(matches!(
            bridge
                .schedule_playbook(PlaybookRunRequest::new(42, "site.yml"), &testing::actor())
                .await,
            Err(ControlNodeError::SchedulerUnavailable { .. })
        ));
    }

    #[test]
    fn test_request_deserialize_defaults() {
        let request: PlaybookRunRequest =
            serde_json::from_str(r#"{"playbook_path": "site.yml", "control_node": 42}"#).unwrap();
        assert_eq!(request, PlaybookRunRequest::new(42, "site.yml"));
    }
}
