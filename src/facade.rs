// Integration facade: the single contract the boundary layer calls

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ControlNodeConfig;
use crate::discover::{PlaybookDiscoverer, PlaybookTree};
use crate::gateway::{HostChannel, LocalChannel, RemoteAgentGateway, RemoteChannel, SshChannel};
use crate::hosts::{Actor, HostDirectory, HostId};
use crate::introspect::{InventoryIntrospector, InventoryTree};
use crate::output::errors::ControlNodeError;
use crate::output::messages::MessageCatalog;
use crate::output::response::{Failure, ResultJson};
use crate::registry::{AnsiblePath, JsonFilePathStore, PathId, PathKind, PathRegistry, PathStore};
use crate::schedule::{HttpTaskScheduler, PlaybookRunRequest, SchedulerBridge, TaskScheduler, TrackingId};

/// Create-or-update request for a path record.
///
/// With an `id` only `path` is applied; kind and host of an existing record
/// never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePathRequest {
    #[serde(default)]
    pub id: Option<PathId>,
    pub kind: PathKind,
    pub host_id: HostId,
    pub path: String,
}

impl SavePathRequest {
    pub fn create(kind: PathKind, host_id: HostId, path: impl Into<String>) -> Self {
        SavePathRequest {
            id: None,
            kind,
            host_id,
            path: path.into(),
        }
    }

    pub fn update(id: PathId, kind: PathKind, host_id: HostId, path: impl Into<String>) -> Self {
        SavePathRequest {
            id: Some(id),
            kind,
            host_id,
            path: path.into(),
        }
    }
}

/// Composes registry, introspector, discoverer and scheduler bridge
#[derive(Clone)]
pub struct ControlNodeIntegration {
    registry: PathRegistry,
    introspector: InventoryIntrospector,
    discoverer: PlaybookDiscoverer,
    bridge: SchedulerBridge,
    catalog: MessageCatalog,
}

impl ControlNodeIntegration {
    pub fn new(
        registry: PathRegistry,
        gateway: RemoteAgentGateway,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Self {
        ControlNodeIntegration {
            introspector: InventoryIntrospector::new(registry.clone(), gateway.clone()),
            discoverer: PlaybookDiscoverer::new(registry.clone(), gateway),
            bridge: SchedulerBridge::new(registry.clone(), scheduler),
            registry,
            catalog: MessageCatalog::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: MessageCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Wire everything from configuration: JSON path store, configured
    /// hosts, SSH/local channels and the HTTP scheduler
    pub fn from_config(config: &ControlNodeConfig) -> Result<Self, ControlNodeError> {
        let store: Arc<dyn PathStore> = Arc::new(JsonFilePathStore::open(&config.store_path)?);
        let hosts: Arc<dyn HostDirectory> = Arc::new(config.host_directory());
        let registry = PathRegistry::new(store, hosts);

        Ok(Self::with_components(
            registry,
            config,
            Arc::new(HostChannel::new(
                SshChannel::new(config.connection_pool()),
                LocalChannel::new(),
            )),
        )?
        .with_catalog(config.message_catalog()))
    }

    fn with_components(
        registry: PathRegistry,
        config: &ControlNodeConfig,
        channel: Arc<dyn RemoteChannel>,
    ) -> Result<Self, ControlNodeError> {
        let gateway = RemoteAgentGateway::new(channel).with_timeout(config.gateway_timeout());
        let scheduler = HttpTaskScheduler::new(&config.scheduler.url, config.scheduler_timeout())
            .map_err(|e| ControlNodeError::Config {
                message: e.to_string(),
                path: None,
            })?;

        Ok(Self::new(registry, gateway, Arc::new(scheduler)))
    }

    pub fn registry(&self) -> &PathRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &MessageCatalog {
        &self.catalog
    }

    pub fn list_paths(&self, host_id: HostId, actor: &Actor) -> ResultJson<Vec<AnsiblePath>> {
        self.respond("list_paths", self.registry.list(host_id, actor))
    }

    /// Create when the request has no id, update otherwise; returns the path id
    pub fn save_path(&self, request: &SavePathRequest, actor: &Actor) -> ResultJson<PathId> {
        let saved = match request.id {
            None => self
                .registry
                .create(request.kind, request.host_id, &request.path, actor),
            Some(id) => self.registry.update(id, &request.path, actor),
        };
        self.respond("save_path", saved.map(|record| record.id))
    }

    pub fn delete_path(&self, path_id: PathId, actor: &Actor) -> ResultJson<PathId> {
        self.respond(
            "delete_path",
            self.registry.delete(path_id, actor).map(|_| path_id),
        )
    }

    pub async fn fetch_playbook_contents(
        &self,
        path_id: PathId,
        relative: &str,
        actor: &Actor,
    ) -> ResultJson<String> {
        let result = self
            .discoverer
            .fetch_playbook_contents(path_id, relative, actor)
            .await;
        self.respond_remote("fetch_playbook_contents", result)
    }

    pub async fn schedule_playbook(
        &self,
        request: PlaybookRunRequest,
        actor: &Actor,
    ) -> ResultJson<TrackingId> {
        let result = self.bridge.schedule_playbook(request, actor).await;
        self.respond("schedule_playbook", result)
    }

    pub async fn introspect_inventory(
        &self,
        path_id: PathId,
        actor: &Actor,
    ) -> ResultJson<InventoryTree> {
        let result = self.introspector.introspect(path_id, actor).await;
        self.respond_remote("introspect_inventory", result)
    }

    /// Inventory tree rendered as YAML
    pub async fn introspect_inventory_yaml(&self, path_id: PathId, actor: &Actor) -> ResultJson<String> {
        match self.introspect_inventory(path_id, actor).await {
            ResultJson::Success { data } => match data.to_yaml() {
                Ok(yaml) => ResultJson::success(yaml),
                Err(e) => self.respond(
                    "introspect_inventory_yaml",
                    Err(ControlNodeError::execution(format!(
                        "failed to render inventory: {}",
                        e
                    ))),
                ),
            },
            ResultJson::Failure(failure) => ResultJson::failure(failure),
        }
    }

    pub async fn discover_playbooks(
        &self,
        path_id: PathId,
        actor: &Actor,
    ) -> ResultJson<PlaybookTree> {
        let result = self.discoverer.discover(path_id, actor).await;
        self.respond_remote("discover_playbooks", result)
    }

    fn respond<T>(&self, operation: &str, result: Result<T, ControlNodeError>) -> ResultJson<T> {
        match result {
            Ok(data) => ResultJson::success(data),
            Err(error) => {
                debug!(operation, error = %error, "operation failed");
                ResultJson::failure(Failure::from_error(&error, &self.catalog))
            }
        }
    }

    /// Like `respond`, with `None` becoming the not-responding advisory
    fn respond_remote<T>(
        &self,
        operation: &str,
        result: Result<Option<T>, ControlNodeError>,
    ) -> ResultJson<T> {
        match result {
            Ok(Some(data)) => ResultJson::success(data),
            Ok(None) => {
                debug!(operation, "control node not responding");
                ResultJson::failure(Failure::not_responding(&self.catalog))
            }
            Err(error) => self.respond(operation, Err(error)),
        }
    }
}
