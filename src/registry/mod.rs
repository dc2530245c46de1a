// Path registry: lifecycle of Ansible control-node path records

mod store;
mod validate;

pub use store::*;
pub use validate::*;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::hosts::{Actor, HostDirectory, HostId, ManagedHost};
use crate::output::errors::ControlNodeError;

/// Identifier of a path record
pub type PathId = u64;

/// What a registered path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Playbook,
    Inventory,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKind::Playbook => write!(f, "playbook"),
            PathKind::Inventory => write!(f, "inventory"),
        }
    }
}

impl FromStr for PathKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "playbook" => Ok(PathKind::Playbook),
            "inventory" => Ok(PathKind::Inventory),
            other => Err(format!("unknown path kind '{}'", other)),
        }
    }
}

/// A registered location on a control node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsiblePath {
    pub id: PathId,
    pub kind: PathKind,
    pub host_id: HostId,
    pub path: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Registry of control-node paths, scoped by actor visibility
#[derive(Clone)]
pub struct PathRegistry {
    store: Arc<dyn PathStore>,
    hosts: Arc<dyn HostDirectory>,
}

impl PathRegistry {
    pub fn new(store: Arc<dyn PathStore>, hosts: Arc<dyn HostDirectory>) -> Self {
        PathRegistry { store, hosts }
    }

    /// Resolve a host the actor may see
    pub fn resolve_host(&self, host_id: HostId, actor: &Actor) -> Result<ManagedHost, ControlNodeError> {
        self.hosts
            .resolve(host_id, actor)
            .ok_or(ControlNodeError::NotFound)
    }

    /// All paths of a host, ordered by id
    pub fn list(&self, host_id: HostId, actor: &Actor) -> Result<Vec<AnsiblePath>, ControlNodeError> {
        self.resolve_host(host_id, actor)?;
        self.store.list_by_host(host_id)
    }

    /// Register a new path on a host
    pub fn create(
        &self,
        kind: PathKind,
        host_id: HostId,
        path: &str,
        actor: &Actor,
    ) -> Result<AnsiblePath, ControlNodeError> {
        self.resolve_host(host_id, actor)?;
        let path = validate_path(path)?;

        let record = self.store.insert(kind, host_id, &path)?;
        info!(
            id = record.id,
            host_id,
            kind = %kind,
            path = %record.path,
            actor = %actor.login,
            "registered ansible path"
        );
        Ok(record)
    }

    /// Change the path string of an existing record
    pub fn update(
        &self,
        path_id: PathId,
        new_path: &str,
        actor: &Actor,
    ) -> Result<AnsiblePath, ControlNodeError> {
        self.get(path_id, actor)?;
        let path = validate_path(new_path)?;

        let record = self.store.update_path(path_id, &path)?;
        info!(id = path_id, path = %record.path, actor = %actor.login, "updated ansible path");
        Ok(record)
    }

    /// Remove a path record
    pub fn delete(&self, path_id: PathId, actor: &Actor) -> Result<(), ControlNodeError> {
        self.get(path_id, actor)?;
        self.store.remove(path_id)?;
        info!(id = path_id, actor = %actor.login, "removed ansible path");
        Ok(())
    }

    /// Fetch a path record whose host is visible to the actor
    pub fn get(&self, path_id: PathId, actor: &Actor) -> Result<AnsiblePath, ControlNodeError> {
        let record = self.store.get(path_id)?.ok_or(ControlNodeError::NotFound)?;
        self.resolve_host(record.host_id, actor)?;
        Ok(record)
    }

    /// Resolve a path of the expected kind together with its control node.
    ///
    /// A kind mismatch is reported as `NotFound`, same as an unknown id.
    pub fn lookup(
        &self,
        path_id: PathId,
        kind: PathKind,
        actor: &Actor,
    ) -> Result<(AnsiblePath, ManagedHost), ControlNodeError> {
        let record = self.store.get(path_id)?.ok_or(ControlNodeError::NotFound)?;
        let host = self.resolve_host(record.host_id, actor)?;

        if record.kind != kind {
            debug!(
                id = path_id,
                expected = %kind,
                actual = %record.kind,
                "path kind mismatch"
            );
            return Err(ControlNodeError::NotFound);
        }

        Ok((record, host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::messages;
    use crate::testing;
    use pretty_assertions::assert_eq;

    fn registry() -> PathRegistry {
        PathRegistry::new(Arc::new(MemoryPathStore::new()), testing::directory())
    }

    #[test]
    fn test_create_then_list() {
        let registry = registry();
        let actor = testing::actor();

        let created = registry
            .create(PathKind::Inventory, 42, "/srv/ansible/inventory", &actor)
            .unwrap();
        let listed = registry.list(42, &actor).unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], created);
        assert_eq!(created.kind, PathKind::Inventory);
        assert_eq!(created.host_id, 42);
    }

    #[test]
    fn test_update_changes_only_path() {
        let registry = registry();
        let actor = testing::actor();

        let created = registry
            .create(PathKind::Playbook, 42, "/srv/ansible/playbooks", &actor)
            .unwrap();
        let updated = registry.update(created.id, "/opt/playbooks/", &actor).unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.kind, created.kind);
        assert_eq!(updated.host_id, created.host_id);
        assert_eq!(updated.created, created.created);
        assert_eq!(updated.path, "/opt/playbooks");
    }

    #[test]
    fn test_duplicate_only_within_kind() {
        let registry = registry();
        let actor = testing::actor();

        registry
            .create(PathKind::Playbook, 42, "/srv/ansible", &actor)
            .unwrap();
        match registry.create(PathKind::Playbook, 42, "/srv/ansible/", &actor) {
            Err(ControlNodeError::Validation(errors)) => {
                assert!(errors.has_field_error("path", messages::PATH_DUPLICATE));
            }
            other => panic!("expected duplicate failure, got {:?}", other),
        }

        registry
            .create(PathKind::Inventory, 42, "/srv/ansible", &actor)
            .unwrap();
        assert_eq!(registry.list(42, &actor).unwrap().len(), 2);
    }

    #[test]
    fn test_surrounding_whitespace_is_not_a_new_path() {
        let registry = registry();
        let actor = testing::actor();

        let created = registry
            .create(PathKind::Inventory, 42, "/srv/ansible ", &actor)
            .unwrap();
        assert_eq!(created.path, "/srv/ansible");
        assert!(matches!(
            registry.create(PathKind::Inventory, 42, "/srv/ansible", &actor),
            Err(ControlNodeError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_paths_fail_for_any_kind() {
        let registry = registry();
        let actor = testing::actor();

        for kind in [PathKind::Playbook, PathKind::Inventory] {
            for bad in ["relative/path", "/srv/../etc", "../x", ""] {
                assert!(
                    matches!(
                        registry.create(kind, 42, bad, &actor),
                        Err(ControlNodeError::Validation(_))
                    ),
                    "{} accepted for {}",
                    bad,
                    kind
                );
            }
        }
        assert!(registry.list(42, &actor).unwrap().is_empty());
    }

    #[test]
    fn test_delete_twice() {
        let registry = registry();
        let actor = testing::actor();

        let created = registry
            .create(PathKind::Playbook, 42, "/srv/ansible", &actor)
            .unwrap();
        registry.delete(created.id, &actor).unwrap();
        assert!(matches!(
            registry.delete(created.id, &actor),
            Err(ControlNodeError::NotFound)
        ));
    }

    #[test]
    fn test_invisible_host_is_not_found() {
        let registry = registry();
        let actor = testing::actor();
        let stranger = testing::other_org_actor();

        assert!(matches!(
            registry.create(PathKind::Playbook, 999, "/srv", &actor),
            Err(ControlNodeError::NotFound)
        ));

        let created = registry
            .create(PathKind::Playbook, 42, "/srv/ansible", &actor)
            .unwrap();
        assert!(matches!(
            registry.list(42, &stranger),
            Err(ControlNodeError::NotFound)
        ));
        assert!(matches!(
            registry.update(created.id, "/srv/x", &stranger),
            Err(ControlNodeError::NotFound)
        ));
        assert!(matches!(
            registry.delete(created.id, &stranger),
            Err(ControlNodeError::NotFound)
        ));
        // Still there for its owner
        assert_eq!(registry.list(42, &actor).unwrap().len(), 1);
    }

    #[test]
    fn test_lookup_kind_mismatch() {
        let registry = registry();
        let actor = testing::actor();

        let playbooks = registry
            .create(PathKind::Playbook, 42, "/srv/ansible/playbooks", &actor)
            .unwrap();

        let (record, host) = registry
            .lookup(playbooks.id, PathKind::Playbook, &actor)
            .unwrap();
        assert_eq!(record.id, playbooks.id);
        assert_eq!(host.id, 42);

        assert!(matches!(
            registry.lookup(playbooks.id, PathKind::Inventory, &actor),
            Err(ControlNodeError::NotFound)
        ));
    }

    #[test]
    fn test_path_kind_parse() {
        assert_eq!("Playbook".parse::<PathKind>().unwrap(), PathKind::Playbook);
        assert_eq!("inventory".parse::<PathKind>().unwrap(), PathKind::Inventory);
        assert!("roles".parse::<PathKind>().is_err());
    }
}
