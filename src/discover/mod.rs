// Playbook discovery below registered PLAYBOOK paths

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::gateway::{EntryKind, RemoteAgentGateway, RemoteOutcome, TreeDescriptor};
use crate::hosts::Actor;
use crate::output::errors::ControlNodeError;
use crate::registry::{confine_relative, PathId, PathKind, PathRegistry};

/// Inventory file name picked up next to playbooks
const CUSTOM_INVENTORY_FILE: &str = "hosts";

/// A node of a playbook tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlaybookNode {
    Directory {
        name: String,
        children: Vec<PlaybookNode>,
    },
    Playbook {
        name: String,
        /// Path relative to the registered root
        relative_path: String,
        /// Relative path of a `hosts` inventory in the same directory
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_inventory: Option<String>,
    },
}

impl PlaybookNode {
    pub fn name(&self) -> &str {
        match self {
            PlaybookNode::Directory { name, .. } | PlaybookNode::Playbook { name, .. } => name,
        }
    }
}

/// Playbooks found below a registered root
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlaybookTree {
    pub root: String,
    pub children: Vec<PlaybookNode>,
}

impl PlaybookTree {
    /// Relative paths of all playbooks, depth first
    pub fn playbook_paths(&self) -> Vec<&str> {
        fn collect<'a>(nodes: &'a [PlaybookNode], out: &mut Vec<&'a str>) {
            for node in nodes {
                match node {
                    PlaybookNode::Directory { children, .. } => collect(children, out),
                    PlaybookNode::Playbook { relative_path, .. } => out.push(relative_path),
                }
            }
        }

        let mut out = Vec::new();
        collect(&self.children, &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

fn is_playbook_file(name: &str) -> bool {
    name.ends_with(".yml") || name.ends_with(".yaml")
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    }
}

#[derive(Default)]
struct DirBuilder {
    dirs: BTreeMap<String, DirBuilder>,
    playbooks: BTreeMap<String, String>,
}

impl DirBuilder {
    fn dir_mut(&mut self, relative_dir: &str) -> &mut DirBuilder {
        let mut current = self;
        for segment in relative_dir.split('/').filter(|s| !s.is_empty()) {
            current = current.dirs.entry(segment.to_string()).or_default();
        }
        current
    }

    /// Subdirectories first, then playbooks; directories without playbooks are dropped
    fn into_nodes(self, prefix: &str, inventories: &HashSet<String>) -> Vec<PlaybookNode> {
        let mut nodes = Vec::new();

        for (name, dir) in self.dirs {
            let path = join(prefix, &name);
            let children = dir.into_nodes(&path, inventories);
            if !children.is_empty() {
                nodes.push(PlaybookNode::Directory { name, children });
            }
        }

        let custom_inventory = inventories
            .contains(prefix)
            .then(|| join(prefix, CUSTOM_INVENTORY_FILE));

        for (name, relative_path) in self.playbooks {
            nodes.push(PlaybookNode::Playbook {
                name,
                relative_path,
                custom_inventory: custom_inventory.clone(),
            });
        }

        nodes
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Build a playbook tree from a flat listing.
///
/// Directories are visited shallowest first; one whose canonical path was
/// already seen is excluded together with everything below it.
pub fn build_playbook_tree(listing: &TreeDescriptor) -> PlaybookTree {
    let mut entries: Vec<_> = listing.entries.iter().collect();
    entries.sort_by(|a, b| {
        let depth = |p: &str| p.matches('/').count();
        depth(&a.path)
            .cmp(&depth(&b.path))
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut visited: HashSet<&str> = HashSet::from([listing.canonical_root.as_str()]);
    let mut excluded: Vec<String> = Vec::new();
    let mut root = DirBuilder::default();
    let mut inventories = HashSet::new();

    for entry in entries {
        if excluded
            .iter()
            .any(|dir| entry.path.starts_with(dir.as_str()))
        {
            continue;
        }

        let (parent, name) = split_parent(&entry.path);

        match entry.kind {
            EntryKind::Directory => {
                if !visited.insert(entry.canonical.as_str()) {
                    debug!(path = %entry.path, canonical = %entry.canonical, "skipping revisited directory");
                    excluded.push(format!("{}/", entry.path));
                    continue;
                }
                root.dir_mut(&entry.path);
            }
            EntryKind::File if name == CUSTOM_INVENTORY_FILE => {
                inventories.insert(parent.to_string());
            }
            EntryKind::File if is_playbook_file(name) => {
                root.dir_mut(parent)
                    .playbooks
                    .insert(name.to_string(), entry.path.clone());
            }
            EntryKind::File => {}
        }
    }

    PlaybookTree {
        root: listing.root.clone(),
        children: root.into_nodes("", &inventories),
    }
}

/// Lists and reads playbooks on control nodes
#[derive(Clone)]
pub struct PlaybookDiscoverer {
    registry: PathRegistry,
    gateway: RemoteAgentGateway,
}

impl PlaybookDiscoverer {
    pub fn new(registry: PathRegistry, gateway: RemoteAgentGateway) -> Self {
        PlaybookDiscoverer { registry, gateway }
    }

    /// `Ok(None)` when the control node did not answer
    pub async fn discover(
        &self,
        path_id: PathId,
        actor: &Actor,
    ) -> Result<Option<PlaybookTree>, ControlNodeError> {
        let (path, host) = self.registry.lookup(path_id, PathKind::Playbook, actor)?;

        self.gateway
            .list_tree(&host, &path.path)
            .await
            .map(|listing| build_playbook_tree(&listing))
            .into_result()
    }

    /// Read a playbook below the registered root.
    ///
    /// `relative` is confined to the root before anything is sent to the node.
    pub async fn fetch_playbook_contents(
        &self,
        path_id: PathId,
        relative: &str,
        actor: &Actor,
    ) -> Result<Option<String>, ControlNodeError> {
        let (path, host) = self.registry.lookup(path_id, PathKind::Playbook, actor)?;
        let (full_path, _) = confine_relative(&path.path, relative)?;

        self.gateway
            .read_file(&host, &full_path)
            .await
            .and_then(|bytes| match String::from_utf8(bytes) {
                Ok(text) => RemoteOutcome::Success(text),
                Err(_) => RemoteOutcome::Failed(format!("{}: not a UTF-8 text file", full_path)),
            })
            .into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChannelError;
    use crate::output::messages;
    use crate::testing::{self, FakeChannel, Script};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const ROOT: &str = "/srv/ansible/playbooks";

    fn listing() -> TreeDescriptor {
        TreeDescriptor::new(ROOT)
            .with_entry("site.yml", EntryKind::File, "/srv/ansible/playbooks/site.yml")
            .with_entry("README.md", EntryKind::File, "/srv/ansible/playbooks/README.md")
            .with_entry("web", EntryKind::Directory, "/srv/ansible/playbooks/web")
            .with_entry("web/deploy.yaml", EntryKind::File, "/srv/ansible/playbooks/web/deploy.yaml")
            .with_entry("web/hosts", EntryKind::File, "/srv/ansible/playbooks/web/hosts")
            .with_entry("docs", EntryKind::Directory, "/srv/ansible/playbooks/docs")
            .with_entry("docs/notes.txt", EntryKind::File, "/srv/ansible/playbooks/docs/notes.txt")
    }

    fn discoverer(channel: FakeChannel) -> (PlaybookDiscoverer, PathRegistry) {
        let registry = testing::registry();
        let gateway = RemoteAgentGateway::new(Arc::new(channel))
            .with_timeout(Duration::from_millis(50));
        (PlaybookDiscoverer::new(registry.clone(), gateway), registry)
    }

    #[test]
    fn test_build_tree() {
        let tree = build_playbook_tree(&listing());

        assert_eq!(
            tree,
            PlaybookTree {
                root: ROOT.to_string(),
                children: vec![
                    PlaybookNode::Directory {
                        name: "web".to_string(),
                        children: vec![PlaybookNode::Playbook {
                            name: "deploy.yaml".to_string(),
                            relative_path: "web/deploy.yaml".to_string(),
                            custom_inventory: Some("web/hosts".to_string()),
                        }],
                    },
                    PlaybookNode::Playbook {
                        name: "site.yml".to_string(),
                        relative_path: "site.yml".to_string(),
                        custom_inventory: None,
                    },
                ],
            }
        );
    }

    #[test]
    fn test_build_tree_excludes_symlink_cycles() {
        // roles/loop points back at the root, roles/alias at roles
        let listing = TreeDescriptor::new(ROOT)
            .with_entry("roles", EntryKind::Directory, "/srv/ansible/playbooks/roles")
            .with_entry("roles/main.yml", EntryKind::File, "/srv/ansible/playbooks/roles/main.yml")
            .with_entry("roles/loop", EntryKind::Directory, ROOT)
            .with_entry("roles/loop/site.yml", EntryKind::File, "/srv/ansible/playbooks/site.yml")
            .with_entry("roles/alias", EntryKind::Directory, "/srv/ansible/playbooks/roles")
            .with_entry("roles/alias/main.yml", EntryKind::File, "/srv/ansible/playbooks/roles/main.yml");

        let tree = build_playbook_tree(&listing);
        assert_eq!(tree.playbook_paths(), vec!["roles/main.yml"]);
    }

    #[test]
    fn test_build_tree_linked_root_cycle() {
        // The registered root is itself a link to /data/playbooks
        let listing = TreeDescriptor::new(ROOT)
            .with_canonical_root("/data/playbooks")
            .with_entry("site.yml", EntryKind::File, "/data/playbooks/site.yml")
            .with_entry("again", EntryKind::Directory, "/data/playbooks")
            .with_entry("again/site.yml", EntryKind::File, "/data/playbooks/site.yml");

        let tree = build_playbook_tree(&listing);
        assert_eq!(tree.root, ROOT);
        assert_eq!(tree.playbook_paths(), vec!["site.yml"]);
    }

    #[test]
    fn test_build_tree_empty() {
        let tree = build_playbook_tree(&TreeDescriptor::new(ROOT));
        assert!(tree.is_empty());
        assert_eq!(tree.root, ROOT);
    }

    #[tokio::test]
    async fn test_discover() {
        let channel = FakeChannel::new().with_tree(ROOT, Script::Ok(listing()));
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        let tree = discoverer.discover(path.id, &actor).await.unwrap().unwrap();

        assert_eq!(tree.playbook_paths(), vec!["web/deploy.yaml", "site.yml"]);
    }

    #[tokio::test]
    async fn test_discover_unavailable_is_absent() {
        let channel = FakeChannel::new().with_tree(ROOT, Script::Hang);
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        assert_eq!(discoverer.discover(path.id, &actor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_discover_remote_failure() {
        let channel = FakeChannel::new().with_tree(
            ROOT,
            Script::Err(ChannelError::Remote(format!("{}: not a directory", ROOT))),
        );
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        assert!(matches!(
            discoverer.discover(path.id, &actor).await,
            Err(ControlNodeError::Execution { .. })
        ));
    }

    #[tokio::test]
    async fn test_discover_inventory_path_is_not_found() {
        let (discoverer, registry) = discoverer(FakeChannel::new());
        let actor = testing::actor();

        let path = registry
            .create(PathKind::Inventory, 42, "/srv/ansible/inventory", &actor)
            .unwrap();
        assert!(matches!(
            discoverer.discover(path.id, &actor).await,
            Err(ControlNodeError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_fetch_contents() {
        let channel = FakeChannel::new().with_file(
            "/srv/ansible/playbooks/web/deploy.yaml",
            Script::Ok(b"- hosts: web\n".to_vec()),
        );
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        let contents = discoverer
            .fetch_playbook_contents(path.id, "web/./deploy.yaml", &actor)
            .await
            .unwrap();

        assert_eq!(contents.as_deref(), Some("- hosts: web\n"));
    }

    #[tokio::test]
    async fn test_fetch_escape_rejected_before_remote_call() {
        let channel = FakeChannel::new();
        let calls = channel.calls();
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        match discoverer
            .fetch_playbook_contents(path.id, "../../etc/passwd", &actor)
            .await
        {
            Err(ControlNodeError::Validation(errors)) => {
                assert!(errors.has_field_error("playbookRelPath", messages::PLAYBOOK_OUTSIDE_ROOT));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_missing_and_binary_files() {
        let channel = FakeChannel::new()
            .with_file("/srv/ansible/playbooks/blob.yml", Script::Ok(vec![0xff, 0xfe, 0x00]));
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        assert!(matches!(
            discoverer.fetch_playbook_contents(path.id, "missing.yml", &actor).await,
            Err(ControlNodeError::Execution { .. })
        ));
        assert!(matches!(
            discoverer.fetch_playbook_contents(path.id, "blob.yml", &actor).await,
            Err(ControlNodeError::Execution { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_unavailable_is_absent() {
        let channel = FakeChannel::new().with_file(
            "/srv/ansible/playbooks/site.yml",
            Script::Err(ChannelError::Unreachable("connection refused".into())),
        );
        let (discoverer, registry) = discoverer(channel);
        let actor = testing::actor();

        let path = registry.create(PathKind::Playbook, 42, ROOT, &actor).unwrap();
        assert_eq!(
            discoverer
                .fetch_playbook_contents(path.id, "site.yml", &actor)
                .await
                .unwrap(),
            None
        );
    }
}
