// Inventory introspection: resolve an inventory source into a group/host tree
//
// The control node runs `ansible-inventory --list`, so static files, dynamic
// scripts and directories of both come back in the same JSON shape:
// - every group is a top-level key with optional `hosts`, `children`, `vars`
// - `_meta.hostvars` maps host names to their variables

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::gateway::{ModuleArgs, RemoteAgentGateway, RemoteOutcome, INVENTORY_MODULE};
use crate::hosts::Actor;
use crate::output::errors::ControlNodeError;
use crate::registry::{PathId, PathKind, PathRegistry};

/// A node of an inventory tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InventoryNode {
    Group {
        name: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        vars: BTreeMap<String, JsonValue>,
        children: Vec<InventoryNode>,
    },
    Host {
        name: String,
        vars: BTreeMap<String, JsonValue>,
    },
}

impl InventoryNode {
    pub fn name(&self) -> &str {
        match self {
            InventoryNode::Group { name, .. } | InventoryNode::Host { name, .. } => name,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, InventoryNode::Group { .. })
    }
}

/// Structured inventory, rooted at the implicit `all` group
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct InventoryTree {
    pub nodes: Vec<InventoryNode>,
}

impl InventoryTree {
    /// Names of the top-level groups
    pub fn group_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.is_group())
            .map(|n| n.name())
            .collect()
    }

    /// Find a group anywhere in the tree
    pub fn find_group(&self, name: &str) -> Option<&InventoryNode> {
        fn find<'a>(nodes: &'a [InventoryNode], name: &str) -> Option<&'a InventoryNode> {
            for node in nodes {
                if let InventoryNode::Group { children, .. } = node {
                    if node.name() == name {
                        return Some(node);
                    }
                    if let Some(found) = find(children, name) {
                        return Some(found);
                    }
                }
            }
            None
        }

        find(&self.nodes, name)
    }

    /// Render as YAML for display
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Default, Deserialize)]
struct GroupData {
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default)]
    vars: BTreeMap<String, JsonValue>,
}

struct TreeBuilder {
    groups: HashMap<String, GroupData>,
    hostvars: HashMap<String, BTreeMap<String, JsonValue>>,
}

impl TreeBuilder {
    fn group_node(&self, name: &str, branch: &mut Vec<String>) -> Option<InventoryNode> {
        // A group already on the current branch would recurse forever
        if branch.iter().any(|g| g == name) {
            debug!(group = name, "skipping cyclic inventory group");
            return None;
        }

        let empty = GroupData::default();
        let data = self.groups.get(name).unwrap_or(&empty);

        if name == "ungrouped" && data.hosts.is_empty() && data.children.is_empty() {
            return None;
        }

        branch.push(name.to_string());
        let children = self.member_nodes(data, branch);
        branch.pop();

        Some(InventoryNode::Group {
            name: name.to_string(),
            vars: data.vars.clone(),
            children,
        })
    }

    fn member_nodes(&self, data: &GroupData, branch: &mut Vec<String>) -> Vec<InventoryNode> {
        let mut nodes: Vec<InventoryNode> = data
            .children
            .iter()
            .filter_map(|child| self.group_node(child, branch))
            .collect();

        nodes.extend(data.hosts.iter().map(|host| self.host_node(host)));
        nodes
    }

    fn host_node(&self, name: &str) -> InventoryNode {
        InventoryNode::Host {
            name: name.to_string(),
            vars: self.hostvars.get(name).cloned().unwrap_or_default(),
        }
    }
}

/// Build a tree from `ansible-inventory --list` output
pub fn parse_inventory_listing(json: &JsonValue) -> Result<InventoryTree, String> {
    let obj = json
        .as_object()
        .ok_or_else(|| "inventory listing is not a JSON object".to_string())?;

    let hostvars = match obj.get("_meta").and_then(|meta| meta.get("hostvars")) {
        Some(hostvars) => serde_json::from_value::<HashMap<String, BTreeMap<String, JsonValue>>>(
            hostvars.clone(),
        )
        .map_err(|e| format!("invalid _meta.hostvars: {}", e))?,
        None => HashMap::new(),
    };

    let mut groups = HashMap::new();
    for (group_name, group_value) in obj {
        if group_name == "_meta" {
            continue;
        }

        let data = if group_value.is_array() {
            // Old-style script output: a bare list of hosts
            GroupData {
                hosts: serde_json::from_value(group_value.clone())
                    .map_err(|e| format!("invalid host list for group '{}': {}", group_name, e))?,
                ..GroupData::default()
            }
        } else {
            serde_json::from_value::<GroupData>(group_value.clone())
                .map_err(|e| format!("invalid group '{}': {}", group_name, e))?
        };

        groups.insert(group_name.clone(), data);
    }

    let builder = TreeBuilder { groups, hostvars };
    let mut branch = vec!["all".to_string()];

    let nodes = match builder.groups.get("all") {
        Some(all) => builder.member_nodes(all, &mut branch),
        None => {
            // No explicit `all`: every group nobody lists as a child is top-level
            let mut roots: Vec<&String> = builder
                .groups
                .keys()
                .filter(|name| {
                    !builder
                        .groups
                        .values()
                        .any(|g| g.children.iter().any(|c| c == *name))
                })
                .collect();
            roots.sort();

            roots
                .into_iter()
                .filter_map(|name| builder.group_node(name, &mut branch))
                .collect()
        }
    };

    Ok(InventoryTree { nodes })
}

/// Resolves INVENTORY paths into inventory trees on their control node
#[derive(Clone)]
pub struct InventoryIntrospector {
    registry: PathRegistry,
    gateway: RemoteAgentGateway,
}

impl InventoryIntrospector {
    pub fn new(registry: PathRegistry, gateway: RemoteAgentGateway) -> Self {
        InventoryIntrospector { registry, gateway }
    }

    /// `Ok(None)` when the control node did not answer
    pub async fn introspect(
        &self,
        path_id: PathId,
        actor: &Actor,
    ) -> Result<Option<InventoryTree>, ControlNodeError> {
        let (path, host) = self.registry.lookup(path_id, PathKind::Inventory, actor)?;
        let args = ModuleArgs::from([("inventory".to_string(), path.path.clone())]);

        self.gateway
            .run_module(&host, INVENTORY_MODULE, &args)
            .await
            .and_then(|json| match parse_inventory_listing(&json) {
                Ok(tree) => RemoteOutcome::Success(tree),
                Err(message) => RemoteOutcome::Failed(message),
            })
            .into_result()
    }
}
