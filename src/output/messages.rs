// Localizable message catalog for boundary-facing text

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const CONTROL_NODE_NOT_RESPONDING: &str = "ansible.control_node_not_responding";
pub const REMOTE_ERROR: &str = "ansible.remote_error";
pub const SCHEDULER_DOWN: &str = "taskscheduler.down";
pub const NOT_FOUND: &str = "lookup.not_found";
pub const INTERNAL_ERROR: &str = "internal.error";

pub const PATH_EMPTY: &str = "ansible.path.empty";
pub const PATH_NOT_ABSOLUTE: &str = "ansible.path.not_absolute";
pub const PATH_TRAVERSAL: &str = "ansible.path.traversal";
pub const PATH_DUPLICATE: &str = "ansible.path.duplicate";
pub const PLAYBOOK_PATH_EMPTY: &str = "ansible.playbook.path_empty";
pub const PLAYBOOK_PATH_ABSOLUTE: &str = "ansible.playbook.path_absolute";
pub const PLAYBOOK_OUTSIDE_ROOT: &str = "ansible.playbook.outside_root";

static DEFAULT_MESSAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            CONTROL_NODE_NOT_RESPONDING,
            "The Ansible control node is not responding. Please try again later.",
        ),
        (
            REMOTE_ERROR,
            "The Ansible control node reported an error: {0}",
        ),
        (
            SCHEDULER_DOWN,
            "The task scheduler is not responding. Please try again later.",
        ),
        (NOT_FOUND, "The requested item was not found."),
        (INTERNAL_ERROR, "An internal error occurred."),
        (PATH_EMPTY, "The path must not be empty."),
        (PATH_NOT_ABSOLUTE, "The path must be absolute."),
        (PATH_TRAVERSAL, "The path must not contain '..' segments."),
        (
            PATH_DUPLICATE,
            "This path is already registered for the system.",
        ),
        (PLAYBOOK_PATH_EMPTY, "The playbook path must not be empty."),
        (
            PLAYBOOK_PATH_ABSOLUTE,
            "The playbook path must be relative to the playbook directory.",
        ),
        (
            PLAYBOOK_OUTSIDE_ROOT,
            "The playbook path must stay inside the registered playbook directory.",
        ),
    ])
});

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\d+)\}").expect("placeholder pattern is valid"));

static DEFAULT_CATALOG: Lazy<MessageCatalog> = Lazy::new(MessageCatalog::new);

/// Message lookup with `{n}` positional placeholders
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    overrides: HashMap<String, String>,
}

impl MessageCatalog {
    pub fn new() -> Self {
        MessageCatalog::default()
    }

    /// Shared catalog with the built-in texts
    pub fn defaults() -> &'static MessageCatalog {
        &DEFAULT_CATALOG
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Resolve a key, falling back to the key itself when unknown
    pub fn get(&self, key: &str, args: &[&str]) -> String {
        let template = self
            .overrides
            .get(key)
            .map(|s| s.as_str())
            .or_else(|| DEFAULT_MESSAGES.get(key).copied())
            .unwrap_or(key);

        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| args.get(i))
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
