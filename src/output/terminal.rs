// Rich terminal output for control-node results

use std::io::IsTerminal;
use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use super::response::{Failure, FailureKind};
use crate::discover::{PlaybookNode, PlaybookTree};
use crate::introspect::{InventoryNode, InventoryTree};
use crate::registry::AnsiblePath;
use crate::schedule::TrackingId;

/// Terminal output manager
pub struct TerminalOutput {
    quiet: bool,
    is_tty: bool,
}

impl TerminalOutput {
    pub fn new(quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // Respect NO_COLOR environment variable (https://no-color.org/)
        // Also disable colors if not a TTY
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput { quiet, is_tty }
    }

    /// Spinner shown while waiting on a control node; hidden when quiet or piped
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if self.quiet || !self.is_tty {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn print_paths(&self, paths: &[AnsiblePath]) {
        print!("{}", render_paths(paths));
    }

    pub fn print_inventory(&self, tree: &InventoryTree) {
        print!("{}", render_inventory(tree));
    }

    pub fn print_playbooks(&self, tree: &PlaybookTree) {
        print!("{}", render_playbooks(tree));
    }

    pub fn print_contents(&self, contents: &str) {
        print!("{}", contents);
        if !contents.ends_with('\n') {
            println!();
        }
    }

    pub fn print_saved(&self, path_id: u64) {
        if self.quiet {
            return;
        }
        println!("{} path {}", "SAVED".green().bold(), path_id.to_string().cyan());
    }

    pub fn print_deleted(&self, path_id: u64) {
        if self.quiet {
            return;
        }
        println!("{} path {}", "REMOVED".yellow().bold(), path_id.to_string().cyan());
    }

    pub fn print_scheduled(&self, tracking_id: &TrackingId) {
        println!(
            "{} playbook run {}",
            "SCHEDULED".green().bold(),
            tracking_id.to_string().cyan()
        );
    }

    /// Failures go to stderr; an unresponsive node is a warning, not an error
    pub fn print_failure(&self, failure: &Failure) {
        eprint!("{}", render_failure(failure));
    }
}

pub fn render_paths(paths: &[AnsiblePath]) -> String {
    if paths.is_empty() {
        return format!("{}\n", "No paths registered".dimmed());
    }

    let mut out = String::new();
    for path in paths {
        out.push_str(&format!(
            "{:>5}  {:<10} {}\n",
            path.id.to_string().cyan(),
            path.kind.to_string().yellow(),
            path.path
        ));
    }
    out
}

pub fn render_inventory(tree: &InventoryTree) -> String {
    fn walk(nodes: &[InventoryNode], depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        for node in nodes {
            match node {
                InventoryNode::Group { name, children, .. } => {
                    out.push_str(&format!("{}{}\n", indent, format!("[{}]", name).green().bold()));
                    walk(children, depth + 1, out);
                }
                InventoryNode::Host { name, vars } => {
                    out.push_str(&format!("{}{}", indent, name.white().bold()));
                    if let Some(address) = vars.get("ansible_host").and_then(|v| v.as_str()) {
                        out.push_str(&format!(" {}", format!("({})", address).dimmed()));
                    }
                    out.push('\n');
                }
            }
        }
    }

    let mut out = format!("{}\n", "[all]".green().bold());
    walk(&tree.nodes, 1, &mut out);
    out
}

pub fn render_playbooks(tree: &PlaybookTree) -> String {
    fn walk(nodes: &[PlaybookNode], depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        for node in nodes {
            match node {
                PlaybookNode::Directory { name, children } => {
                    out.push_str(&format!("{}{}/\n", indent, name.blue().bold()));
                    walk(children, depth + 1, out);
                }
                PlaybookNode::Playbook {
                    name,
                    custom_inventory,
                    ..
                } => {
                    out.push_str(&format!("{}{}", indent, name));
                    if let Some(inventory) = custom_inventory {
                        out.push_str(&format!(" {}", format!("(inventory: {})", inventory).dimmed()));
                    }
                    out.push('\n');
                }
            }
        }
    }

    let mut out = format!("{}\n", tree.root.cyan().bold());
    if tree.is_empty() {
        out.push_str(&format!("  {}\n", "No playbooks found".dimmed()));
    }
    walk(&tree.children, 1, &mut out);
    out
}

pub fn render_failure(failure: &Failure) -> String {
    let label = match failure.kind {
        FailureKind::ControlNodeNotResponding => "WARNING".yellow().bold(),
        FailureKind::Validation => "VALIDATION ERROR".red().bold(),
        FailureKind::NotFound => "NOT FOUND".red().bold(),
        FailureKind::ExecutionFailed => "REMOTE ERROR".red().bold(),
        FailureKind::SchedulerDown => "SCHEDULER DOWN".red().bold(),
        FailureKind::Internal => "ERROR".red().bold(),
    };

    let mut out = String::new();
    for message in &failure.messages {
        out.push_str(&format!("{}: {}\n", label, message));
    }
    for (field, messages) in &failure.field_errors {
        for message in messages {
            out.push_str(&format!("{}: {} {}\n", label, format!("{}:", field).dimmed(), message));
        }
    }
    out
}
