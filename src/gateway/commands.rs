// Remote command construction and output parsing shared by the channels

use super::{ChannelError, EntryKind, ModuleArgs, TreeDescriptor, TreeEntry};
use crate::registry::normalize_path;

/// Resolve an inventory source into ansible's `--list` JSON
pub const INVENTORY_MODULE: &str = "ansible.inventory";

/// Result of executing a command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into a remote failure carrying stderr
    pub fn into_stdout(self) -> Result<String, ChannelError> {
        if self.success() {
            return Ok(self.stdout);
        }

        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(ChannelError::Remote(format!(
                "command failed with exit code {}",
                self.exit_code
            )))
        } else {
            Err(ChannelError::Remote(stderr.to_string()))
        }
    }
}

/// Builder for shell command lines with quoted arguments
pub struct ShellCommand {
    parts: Vec<String>,
    env: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(cmd: &str) -> Self {
        ShellCommand {
            parts: vec![cmd.to_string()],
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.parts.push(shell_quote(arg));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(&self) -> String {
        let mut cmd = String::new();

        for (k, v) in &self.env {
            cmd.push_str(&format!("{}={} ", shell_quote(k), shell_quote(v)));
        }

        cmd.push_str(&self.parts.join(" "));
        cmd
    }
}

/// Quote a string for POSIX sh
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '/' || c == '.')
    {
        return s.to_string();
    }

    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Command line for a module invocation
pub fn module_command(module: &str, args: &ModuleArgs) -> Result<String, ChannelError> {
    match module {
        INVENTORY_MODULE => {
            let inventory = args
                .get("inventory")
                .ok_or_else(|| ChannelError::Remote("missing 'inventory' argument".to_string()))?;

            // Keep ansible from writing colored or cowsay output into the JSON
            Ok(ShellCommand::new("ansible-inventory")
                .env("ANSIBLE_NOCOLOR", "1")
                .env("ANSIBLE_NOCOWS", "1")
                .arg("-i")
                .arg(inventory)
                .arg("--list")
                .build())
        }
        other => Err(ChannelError::Remote(format!("unsupported module '{}'", other))),
    }
}

/// Parse a module's stdout as JSON
pub fn parse_module_output(module: &str, stdout: &str) -> Result<serde_json::Value, ChannelError> {
    serde_json::from_str(stdout).map_err(|e| {
        ChannelError::Remote(format!(
            "invalid JSON from {} at line {}, column {}: {}",
            module,
            e.line(),
            e.column(),
            e
        ))
    })
}

/// Command printing `kind<TAB>path<TAB>canonical` for every entry below `root`.
///
/// The first line has kind `r` and describes the root itself. `find -L` skips
/// symlink loops itself; its complaints go to /dev/null.
pub fn list_tree_command(root: &str) -> String {
    let root = shell_quote(&normalize_path(root));
    format!(
        "test -d {root} || {{ echo \"{root}: not a directory\" >&2; exit 2; }}; \
         printf \"r\\t%s\\t%s\\n\" {root} \"$(readlink -f {root})\"; \
         find -L {root} -mindepth 1 \\( -type d -o -type f \\) -exec sh -c \
         'for p do if [ -d \"$p\" ]; then k=d; else k=f; fi; \
         printf \"%s\\t%s\\t%s\\n\" \"$k\" \"$p\" \"$(readlink -f \"$p\")\"; done' sh {{}} + \
         2>/dev/null; true",
        root = root
    )
}

/// Parse the output of [`list_tree_command`]
pub fn parse_tree_listing(root: &str, stdout: &str) -> TreeDescriptor {
    let root = normalize_path(root);
    let prefix = if root == "/" {
        "/".to_string()
    } else {
        format!("{}/", root)
    };

    let mut tree = TreeDescriptor::new(root.clone());

    for line in stdout.lines() {
        let mut fields = line.splitn(3, '\t');
        let (kind, path, canonical) = match (fields.next(), fields.next(), fields.next()) {
            (Some(k), Some(p), Some(c)) => (k, p, c),
            _ => continue,
        };

        let kind = match kind {
            "r" => {
                if !canonical.is_empty() {
                    tree.canonical_root = normalize_path(canonical);
                }
                continue;
            }
            "d" => EntryKind::Directory,
            "f" => EntryKind::File,
            _ => continue,
        };

        let Some(relative) = normalize_path(path)
            .strip_prefix(&prefix)
            .map(|s| s.to_string())
        else {
            continue;
        };

        tree.entries.push(TreeEntry {
            path: relative,
            kind,
            canonical: canonical.to_string(),
        });
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("hello"), "hello");
        assert_eq!(shell_quote("/srv/ansible"), "/srv/ansible");
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_inventory_command() {
        let args = ModuleArgs::from([("inventory".to_string(), "/srv/my inv".to_string())]);
        let cmd = module_command(INVENTORY_MODULE, &args).unwrap();
        assert_eq!(
            cmd,
            "ANSIBLE_NOCOLOR=1 ANSIBLE_NOCOWS=1 ansible-inventory -i '/srv/my inv' --list"
        );
    }

    #[test]
    fn test_unknown_module() {
        assert!(matches!(
            module_command("ansible.galaxy", &ModuleArgs::new()),
            Err(ChannelError::Remote(_))
        ));
        assert!(module_command(INVENTORY_MODULE, &ModuleArgs::new()).is_err());
    }

    #[test]
    fn test_failed_command_carries_stderr() {
        let result = CommandResult {
            stdout: String::new(),
            stderr: "[WARNING]: Unable to parse /srv/inv\n".to_string(),
            exit_code: 1,
        };
        assert_eq!(
            result.into_stdout(),
            Err(ChannelError::Remote("[WARNING]: Unable to parse /srv/inv".to_string()))
        );
    }

    #[test]
    fn test_list_tree_command_quotes_root() {
        let cmd = list_tree_command("/srv/my playbooks/");
        assert!(cmd.starts_with("test -d '/srv/my playbooks' ||"));
        assert!(cmd.contains("find -L '/srv/my playbooks' -mindepth 1"));
    }

    #[test]
    fn test_parse_tree_listing() {
        let stdout = "r\t/srv/pb\t/data/pb\n\
                      d\t/srv/pb/web\t/data/pb/web\n\
                      f\t/srv/pb/web/site.yml\t/data/pb/web/site.yml\n\
                      garbage line\n\
                      f\t/elsewhere/x.yml\t/elsewhere/x.yml\n";

        let tree = parse_tree_listing("/srv/pb/", stdout);
        assert_eq!(tree.root, "/srv/pb");
        assert_eq!(tree.canonical_root, "/data/pb");
        assert_eq!(tree.entries.len(), 2);
        assert_eq!(tree.entries[0].path, "web");
        assert_eq!(tree.entries[0].kind, EntryKind::Directory);
        assert_eq!(tree.entries[1].path, "web/site.yml");
    }

    #[test]
    fn test_parse_module_output() {
        assert!(parse_module_output(INVENTORY_MODULE, "{\"all\": {}}").is_ok());
        match parse_module_output(INVENTORY_MODULE, "not json") {
            Err(ChannelError::Remote(message)) => assert!(message.contains("invalid JSON")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
