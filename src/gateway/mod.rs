// Remote agent gateway: remote execution against control nodes
//
// Every call resolves to one of three outcomes: success, unavailable (the
// node did not answer in time or could not be reached), or failed (the node
// answered and reported a problem).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hosts::ManagedHost;
use crate::output::errors::ControlNodeError;

pub mod commands;
pub mod local;
pub mod ssh;

pub use commands::{shell_quote, CommandResult, ShellCommand, INVENTORY_MODULE};
pub use local::LocalChannel;
pub use ssh::{ConnectionPool, SshChannel};

/// Arguments passed to a remote module
pub type ModuleArgs = BTreeMap<String, String>;

/// Errors a remote execution channel can report
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Transport failure: connect, handshake, authentication, broken session
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The channel's own timeout elapsed
    #[error("timed out")]
    TimedOut,

    /// The remote side ran the operation and it failed
    #[error("{0}")]
    Remote(String),
}

/// Kind of an entry in a remote directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// One entry below the listed root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the root, `/`-separated
    pub path: String,
    pub kind: EntryKind,
    /// Canonical (symlink-resolved) absolute path on the remote host
    pub canonical: String,
}

/// Flat recursive listing of a remote directory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TreeDescriptor {
    pub root: String,
    /// The root with symlinks resolved; equals `root` when it has none
    #[serde(default)]
    pub canonical_root: String,
    pub entries: Vec<TreeEntry>,
}

impl TreeDescriptor {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        TreeDescriptor {
            canonical_root: root.clone(),
            root,
            entries: Vec::new(),
        }
    }

    pub fn with_canonical_root(mut self, canonical: impl Into<String>) -> Self {
        self.canonical_root = canonical.into();
        self
    }

    pub fn with_entry(mut self, path: &str, kind: EntryKind, canonical: &str) -> Self {
        self.entries.push(TreeEntry {
            path: path.to_string(),
            kind,
            canonical: canonical.to_string(),
        });
        self
    }
}

/// Transport used to reach a control node
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Read a file from the host
    async fn read_file(&self, host: &ManagedHost, path: &str) -> Result<Vec<u8>, ChannelError>;

    /// List the directory tree below `path`, following symlinks
    async fn list_tree(&self, host: &ManagedHost, path: &str) -> Result<TreeDescriptor, ChannelError>;

    /// Run a named module and return its JSON result
    async fn run_module(
        &self,
        host: &ManagedHost,
        module: &str,
        args: &ModuleArgs,
    ) -> Result<serde_json::Value, ChannelError>;
}

/// Result of a gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome<T> {
    Success(T),
    /// The control node did not answer; retrying later may succeed
    Unavailable,
    /// The control node answered with a problem
    Failed(String),
}

impl<T> RemoteOutcome<T> {
    pub fn map<U, F>(self, f: F) -> RemoteOutcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            RemoteOutcome::Success(value) => RemoteOutcome::Success(f(value)),
            RemoteOutcome::Unavailable => RemoteOutcome::Unavailable,
            RemoteOutcome::Failed(message) => RemoteOutcome::Failed(message),
        }
    }

    pub fn and_then<U, F>(self, f: F) -> RemoteOutcome<U>
    where
        F: FnOnce(T) -> RemoteOutcome<U>,
    {
        match self {
            RemoteOutcome::Success(value) => f(value),
            RemoteOutcome::Unavailable => RemoteOutcome::Unavailable,
            RemoteOutcome::Failed(message) => RemoteOutcome::Failed(message),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteOutcome::Unavailable)
    }

    /// Unavailable becomes `None`, failure becomes an execution error
    pub fn into_result(self) -> Result<Option<T>, ControlNodeError> {
        match self {
            RemoteOutcome::Success(value) => Ok(Some(value)),
            RemoteOutcome::Unavailable => Ok(None),
            RemoteOutcome::Failed(message) => Err(ControlNodeError::execution(message)),
        }
    }
}

/// Classifies channel results into [`RemoteOutcome`]s, bounded by a timeout
#[derive(Clone)]
pub struct RemoteAgentGateway {
    channel: Arc<dyn RemoteChannel>,
    timeout: Duration,
}

impl RemoteAgentGateway {
    pub fn new(channel: Arc<dyn RemoteChannel>) -> Self {
        RemoteAgentGateway {
            channel,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn read_file(&self, host: &ManagedHost, path: &str) -> RemoteOutcome<Vec<u8>> {
        self.call(host, "read_file", self.channel.read_file(host, path))
            .await
    }

    pub async fn list_tree(&self, host: &ManagedHost, path: &str) -> RemoteOutcome<TreeDescriptor> {
        self.call(host, "list_tree", self.channel.list_tree(host, path))
            .await
    }

    pub async fn run_module(
        &self,
        host: &ManagedHost,
        module: &str,
        args: &ModuleArgs,
    ) -> RemoteOutcome<serde_json::Value> {
        self.call(host, module, self.channel.run_module(host, module, args))
            .await
    }

    async fn call<T, F>(&self, host: &ManagedHost, operation: &str, fut: F) -> RemoteOutcome<T>
    where
        F: Future<Output = Result<T, ChannelError>>,
    {
        debug!(host = %host.name, operation, "remote call");

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => RemoteOutcome::Success(value),
            Ok(Err(ChannelError::Remote(message))) => {
                warn!(host = %host.name, operation, %message, "remote operation failed");
                RemoteOutcome::Failed(message)
            }
            Ok(Err(err)) => {
                warn!(host = %host.name, operation, error = %err, "control node not responding");
                RemoteOutcome::Unavailable
            }
            Err(_) => {
                warn!(
                    host = %host.name,
                    operation,
                    timeout_secs = self.timeout.as_secs(),
                    "control node timed out"
                );
                RemoteOutcome::Unavailable
            }
        }
    }
}

/// Channel that picks local or SSH execution per host
pub struct HostChannel {
    ssh: SshChannel,
    local: LocalChannel,
}

impl HostChannel {
    pub fn new(ssh: SshChannel, local: LocalChannel) -> Self {
        HostChannel { ssh, local }
    }

    fn pick(&self, host: &ManagedHost) -> &dyn RemoteChannel {
        if host.is_local() {
            &self.local
        } else {
            &self.ssh
        }
    }
}

#[async_trait]
impl RemoteChannel for HostChannel {
    async fn read_file(&self, host: &ManagedHost, path: &str) -> Result<Vec<u8>, ChannelError> {
        self.pick(host).read_file(host, path).await
    }

    async fn list_tree(&self, host: &ManagedHost, path: &str) -> Result<TreeDescriptor, ChannelError> {
        self.pick(host).list_tree(host, path).await
    }

    async fn run_module(
        &self,
        host: &ManagedHost,
        module: &str,
        args: &ModuleArgs,
    ) -> Result<serde_json::Value, ChannelError> {
        self.pick(host).run_module(host, module, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeChannel, Script};

    #[tokio::test]
    async fn test_success_passes_through() {
        let channel = FakeChannel::new().with_file("/srv/pb/site.yml", Script::Ok(b"- hosts: all".to_vec()));
        let gateway = RemoteAgentGateway::new(Arc::new(channel));

        let outcome = gateway.read_file(&testing::control_node(), "/srv/pb/site.yml").await;
        assert_eq!(outcome, RemoteOutcome::Success(b"- hosts: all".to_vec()));
    }

    #[tokio::test]
    async fn test_unreachable_and_timeout_are_unavailable() {
        let channel = FakeChannel::new()
            .with_file("/a", Script::Err(ChannelError::Unreachable("connection refused".into())))
            .with_file("/b", Script::Err(ChannelError::TimedOut));
        let gateway = RemoteAgentGateway::new(Arc::new(channel));
        let host = testing::control_node();

        assert!(gateway.read_file(&host, "/a").await.is_unavailable());
        assert!(gateway.read_file(&host, "/b").await.is_unavailable());
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_unavailable() {
        let channel = FakeChannel::new().with_file("/slow", Script::Hang);
        let gateway =
            RemoteAgentGateway::new(Arc::new(channel)).with_timeout(Duration::from_millis(20));

        let outcome = gateway.read_file(&testing::control_node(), "/slow").await;
        assert!(outcome.is_unavailable());
    }

    #[tokio::test]
    async fn test_remote_error_is_failed() {
        let channel = FakeChannel::new()
            .with_file("/bad", Script::Err(ChannelError::Remote("No such file".into())));
        let gateway = RemoteAgentGateway::new(Arc::new(channel));

        let outcome = gateway.read_file(&testing::control_node(), "/bad").await;
        assert_eq!(outcome, RemoteOutcome::Failed("No such file".to_string()));
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(RemoteOutcome::Success(1).into_result().unwrap(), Some(1));
        assert_eq!(RemoteOutcome::<i32>::Unavailable.into_result().unwrap(), None);
        assert!(matches!(
            RemoteOutcome::<i32>::Failed("boom".into()).into_result(),
            Err(ControlNodeError::Execution { .. })
        ));
    }

    #[test]
    fn test_outcome_combinators() {
        let doubled = RemoteOutcome::Success(2).map(|v| v * 2);
        assert_eq!(doubled, RemoteOutcome::Success(4));

        let failed: RemoteOutcome<i32> =
            RemoteOutcome::Success(2).and_then(|_| RemoteOutcome::Failed("nope".into()));
        assert_eq!(failed, RemoteOutcome::Failed("nope".into()));

        let still_unavailable = RemoteOutcome::<i32>::Unavailable.map(|v| v + 1);
        assert!(still_unavailable.is_unavailable());
    }
}
