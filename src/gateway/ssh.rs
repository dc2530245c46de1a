// SSH channel with pooled sessions per control node

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ssh2::{KeyboardInteractivePrompt, Session};
use tracing::debug;

use super::commands::{list_tree_command, module_command, parse_module_output, parse_tree_listing, CommandResult};
use super::{ChannelError, ModuleArgs, RemoteChannel, TreeDescriptor};
use crate::hosts::ManagedHost;

/// SSH connection pool for reusing sessions
pub struct ConnectionPool {
    connections: DashMap<String, Vec<PooledConnection>>,
    max_per_host: usize,
    connect_timeout: Duration,
    command_timeout: Duration,
    default_user: Option<String>,
    private_key_path: Option<String>,
    password: Option<String>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            connections: DashMap::new(),
            max_per_host: 5,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(60),
            default_user: None,
            private_key_path: None,
            password: None,
        }
    }

    pub fn with_max_per_host(mut self, max: usize) -> Self {
        self.max_per_host = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_default_user(mut self, user: String) -> Self {
        self.default_user = Some(user);
        self
    }

    pub fn with_private_key(mut self, path: String) -> Self {
        self.private_key_path = Some(path);
        self
    }

    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    /// Get a connection to a host (from pool or create new)
    pub fn get(&self, host: &ManagedHost) -> Result<PooledConnection, ChannelError> {
        let key = host.ssh_target();

        if let Some(mut conns) = self.connections.get_mut(&key) {
            while let Some(conn) = conns.pop() {
                if conn.is_valid() {
                    return Ok(conn);
                }
            }
        }

        self.connect(host)
    }

    /// Return a connection to the pool
    pub fn return_connection(&self, conn: PooledConnection, key: String) {
        if !conn.is_valid() {
            return;
        }

        let mut conns = self.connections.entry(key).or_default();
        if conns.len() < self.max_per_host {
            conns.push(conn);
        }
    }

    fn resolve_user(&self, host: &ManagedHost) -> String {
        if host.user.is_empty() {
            self.default_user
                .clone()
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "root".to_string())
        } else {
            host.user.clone()
        }
    }

    /// Create a new SSH connection
    fn connect(&self, host: &ManagedHost) -> Result<PooledConnection, ChannelError> {
        let unreachable = |what: &str, e: &dyn std::fmt::Display| {
            ChannelError::Unreachable(format!("{} ({}): {}", what, host.name, e))
        };

        let address = (host.effective_address(), host.port)
            .to_socket_addrs()
            .map_err(|e| unreachable("address lookup failed", &e))?
            .next()
            .ok_or_else(|| ChannelError::Unreachable(format!("no address for {}", host.name)))?;

        let tcp = TcpStream::connect_timeout(&address, self.connect_timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                ChannelError::TimedOut
            } else {
                unreachable("connection failed", &e)
            }
        })?;

        let mut session = Session::new().map_err(|e| unreachable("session setup failed", &e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| unreachable("SSH handshake failed", &e))?;

        let user = self.resolve_user(host);
        if !self.authenticate(&session, &user) {
            return Err(ChannelError::Unreachable(format!(
                "authentication failed for {}@{}",
                user, host.name
            )));
        }

        session.set_timeout(self.command_timeout.as_millis() as u32);
        debug!(host = %host.name, user = %user, "opened SSH session");

        Ok(PooledConnection {
            session,
            host_name: host.name.clone(),
        })
    }

    /// Agent first, then key files, then password / keyboard-interactive
    fn authenticate(&self, session: &Session, user: &str) -> bool {
        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() {
                agent.list_identities().ok();
                for identity in agent.identities().unwrap_or_default() {
                    if agent.userauth(user, &identity).is_ok() {
                        return true;
                    }
                }
            }
        }

        let home = std::env::var("HOME").ok();
        let key_paths = self
            .private_key_path
            .iter()
            .cloned()
            .chain(
                home.iter()
                    .flat_map(|h| [format!("{}/.ssh/id_ed25519", h), format!("{}/.ssh/id_rsa", h)]),
            )
            .collect::<Vec<_>>();

        for key_path in key_paths {
            if Path::new(&key_path).exists()
                && session
                    .userauth_pubkey_file(user, None, Path::new(&key_path), None)
                    .is_ok()
            {
                return true;
            }
        }

        if let Some(ref password) = self.password {
            if session.userauth_password(user, password).is_ok() {
                return true;
            }

            // Some PAM configurations only offer keyboard-interactive
            let mut prompter = PasswordPrompter(password.clone());
            if session
                .userauth_keyboard_interactive(user, &mut prompter)
                .is_ok()
            {
                return true;
            }
        }

        false
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A pooled SSH connection
pub struct PooledConnection {
    session: Session,
    host_name: String,
}

impl PooledConnection {
    /// Check if the connection is still valid
    pub fn is_valid(&self) -> bool {
        self.session.authenticated()
    }

    /// Execute a command on this connection
    pub fn exec(&self, command: &str) -> Result<CommandResult, ChannelError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| session_error(&self.host_name, "failed to open channel", e))?;

        channel
            .exec(command)
            .map_err(|e| session_error(&self.host_name, "failed to execute command", e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel
            .read_to_string(&mut stdout)
            .map_err(|e| io_error(&self.host_name, e))?;
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Read a remote file over SFTP
    pub fn read_file(&self, remote_path: &str) -> Result<Vec<u8>, ChannelError> {
        let sftp = self
            .session
            .sftp()
            .map_err(|e| session_error(&self.host_name, "failed to open SFTP", e))?;

        // The session is fine at this point, so open failures are remote problems
        let mut remote_file = sftp
            .open(Path::new(remote_path))
            .map_err(|e| ChannelError::Remote(format!("{}: {}", remote_path, e.message())))?;

        let mut content = Vec::new();
        remote_file
            .read_to_end(&mut content)
            .map_err(|e| io_error(&self.host_name, e))?;

        Ok(content)
    }
}

fn session_error(host: &str, what: &str, e: ssh2::Error) -> ChannelError {
    if e.to_string().to_lowercase().contains("timed out") {
        ChannelError::TimedOut
    } else {
        ChannelError::Unreachable(format!("{} on {}: {}", what, host, e))
    }
}

fn io_error(host: &str, e: std::io::Error) -> ChannelError {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ChannelError::TimedOut,
        _ => ChannelError::Unreachable(format!("read failed on {}: {}", host, e)),
    }
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}

/// Remote channel over SSH. Blocking libssh2 work runs on the blocking pool.
#[derive(Clone)]
pub struct SshChannel {
    pool: Arc<ConnectionPool>,
}

impl SshChannel {
    pub fn new(pool: ConnectionPool) -> Self {
        SshChannel {
            pool: Arc::new(pool),
        }
    }

    async fn with_connection<T, F>(&self, host: &ManagedHost, f: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&PooledConnection) -> Result<T, ChannelError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let host = host.clone();

        tokio::task::spawn_blocking(move || {
            let conn = pool.get(&host)?;
            let result = f(&conn);

            // Only healthy sessions go back to the pool
            if !matches!(result, Err(ChannelError::Unreachable(_)) | Err(ChannelError::TimedOut)) {
                pool.return_connection(conn, host.ssh_target());
            }

            result
        })
        .await
        .map_err(|e| ChannelError::Unreachable(format!("SSH worker failed: {}", e)))?
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn read_file(&self, host: &ManagedHost, path: &str) -> Result<Vec<u8>, ChannelError> {
        let path = path.to_string();
        self.with_connection(host, move |conn| conn.read_file(&path))
            .await
    }

    async fn list_tree(&self, host: &ManagedHost, path: &str) -> Result<TreeDescriptor, ChannelError> {
        let root = path.to_string();
        let command = list_tree_command(&root);

        let stdout = self
            .with_connection(host, move |conn| conn.exec(&command)?.into_stdout())
            .await?;

        Ok(parse_tree_listing(&root, &stdout))
    }

    async fn run_module(
        &self,
        host: &ManagedHost,
        module: &str,
        args: &ModuleArgs,
    ) -> Result<serde_json::Value, ChannelError> {
        let command = module_command(module, args)?;

        let stdout = self
            .with_connection(host, move |conn| conn.exec(&command)?.into_stdout())
            .await?;

        parse_module_output(module, &stdout)
    }
}
