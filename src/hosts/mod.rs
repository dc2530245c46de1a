// Managed-host directory: host lookup scoped by actor visibility

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a managed host
pub type HostId = u64;

/// The authenticated caller. Every lookup is scoped to what this actor may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
    pub org_id: u64,
}

impl Actor {
    pub fn new(login: impl Into<String>, org_id: u64) -> Self {
        Actor {
            login: login.into(),
            org_id,
        }
    }
}

/// How the remote channel reaches a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Ssh,
    Local,
}

/// A host managed by the platform, possibly acting as an Ansible control node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedHost {
    pub id: HostId,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    pub org_id: u64,
    #[serde(default)]
    pub connection: ConnectionType,
}

fn default_port() -> u16 {
    22
}

impl ManagedHost {
    pub fn new(id: HostId, name: impl Into<String>, org_id: u64) -> Self {
        let name = name.into();
        ManagedHost {
            id,
            address: name.clone(),
            name,
            port: 22,
            user: String::new(),
            org_id,
            connection: ConnectionType::Ssh,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_connection(mut self, connection: ConnectionType) -> Self {
        self.connection = connection;
        self
    }

    /// Address to dial, falling back to the host name
    pub fn effective_address(&self) -> &str {
        if self.address.is_empty() {
            &self.name
        } else {
            &self.address
        }
    }

    /// Get the SSH connection string (user@host:port)
    pub fn ssh_target(&self) -> String {
        if self.user.is_empty() {
            format!("{}:{}", self.effective_address(), self.port)
        } else {
            format!("{}@{}:{}", self.user, self.effective_address(), self.port)
        }
    }

    /// Check if this host should use local connection
    pub fn is_local(&self) -> bool {
        if self.connection == ConnectionType::Local {
            return true;
        }

        matches!(self.effective_address(), "localhost" | "127.0.0.1" | "::1")
    }
}

/// Resolves host identifiers to managed hosts the actor is allowed to see.
///
/// `None` covers both "does not exist" and "not visible"; callers must not
/// distinguish the two.
pub trait HostDirectory: Send + Sync {
    fn resolve(&self, host_id: HostId, actor: &Actor) -> Option<ManagedHost>;
}

/// Directory backed by a fixed host list, visible per organization
#[derive(Debug, Clone, Default)]
pub struct StaticHostDirectory {
    hosts: HashMap<HostId, ManagedHost>,
}

impl StaticHostDirectory {
    pub fn new(hosts: impl IntoIterator<Item = ManagedHost>) -> Self {
        let mut directory = StaticHostDirectory::default();
        for host in hosts {
            directory.add_host(host);
        }
        directory
    }

    pub fn add_host(&mut self, host: ManagedHost) {
        self.hosts.insert(host.id, host);
    }

    /// Get the total number of hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

impl HostDirectory for StaticHostDirectory {
    fn resolve(&self, host_id: HostId, actor: &Actor) -> Option<ManagedHost> {
        self.hosts
            .get(&host_id)
            .filter(|host| host.org_id == actor.org_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_creation() {
        let host = ManagedHost::new(42, "ansible-cn", 1)
            .with_address("192.168.1.10")
            .with_port(2222)
            .with_user("admin");

        assert_eq!(host.name, "ansible-cn");
        assert_eq!(host.ssh_target(), "admin@192.168.1.10:2222");
        assert!(!host.is_local());
    }

    #[test]
    fn test_local_detection() {
        assert!(ManagedHost::new(1, "localhost", 1).is_local());
        assert!(ManagedHost::new(2, "cn", 1)
            .with_connection(ConnectionType::Local)
            .is_local());
        assert!(ManagedHost::new(3, "cn", 1).with_address("127.0.0.1").is_local());
    }

    #[test]
    fn test_visibility_is_scoped_by_org() {
        let directory = StaticHostDirectory::new([
            ManagedHost::new(42, "cn1", 1),
            ManagedHost::new(43, "cn2", 2),
        ]);
        let actor = Actor::new("admin", 1);

        assert!(directory.resolve(42, &actor).is_some());
        assert!(directory.resolve(43, &actor).is_none());
        assert!(directory.resolve(99, &actor).is_none());
    }

    #[test]
    fn test_host_from_yaml() {
        let host: ManagedHost = serde_yaml::from_str(
            "id: 7\nname: cn.example.com\norg_id: 3\nconnection: local\n",
        )
        .unwrap();

        assert_eq!(host.port, 22);
        assert_eq!(host.effective_address(), "cn.example.com");
        assert!(host.is_local());
    }
}
