// Test fixtures: host directory, scripted channel and recording scheduler

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::gateway::{ChannelError, ModuleArgs, RemoteChannel, TreeDescriptor};
use crate::hosts::{Actor, ConnectionType, HostDirectory, ManagedHost, StaticHostDirectory};
use crate::registry::{MemoryPathStore, PathRegistry};
use crate::schedule::{ScheduledExecution, SchedulerError, TaskScheduler, TrackingId};

pub fn actor() -> Actor {
    Actor::new("admin", 1)
}

pub fn other_org_actor() -> Actor {
    Actor::new("stranger", 2)
}

/// Host 42, the control node used throughout the tests
pub fn control_node() -> ManagedHost {
    ManagedHost::new(42, "ansible-cn.example.com", 1)
        .with_address("10.0.0.42")
        .with_user("ansible")
}

pub fn local_node() -> ManagedHost {
    ManagedHost::new(43, "localhost", 1).with_connection(ConnectionType::Local)
}

/// Hosts 42 and 43 in org 1, host 50 in org 2
pub fn directory() -> Arc<dyn HostDirectory> {
    Arc::new(StaticHostDirectory::new([
        control_node(),
        local_node(),
        ManagedHost::new(50, "other-org.example.com", 2),
    ]))
}

pub fn registry() -> PathRegistry {
    PathRegistry::new(Arc::new(MemoryPathStore::new()), directory())
}

/// Scripted response of the fake channel
#[derive(Debug, Clone)]
pub enum Script<T> {
    Ok(T),
    Err(ChannelError),
    /// Never answers
    Hang,
}

impl<T: Clone> Script<T> {
    async fn play(&self) -> Result<T, ChannelError> {
        match self {
            Script::Ok(value) => Ok(value.clone()),
            Script::Err(err) => Err(err.clone()),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Channel answering from scripts and recording every call
#[derive(Default)]
pub struct FakeChannel {
    files: HashMap<String, Script<Vec<u8>>>,
    trees: HashMap<String, Script<TreeDescriptor>>,
    modules: HashMap<String, Script<JsonValue>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        FakeChannel::default()
    }

    pub fn with_file(mut self, path: &str, script: Script<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), script);
        self
    }

    pub fn with_tree(mut self, path: &str, script: Script<TreeDescriptor>) -> Self {
        self.trees.insert(path.to_string(), script);
        self
    }

    pub fn with_module(mut self, module: &str, script: Script<JsonValue>) -> Self {
        self.modules.insert(module.to_string(), script);
        self
    }

    /// Handle on the call log, usable after the channel moved into a gateway
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

fn missing<T>(what: &str) -> Result<T, ChannelError> {
    Err(ChannelError::Remote(format!("{}: No such file or directory", what)))
}

#[async_trait]
impl RemoteChannel for FakeChannel {
    async fn read_file(&self, _host: &ManagedHost, path: &str) -> Result<Vec<u8>, ChannelError> {
        self.record(format!("read_file:{}", path));
        match self.files.get(path) {
            Some(script) => script.play().await,
            None => missing(path),
        }
    }

    async fn list_tree(&self, _host: &ManagedHost, path: &str) -> Result<TreeDescriptor, ChannelError> {
        self.record(format!("list_tree:{}", path));
        match self.trees.get(path) {
            Some(script) => script.play().await,
            None => missing(path),
        }
    }

    async fn run_module(
        &self,
        _host: &ManagedHost,
        module: &str,
        args: &ModuleArgs,
    ) -> Result<JsonValue, ChannelError> {
        let values: Vec<&str> = args.values().map(|v| v.as_str()).collect();
        self.record(format!("run_module:{}:{}", module, values.join(",")));
        match self.modules.get(module) {
            Some(script) => script.play().await,
            None => Err(ChannelError::Remote(format!("unsupported module '{}'", module))),
        }
    }
}

/// Scheduler that keeps every submission, or refuses all of them when down
#[derive(Default)]
pub struct RecordingScheduler {
    submissions: Mutex<Vec<ScheduledExecution>>,
    down: bool,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        RecordingScheduler::default()
    }

    pub fn down() -> Self {
        RecordingScheduler {
            down: true,
            ..RecordingScheduler::default()
        }
    }

    pub fn submissions(&self) -> Vec<ScheduledExecution> {
        self.submissions.lock().clone()
    }
}

#[async_trait]
impl TaskScheduler for RecordingScheduler {
    async fn submit(&self, execution: &ScheduledExecution) -> Result<TrackingId, SchedulerError> {
        if self.down {
            return Err(SchedulerError::Unavailable("connection refused".to_string()));
        }

        let mut submissions = self.submissions.lock();
        submissions.push(execution.clone());
        Ok(TrackingId::new(format!("action-{}", submissions.len())))
    }
}
