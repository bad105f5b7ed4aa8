//! Hand-written port fakes shared by the unit tests.

use crate::error::{LifecycleError, Result};
use crate::ports::{
    ArtifactRead, ArtifactStore, CommandOptions, CommandOutput, CommandRunner, ToolLocator,
    TreeListing,
};
use agent_bridge::{AgentDispatcher, BusEvent, DispatchRequest, EventBus, Executor, SyncReply};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// MemoryArtifacts
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ArtifactState {
    files: BTreeMap<String, String>,
    reads: Vec<String>,
    writes: Vec<(String, String)>,
    list_error: Option<String>,
    failing_writes: usize,
}

#[derive(Default)]
pub struct MemoryArtifacts {
    state: Mutex<ArtifactState>,
}

impl MemoryArtifacts {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut st = store.state.lock().unwrap();
            for (path, content) in files {
                st.files.insert(path.to_string(), content.to_string());
            }
        }
        store
    }

    pub fn put(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().files.remove(path);
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn was_read(&self, path: &str) -> bool {
        self.state.lock().unwrap().reads.iter().any(|p| p == path)
    }

    pub fn read_count(&self, path: &str) -> usize {
        self.state.lock().unwrap().reads.iter().filter(|p| *p == path).count()
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn fail_listing(&self, reason: &str) {
        self.state.lock().unwrap().list_error = Some(reason.to_string());
    }

    /// Make the next `n` writes fail.
    pub fn fail_writes(&self, n: usize) {
        self.state.lock().unwrap().failing_writes = n;
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn list_tree(&self, _ws: &str, _root: Option<&Path>) -> Result<TreeListing> {
        let st = self.state.lock().unwrap();
        if let Some(reason) = &st.list_error {
            return Err(std::io::Error::other(reason.clone()).into());
        }
        let mut tree = TreeListing::default();
        for path in st.files.keys() {
            tree.files.insert(path.clone());
            let mut dir = path.as_str();
            while let Some((parent, _)) = dir.rsplit_once('/') {
                tree.dirs.insert(parent.to_string());
                dir = parent;
            }
        }
        Ok(tree)
    }

    async fn read(&self, _ws: &str, path: &str, _root: Option<&Path>) -> Result<ArtifactRead> {
        let mut st = self.state.lock().unwrap();
        st.reads.push(path.to_string());
        Ok(match st.files.get(path) {
            Some(content) => ArtifactRead {
                content: content.clone(),
                truncated: false,
                exists: true,
            },
            None => ArtifactRead::missing(),
        })
    }

    async fn write(&self, _ws: &str, path: &str, content: &str, _root: Option<&Path>) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.failing_writes > 0 {
            st.failing_writes -= 1;
            return Err(std::io::Error::other("disk full").into());
        }
        st.writes.push((path.to_string(), content.to_string()));
        st.files.insert(path.to_string(), content.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

pub enum Scripted {
    Output(CommandOutput),
    Timeout,
}

pub fn ok_output(stdout: &str) -> Scripted {
    Scripted::Output(CommandOutput {
        exit_code: Some(0),
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn failed_output(stderr: &str) -> Scripted {
    Scripted::Output(CommandOutput {
        exit_code: Some(1),
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
    })
}

/// Responds by the space-joined argv; unscripted commands succeed silently.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<(Vec<String>, Option<PathBuf>)>>,
}

impl ScriptedRunner {
    pub fn on(self, argv: &str, response: Scripted) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(argv.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(argv, _)| argv.join(" "))
            .collect()
    }

    pub fn last_root_override(&self) -> Option<PathBuf> {
        self.calls.lock().unwrap().last().and_then(|(_, r)| r.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, _ws: &str, argv: &[String], options: CommandOptions) -> Result<CommandOutput> {
        let key = argv.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push((argv.to_vec(), options.custom_root_override.clone()));
        match self.responses.lock().unwrap().get(&key) {
            Some(Scripted::Output(out)) => Ok(out.clone()),
            Some(Scripted::Timeout) => Err(LifecycleError::CommandTimeout {
                command: key,
                secs: options.timeout.as_secs(),
            }),
            None => Ok(CommandOutput {
                exit_code: Some(0),
                success: true,
                ..Default::default()
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeTools
// ---------------------------------------------------------------------------

pub struct FakeTools(pub HashSet<String>);

impl FakeTools {
    pub fn all() -> Self {
        Self(["node", "openspec", "git", "npx"].iter().map(|s| s.to_string()).collect())
    }

    pub fn none() -> Self {
        Self(HashSet::new())
    }
}

impl ToolLocator for FakeTools {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        self.0
            .contains(tool)
            .then(|| PathBuf::from(format!("/usr/bin/{tool}")))
    }
}

// ---------------------------------------------------------------------------
// ScriptedDispatcher
// ---------------------------------------------------------------------------

pub enum SyncBehavior {
    Reply(String),
    Fail(String),
    Hang,
}

/// Session mode publishes `events` on the bus right after `send_async`;
/// sync mode answers according to `sync`.
pub struct ScriptedDispatcher {
    pub bus: EventBus,
    pub ack: Option<Value>,
    /// Acknowledgement returned from `send_async`.
    pub send_ack: Value,
    pub events: Vec<BusEvent>,
    pub sync: SyncBehavior,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedDispatcher {
    pub fn session(bus: EventBus, ack: Value, events: Vec<BusEvent>) -> Self {
        Self {
            bus,
            ack: Some(ack),
            send_ack: serde_json::json!({ "ok": true }),
            events,
            sync: SyncBehavior::Fail("sync not expected".into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn sync(bus: EventBus, sync: SyncBehavior) -> Self {
        Self {
            bus,
            ack: None,
            send_ack: serde_json::json!({ "ok": true }),
            events: Vec::new(),
            sync,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_send_ack(mut self, ack: Value) -> Self {
        self.send_ack = ack;
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AgentDispatcher for ScriptedDispatcher {
    async fn open_session(&self, _ws: &str, _executor: Executor) -> agent_bridge::Result<Option<Value>> {
        Ok(self.ack.clone())
    }

    async fn send_async(
        &self,
        _ws: &str,
        _session_id: &str,
        request: DispatchRequest,
    ) -> agent_bridge::Result<Value> {
        self.prompts.lock().unwrap().push(request.text);
        let bus = self.bus.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            for ev in events {
                tokio::task::yield_now().await;
                bus.publish(ev);
            }
        });
        Ok(self.send_ack.clone())
    }

    async fn send_sync(&self, _ws: &str, request: DispatchRequest) -> agent_bridge::Result<SyncReply> {
        self.prompts.lock().unwrap().push(request.text);
        match &self.sync {
            SyncBehavior::Reply(text) => Ok(SyncReply { text: text.clone() }),
            SyncBehavior::Fail(msg) => Err(agent_bridge::AgentError::Process(msg.clone())),
            SyncBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
