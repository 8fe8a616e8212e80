//! Shared fixtures for engine integration tests
//!
//! - `RecordingBackend`: a backend that records commits, undos, pulls and
//!   pushes instead of running git
//! - a handful of model types covering named blocks, rollover, encryption
//!   and lock markers

#![allow(dead_code)]

use chrono::{DateTime, FixedOffset};
use gitstore_core::{Error, Result};
use gitstore_durability::{Backend, User};
use gitstore_engine::{
    BlockKey, Config, Connection, ConnectionManager, Metadata, Model, OpenOptions, PowerMonitor,
    RolloverPolicy,
};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ============================================================================
// Tracing
// ============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

// ============================================================================
// RecordingBackend
// ============================================================================

/// One recorded commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub path: String,
    pub message: String,
    pub author: String,
}

/// Blocks `pull` until released
#[derive(Default)]
pub struct PullGate {
    state: Mutex<(bool, bool)>,
    cond: Condvar,
}

impl PullGate {
    fn pass(&self) {
        let mut st = self.state.lock();
        st.0 = true;
        self.cond.notify_all();
        while !st.1 {
            self.cond.wait(&mut st);
        }
    }

    /// Wait until a pull is blocked in the gate
    pub fn wait_entered(&self) {
        let mut st = self.state.lock();
        while !st.0 {
            self.cond.wait(&mut st);
        }
    }

    /// Let the blocked pull continue
    pub fn release(&self) {
        self.state.lock().1 = true;
        self.cond.notify_all();
    }
}

pub struct RecordingBackend {
    data_dir: PathBuf,
    pub commits: Mutex<Vec<Commit>>,
    /// `commit:<message>`, `pull` and `push` in call order
    pub events: Mutex<Vec<String>>,
    pub undos: AtomicUsize,
    pub pulls: AtomicUsize,
    pub pushes: AtomicUsize,
    pub fail_pull: AtomicBool,
    pub pull_gate: Option<Arc<PullGate>>,
}

impl RecordingBackend {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            commits: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            undos: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            fail_pull: AtomicBool::new(false),
            pull_gate: None,
        }
    }

    pub fn with_pull_gate(mut self, gate: Arc<PullGate>) -> Self {
        self.pull_gate = Some(gate);
        self
    }

    pub fn commits(&self) -> Vec<Commit> {
        self.commits.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.commits.lock().iter().map(|c| c.message.clone()).collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    fn clone_remote(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    fn add_remote(&self) -> Result<()> {
        Ok(())
    }

    fn pull(&self) -> Result<()> {
        if let Some(gate) = &self.pull_gate {
            gate.pass();
        }
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("pull".to_string());
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(Error::backend("pull rejected"));
        }
        Ok(())
    }

    fn push(&self) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("push".to_string());
        Ok(())
    }

    fn commit(&self, path: &str, message: &str, user: &User) -> Result<()> {
        self.commits.lock().push(Commit {
            path: path.to_string(),
            message: message.to_string(),
            author: user.author(),
        });
        self.events.lock().push(format!("commit:{message}"));
        Ok(())
    }

    fn undo(&self) -> Result<()> {
        self.undos.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn changed_files(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn last_commit_time(&self) -> Result<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339("2024-01-02T03:04:05+01:00")
            .map_err(|e| Error::backend(e.to_string()))
    }

    fn is_repository(&self) -> bool {
        self.data_dir.is_dir()
    }

    fn has_remote(&self) -> bool {
        true
    }
}

/// Fixed battery level
pub struct Battery(pub f64);

impl PowerMonitor for Battery {
    fn level(&self) -> Option<f64> {
        Some(self.0)
    }
}

// ============================================================================
// Stores
// ============================================================================

pub struct Store {
    pub dir: TempDir,
    pub manager: ConnectionManager,
    pub conn: Arc<Connection>,
    pub backend: Arc<RecordingBackend>,
}

impl Store {
    pub fn root(&self) -> PathBuf {
        self.conn.root().to_path_buf()
    }

    pub fn data_file(&self, rel: &str) -> PathBuf {
        self.root().join("data").join(rel)
    }

    pub fn internal_file(&self, rel: &str) -> PathBuf {
        self.root().join(".gitdb").join(rel)
    }
}

pub fn config_in(dir: &TempDir) -> Config {
    Config::new(dir.path().join("db"))
}

/// Open a store with a recording backend
pub fn open_store() -> Store {
    open_store_with(|c| c, |o| o, |b| b)
}

pub fn open_store_with(
    tweak_config: impl FnOnce(Config) -> Config,
    tweak_options: impl FnOnce(OpenOptions) -> OpenOptions,
    tweak_backend: impl FnOnce(RecordingBackend) -> RecordingBackend,
) -> Store {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = tweak_config(config_in(&dir));
    let backend = Arc::new(tweak_backend(RecordingBackend::new(
        config.db_path.join("data"),
    )));
    let manager = ConnectionManager::new();
    let options = tweak_options(OpenOptions::new().backend(backend.clone()));
    let conn = manager.open_with(config, options).unwrap();
    Store {
        dir,
        manager,
        conn,
        backend,
    }
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
}

impl Message {
    pub fn new(from: &str) -> Self {
        Self {
            meta: Metadata::default(),
            from: from.to_string(),
            body: String::new(),
        }
    }
}

impl Model for Message {
    const DATASET: &'static str = "Message";

    fn block(&self) -> BlockKey {
        BlockKey::Named("b0".to_string())
    }

    fn indexes(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("From".to_string(), json!(self.from));
        m
    }

    fn validate(&self) -> Result<()> {
        if self.from.is_empty() {
            return Err(Error::ValidationFailed("From is required".into()));
        }
        Ok(())
    }

    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

/// `Message` as it looks after a schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Letter {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(rename = "From")]
    pub sender: String,
    #[serde(rename = "Body", default)]
    pub body: String,
}

impl Model for Letter {
    const DATASET: &'static str = "Letter";

    fn block(&self) -> BlockKey {
        BlockKey::Rollover(RolloverPolicy::new(0, 100))
    }

    fn indexes(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("Sender".to_string(), json!(self.sender));
        m
    }

    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

macro_rules! rollover_model {
    ($name:ident, $dataset:literal, $bytes:expr, $records:expr) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub meta: Metadata,
            #[serde(rename = "N")]
            pub n: u32,
        }

        impl $name {
            pub fn new(n: u32) -> Self {
                Self {
                    meta: Metadata::default(),
                    n,
                }
            }
        }

        impl Model for $name {
            const DATASET: &'static str = $dataset;

            fn block(&self) -> BlockKey {
                BlockKey::Rollover(RolloverPolicy::new($bytes, $records))
            }

            fn metadata(&self) -> &Metadata {
                &self.meta
            }

            fn metadata_mut(&mut self) -> &mut Metadata {
                &mut self.meta
            }
        }
    };
}

rollover_model!(OnePerBlock, "OnePerBlock", 0, 1);
rollover_model!(OneBytePerBlock, "OneBytePerBlock", 1, 0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(rename = "Text")]
    pub text: String,
}

impl Model for Secret {
    const DATASET: &'static str = "Secret";

    fn block(&self) -> BlockKey {
        BlockKey::Named("vault".to_string())
    }

    fn should_encrypt(&self) -> bool {
        true
    }

    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(flatten)]
    pub meta: Metadata,
    #[serde(rename = "Name")]
    pub name: String,
}

impl Model for Room {
    const DATASET: &'static str = "Room";

    fn block(&self) -> BlockKey {
        BlockKey::Named("rooms".to_string())
    }

    fn lock_names(&self) -> Vec<String> {
        vec![self.name.clone(), format!("{}-calendar", self.name)]
    }

    fn metadata(&self) -> &Metadata {
        &self.meta
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }
}

pub const KEY: &str = "b61ba8270ccc3c1d42b4417e7bd60b71";
