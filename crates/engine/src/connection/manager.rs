//! Connection manager and open options
//!
//! The manager maps canonical store roots to live connections. Opening the
//! same root twice through one manager yields the same [`Connection`]; the
//! entry disappears when the connection closes.

use super::{Connection, Registry};
use crate::config::Config;
use crate::model::{Model, ModelRegistry};
use crate::power::PowerMonitor;
use gitstore_core::Result;
use gitstore_durability::{Backend, Notifier};
use parking_lot::Mutex;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runtime collaborators for [`ConnectionManager::open_with`]
///
/// Anything left unset falls back to the configured backend, mains power,
/// and a logging notifier.
#[derive(Default)]
pub struct OpenOptions {
    pub(crate) backend: Option<Arc<dyn Backend>>,
    pub(crate) power_monitor: Option<Arc<dyn PowerMonitor>>,
    pub(crate) notifier: Option<Arc<dyn Notifier>>,
    pub(crate) registry: ModelRegistry,
    pub(crate) sync_interval: Option<Duration>,
}

impl OpenOptions {
    /// Defaults only
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `backend` instead of the one named in the config
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Gate background sync on `monitor`
    pub fn power_monitor(mut self, monitor: Arc<dyn PowerMonitor>) -> Self {
        self.power_monitor = Some(monitor);
        self
    }

    /// Receive operator notifications through `notifier`
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Tick the sync clock every `interval` instead of the configured
    /// whole seconds
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Let the index manager extract index values of bare `M` records
    pub fn register<M: Model>(mut self) -> Self {
        self.registry.register::<M>();
        self
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("power_monitor", &self.power_monitor.is_some())
            .field("notifier", &self.notifier.is_some())
            .field("registry", &self.registry)
            .field("sync_interval", &self.sync_interval)
            .finish()
    }
}

/// Owner of the root path → connection mapping
///
/// ```ignore
/// let manager = ConnectionManager::new();
/// let conn = manager.open(Config::new("/var/lib/app/db"))?;
/// conn.insert(&mut message)?;
/// conn.close()?;
/// ```
#[derive(Default)]
pub struct ConnectionManager {
    open: Arc<Registry>,
    /// Serializes boots; held without `open` so a failed boot can deregister
    booting: Mutex<()>,
}

impl ConnectionManager {
    /// Manager with no open connections
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the store described by `config` with default collaborators
    pub fn open(&self, config: Config) -> Result<Arc<Connection>> {
        self.open_with(config, OpenOptions::default())
    }

    /// Open the store described by `config`.
    ///
    /// Returns the live connection if the root is already open; `options`
    /// are ignored in that case.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an invalid config, `ConnectionInvalid` when another
    /// process holds the store, and any repository setup error.
    pub fn open_with(&self, config: Config, options: OpenOptions) -> Result<Arc<Connection>> {
        config.validate()?;
        fs::create_dir_all(&config.db_path)?;
        let root = config.db_path.canonicalize()?;

        let _boot = self.booting.lock();
        if let Some(conn) = self.live(&root) {
            debug!(target: "gitstore::db", path = ?root, "Reusing open store");
            return Ok(conn);
        }

        let config = Config {
            db_path: root.clone(),
            ..config
        };
        let conn = Connection::boot(config, options, Arc::downgrade(&self.open))?;
        self.open.lock().insert(root, Arc::downgrade(&conn));
        Ok(conn)
    }

    /// The live connection for `path`, if any
    pub fn get(&self, path: &Path) -> Option<Arc<Connection>> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.live(&root)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.open
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// True when no connection is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, root: &Path) -> Option<Arc<Connection>> {
        let weak = self.open.lock().get(root).cloned()?;
        weak.upgrade().filter(|c| !c.is_closed())
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self.open.lock();
        f.debug_struct("ConnectionManager")
            .field("roots", &open.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder_records_collaborators() {
        let opts = OpenOptions::new().power_monitor(Arc::new(crate::power::MainsPower));
        assert!(opts.power_monitor.is_some());
        assert!(opts.backend.is_none());
        assert!(format!("{opts:?}").contains("power_monitor: true"));
    }

    #[test]
    fn empty_manager() {
        let m = ConnectionManager::new();
        assert!(m.is_empty());
        assert!(m.get(Path::new("/nonexistent/store")).is_none());
    }
}
