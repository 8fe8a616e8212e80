//! Power gating for background sync

use std::fs;
use std::path::PathBuf;

/// Source of the current battery level
pub trait PowerMonitor: Send + Sync {
    /// Battery percentage, or `None` on mains power / no battery
    fn level(&self) -> Option<f64>;
}

/// Always on mains power
#[derive(Debug, Default, Clone, Copy)]
pub struct MainsPower;

impl PowerMonitor for MainsPower {
    fn level(&self) -> Option<f64> {
        None
    }
}

/// Reads `capacity` files under `/sys/class/power_supply`
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    root: PathBuf,
}

impl SysfsBattery {
    /// Monitor using the standard sysfs location
    pub fn new() -> Self {
        Self::with_root("/sys/class/power_supply")
    }

    /// Monitor reading supplies under `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerMonitor for SysfsBattery {
    fn level(&self) -> Option<f64> {
        let entries = fs::read_dir(&self.root).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("BAT"))
            .filter_map(|e| fs::read_to_string(e.path().join("capacity")).ok())
            .filter_map(|s| s.trim().parse::<f64>().ok())
            .reduce(f64::max)
    }
}

/// Whether syncing may run at the monitor's current level
pub fn has_sufficient_power(monitor: &dyn PowerMonitor, min_percent: u8) -> bool {
    monitor
        .level()
        .map_or(true, |level| level >= f64::from(min_percent))
}
