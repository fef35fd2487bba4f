//! Versioned snapshot of the statistics collection.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, StatsError};
use crate::stats::{STATS_VERSION, StatsCollection};

/// Default snapshot filename
pub const SNAPSHOT_FILENAME: &str = "stats.json";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.chatstats/stats.json`
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(home.join(".chatstats").join(SNAPSHOT_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot, replacing the previous one atomically.
    pub fn save(&self, stats: &StatsCollection) -> Result<()> {
        let persistence = |source: std::io::Error| StatsError::Persistence {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(persistence)?;
        }

        let json = simd_json::to_vec(stats).map_err(|e| {
            persistence(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(persistence)?;
        fs::rename(&temp_path, &self.path).map_err(persistence)?;

        debug!(path = %self.path.display(), "saved stats snapshot");
        Ok(())
    }

    /// Read the snapshot without judging it.
    pub fn read(&self) -> Result<Option<StatsCollection>> {
        let mut bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stats: StatsCollection =
            simd_json::from_slice(&mut bytes).map_err(|e| StatsError::SnapshotCorrupt {
                reason: e.to_string(),
            })?;

        if !stats.is_compatible_version() {
            return Err(StatsError::SnapshotCorrupt {
                reason: format!(
                    "version {} does not match expected {STATS_VERSION}",
                    stats.version
                ),
            });
        }

        Ok(Some(stats))
    }

    /// Load the snapshot. Corrupt or outdated snapshots are reported as
    /// absent so the caller rebuilds.
    pub fn load(&self) -> Result<Option<StatsCollection>> {
        match self.read() {
            Err(StatsError::SnapshotCorrupt { reason }) => {
                warn!("Stats snapshot unusable, rebuilding: {reason}");
                Ok(None)
            }
            other => other,
        }
    }
}
