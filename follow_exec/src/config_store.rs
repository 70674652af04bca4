//! # Configuration store
//!
//! Holds the current parameters as an immutable snapshot. Each cycle takes one snapshot and uses
//! it throughout, a reload swaps in a new snapshot which is only seen from the next cycle.
//!
//! A reload which fails to load or validate leaves the current snapshot in place.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::SystemTime,
};

use crate::params::{FollowExecParams, ParamsError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConfigStore {
    /// File the parameters are loaded from, `None` for a fixed set of parameters
    path: Option<PathBuf>,

    current: RwLock<Arc<FollowExecParams>>,

    /// Modification time of the file when it was last read
    modified: RwLock<Option<SystemTime>>,

    /// Incremented on every successful reload
    version: AtomicU64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ParamsError(ParamsError),

    #[error("Cannot reload, the configuration wasn't loaded from a file")]
    NoPath,

    #[error("Sync primitive is poisoned")]
    PoisonError,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ConfigStore {
    /// Load the parameters from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let modified = modified_time(&path);
        let params = FollowExecParams::load(&path).map_err(ConfigError::ParamsError)?;

        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(params)),
            modified: RwLock::new(modified),
            version: AtomicU64::new(0),
        })
    }

    /// Create a store holding fixed parameters, which can't be reloaded.
    pub fn from_params(params: FollowExecParams) -> Result<Self, ConfigError> {
        params.validate().map_err(ConfigError::ParamsError)?;

        Ok(Self {
            path: None,
            current: RwLock::new(Arc::new(params)),
            modified: RwLock::new(None),
            version: AtomicU64::new(0),
        })
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Result<Arc<FollowExecParams>, ConfigError> {
        Ok(self.current.read()?.clone())
    }

    /// Number of successful reloads so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reload the parameters from the file.
    ///
    /// On success the new snapshot is returned, on failure the current snapshot is kept.
    pub fn reload(&self) -> Result<Arc<FollowExecParams>, ConfigError> {
        let path = self.path.as_ref().ok_or(ConfigError::NoPath)?;

        *self.modified.write()? = modified_time(path);

        let params = match FollowExecParams::load(path) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!("Configuration reload rejected, keeping the current one: {}", e);
                return Err(ConfigError::ParamsError(e))
            }
        };

        *self.current.write()? = params.clone();
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;

        info!("Configuration reloaded from {:?} (version {})", path, version);

        Ok(params)
    }

    /// Reload the parameters if the file has been modified since it was last read.
    ///
    /// Returns `Ok(None)` if the file hasn't changed.
    pub fn poll_modified(&self) -> Result<Option<Arc<FollowExecParams>>, ConfigError> {
        let path = match self.path {
            Some(ref p) => p,
            None => return Ok(None)
        };

        let modified = modified_time(path);
        if modified.is_none() || modified == *self.modified.read()? {
            return Ok(None)
        }

        self.reload().map(Some)
    }
}

impl<G> From<PoisonError<G>> for ConfigError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{fs, time::Duration};

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_reload_keeps_old_on_error() {
        let path = std::env::temp_dir().join("follow_exec_test_config_store.toml");
        write(&path, "[tracker]\nmax_age = 5\n");

        let store = ConfigStore::load(&path).unwrap();
        let first = store.snapshot().unwrap();
        assert_eq!(first.tracker.max_age, 5);
        assert_eq!(store.version(), 0);

        write(&path, "[tracker]\nmax_age = 7\n");
        let second = store.reload().unwrap();
        assert_eq!(second.tracker.max_age, 7);
        assert_eq!(store.version(), 1);

        // The earlier snapshot is unaffected
        assert_eq!(first.tracker.max_age, 5);

        write(&path, "[exec]\ncycle_period_s = -1.0\n");
        assert!(matches!(store.reload(), Err(ConfigError::ParamsError(_))));
        assert_eq!(store.snapshot().unwrap().tracker.max_age, 7);
        assert_eq!(store.version(), 1);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_poll_modified() {
        let path = std::env::temp_dir().join("follow_exec_test_config_poll.toml");
        write(&path, "[tracker]\nmax_tracks = 4\n");

        let store = ConfigStore::load(&path).unwrap();
        assert!(store.poll_modified().unwrap().is_none());

        // Make sure the modification time moves on even on coarse filesystems
        std::thread::sleep(Duration::from_millis(1100));
        write(&path, "[tracker]\nmax_tracks = 6\n");

        let p = store.poll_modified().unwrap().unwrap();
        assert_eq!(p.tracker.max_tracks, 6);
        assert!(store.poll_modified().unwrap().is_none());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_fixed_params() {
        let store = ConfigStore::from_params(FollowExecParams::default()).unwrap();
        assert!(matches!(store.reload(), Err(ConfigError::NoPath)));
        assert!(store.poll_modified().unwrap().is_none());
    }
}
