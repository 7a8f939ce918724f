use anyhow::{anyhow, Result};
use linkup_feed::FeedConfig;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub paths: StorePaths,
    /// Capacity of the change hub's broadcast buffer.
    pub change_buffer: usize,
    pub feed: FeedConfig,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        let paths = StorePaths::discover()?;
        let change_buffer = env::var("LINKUP_CHANGE_BUFFER")
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(DEFAULT_CHANGE_BUFFER);
        Ok(Self {
            paths,
            change_buffer,
            feed: FeedConfig::from_env(),
        })
    }

    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            change_buffer: DEFAULT_CHANGE_BUFFER,
            feed: FeedConfig::default(),
        }
    }
}

pub const DEFAULT_CHANGE_BUFFER: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct StorePaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl StorePaths {
    /// `LINKUP_HOME` when set, otherwise the directory holding the executable.
    pub fn discover() -> Result<Self> {
        if let Some(home) = env::var("LINKUP_HOME")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
        {
            return Self::from_base_dir(home);
        }
        let exe_path = env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("linkup.db");
        Ok(Self {
            base,
            data_dir,
            db_path,
        })
    }
}
