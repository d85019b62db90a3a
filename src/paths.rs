//! Well-known file locations resolved from the process environment.
//!
//! Every component asks this registry for paths; no literal paths appear in
//! adapter or engine code.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::Venue;

#[derive(Debug, Clone)]
pub struct PathRegistry {
    config_dir: PathBuf,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    log_dir: PathBuf,
}

impl PathRegistry {
    pub fn from_env() -> Self {
        let dir = |var: &str, default: &str| {
            std::env::var(var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(default))
        };
        Self {
            config_dir: dir("BOT_CONFIG_DIR", "./config"),
            data_dir: dir("BOT_DATA_DIR", "./data"),
            cache_dir: dir("BOT_CACHE_DIR", "./cache"),
            log_dir: dir("BOT_LOG_DIR", "./logs"),
        }
    }

    /// All directories under one root. Used by tests and single-dir deploys.
    pub fn with_root(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            log_dir: root.join("logs"),
        }
    }

    /// Create the top-level directories. The image cache root is left alone
    /// so an external tree can still be symlinked in as the root.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.cache_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    pub fn scrapers_file(&self) -> PathBuf {
        self.config_dir.join("scrapers.toml")
    }

    pub fn api_keys_file(&self) -> PathBuf {
        self.config_dir.join("api_keys.toml")
    }

    pub fn search_filters_file(&self) -> PathBuf {
        self.config_dir.join("search_filters.toml")
    }

    /// Per-venue catalog: `data/<venue>_data.json`.
    pub fn venue_data_file(&self, venue: Venue) -> PathBuf {
        self.data_dir.join(format!("{}_data.json", venue.as_str()))
    }

    pub fn profitability_file(&self) -> PathBuf {
        self.data_dir.join("profitability_data.json")
    }

    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_are_rooted_in_their_directories() {
        let root = tempfile::tempdir().unwrap();
        let paths = PathRegistry::with_root(root.path());
        paths.ensure().unwrap();

        assert!(paths.data_dir().is_dir());
        // Image cache root is not pre-created; the cache or an imported
        // tree materializes it.
        assert!(!paths.image_cache_dir().exists());
        assert!(paths.image_cache_dir().starts_with(paths.cache_dir()));

        let waxpeer = paths.venue_data_file(Venue::Waxpeer);
        assert!(waxpeer.starts_with(paths.data_dir()));
        assert!(waxpeer.ends_with("waxpeer_data.json"));

        assert!(paths
            .profitability_file()
            .ends_with("profitability_data.json"));
        assert!(paths.settings_file().starts_with(paths.config_dir()));
    }
}
