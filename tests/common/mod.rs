//! Common test utilities

use std::path::PathBuf;
use tempfile::TempDir;

/// Test environment with isolated configuration directory
#[allow(dead_code)]
pub struct TestEnvironment {
    pub config_dir: TempDir,
    pub settings_path: PathBuf,
    pub bookmarks_path: PathBuf,
    pub known_hosts_path: PathBuf,
    pub log_dir: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let config_dir = TempDir::new().expect("Failed to create temp dir");
        let root = config_dir.path().to_path_buf();
        Self {
            settings_path: root.join("settings.toml"),
            bookmarks_path: root.join("bookmarks.toml"),
            known_hosts_path: root.join("known_hosts"),
            log_dir: root.join("logs"),
            config_dir,
        }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
