use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Remote paths the user wants quick access to, stored in bookmarks.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Bookmarks {
    #[serde(default)]
    pub bookmarks: Vec<String>,
}

impl Bookmarks {
    /// Add a path; duplicates are ignored. Returns whether it was added.
    pub fn add(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.contains(&path) {
            return false;
        }
        self.bookmarks.push(path);
        true
    }

    /// Remove a path. Returns whether it was present.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.bookmarks.len();
        self.bookmarks.retain(|p| p != path);
        self.bookmarks.len() != before
    }

    pub fn contains(&self, path: &str) -> bool {
        self.bookmarks.iter().any(|p| p == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.bookmarks.iter().map(String::as_str)
    }

    /// Load from the default location; missing file means no bookmarks
    pub fn load() -> Result<Self, ConfigError> {
        let path = default_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("Bookmarks file does not exist: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        super::paths::ensure_config_dir().map_err(ConfigError::CreateDir)?;
        let path = default_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        super::write_atomic(path, &content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn default_path() -> Result<PathBuf, ConfigError> {
    super::paths::bookmarks_file().ok_or_else(|| ConfigError::ReadFile {
        path: PathBuf::from("bookmarks.toml"),
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine bookmarks file path",
        ),
    })
}
