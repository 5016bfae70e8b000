pub mod bookmarks;
pub mod paths;
pub mod settings;

use std::io::Write;
use std::path::Path;

pub use bookmarks::Bookmarks;
pub use settings::{
    AppConfig, ClientSettings, HostKeyPolicy, ReconnectSettings, SavedAuthMethod,
    SavedConnection,
};

/// Write `content` to `path` through a temporary sibling file and a rename,
/// so readers never observe a half-written config file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp_path);
    })
}
