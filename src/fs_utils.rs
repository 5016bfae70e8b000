//! Local filesystem utilities for downloaded files

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::sftp::types;

/// Name used when the remote path has no usable last component
const FALLBACK_NAME: &str = "download";

/// Write `data` into `dir` under `file_name`, or the first free variant of
/// it (`name 1.ext`, `name 2.ext`, ...). Never overwrites an existing file.
///
/// On unix the file is created with mode 0600.
pub fn write_unique_private_file(dir: &Path, file_name: &str, data: &[u8]) -> io::Result<PathBuf> {
    let file_name = sanitize_file_name(file_name);

    for candidate in types::candidate_names(file_name) {
        let path = dir.join(&candidate);
        let mut file = match open_new_private(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };

        if let Err(e) = file.write_all(data).and_then(|_| file.sync_all()) {
            // Don't leave a truncated file behind
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        tracing::debug!("Wrote {} bytes to {}", data.len(), path.display());
        return Ok(path);
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {} in {}", file_name, dir.display()),
    ))
}

fn sanitize_file_name(file_name: &str) -> &str {
    match file_name {
        "" | "." | ".." => FALLBACK_NAME,
        name if name.contains(['/', '\\']) => FALLBACK_NAME,
        name => name,
    }
}

fn open_new_private(path: &Path) -> io::Result<std::fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    options.open(path)
}
