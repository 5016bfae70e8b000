//! Remote file entries, sorting, and remote path helpers

use chrono::{DateTime, Utc};

/// Highest suffix tried when looking for a free `name N.ext` variant
pub const MAX_NAME_ATTEMPTS: u32 = 1000;

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub name: String,
    /// Full remote path, `/` separated
    pub path: String,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub size: u64,
    /// Mode bits as reported by the server, if any
    pub permissions: Option<u32>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

impl FileEntry {
    /// Build an entry for `name` inside `dir` from SFTP attributes.
    ///
    /// Takes the attributes of the link itself for symlinks, so `is_dir` is
    /// only set for real directories.
    pub(crate) fn from_attrs(
        dir: &str,
        name: &str,
        attrs: &russh_sftp::protocol::FileAttributes,
    ) -> Self {
        let is_symlink = attrs.is_symlink();
        Self {
            name: name.to_string(),
            path: join_remote(dir, name),
            is_dir: !is_symlink && attrs.is_dir(),
            is_symlink,
            size: attrs.size.unwrap_or(0),
            permissions: attrs.permissions,
            modified: attrs.mtime.and_then(unix_time),
            accessed: attrs.atime.and_then(unix_time),
        }
    }

    /// Get file extension if any
    pub fn extension(&self) -> Option<&str> {
        if self.is_dir {
            None
        } else {
            std::path::Path::new(&self.name)
                .extension()
                .and_then(|e| e.to_str())
        }
    }

    /// `rwxr-xr-x` style rendering of the low nine mode bits
    pub fn permissions_string(&self) -> String {
        match self.permissions {
            Some(mode) => format_permissions(mode),
            None => "---------".to_string(),
        }
    }

    /// Format modified date for display
    pub fn formatted_modified(&self) -> String {
        match &self.modified {
            Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            None => "—".to_string(),
        }
    }
}

fn unix_time(secs: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(secs), 0)
}

/// Render permission bits as `rwxrwxrwx`
pub fn format_permissions(mode: u32) -> String {
    const FLAGS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];

    FLAGS
        .iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

/// Sort order for file listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NameAsc,
    NameDesc,
    SizeAsc,
    SizeDesc,
    ModifiedAsc,
    ModifiedDesc,
}

impl SortOrder {
    /// Sort file entries according to this order
    pub fn sort(&self, entries: &mut [FileEntry]) {
        entries.sort_by(|a, b| {
            // Directories before files
            if a.is_dir != b.is_dir {
                return if a.is_dir {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
            }

            let by_name = || a.name.to_lowercase().cmp(&b.name.to_lowercase());

            match self {
                SortOrder::NameAsc => by_name(),
                SortOrder::NameDesc => by_name().reverse(),
                SortOrder::SizeAsc => a.size.cmp(&b.size).then_with(by_name),
                SortOrder::SizeDesc => b.size.cmp(&a.size).then_with(by_name),
                SortOrder::ModifiedAsc => a.modified.cmp(&b.modified).then_with(by_name),
                SortOrder::ModifiedDesc => b.modified.cmp(&a.modified).then_with(by_name),
            }
        });
    }
}

/// Format file size for display
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.1} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.1} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else {
        format!("{} B", size)
    }
}

/// Join a remote directory and a child name
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent directory of a remote path, `None` at the root
pub fn parent_remote(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => Some("."),
    }
}

/// Last component of a remote path
pub fn file_name_remote(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Whether `path` is `ancestor` itself or lies below it
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    let path = path.trim_end_matches('/');
    let ancestor = ancestor.trim_end_matches('/');
    if ancestor.is_empty() {
        // The root contains every absolute path
        return path.starts_with('/') || path.is_empty();
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Candidate names for a copy: `file_name`, then `stem 1.ext`, `stem 2.ext`, ...
pub fn candidate_names(file_name: &str) -> impl Iterator<Item = String> + '_ {
    let (stem, ext) = split_extension(file_name);
    std::iter::once(file_name.to_string()).chain((1..MAX_NAME_ATTEMPTS).map(move |n| match ext {
        Some(ext) => format!("{} {}.{}", stem, n, ext),
        None => format!("{} {}", stem, n),
    }))
}

/// First candidate name for which `taken` is false
pub fn unique_name(file_name: &str, taken: impl Fn(&str) -> bool) -> Option<String> {
    candidate_names(file_name).find(|name| !taken(name))
}

fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        // Dotfiles like `.bashrc` have no extension
        Some(0) | None => (file_name, None),
        Some(idx) => (&file_name[..idx], Some(&file_name[idx + 1..])),
    }
}
