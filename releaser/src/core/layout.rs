//! Remote path layout for one environment on one host.
//!
//! Remote paths are POSIX strings regardless of where the tool runs, so they
//! are built with `/` joins rather than `PathBuf`.

/// Placeholder in the configured root that is replaced by the host name.
pub const HOST_PLACEHOLDER: &str = "{host}";

/// All canonical remote paths for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    pub root: String,
    pub releases_dir: String,
    pub current_link: String,
    pub record_file: String,
}

impl ReleaseLayout {
    /// Resolve a layout for `host`. Relative parts are joined onto `root`.
    pub fn resolve(
        root: &str,
        releases_dir: &str,
        current_link: &str,
        record_file: &str,
        host: &str,
    ) -> Self {
        let root = root.replace(HOST_PLACEHOLDER, host);
        Self {
            releases_dir: join(&root, releases_dir),
            current_link: join(&root, current_link),
            record_file: join(&root, record_file),
            root,
        }
    }

    pub fn release_path(&self, release_id: &str) -> String {
        join(&self.releases_dir, release_id)
    }
}

/// Join `segment` onto `base`; an absolute segment replaces the base.
pub fn join(base: &str, segment: &str) -> String {
    if segment.starts_with('/') {
        return segment.to_string();
    }
    let base = base.trim_end_matches('/');
    let segment = segment.trim_start_matches("./");
    if base.is_empty() {
        return segment.to_string();
    }
    format!("{base}/{segment}")
}

/// A release id must name exactly one directory under the releases dir.
pub fn is_valid_release_id(release_id: &str) -> bool {
    !release_id.is_empty()
        && release_id != "."
        && release_id != ".."
        && !release_id.contains('/')
        && !release_id.contains('\0')
        && !release_id.chars().any(char::is_whitespace)
}
