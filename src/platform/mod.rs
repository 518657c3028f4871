use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory for insight-sync.
    /// Unix: `~/.insight-sync`, Windows: `%APPDATA%\insight-sync`.
    fn data_dir() -> PathBuf;
}

/// `INSIGHT_SYNC_DATA_DIR` overrides the platform default, for tests and
/// multi-instance deployments.
fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var("INSIGHT_SYNC_DATA_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
