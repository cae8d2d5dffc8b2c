//! Platform directory resolution shared by the logger, the config file, and
//! the per-document playground store.

use std::path::PathBuf;

/// Platform data directory (without the app sub-folder).
///
///   Windows:  `%APPDATA%`
///   Linux:    `$XDG_DATA_HOME` or `~/.local/share`
///   macOS:    `~/Library/Application Support`
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}

/// App-scoped data directory (`<data>/segpad`), created on demand.
pub fn app_data_dir() -> PathBuf {
    let dir = data_dir().join("segpad");
    let _ = std::fs::create_dir_all(&dir);
    dir
}

/// Platform config directory with the app sub-folder, created on demand.
/// On Linux this respects `XDG_CONFIG_HOME`; elsewhere it shares the data
/// location, which is the platform convention for both.
pub fn app_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                PathBuf::from(home).join(".config")
            });
        let dir = base.join("segpad");
        let _ = std::fs::create_dir_all(&dir);
        return Some(dir);
    }
    #[cfg(not(target_os = "linux"))]
    {
        Some(app_data_dir())
    }
}
