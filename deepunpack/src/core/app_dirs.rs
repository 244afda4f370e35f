//! Centralized app data directory management
//!
//! Logs, saved plans and the config file all live under one data directory
//! so a plan written by one invocation can be found by the next.

use std::path::PathBuf;

/// Directory name under the platform data directory
const APP_IDENTIFIER: &str = "deepunpack";

/// Environment variable that overrides the data directory
pub const HOME_ENV_VAR: &str = "DEEPUNPACK_HOME";

/// Get the app data directory for persistent storage
///
/// Resolution order:
/// - `$DEEPUNPACK_HOME` when set
/// - the platform local data dir (`%LOCALAPPDATA%`, `~/Library/Application Support`,
///   `$XDG_DATA_HOME` or `~/.local/share`) joined with the app identifier
/// - the current directory as a last resort
pub fn get_app_data_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }

    if let Some(data_dir) = dirs::data_local_dir() {
        return data_dir.join(APP_IDENTIFIER);
    }

    PathBuf::from(".").join(APP_IDENTIFIER)
}

/// Get the logs directory
pub fn get_logs_dir() -> PathBuf {
    get_app_data_dir().join("logs")
}

/// Get the directory holding persisted scan plans
pub fn get_plans_dir() -> PathBuf {
    get_app_data_dir().join("plans")
}

/// Get the engine config file path
pub fn get_config_path() -> PathBuf {
    get_app_data_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_data_dir_not_empty() {
        let dir = get_app_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_subdirs_are_under_data_dir() {
        let data_dir = get_app_data_dir();
        assert!(get_plans_dir().starts_with(&data_dir));
        assert!(get_logs_dir().starts_with(&data_dir));
        assert_eq!(get_config_path().file_name().unwrap(), "config.json");
    }
}
