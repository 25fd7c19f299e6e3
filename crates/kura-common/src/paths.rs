use std::path::PathBuf;

/// Environment variable that relocates every kura path (tests, containers).
pub const DATA_DIR_ENV: &str = "KURA_DATA_DIR";

/// Root data directory for kura.
///
/// Everything kura keeps is host-local: install record, renewal lock,
/// logs and the default `config.toml`.
///
/// - `$KURA_DATA_DIR` when set
/// - otherwise `/var/lib/kura`
pub fn kura_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from("/var/lib/kura")
}

/// Runtime state directory.
pub fn kura_state_dir() -> PathBuf {
    kura_data_dir().join("state")
}

/// Log directory.
pub fn kura_log_dir() -> PathBuf {
    kura_data_dir().join("logs")
}

/// Default location of the settings file.
pub fn kura_config_path() -> PathBuf {
    kura_data_dir().join("config.toml")
}
