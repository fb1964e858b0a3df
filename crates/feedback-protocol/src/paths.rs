use std::path::PathBuf;

/// Returns the config/data directory path for the feedback broker.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("feedback-broker")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("feedback-broker")
    } else {
        PathBuf::from("/tmp/feedback-broker")
    }
}

/// Returns the default config file path for the feedback server.
pub fn config_path() -> PathBuf {
    dirs_path().join("config.toml")
}

/// Routable path of a session's human-facing page.
pub fn session_path(session_id: &str) -> String {
    format!("/session/{session_id}")
}
