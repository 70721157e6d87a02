//! Configuration file management for sprintfoundry.
//!
//! Provides a TOML-based config file at `~/.config/sprintfoundry/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default. No
//! database section here -- the engine this CLI talks to is filesystem-only,
//! so the only thing worth pinning down ahead of time is which workspace
//! directory a run's `.events.jsonl`/`.sprintfoundry/` live under.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Default workspace directory, used when `--workspace` is omitted and
    /// `SPRINTFOUNDRY_WORKSPACE` is unset.
    #[serde(default)]
    pub workspace: Option<String>,
}

/// Return the sprintfoundry config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/sprintfoundry` or
/// `~/.config/sprintfoundry`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("sprintfoundry");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("sprintfoundry")
}

/// Return the path to the sprintfoundry config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load the config file, or an empty default if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    match std::fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents).with_context(|| format!("failed to parse config file at {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read config file at {}", path.display())),
    }
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(config_path(), contents).context("failed to write config file")
}

/// Resolve the workspace directory: `--workspace` flag > `SPRINTFOUNDRY_WORKSPACE`
/// env var > config file `workspace` key > current directory.
pub fn resolve_workspace(flag: Option<&str>) -> Result<PathBuf> {
    if let Some(w) = flag {
        return Ok(PathBuf::from(w));
    }
    if let Ok(w) = std::env::var("SPRINTFOUNDRY_WORKSPACE") {
        return Ok(PathBuf::from(w));
    }
    if let Some(w) = load_config()?.workspace {
        return Ok(PathBuf::from(w));
    }
    std::env::current_dir().context("failed to determine current directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    // Env vars are process-global; serialise the tests that touch them.
    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("sprintfoundry/config.toml"), "unexpected config path: {}", path.display());
    }

    #[test]
    fn resolve_with_cli_flag_overrides_everything() {
        let _lock = lock_env();
        unsafe { std::env::set_var("SPRINTFOUNDRY_WORKSPACE", "/env/workspace") };
        let resolved = resolve_workspace(Some("/flag/workspace")).unwrap();
        unsafe { std::env::remove_var("SPRINTFOUNDRY_WORKSPACE") };
        assert_eq!(resolved, PathBuf::from("/flag/workspace"));
    }

    #[test]
    fn resolve_falls_back_to_env_var() {
        let _lock = lock_env();
        unsafe { std::env::set_var("SPRINTFOUNDRY_WORKSPACE", "/env/workspace") };
        let resolved = resolve_workspace(None).unwrap();
        unsafe { std::env::remove_var("SPRINTFOUNDRY_WORKSPACE") };
        assert_eq!(resolved, PathBuf::from("/env/workspace"));
    }

    #[test]
    fn resolve_falls_back_to_current_dir_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("SPRINTFOUNDRY_WORKSPACE") };
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let resolved = resolve_workspace(None).unwrap();

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
        assert_eq!(resolved, std::env::current_dir().unwrap());
    }

    #[test]
    fn save_and_load_config_round_trips() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        save_config(&ConfigFile {
            workspace: Some("/saved/workspace".to_string()),
        })
        .unwrap();
        let loaded = load_config().unwrap();

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
        assert_eq!(loaded.workspace.as_deref(), Some("/saved/workspace"));
    }
}
