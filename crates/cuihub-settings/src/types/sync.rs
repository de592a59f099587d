//! Auto-sync watcher settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// File watch + rebuild settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Whether the watcher runs at all. Manual sync works either way.
    pub enabled: bool,
    /// Directory commands run in and paths are reported relative to.
    pub root: PathBuf,
    /// Directories under `root` to watch recursively.
    pub watch_dirs: Vec<String>,
    /// File extensions (without dot) that trigger a sync.
    pub extensions: Vec<String>,
    /// Directory names that never trigger a sync (build output, VCS).
    pub exclude_dirs: Vec<String>,
    /// Quiet period after the last change before syncing (milliseconds).
    pub debounce_ms: u64,
    /// Delay between `sync:built` and the restart command (milliseconds).
    pub restart_delay_ms: u64,
    /// Dependency install command.
    pub install_command: String,
    /// Build command.
    pub build_command: String,
    /// Process-manager restart command; no restart when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_command: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("."),
            watch_dirs: vec!["src".to_string(), "crates".to_string()],
            extensions: ["rs", "toml", "html", "js", "css"]
                .into_iter()
                .map(String::from)
                .collect(),
            exclude_dirs: ["target", "node_modules", ".git", "dist"]
                .into_iter()
                .map(String::from)
                .collect(),
            debounce_ms: 3_000,
            restart_delay_ms: 1_500,
            install_command: "cargo fetch".to_string(),
            build_command: "cargo build --release".to_string(),
            restart_command: Some("pm2 restart cuihub".to_string()),
        }
    }
}

impl SyncSettings {
    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Restart delay.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Restart command, if one is configured. An empty string disables it
    /// (a JSON `null` in the settings file is skipped by the deep merge).
    pub fn restart(&self) -> Option<&str> {
        self.restart_command.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Absolute-or-root-relative directories to watch.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        self.watch_dirs.iter().map(|d| self.root.join(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = SyncSettings::default();
        assert!(s.enabled);
        assert_eq!(s.debounce(), Duration::from_secs(3));
        assert!(s.exclude_dirs.iter().any(|d| d == "target"));
        assert!(s.extensions.iter().any(|e| e == "rs"));
    }

    #[test]
    fn watch_paths_join_root() {
        let s = SyncSettings {
            root: PathBuf::from("/srv/hub"),
            watch_dirs: vec!["src".into()],
            ..SyncSettings::default()
        };
        assert_eq!(s.watch_paths(), vec![PathBuf::from("/srv/hub/src")]);
    }

    #[test]
    fn restart_command_can_be_null() {
        let s: SyncSettings = serde_json::from_str(r#"{"restartCommand":null}"#).unwrap();
        assert!(s.restart_command.is_none());
    }

    #[test]
    fn empty_restart_command_disables_restart() {
        let s = SyncSettings {
            restart_command: Some("  ".into()),
            ..SyncSettings::default()
        };
        assert!(s.restart().is_none());
        assert_eq!(SyncSettings::default().restart(), Some("pm2 restart cuihub"));
    }
}
