//! Source tree watcher feeding the sync debounce.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use cuihub_core::{FileChangeKind, HubEvent};
use cuihub_settings::SyncSettings;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::websocket::broadcast::BroadcastHub;

/// Which paths count as source changes.
#[derive(Clone, Debug)]
pub struct SyncFilter {
    root: PathBuf,
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl SyncFilter {
    /// Build from settings, resolving the root to an absolute path when it
    /// exists.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        let root = std::fs::canonicalize(&settings.root).unwrap_or_else(|_| settings.root.clone());
        Self {
            root,
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude_dirs: settings.exclude_dirs.clone(),
        }
    }

    /// Whether a change to `path` should trigger a sync.
    pub fn accepts(&self, path: &Path) -> bool {
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if !ext_ok {
            return false;
        }
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        !rel.components().any(|c| match c {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|n| self.exclude_dirs.iter().any(|d| d == n)),
            _ => false,
        })
    }

    /// `path` relative to the sync root, with `/` separators.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Map a notify event kind onto a change kind. Access and metadata-only
/// events are ignored.
pub fn change_kind(kind: &EventKind) -> Option<FileChangeKind> {
    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Add),
        EventKind::Remove(_) => Some(FileChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileChangeKind::Unlink),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileChangeKind::Add),
        EventKind::Modify(_) => Some(FileChangeKind::Change),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// The qualifying `(relative path, kind)` pairs in one notify event.
pub fn qualifying_changes(event: &Event, filter: &SyncFilter) -> Vec<(String, FileChangeKind)> {
    let Some(kind) = change_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter(|p| filter.accepts(p))
        .map(|p| (filter.relative(p), kind))
        .collect()
}

/// A running watcher. Dropping it stops filesystem notifications.
pub struct SyncWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl SyncWatcher {
    /// Whether the forwarding task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Watch the configured directories.
///
/// Each qualifying change is published as a `file-change` event and then
/// sent to `triggers`, which re-arms the debounce.
pub fn spawn_watcher(
    settings: &SyncSettings,
    hub: Arc<BroadcastHub>,
    triggers: mpsc::Sender<()>,
    cancel: CancellationToken,
) -> notify::Result<SyncWatcher> {
    let filter = SyncFilter::from_settings(settings);
    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;

    let mut watched = 0usize;
    for dir in settings.watch_paths() {
        let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
        if !dir.is_dir() {
            warn!(path = %dir.display(), "watch directory missing, skipping");
            continue;
        }
        watcher.watch(&dir, RecursiveMode::Recursive)?;
        watched += 1;
        debug!(path = %dir.display(), "watching");
    }
    info!(directories = watched, "source watcher started");

    let task = tokio::spawn(async move {
        loop {
            let res = tokio::select! {
                () = cancel.cancelled() => break,
                res = rx.recv() => match res {
                    Some(res) => res,
                    None => break,
                },
            };
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "watcher error");
                    continue;
                }
            };
            for (path, kind) in qualifying_changes(&event, &filter) {
                debug!(path = %path, event = ?kind, "source change");
                let _ = hub.publish(&HubEvent::FileChange { path, event: kind });
                // A full channel already holds a pending trigger.
                let _ = triggers.try_send(());
            }
        }
        debug!("source watcher stopped");
    });

    Ok(SyncWatcher {
        _watcher: watcher,
        task,
    })
}
