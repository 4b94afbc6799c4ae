//! Recursive watcher over session record directories.
//!
//! One `notify` watcher is registered per base directory. Its synchronous
//! callback classifies each raw notification and hands it to a tokio task
//! that owns a [`Debouncer`] and forwards coalesced
//! [`SessionChangeEvent`]s to the caller's channel.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::WatcherConfig;
use crate::models::session::{ChangeType, SessionChangeEvent};
use crate::session::debounce::{DebounceKey, Debouncer};
use crate::session::encoding::{canonicalize_or_fallback, decode_project_dir};
use crate::session::store::RECORD_EXTENSION;
use crate::{AppError, Result};

struct RawChange {
    key: DebounceKey,
    event: SessionChangeEvent,
}

/// Watches base directories for session record changes.
pub struct SessionFileWatcher {
    config: WatcherConfig,
    watchers: Vec<RecommendedWatcher>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionFileWatcher {
    /// Watcher using `config` for debouncing. Nothing is watched until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            watchers: Vec::new(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Start watching every directory in `base_dirs` recursively, sending
    /// debounced changes to `sender`. A running watch is stopped first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Watch` if a directory does not exist or cannot be
    /// registered. Nothing is left running in that case.
    pub async fn start(
        &mut self,
        base_dirs: &[PathBuf],
        sender: mpsc::Sender<SessionChangeEvent>,
    ) -> Result<()> {
        self.stop().await;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watchers = Vec::with_capacity(base_dirs.len());

        for dir in base_dirs {
            if !dir.is_dir() {
                return Err(AppError::Watch(format!(
                    "watch root {} is not a directory",
                    dir.display()
                )));
            }
            let scope = canonicalize_or_fallback(dir);
            let tx = raw_tx.clone();
            let callback_scope = scope.clone();

            let mut watcher = notify::recommended_watcher(
                move |result: std::result::Result<Event, notify::Error>| match result {
                    Ok(event) => {
                        let Some(rename_class) = classify_kind(&event.kind) else {
                            return;
                        };
                        for path in &event.paths {
                            if let Some(change) =
                                session_change_from_path(path, rename_class, Utc::now())
                            {
                                let key =
                                    DebounceKey::new(callback_scope.clone(), change.session_id.clone());
                                if tx.send(RawChange { key, event: change }).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => warn!(%err, "session watcher error"),
                },
            )?;

            watcher
                .watch(&scope, RecursiveMode::Recursive)
                .map_err(|err| {
                    AppError::Watch(format!("failed to watch {}: {err}", scope.display()))
                })?;
            info!(dir = %scope.display(), "watching session records");
            watchers.push(watcher);
        }

        let cancel = CancellationToken::new();
        let debouncer = Debouncer::from_config(&self.config);
        let span = info_span!("session_watcher", roots = watchers.len());
        self.task = Some(tokio::spawn(
            debounce_loop(debouncer, raw_rx, sender, cancel.clone()).instrument(span),
        ));
        self.cancel = cancel;
        self.watchers = watchers;
        Ok(())
    }

    /// Stop watching and wait for the debounce task to finish. Pending
    /// changes are discarded.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.watchers.clear();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(%err, "session watcher task ended abnormally");
            }
            info!("session watcher stopped");
        }
    }

    /// Whether the debounce task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SessionFileWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn debounce_loop(
    mut debouncer: Debouncer,
    mut raw_rx: mpsc::UnboundedReceiver<RawChange>,
    sender: mpsc::Sender<SessionChangeEvent>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = debouncer.next_deadline();
        let due = tokio::select! {
            () = cancel.cancelled() => break,
            raw = raw_rx.recv() => {
                let Some(RawChange { key, event }) = raw else { break };
                debouncer
                    .on_notification(key, event, Instant::now())
                    .into_iter()
                    .collect::<Vec<_>>()
            }
            () = sleep_until_deadline(deadline) => debouncer.drain_due(Instant::now()),
        };

        for change in due {
            debug!(
                session_id = %change.session_id,
                change = ?change.change_type,
                "session record changed"
            );
            if sender.send(change).await.is_err() {
                debug!("session change receiver dropped");
                return;
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// `Some(true)` for rename-class notifications, `Some(false)` for other
/// changes, `None` for notifications that never signal a change.
fn classify_kind(kind: &EventKind) -> Option<bool> {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(true)
        }
        EventKind::Access(_) => None,
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => Some(false),
    }
}

/// Classify a notification for `path`.
///
/// Only `*.jsonl` files are session records. A rename-class notification is
/// a creation if the file exists now and a deletion otherwise; anything else
/// is an update.
#[must_use]
pub fn session_change_from_path(
    path: &Path,
    rename_class: bool,
    now: DateTime<Utc>,
) -> Option<SessionChangeEvent> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
        return None;
    }
    let session_id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())?
        .to_owned();

    let change_type = match (rename_class, path.exists()) {
        (true, true) => ChangeType::Created,
        (true, false) => ChangeType::Deleted,
        (false, _) => ChangeType::Updated,
    };

    let project_path = path
        .parent()
        .and_then(Path::file_name)
        .map(|name| decode_project_dir(&name.to_string_lossy()))
        .unwrap_or_default();

    Some(SessionChangeEvent {
        change_type,
        session_id,
        file_path: path.to_path_buf(),
        project_path,
        timestamp: now,
    })
}
