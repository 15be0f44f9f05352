//! Watch session over the include tree and the script tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::scanner::DependencyScanner;

use super::aggregator::{Batch, ChangeAggregator};
use super::error::WatchError;
use super::resolver::{
    is_hidden, lookup_affected_ids, resolve_include_key, resolve_script_id, root_prefix,
};

/// Consumer callback receiving each flushed batch.
pub type BatchCallback = Box<dyn FnMut(Batch) + Send>;

/// Which watched root an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTree {
    Include,
    Script,
}

impl WatchTree {
    fn name(self) -> &'static str {
        match self {
            WatchTree::Include => "include",
            WatchTree::Script => "script",
        }
    }
}

/// Input to the session's event loop.
#[derive(Debug)]
enum SessionCommand {
    Changed { tree: WatchTree, event: Event },
    WatchFailed { tree: WatchTree, reason: String },
    SuppressNext,
}

/// Only content changes count; renames and metadata touches do not.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Any | ModifyKind::Data(_) | ModifyKind::Other)
    )
}

/// State owned by the event loop.
///
/// Resolves changed paths, rescans through the scanner and feeds the
/// aggregator. Never shared; the loop is the only caller.
struct SessionCore<F> {
    scanner: Arc<dyn DependencyScanner>,
    include_prefix: String,
    script_prefix: String,
    /// Extension of watched files, without the dot.
    extension: String,
    aggregator: ChangeAggregator<F>,
}

impl<F> SessionCore<F>
where
    F: FnMut(Batch),
{
    fn new(
        scanner: Arc<dyn DependencyScanner>,
        include_root: &Path,
        script_root: &Path,
        extension: &str,
        aggregator: ChangeAggregator<F>,
    ) -> Self {
        Self {
            scanner,
            include_prefix: root_prefix(include_root),
            script_prefix: root_prefix(script_root),
            extension: extension.to_string(),
            aggregator,
        }
    }

    fn handle_command(&mut self, command: SessionCommand) -> Result<(), WatchError> {
        match command {
            SessionCommand::Changed { tree, event } => {
                if !is_content_change(&event.kind) {
                    tracing::trace!("[{}] ignoring {:?}", tree.name(), event.kind);
                    return Ok(());
                }
                for path in &event.paths {
                    self.handle_path(tree, path)?;
                }
            }
            SessionCommand::WatchFailed { tree, reason } => {
                tracing::warn!("[{}] file watch error: {reason}", tree.name());
            }
            SessionCommand::SuppressNext => {
                crate::debug_event!("session", "suppressing next batch");
                self.aggregator.suppress_next();
            }
        }
        Ok(())
    }

    fn handle_path(&mut self, tree: WatchTree, path: &Path) -> Result<(), WatchError> {
        if path.is_dir() {
            return Ok(());
        }
        let Some(raw) = path.to_str() else {
            crate::debug_event!(tree.name(), "non-utf8 path", "{}", path.display());
            return Ok(());
        };

        let prefix = match tree {
            WatchTree::Include => &self.include_prefix,
            WatchTree::Script => &self.script_prefix,
        };
        let prefix_len = prefix.len();
        let Some(relative) = raw.strip_prefix(prefix.as_str()) else {
            crate::debug_event!(tree.name(), "outside root", "{raw}");
            return Ok(());
        };
        if is_hidden(relative) {
            return Ok(());
        }
        if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
            crate::debug_event!(tree.name(), "ignored extension", "{raw}");
            return Ok(());
        }

        match tree {
            WatchTree::Include => self.include_changed(raw, prefix_len).map(|_| ()),
            WatchTree::Script => self.script_changed(raw, prefix_len).map(|_| ()),
        }
    }

    /// Rescan every identifier depending on the changed include.
    ///
    /// Returns whether anything was recorded.
    fn include_changed(&mut self, raw: &str, prefix_len: usize) -> Result<bool, WatchError> {
        let key = resolve_include_key(raw, prefix_len);
        crate::debug_event!("include", "update detected", "'{key}'");

        let map = self.scanner.include_map();
        let Some(ids) = lookup_affected_ids(&map, &key) else {
            crate::debug_event!("include", "not a dependency", "'{key}'");
            return Ok(false);
        };

        for id in ids {
            self.rescan(id)?;
        }
        Ok(self.aggregator.record_change(ids.iter().cloned()))
    }

    fn script_changed(&mut self, raw: &str, prefix_len: usize) -> Result<bool, WatchError> {
        let id = resolve_script_id(raw, prefix_len);
        if id.is_empty() {
            return Ok(false);
        }
        crate::debug_event!("script", "update detected", "'{id}'");

        self.rescan(&id)?;
        Ok(self.aggregator.record_change([id]))
    }

    fn rescan(&self, id: &str) -> Result<(), WatchError> {
        crate::debug_event!("scanner", "rescanning", "{id}");
        self.scanner
            .scan(id)
            .map_err(|source| WatchError::ScanFailed {
                identifier: id.to_string(),
                source,
            })
    }
}

/// Sequential processor: the only place session state is touched.
///
/// Shutdown is checked before anything else, so once the token is
/// cancelled no further flush can run.
async fn run_event_loop<F>(
    mut core: SessionCore<F>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    shutdown: CancellationToken,
) -> Result<(), WatchError>
where
    F: FnMut(Batch),
{
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                core.aggregator.cancel();
                break;
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    core.aggregator.cancel();
                    break;
                };
                if let Err(e) = core.handle_command(command) {
                    // Pending identifiers are dropped with the core: no partial batch
                    core.aggregator.cancel();
                    tracing::error!("[session] {e}");
                    return Err(e);
                }
            }

            _ = core.aggregator.quiet_period_elapsed() => {
                core.aggregator.flush_or_skip();
            }
        }
    }

    Ok(())
}

/// Debounced watch over an include tree and a script tree.
///
/// Changed files are resolved to identifiers, rescanned through the
/// [`DependencyScanner`] and delivered as one [`Batch`] per quiet period.
pub struct WatchSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<(), WatchError>>>,
    /// Both notify watchers; dropping them ends the subscriptions.
    watchers: Vec<notify::RecommendedWatcher>,
    include_root: PathBuf,
    script_root: PathBuf,
    debounce: Duration,
}

impl WatchSession {
    /// Create a builder for configuring the session.
    pub fn builder() -> WatchSessionBuilder {
        WatchSessionBuilder::new()
    }

    fn launch(
        core: SessionCore<BatchCallback>,
        commands: mpsc::UnboundedSender<SessionCommand>,
        command_rx: mpsc::UnboundedReceiver<SessionCommand>,
        watchers: Vec<notify::RecommendedWatcher>,
        include_root: PathBuf,
        script_root: PathBuf,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let debounce = core.aggregator.delay();
        let task = tokio::spawn(run_event_loop(core, command_rx, shutdown.clone()));

        Self {
            commands,
            shutdown,
            task: Some(task),
            watchers,
            include_root,
            script_root,
            debounce,
        }
    }

    /// Discard the next batch that reaches its quiet period.
    ///
    /// Applies to whichever burst expires next, including one that has not
    /// started yet.
    pub fn suppress_next(&self) {
        if self.commands.send(SessionCommand::SuppressNext).is_err() {
            crate::debug_event!("session", "suppress ignored, session stopped");
        }
    }

    /// Whether the event loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Canonical include root being watched.
    pub fn include_root(&self) -> &Path {
        &self.include_root
    }

    /// Canonical script root being watched.
    pub fn script_root(&self) -> &Path {
        &self.script_root
    }

    /// Configured quiet period.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Stop watching.
    ///
    /// Tears down both subscriptions, cancels any scheduled flush and waits
    /// for the event loop to exit. No callback runs after this returns.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.watchers.clear();

        let Some(task) = self.task.take() else {
            return;
        };
        match task.await {
            Ok(Ok(())) => crate::log_event!("session", "stopped"),
            Ok(Err(e)) => tracing::warn!("[session] stopped after failure: {e}"),
            Err(e) => tracing::error!("[session] event loop panicked: {e}"),
        }
    }

    /// Wait for the event loop to end on its own.
    ///
    /// Returns the scanner failure that ended it, if any. Cancel-safe, so it
    /// can race a shutdown signal in `select!`.
    pub async fn join(&mut self) -> Result<(), WatchError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        self.shutdown.cancel();
        self.watchers.clear();

        result.map_err(|e| WatchError::TaskFailed {
            reason: e.to_string(),
        })?
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("include_root", &self.include_root)
            .field("script_root", &self.script_root)
            .field("debounce", &self.debounce)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Builder for constructing a WatchSession.
pub struct WatchSessionBuilder {
    include_root: Option<PathBuf>,
    script_root: Option<PathBuf>,
    debounce_ms: u64,
    extension: String,
    scanner: Option<Arc<dyn DependencyScanner>>,
    on_batch: Option<BatchCallback>,
}

impl WatchSessionBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            include_root: None,
            script_root: None,
            debounce_ms: 500,
            extension: "ttslua".to_string(),
            scanner: None,
            on_batch: None,
        }
    }

    /// Take roots and quiet period from configuration.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new()
            .include_root(config.include_dir.clone())
            .script_root(config.script_dir.clone())
            .debounce_ms(config.debounce_ms)
            .extension(config.extension.clone())
    }

    /// Set the include tree root.
    pub fn include_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_root = Some(path.into());
        self
    }

    /// Set the script tree root.
    pub fn script_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_root = Some(path.into());
        self
    }

    /// Set the quiet period in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the extension of watched files, without the dot.
    ///
    /// Changes to files with any other extension are ignored.
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set the dependency scanner.
    pub fn scanner(mut self, scanner: Arc<dyn DependencyScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Set the batch consumer.
    pub fn on_batch(mut self, callback: impl FnMut(Batch) + Send + 'static) -> Self {
        self.on_batch = Some(Box::new(callback));
        self
    }

    /// Start watching both trees.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<WatchSession, WatchError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(WatchError::InitFailed {
                reason: "no tokio runtime".to_string(),
            });
        }

        let scanner = self.scanner.ok_or_else(|| WatchError::InitFailed {
            reason: "Scanner is required".to_string(),
        })?;
        let on_batch = self.on_batch.ok_or_else(|| WatchError::InitFailed {
            reason: "Batch callback is required".to_string(),
        })?;
        let include_root = canonical_root(self.include_root, "Include root")?;
        let script_root = canonical_root(self.script_root, "Script root")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let watchers = vec![
            watch_tree(WatchTree::Include, &include_root, tx.clone())?,
            watch_tree(WatchTree::Script, &script_root, tx.clone())?,
        ];

        let aggregator = ChangeAggregator::new(Duration::from_millis(self.debounce_ms), on_batch);
        let core = SessionCore::new(
            scanner,
            &include_root,
            &script_root,
            &self.extension,
            aggregator,
        );

        crate::log_event!(
            "session",
            "watching",
            "includes {}, scripts {} ({}ms quiet period)",
            include_root.display(),
            script_root.display(),
            self.debounce_ms
        );

        Ok(WatchSession::launch(
            core,
            tx,
            rx,
            watchers,
            include_root,
            script_root,
        ))
    }
}

impl Default for WatchSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_root(root: Option<PathBuf>, what: &str) -> Result<PathBuf, WatchError> {
    let root = root.ok_or_else(|| WatchError::InitFailed {
        reason: format!("{what} is required"),
    })?;
    root.canonicalize()
        .map_err(|e| WatchError::PathWatchFailed {
            path: root.clone(),
            reason: e.to_string(),
        })
}

/// Register a recursive notify watch that forwards into the event loop.
fn watch_tree(
    tree: WatchTree,
    root: &Path,
    tx: mpsc::UnboundedSender<SessionCommand>,
) -> Result<notify::RecommendedWatcher, WatchError> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let command = match res {
            Ok(event) => SessionCommand::Changed { tree, event },
            Err(e) => SessionCommand::WatchFailed {
                tree,
                reason: e.to_string(),
            },
        };
        // Closed channel means the session is stopping
        let _ = tx.send(command);
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| WatchError::PathWatchFailed {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

    crate::debug_event!(tree.name(), "watching", "{}", root.display());
    Ok(watcher)
}
