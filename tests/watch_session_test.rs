//! End-to-end tests: real files, real notify watchers, real scanner.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use ttswatch::watcher::WatchSessionBuilder;
use ttswatch::{Batch, DependencyScanner, IncludeScanner, WatchConfig, WatchSession};

const DELAY_MS: u64 = 200;

struct Project {
    _dir: TempDir,
    include: PathBuf,
    scripts: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let include = dir.path().join("include");
        let scripts = dir.path().join("scripts");
        fs::create_dir_all(include.join("lib")).unwrap();
        fs::create_dir_all(&scripts).unwrap();
        Self {
            _dir: dir,
            include,
            scripts,
        }
    }

    fn write(root: &Path, name: &str, content: &str) {
        fs::write(root.join(format!("{name}.ttslua")), content).unwrap();
    }

    fn script(&self, id: &str, content: &str) {
        Self::write(&self.scripts, id, content);
    }

    fn include(&self, key: &str, content: &str) {
        Self::write(&self.include, key, content);
    }

    fn scanner(&self) -> Arc<IncludeScanner> {
        let scanner = Arc::new(IncludeScanner::new(&self.scripts, &self.include, "ttslua"));
        scanner.scan_all();
        scanner
    }

    fn start(&self, scanner: Arc<IncludeScanner>) -> (WatchSession, mpsc::UnboundedReceiver<Batch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = WatchSession::builder()
            .include_root(&self.include)
            .script_root(&self.scripts)
            .debounce_ms(DELAY_MS)
            .scanner(scanner)
            .on_batch(move |batch| {
                let _ = tx.send(batch);
            })
            .start()
            .expect("session should start");
        (session, rx)
    }
}

fn batch(ids: &[&str]) -> Batch {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn next_batch(rx: &mut mpsc::UnboundedReceiver<Batch>) -> Option<Batch> {
    timeout(Duration::from_secs(10), rx.recv()).await.ok().flatten()
}

/// Let the OS watches settle before touching files.
async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_script_modification_reports_identifier() {
    let project = Project::new();
    project.script("card1", "print('v1')\n");
    let (mut session, mut rx) = project.start(project.scanner());
    settle().await;

    project.script("card1", "print('v2')\n");

    assert_eq!(next_batch(&mut rx).await, Some(batch(&["card1"])));
    session.stop().await;
}

#[tokio::test]
async fn test_include_modification_reports_dependents() {
    let project = Project::new();
    project.include("lib/Util", "return {}\n");
    project.include("Unused", "return {}\n");
    project.script("card1", "#include lib/Util\n");
    project.script("card2", "#include lib/Util\n");
    project.script("card3", "print('standalone')\n");
    let (mut session, mut rx) = project.start(project.scanner());
    settle().await;

    // Not a dependency of anything: no batch on its own
    project.include("Unused", "return { changed = true }\n");
    project.include("lib/Util", "return { v = 2 }\n");

    assert_eq!(next_batch(&mut rx).await, Some(batch(&["card1", "card2"])));
    session.stop().await;
}

#[tokio::test]
async fn test_rescan_picks_up_new_include() {
    let project = Project::new();
    project.include("Deck", "return {}\n");
    project.script("card1", "print('no includes yet')\n");
    let scanner = project.scanner();
    assert!(!scanner.include_map().contains_key("Deck"));

    let (mut session, mut rx) = project.start(Arc::clone(&scanner));
    settle().await;

    project.script("card1", "#include Deck\n");
    assert_eq!(next_batch(&mut rx).await, Some(batch(&["card1"])));
    assert!(scanner.include_map().contains_key("Deck"));

    project.include("Deck", "return { v = 2 }\n");
    assert_eq!(next_batch(&mut rx).await, Some(batch(&["card1"])));

    session.stop().await;
}

#[tokio::test]
async fn test_hidden_files_are_ignored() {
    let project = Project::new();
    project.script("card1", "");
    fs::create_dir_all(project.scripts.join(".backup")).unwrap();
    fs::write(project.scripts.join(".backup/card1.ttslua"), "").unwrap();
    let (mut session, mut rx) = project.start(project.scanner());
    settle().await;

    fs::write(project.scripts.join(".backup/card1.ttslua"), "changed").unwrap();

    let quiet = timeout(Duration::from_millis(DELAY_MS * 5), rx.recv()).await;
    assert!(quiet.is_err(), "hidden file change must not produce a batch");
    session.stop().await;
}

#[tokio::test]
async fn test_non_script_file_does_not_end_session() {
    let project = Project::new();
    project.script("card1", "");
    fs::write(project.scripts.join("README.md"), "# scripts\n").unwrap();
    let (mut session, mut rx) = project.start(project.scanner());
    settle().await;

    fs::write(project.scripts.join("README.md"), "# scripts, edited\n").unwrap();
    sleep(Duration::from_millis(DELAY_MS * 3)).await;
    assert!(session.is_running(), "editing README.md must not stop watching");

    project.script("card1", "print('edit')\n");
    assert_eq!(next_batch(&mut rx).await, Some(batch(&["card1"])));

    session.stop().await;
}

#[tokio::test]
async fn test_suppressed_batch_is_not_delivered() {
    let project = Project::new();
    project.script("card1", "");
    project.script("card2", "");
    let (mut session, mut rx) = project.start(project.scanner());
    settle().await;

    session.suppress_next();
    project.script("card1", "print('from the uploader')\n");
    sleep(Duration::from_millis(DELAY_MS * 3)).await;

    project.script("card2", "print('from the editor')\n");
    assert_eq!(next_batch(&mut rx).await, Some(batch(&["card2"])));

    session.stop().await;
}

#[tokio::test]
async fn test_no_batch_after_stop() {
    let project = Project::new();
    project.script("card1", "");
    let (mut session, mut rx) = project.start(project.scanner());
    settle().await;

    project.script("card1", "print('edit')\n");
    session.stop().await;
    session.stop().await;
    assert!(!session.is_running());

    project.script("card1", "print('after stop')\n");
    assert_eq!(next_batch(&mut rx).await, None);
}

#[tokio::test]
async fn test_builder_from_config() {
    let project = Project::new();
    project.script("card1", "");
    let config = WatchConfig {
        include_dir: project.include.clone(),
        script_dir: project.scripts.clone(),
        debounce_ms: 150,
        ..WatchConfig::default()
    };

    let mut session = WatchSessionBuilder::from_config(&config)
        .scanner(project.scanner())
        .on_batch(|_| {})
        .start()
        .unwrap();

    assert!(session.is_running());
    assert_eq!(session.debounce(), Duration::from_millis(150));
    assert_eq!(session.script_root(), project.scripts.canonicalize().unwrap());
    session.stop().await;
}
