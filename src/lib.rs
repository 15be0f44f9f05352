pub mod config;
pub mod logging;
pub mod scanner;
pub mod watcher;

pub use config::{LoggingConfig, Settings, WatchConfig};
pub use scanner::{DependencyScanner, IncludeMap, IncludeScanner, ScanError};
pub use watcher::{Batch, WatchError, WatchSession};
