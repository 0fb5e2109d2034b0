//! Configuration file watcher for hot reload.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::PolicyConfig;
use crate::observability::metrics;

/// A watcher that monitors the configuration file for changes.
///
/// The containing directory is watched so editors that save by writing a
/// temporary file and renaming it over the original are still noticed; events
/// for other files in that directory are ignored.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<PolicyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<PolicyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let file_name = self.path.file_name().map(OsString::from);
        let directory = watch_directory(&self.path);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if !concerns_file(&event, file_name.as_deref()) {
                        return;
                    }

                    tracing::info!(path = ?path, "Config file change detected, reloading...");
                    match load_config(&path) {
                        Ok(new_config) => {
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            metrics::record_config_reload(false);
                            tracing::error!(
                                path = ?path,
                                "Failed to reload config: {}. Keeping current configuration.",
                                e
                            );
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, directory = ?directory, "Config watcher started");
        Ok(watcher)
    }
}

fn watch_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn concerns_file(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let Some(file_name) = file_name else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};

    #[test]
    fn relative_file_watches_current_directory() {
        assert_eq!(watch_directory(Path::new("config.json")), PathBuf::from("."));
        assert_eq!(
            watch_directory(Path::new("/etc/gateway/config.json")),
            PathBuf::from("/etc/gateway")
        );
    }

    #[test]
    fn ignores_sibling_files() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/gateway/other.json"));
        assert!(!concerns_file(&event, Some(std::ffi::OsStr::new("config.json"))));

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/gateway/config.json"));
        assert!(concerns_file(&event, Some(std::ffi::OsStr::new("config.json"))));
    }
}
