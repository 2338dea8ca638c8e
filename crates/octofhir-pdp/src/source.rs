//! File-system document source.
//!
//! Reads every `*.json` file of one directory as a [`Document`] and an
//! optional `pdp.toml` as the [`PdpConfig`], and can watch the directory to
//! reload on change.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::new_debouncer;
use tracing::{debug, error, info, warn};

use crate::config::{CONFIG_FILE_NAME, ConfigurationProvider, PdpConfig};
use crate::document::Document;
use crate::error::{PdpError, PdpResult};
use crate::prp::{LoadReport, PolicyRetrievalPoint};

/// Handle for a running directory watcher.
pub struct WatchHandle {
    handle: tokio::task::JoinHandle<()>,
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl WatchHandle {
    /// Stop the watcher and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// Loads documents and configuration from one directory.
pub struct FileSystemSource {
    directory: PathBuf,
    prp: Arc<PolicyRetrievalPoint>,
    configuration: Arc<ConfigurationProvider>,
}

impl FileSystemSource {
    pub fn new(
        directory: impl Into<PathBuf>,
        prp: Arc<PolicyRetrievalPoint>,
        configuration: Arc<ConfigurationProvider>,
    ) -> Self {
        Self {
            directory: directory.into(),
            prp,
            configuration,
        }
    }

    /// Create a source for the directory named in `config.source.path`.
    pub fn from_config(
        config: &PdpConfig,
        prp: Arc<PolicyRetrievalPoint>,
        configuration: Arc<ConfigurationProvider>,
    ) -> PdpResult<Self> {
        let directory = config
            .source
            .path
            .clone()
            .ok_or_else(|| PdpError::config("source.path is not set"))?;
        Ok(Self::new(directory, prp, configuration))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reload configuration and documents.
    ///
    /// A broken `pdp.toml` keeps the previous configuration. Unreadable
    /// documents are reported in the returned [`LoadReport`] alongside
    /// documents whose target fails to compile.
    pub fn load(&self) -> PdpResult<LoadReport> {
        self.reload_configuration();

        let (documents, mut unreadable) = read_documents(&self.directory)?;
        let mut report = self.prp.load(documents)?;
        unreadable.append(&mut report.rejected);
        report.rejected = unreadable;
        Ok(report)
    }

    fn reload_configuration(&self) {
        let path = self.directory.join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!(path = ?path, "No configuration file, keeping current configuration");
            return;
        }
        match PdpConfig::from_file(&path) {
            Ok(config) => self.configuration.update(config.resolve()),
            Err(e) => warn!(path = ?path, error = %e, "Ignoring invalid configuration file"),
        }
    }

    /// Watch the directory and reload after every burst of changes.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> PdpResult<WatchHandle> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut debouncer =
            new_debouncer(debounce, notify_tx).map_err(|e| PdpError::watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&self.directory, RecursiveMode::NonRecursive)
            .map_err(|e| PdpError::watch(format!("{}: {e}", self.directory.display())))?;

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        let source = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // Dropping the debouncer stops the underlying watcher.
            let _debouncer = debouncer;
            info!(directory = ?source.directory, "Started watching policy directory");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Policy directory watcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        let mut changed = false;
                        while let Ok(events) = notify_rx.try_recv() {
                            match events {
                                Ok(events) => {
                                    changed |= events.iter().any(|event| is_source_file(&event.path));
                                }
                                Err(e) => error!("Policy directory watcher error: {e:?}"),
                            }
                        }
                        if !changed {
                            continue;
                        }
                        match source.load() {
                            Ok(report) => info!(
                                version = report.version,
                                loaded = report.loaded,
                                rejected = report.rejected.len(),
                                "Reloaded policy directory"
                            ),
                            Err(e) => error!(error = %e, "Failed to reload policy directory"),
                        }
                    }
                }
            }
        });

        Ok(WatchHandle {
            handle,
            shutdown: shutdown_tx,
        })
    }
}

fn is_source_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
        || path.file_name().is_some_and(|name| name == CONFIG_FILE_NAME)
}

/// Parse every `*.json` file in `directory`, in file name order.
///
/// Returns the parsed documents and one error per file that could not be
/// read or parsed.
pub fn read_documents(directory: &Path) -> PdpResult<(Vec<Document>, Vec<PdpError>)> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    let mut rejected = Vec::new();
    for path in paths {
        match read_document(&path) {
            Ok(document) => documents.push(document),
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping unreadable document");
                rejected.push(e);
            }
        }
    }
    Ok((documents, rejected))
}

fn read_document(path: &Path) -> PdpResult<Document> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)
        .map_err(|e| PdpError::compile(&name, format!("Cannot read document: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| PdpError::compile(&name, format!("Invalid document: {e}")))
}
