//! Discovery from the cluster file or the static member list

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FileWatchConfig, LookupConfig};
use crate::error::{ActivationError, Error, Result};
use crate::kind::StrategyKind;
use crate::member::MemberSet;
use crate::sink::MembershipSink;
use crate::strategy::DiscoveryStrategy;
use crate::task::BackgroundTask;

/// Where a [`FileConfigStrategy`] reads its members from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileSource {
    /// A cluster file, watched for changes.
    ClusterFile(PathBuf),

    /// A static comma-separated list, fixed for the process lifetime.
    StaticList(String),
}

/// Lower bound for the periodic re-check interval
const MIN_RECHECK: Duration = Duration::from_millis(10);

struct Running {
    source: FileSource,
    sink: Arc<dyn MembershipSink>,
    token: CancellationToken,
    watch: Option<BackgroundTask>,
}

/// Discovers members from the cluster file, falling back to the static list.
pub struct FileConfigStrategy {
    cluster_conf_path: PathBuf,
    member_list: Option<String>,
    watch_config: FileWatchConfig,
    deactivate_timeout: Duration,
    activated: AtomicBool,
    last_delivered: Arc<Mutex<Option<MemberSet>>>,
    running: Mutex<Option<Running>>,
}

impl FileConfigStrategy {
    /// Create a strategy for the given cluster file and optional static list.
    pub fn new(
        cluster_conf_path: impl Into<PathBuf>,
        member_list: Option<String>,
        watch_config: FileWatchConfig,
        deactivate_timeout: Duration,
    ) -> Self {
        Self {
            cluster_conf_path: cluster_conf_path.into(),
            member_list,
            watch_config,
            deactivate_timeout,
            activated: AtomicBool::new(false),
            last_delivered: Arc::new(Mutex::new(None)),
            running: Mutex::new(None),
        }
    }

    /// Create a strategy from the lookup configuration.
    pub fn from_config(config: &LookupConfig) -> Self {
        Self::new(
            config.cluster_conf_path.clone(),
            config.static_member_list().map(str::to_string),
            config.file_watch.clone(),
            config.deactivate_timeout,
        )
    }

    /// The source chosen on activation, if activated.
    pub fn source(&self) -> Option<FileSource> {
        self.running.lock().as_ref().map(|running| running.source.clone())
    }

    /// The member set most recently delivered to the sink.
    pub fn last_delivered(&self) -> Option<MemberSet> {
        self.last_delivered.lock().clone()
    }

    fn resolve_source(&self) -> Result<FileSource, ActivationError> {
        if self.cluster_conf_path.is_file() {
            return Ok(FileSource::ClusterFile(self.cluster_conf_path.clone()));
        }

        match self.member_list.as_deref().map(str::trim) {
            Some(list) if !list.is_empty() => Ok(FileSource::StaticList(list.to_string())),
            _ => Err(ActivationError::SourceUnavailable(format!(
                "no cluster file at {} and no static member list",
                self.cluster_conf_path.display()
            ))),
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for FileConfigStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FileConfig
    }

    async fn activate(&self, sink: Arc<dyn MembershipSink>) -> Result<(), ActivationError> {
        if self.activated.swap(true, Ordering::SeqCst) {
            return Err(ActivationError::AlreadyActivated);
        }

        let source = self.resolve_source()?;
        let members = match &source {
            FileSource::ClusterFile(path) => read_cluster_file(path)
                .await
                .map_err(|e| ActivationError::SourceUnavailable(e.to_string()))?,
            FileSource::StaticList(list) => MemberSet::parse_list(list),
        };

        info!(
            "Loaded {} members from {}: {}",
            members.len(),
            describe_source(&source),
            members
        );

        {
            let mut last = self.last_delivered.lock();
            *last = Some(members.clone());
            sink.apply(members);
        }

        let token = CancellationToken::new();
        let watch = match &source {
            FileSource::ClusterFile(path) => {
                let watcher = ClusterFileWatcher {
                    path: path.clone(),
                    sink: sink.clone(),
                    last_delivered: self.last_delivered.clone(),
                    config: self.watch_config.clone(),
                };
                Some(BackgroundTask::spawn(
                    "cluster file watch",
                    token.clone(),
                    watcher.run(token.clone()),
                )?)
            }
            FileSource::StaticList(_) => None,
        };

        *self.running.lock() = Some(Running {
            source,
            sink,
            token,
            watch,
        });

        Ok(())
    }

    async fn deactivate(&self) {
        let watch = self.running.lock().as_mut().and_then(|running| {
            running.token.cancel();
            running.watch.take()
        });

        if let Some(watch) = watch {
            info!("Stopping cluster file watch");
            watch.stop(self.deactivate_timeout).await;
        }
    }

    async fn refresh(&self) -> Result<()> {
        let target = self.running.lock().as_ref().and_then(|running| {
            if running.token.is_cancelled() {
                return None;
            }
            match &running.source {
                FileSource::ClusterFile(path) => Some((
                    path.clone(),
                    running.sink.clone(),
                    running.token.clone(),
                )),
                FileSource::StaticList(_) => None,
            }
        });

        if let Some((path, sink, token)) = target {
            reload_cluster_file(&path, &sink, &self.last_delivered, &token).await?;
        }

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| running.watch.is_some())
    }

    fn info(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::from([("kind".to_string(), self.kind().to_string())]);

        match self.source() {
            Some(FileSource::ClusterFile(path)) => {
                info.insert("source".to_string(), "cluster-file".to_string());
                info.insert("path".to_string(), path.display().to_string());
            }
            Some(FileSource::StaticList(list)) => {
                info.insert("source".to_string(), "static-list".to_string());
                info.insert("members".to_string(), list);
            }
            None => {}
        }

        info
    }
}

impl std::fmt::Debug for FileConfigStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigStrategy")
            .field("cluster_conf_path", &self.cluster_conf_path)
            .field("source", &self.source())
            .finish_non_exhaustive()
    }
}

fn describe_source(source: &FileSource) -> String {
    match source {
        FileSource::ClusterFile(path) => format!("cluster file {}", path.display()),
        FileSource::StaticList(_) => "static member list".to_string(),
    }
}

async fn read_cluster_file(path: &Path) -> Result<MemberSet> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(MemberSet::parse_lines(&content))
}

/// Re-read the file and deliver it if it differs from the last delivery.
/// Returns whether a delivery happened. Nothing is delivered once `token` is
/// cancelled.
async fn reload_cluster_file(
    path: &Path,
    sink: &Arc<dyn MembershipSink>,
    last_delivered: &Mutex<Option<MemberSet>>,
    token: &CancellationToken,
) -> Result<bool> {
    let members = read_cluster_file(path).await?;

    let mut last = last_delivered.lock();
    if token.is_cancelled() {
        debug!("Cluster file lookup deactivated, dropping reload");
        return Ok(false);
    }
    if last.as_ref() == Some(&members) {
        debug!("Cluster file unchanged, skipping delivery");
        return Ok(false);
    }

    info!("Cluster file changed, now {} members: {}", members.len(), members);
    *last = Some(members.clone());
    sink.apply(members);

    Ok(true)
}

struct ClusterFileWatcher {
    path: PathBuf,
    sink: Arc<dyn MembershipSink>,
    last_delivered: Arc<Mutex<Option<MemberSet>>>,
    config: FileWatchConfig,
}

impl ClusterFileWatcher {
    async fn run(self, token: CancellationToken) {
        // The watcher must stay alive for as long as events are wanted.
        let (_watcher, mut events) = match watch_parent_dir(&self.path) {
            Ok((watcher, events)) => (Some(watcher), Some(events)),
            Err(e) => {
                warn!(
                    "Cannot watch {} ({}), relying on periodic re-checks every {:?}",
                    self.path.display(),
                    e,
                    self.config.recheck_interval
                );
                (None, None)
            }
        };

        let mut recheck = tokio::time::interval(self.config.recheck_interval.max(MIN_RECHECK));
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        recheck.tick().await;

        let mut read_failing = false;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                Some(()) = next_event(&mut events) => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(self.config.settle_delay) => {}
                    }
                    if let Some(events) = events.as_mut() {
                        while events.try_recv().is_ok() {}
                    }
                }
                _ = recheck.tick() => {}
            }

            match reload_cluster_file(&self.path, &self.sink, &self.last_delivered, &token).await {
                Ok(_) => read_failing = false,
                Err(e) if read_failing => debug!("Cluster file still unreadable: {}", e),
                Err(e) => {
                    warn!("Keeping previous members, cluster file unreadable: {}", e);
                    read_failing = true;
                }
            }
        }

        debug!("Cluster file watch for {} exiting", self.path.display());
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<()>>) -> Option<()> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Watch the file's directory, so atomic replacements are seen too, and
/// forward events that touch the file.
fn watch_parent_dir(
    path: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let file_name: Option<OsString> = path.file_name().map(OsString::from);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let touches_file = event
                .paths
                .iter()
                .any(|p| p.file_name() == file_name.as_deref());
            if touches_file && !matches!(event.kind, EventKind::Access(_)) {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!("Cluster file watch error: {}", e),
    })?;

    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    Ok((watcher, rx))
}
