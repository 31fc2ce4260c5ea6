//! Watches the configuration file and template files and requests a reload
//! when they change.

use crate::lifecycle::{ReloadCause, ReloadTrigger};
use anyhow::{Context, Result};
use notify::{event::EventKind, Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Filesystem watcher feeding a [`ReloadTrigger`].
///
/// The template globs come from a `watch` channel updated on every published
/// configuration, so globs added by a reload are watched from then on.
pub struct ConfigWatcher {
    config_file: PathBuf,
    plan: WatchPlan,
    globs_rx: watch::Receiver<Vec<String>>,
    trigger: ReloadTrigger,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConfigWatcher {
    /// Prepares a watcher for `config_file` and every file matching the
    /// current value of `globs_rx`. Nothing is watched until
    /// [`ConfigWatcher::run`].
    pub fn new(
        config_file: &Path,
        mut globs_rx: watch::Receiver<Vec<String>>,
        trigger: ReloadTrigger,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let config_file = resolve(config_file)?;
        let globs = globs_rx.borrow_and_update().clone();
        let plan = WatchPlan::new(&config_file, &globs)?;
        Ok(Self {
            config_file,
            plan,
            globs_rx,
            trigger,
            shutdown_rx,
        })
    }

    /// Directories the watcher subscribes to. A directory that does not
    /// exist yet is stood in for by its nearest existing ancestor.
    pub fn directories(&self) -> BTreeSet<PathBuf> {
        self.plan.registrations()
    }

    pub async fn run(mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(100);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if tx.blocking_send(event).is_err() {
                        debug!("File event channel closed");
                    }
                }
                Err(e) => error!(err = %e, "File watcher error"),
            },
            Config::default(),
        )?;

        let mut registered = BTreeSet::new();
        self.sync_watches(&mut watcher, &mut registered);
        let mut globs_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    info!("Config watcher received shutdown signal.");
                    break;
                }
                changed = self.globs_rx.changed(), if globs_open => {
                    if changed.is_err() {
                        globs_open = false;
                        continue;
                    }
                    let globs = self.globs_rx.borrow_and_update().clone();
                    match WatchPlan::new(&self.config_file, &globs) {
                        Ok(plan) => {
                            info!(?globs, "Template globs changed");
                            self.plan = plan;
                            if self.sync_watches(&mut watcher, &mut registered) {
                                // Files may have landed before the new watch was in place.
                                self.trigger.request(ReloadCause::FileChange);
                            }
                        }
                        Err(e) => warn!(err = %e, "Keeping previous template watches"),
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let mut reload = self.should_reload(&event);
                    if self.touches_planned_directory(&event)
                        && self.sync_watches(&mut watcher, &mut registered)
                    {
                        // Files may have landed before the new watch was in place.
                        reload |= matches!(event.kind, EventKind::Create(_));
                    }
                    if reload {
                        info!(paths = ?event.paths, "Configuration change detected");
                        self.trigger.request(ReloadCause::FileChange);
                    }
                }
            }
        }
        Ok(())
    }

    /// Brings the registered directories in line with the plan. Returns true
    /// if anything changed.
    fn sync_watches<W: Watcher>(&self, watcher: &mut W, registered: &mut BTreeSet<PathBuf>) -> bool {
        let wanted = self.plan.registrations();
        if wanted == *registered {
            return false;
        }

        for dir in registered.difference(&wanted) {
            if let Err(e) = watcher.unwatch(dir) {
                debug!(dir = %dir.display(), err = %e, "Cannot unwatch directory");
            }
        }
        let mut now = BTreeSet::new();
        for dir in wanted {
            if registered.contains(&dir) {
                now.insert(dir);
                continue;
            }
            match watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!(dir = %dir.display(), "Watching for configuration changes");
                    now.insert(dir);
                }
                Err(e) => warn!(dir = %dir.display(), err = %e, "Cannot watch directory"),
            }
        }
        *registered = now;
        true
    }

    fn should_reload(&self, event: &Event) -> bool {
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => event
                .paths
                .iter()
                .any(|path| self.is_watched_file(path)),
            _ => false,
        }
    }

    fn is_watched_file(&self, path: &Path) -> bool {
        path == self.config_file || self.plan.matches(path)
    }

    /// True if `event` creates or removes a planned directory or one of its
    /// ancestors.
    fn touches_planned_directory(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Remove(_))
            && event.paths.iter().any(|path| self.plan.leads_to_directory(path))
    }
}

/// The template patterns to match and the directories holding them.
#[derive(Debug)]
struct WatchPlan {
    template_patterns: Vec<glob::Pattern>,
    directories: BTreeSet<PathBuf>,
}

impl WatchPlan {
    fn new<S: AsRef<str>>(config_file: &Path, template_globs: &[S]) -> Result<Self> {
        let mut directories = BTreeSet::new();
        if let Some(parent) = config_file.parent() {
            directories.insert(parent.to_path_buf());
        }

        let mut template_patterns = Vec::new();
        for pattern in template_globs {
            let pattern = Path::new(pattern.as_ref());
            let prefix = literal_prefix(pattern);
            let wildcard = pattern.strip_prefix(&prefix).unwrap_or(Path::new(""));
            let base = resolve(&prefix)?;

            let absolute = if wildcard.as_os_str().is_empty() {
                // A plain file path.
                if let Some(dir) = base.parent() {
                    directories.insert(dir.to_path_buf());
                }
                base
            } else {
                // Only the first wildcard level is watched.
                directories.insert(base.clone());
                base.join(wildcard)
            };
            let compiled = glob::Pattern::new(&absolute.to_string_lossy())
                .with_context(|| format!("invalid template glob {:?}", pattern.display()))?;
            template_patterns.push(compiled);
        }

        Ok(Self {
            template_patterns,
            directories,
        })
    }

    fn registrations(&self) -> BTreeSet<PathBuf> {
        self.directories
            .iter()
            .filter_map(|dir| dir.ancestors().find(|a| a.is_dir()))
            .map(Path::to_path_buf)
            .collect()
    }

    fn matches(&self, path: &Path) -> bool {
        self.template_patterns.iter().any(|p| p.matches_path(path))
    }

    fn leads_to_directory(&self, path: &Path) -> bool {
        self.directories.iter().any(|dir| dir.starts_with(path))
    }
}

/// The leading components of `pattern` that contain no glob syntax.
fn literal_prefix(pattern: &Path) -> PathBuf {
    let mut prefix = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(['*', '?', '[']) {
                break;
            }
        }
        prefix.push(component);
    }
    prefix
}

/// Makes `path` absolute, resolving symlinks in the longest existing prefix
/// so it compares equal to the paths reported by the OS.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot determine current directory")?
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for part in rest.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
}
