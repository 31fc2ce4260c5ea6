//! Configuration coordination beyond the lifetime of a single configuration.
//!
//! The `Coordinator` owns the published state: the configuration, the
//! template engine compiled from it, and the target registry derived from
//! it. A reload builds a complete new state off to the side, offers it to
//! every subscriber in registration order, and only then swaps it in with a
//! single pointer store. Readers take an `Arc` snapshot and never hold a
//! lock while rendering or sending, so they observe either the old or the
//! new state in full.

use crate::config::{Config, ConfigError};
use crate::registry::TargetRegistry;
use crate::template::{TemplateEngine, TemplateError};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

/// The state request handlers work against. Immutable once published.
#[derive(Debug)]
pub struct PublishedState {
    pub config: Arc<Config>,
    pub templates: Arc<TemplateEngine>,
    pub targets: TargetRegistry,
    /// Increases by one with every successful reload.
    pub generation: u64,
}

/// Where reloads read the configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A configuration file, re-read on every reload.
    File(PathBuf),
    /// A configuration fixed at startup. Reloads re-publish it and re-read
    /// its template files.
    Frozen(Box<Config>),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Frozen(_) => f.write_str("<command line>"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to parse templates: {0}")]
    Templates(#[from] TemplateError),

    #[error("config subscriber {name:?} failed to apply new config: {reason:#}")]
    Subscriber { name: String, reason: anyhow::Error },

    #[error("reload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A callback offered every new state before it is published. Returning an
/// error aborts the reload.
pub type Subscriber = Box<dyn Fn(&PublishedState) -> anyhow::Result<()> + Send + Sync>;

pub struct Coordinator {
    source: ConfigSource,
    // Held for the whole of a reload, so at most one runs at a time.
    reload_lock: Mutex<()>,
    subscribers: RwLock<Vec<(String, Subscriber)>>,
    state: ArcSwapOption<PublishedState>,
}

impl Coordinator {
    /// Creates a coordinator for `source`. Nothing is loaded until the first
    /// call to `reload`.
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            reload_lock: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
            state: ArcSwapOption::empty(),
        }
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Registers a named subscriber, invoked on every subsequent reload after
    /// those registered before it.
    pub fn subscribe<F>(&self, name: impl Into<String>, subscriber: F)
    where
        F: Fn(&PublishedState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.into(), Box::new(subscriber)));
    }

    /// A snapshot of the published state, or `None` before the first
    /// successful reload.
    pub fn current(&self) -> Option<Arc<PublishedState>> {
        self.state.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.load().is_some()
    }

    /// Loads the configuration, compiles its templates, lets every subscriber
    /// inspect the result and publishes it.
    ///
    /// On any failure the previously published state stays in place. Calls
    /// are serialized; a call made while another is running waits for it.
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn reload(&self) -> Result<Arc<PublishedState>, ReloadError> {
        let _guard = self.reload_lock.lock().await;

        info!("Loading configuration");
        let source = self.source.clone();
        let loaded = match tokio::task::spawn_blocking(move || load(&source)).await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };
        let (config, templates) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(err = %e, "Loading configuration failed");
                metrics::counter!("config_reloads_total", "result" => "failure").increment(1);
                return Err(e);
            }
        };

        let generation = self.state.load().as_ref().map_or(1, |s| s.generation + 1);
        let candidate = PublishedState {
            targets: TargetRegistry::from_config(&config),
            config: Arc::new(config),
            templates: Arc::new(templates),
            generation,
        };

        if let Err(e) = self.notify_subscribers(&candidate) {
            error!(err = %e, "One or more config change subscribers failed to apply new config");
            metrics::counter!("config_reloads_total", "result" => "failure").increment(1);
            return Err(e);
        }

        let candidate = Arc::new(candidate);
        self.state.store(Some(candidate.clone()));
        metrics::counter!("config_reloads_total", "result" => "success").increment(1);
        info!(
            generation,
            targets = candidate.targets.len(),
            "Completed loading of configuration"
        );
        Ok(candidate)
    }

    fn notify_subscribers(&self, candidate: &PublishedState) -> Result<(), ReloadError> {
        let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
        for (name, subscriber) in subscribers.iter() {
            subscriber(candidate).map_err(|reason| ReloadError::Subscriber {
                name: name.clone(),
                reason,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("source", &self.source)
            .field("generation", &self.current().map(|s| s.generation))
            .finish()
    }
}

fn load(source: &ConfigSource) -> Result<(Config, TemplateEngine), ReloadError> {
    let config = match source {
        ConfigSource::File(path) => Config::load(path)?,
        ConfigSource::Frozen(config) => config.as_ref().clone(),
    };
    let templates = TemplateEngine::from_globs(!config.no_builtin_template, &config.templates)?;
    Ok((config, templates))
}
