//! The main application logic, decoupled from the entry point.

use crate::{
    coordinator::{ConfigSource, Coordinator, PublishedState},
    lifecycle::{listen_for_sighup, ReloadTrigger, ReloadWorker},
    notifier::{Dispatch, SignedDispatcher},
    task_manager::TaskManager,
    watcher::ConfigWatcher,
    web::{AppState, WebOptions, WebServer},
};
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument};

/// A running relay: the web server plus its reload machinery.
pub struct App {
    task_manager: TaskManager,
    local_addr: SocketAddr,
    coordinator: Arc<Coordinator>,
    reload_trigger: ReloadTrigger,
}

impl App {
    pub fn builder(source: ConfigSource) -> AppBuilder {
        AppBuilder::new(source)
    }

    /// The address the web server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// A handle for requesting reloads, as SIGHUP does.
    pub fn reload_trigger(&self) -> ReloadTrigger {
        self.reload_trigger.clone()
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.shutdown_rx();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let panicked = self.task_manager.shutdown().await;
        if panicked > 0 {
            anyhow::bail!("{panicked} task(s) panicked during shutdown");
        }
        Ok(())
    }
}

/// Builder for the relay.
///
/// Everything except the configuration source has a production default;
/// tests override the listener, the dispatcher and the reload notifier.
pub struct AppBuilder {
    source: ConfigSource,
    listen_address: SocketAddr,
    listener: Option<TcpListener>,
    web_options: WebOptions,
    watch_config: bool,
    dispatcher: Option<Arc<dyn Dispatch>>,
    prom_handle: Option<PrometheusHandle>,
    reload_notifier: Option<mpsc::Sender<Result<u64, String>>>,
}

impl AppBuilder {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            listen_address: SocketAddr::from(([0, 0, 0, 0], 8060)),
            listener: None,
            web_options: WebOptions::default(),
            watch_config: false,
            dispatcher: None,
            prom_handle: None,
            reload_notifier: None,
        }
    }

    pub fn listen_address(mut self, address: SocketAddr) -> Self {
        self.listen_address = address;
        self
    }

    /// Serves on an already bound listener instead of `listen_address`.
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn web_options(mut self, options: WebOptions) -> Self {
        self.web_options = options;
        self
    }

    /// Reload when the configuration file or a template file changes.
    pub fn watch_config(mut self, enabled: bool) -> Self {
        self.watch_config = enabled;
        self
    }

    pub fn dispatcher_override(mut self, dispatcher: Arc<dyn Dispatch>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn prometheus_handle(mut self, handle: PrometheusHandle) -> Self {
        self.prom_handle = Some(handle);
        self
    }

    /// Receives the outcome of every reload served by the reload worker.
    pub fn reload_notifier(mut self, notifier: mpsc::Sender<Result<u64, String>>) -> Self {
        self.reload_notifier = Some(notifier);
        self
    }

    /// Loads the initial configuration, binds the listener and spawns every
    /// background task. Fails if the initial configuration is invalid.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let task_manager = TaskManager::new(shutdown_rx.clone());

        let coordinator = Arc::new(Coordinator::new(self.source));
        coordinator.subscribe("message-templates", check_message_templates);
        coordinator.subscribe("log-targets", log_targets);
        let initial = coordinator
            .reload()
            .await
            .context("failed to load initial configuration")?;

        let listener = match self.listener {
            Some(listener) => listener,
            None => TcpListener::bind(self.listen_address)
                .await
                .with_context(|| format!("failed to bind {}", self.listen_address))?,
        };
        let local_addr = listener.local_addr()?;

        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(SignedDispatcher::new()?),
        };
        let mut state = AppState::new(coordinator.clone(), dispatcher, self.web_options);
        if let Some(handle) = self.prom_handle {
            state = state.with_prometheus(handle);
        }
        task_manager.spawn("WebServer", WebServer::new(listener, state, shutdown_rx.clone()).run());

        let (reload_trigger, reload_rx) = ReloadTrigger::channel();
        let mut worker = ReloadWorker::new(coordinator.clone(), reload_rx, shutdown_rx.clone());
        if let Some(notifier) = self.reload_notifier {
            worker = worker.with_notifier(notifier);
        }
        task_manager.spawn("ReloadWorker", worker.run());
        task_manager.spawn("SighupListener", listen_for_sighup(reload_trigger.clone(), shutdown_rx.clone()));

        if self.watch_config {
            match coordinator.source() {
                ConfigSource::File(path) => {
                    let (globs_tx, globs_rx) = watch::channel(initial.config.templates.clone());
                    // Registered last, so every state it sees is about to be published.
                    coordinator.subscribe("watch-templates", move |state| {
                        globs_tx.send_if_modified(|globs| {
                            if *globs == state.config.templates {
                                return false;
                            }
                            globs.clone_from(&state.config.templates);
                            true
                        });
                        Ok(())
                    });
                    let watcher = ConfigWatcher::new(
                        path,
                        globs_rx,
                        reload_trigger.clone(),
                        shutdown_rx.clone(),
                    )?;
                    task_manager.spawn_fallible("ConfigWatcher", watcher.run());
                }
                ConfigSource::Frozen(_) => {
                    info!("Configuration comes from the command line, not watching for changes");
                }
            }
        }

        info!(address = %local_addr, "Relay started");
        Ok(App {
            task_manager,
            local_addr,
            coordinator,
            reload_trigger,
        })
    }
}

/// Rejects a configuration whose effective message templates do not parse.
fn check_message_templates(state: &PublishedState) -> Result<()> {
    let config = &state.config;
    let default = config.default_message();
    for text in [&default.title, &default.text] {
        state
            .templates
            .check_syntax(text)
            .context("invalid default message template")?;
    }
    for (name, target) in &config.targets {
        let message = config.message_for(target);
        for text in [&message.title, &message.text] {
            state
                .templates
                .check_syntax(text)
                .with_context(|| format!("invalid message template for target {name:?}"))?;
        }
    }
    Ok(())
}

fn log_targets(state: &PublishedState) -> Result<()> {
    for name in state.targets.names() {
        if let Some(target) = state.targets.resolve(name) {
            info!(target_name = name, url = %target.url, "Webhook target configured");
        }
    }
    Ok(())
}
