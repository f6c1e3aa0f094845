//! `TetherServer` builder and maintenance runtime.
//!
//! This is the entry point for running Tether. It ties together all the
//! layers: the session registry behind one lock, the three periodic
//! maintenance jobs, and the [`SessionHandler`] the HTTP layer calls.
//!
//! ```text
//!   HTTP adapter ──→ SessionHandler ──┐
//!                                     ▼
//!                       Mutex<SessionRegistry>
//!                                     ▲
//!   Scheduler jobs ───────────────────┘
//!     refresh_link_status  every refresh_link_interval
//!     broadcast_status     every broadcast_interval
//!     pulse                every pulse_interval
//! ```

use std::sync::Arc;

use futures_util::future::join_all;
use tether_events::{EventBus, Scheduler, TaskHandle};
use tether_protocol::JsonCodec;
use tether_session::{
    ClientService, ConnectHook, IdentityDirectory, ServiceTable, SessionConfig, SessionEvent,
    SessionRegistry,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::TetherError;
use crate::handler::{CommandSink, EchoCommands, SessionHandler};

/// Shared server state, handed to every handler clone and job.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState {
    pub(crate) registry: Mutex<SessionRegistry>,
    pub(crate) codec: JsonCodec,
    pub(crate) commands: Arc<dyn CommandSink>,
    pub(crate) services: ServiceTable,
}

/// Builder for configuring a Tether server.
///
/// # Example
///
/// ```rust,no_run
/// use tether::prelude::*;
///
/// # async fn run() {
/// let mut server = TetherServer::builder()
///     .config(SessionConfig::default())
///     .build(InMemoryDirectory::new());
/// server.start();
/// let handler = server.handler();
/// // mount `handler` in your HTTP router...
/// server.shutdown().await;
/// # }
/// ```
pub struct TetherServerBuilder {
    config: SessionConfig,
    hooks: Vec<Arc<dyn ConnectHook>>,
    commands: Arc<dyn CommandSink>,
    services: ServiceTable,
}

impl TetherServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            hooks: Vec::new(),
            commands: Arc::new(EchoCommands),
            services: ServiceTable::new(),
        }
    }

    /// Sets the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a hook that contributes client data on login.
    pub fn hook(mut self, hook: impl ConnectHook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Sets where player actions go. Defaults to [`EchoCommands`].
    pub fn commands(mut self, sink: impl CommandSink) -> Self {
        self.commands = Arc::new(sink);
        self
    }

    /// Adds a client service sessions can register for by `name`.
    ///
    /// The live roster is built in as
    /// [`ROSTER_SERVICE`](tether_session::ROSTER_SERVICE).
    pub fn service(mut self, name: impl Into<String>, service: impl ClientService) -> Self {
        self.services.insert(name, Arc::new(service));
        self
    }

    /// Builds the server around an identity directory.
    ///
    /// Nothing runs until [`TetherServer::start`].
    pub fn build(self, directory: impl IdentityDirectory) -> TetherServer {
        let config = self.config.validated();
        let mut registry = SessionRegistry::new(config.clone(), Arc::new(directory));
        for hook in self.hooks {
            registry.add_hook(hook);
        }
        let events = registry.events().clone();

        let state = Arc::new(ServerState {
            registry: Mutex::new(registry),
            codec: JsonCodec,
            commands: self.commands,
            services: self.services,
        });

        TetherServer {
            state,
            events,
            config,
            jobs: None,
        }
    }
}

impl Default for TetherServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles for the periodic maintenance jobs.
struct MaintenanceJobs {
    refresh: TaskHandle,
    broadcast: TaskHandle,
    pulse: TaskHandle,
}

/// A Tether server: the session registry plus its maintenance jobs.
///
/// Dropping the server cancels the jobs.
pub struct TetherServer {
    state: Arc<ServerState>,
    events: EventBus<SessionEvent>,
    config: SessionConfig,
    jobs: Option<MaintenanceJobs>,
}

impl TetherServer {
    /// Creates a new builder.
    pub fn builder() -> TetherServerBuilder {
        TetherServerBuilder::new()
    }

    /// A handler for the HTTP layer. Cheap to clone; all clones share
    /// this server's registry.
    pub fn handler(&self) -> SessionHandler {
        SessionHandler::new(Arc::clone(&self.state))
    }

    /// Lifecycle events published by the registry.
    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    /// Starts link-health, presence-broadcast, and pulse jobs.
    ///
    /// Must be called from within a Tokio runtime. Calling it on a
    /// running server does nothing.
    pub fn start(&mut self) {
        if self.jobs.is_some() {
            warn!("server already started");
            return;
        }
        self.jobs = Some(spawn_jobs(&self.state, &self.config));
        info!(
            refresh_secs = self.config.refresh_link_interval_secs,
            broadcast_secs = self.config.broadcast_interval_secs,
            pulse_ms = self.config.pulse_interval_ms,
            "tether server started"
        );
    }

    /// Applies a new config to a live server.
    ///
    /// Thresholds change for the next maintenance pass. Each running job
    /// is rescheduled in place: its next run moves earlier if the new
    /// interval is shorter and is never pushed later, and no run is lost
    /// or doubled by the switch.
    pub async fn reload_config(&mut self, config: SessionConfig) {
        let config = config.validated();
        self.state.registry.lock().await.set_config(config.clone());
        if let Some(jobs) = &self.jobs {
            jobs.refresh.set_period(config.refresh_link_interval());
            jobs.broadcast.set_period(config.broadcast_interval());
            jobs.pulse.set_period(config.pulse_interval());
        }
        self.config = config;
        info!("config reloaded");
    }

    /// Parses a JSON config document and applies it.
    ///
    /// # Errors
    /// [`SessionError::InvalidConfig`](tether_session::SessionError::InvalidConfig)
    /// if the document doesn't parse. The running config is untouched.
    pub async fn reload_config_json(&mut self, text: &str) -> Result<(), TetherError> {
        let config = SessionConfig::from_json(text)?;
        self.reload_config(config).await;
        Ok(())
    }

    /// Stops the maintenance jobs and waits for them to exit.
    ///
    /// Sessions stay in the registry; handlers keep working, but nothing
    /// is flushed or pruned until [`start`](Self::start) is called again.
    pub async fn shutdown(&mut self) {
        let Some(jobs) = self.jobs.take() else {
            return;
        };
        join_all([jobs.refresh, jobs.broadcast, jobs.pulse].map(TaskHandle::stopped)).await;
        info!("tether server stopped");
    }
}

fn spawn_jobs(state: &Arc<ServerState>, config: &SessionConfig) -> MaintenanceJobs {
    let refresh = {
        let state = Arc::clone(state);
        Scheduler::every("refresh_link_status", config.refresh_link_interval(), move || {
            let state = Arc::clone(&state);
            async move {
                let report = state.registry.lock().await.refresh_link_status();
                if report.keep_alives > 0 {
                    debug!(keep_alives = report.keep_alives, "keep-alives queued");
                }
            }
        })
    };

    let broadcast = {
        let state = Arc::clone(state);
        Scheduler::every("broadcast_status", config.broadcast_interval(), move || {
            let state = Arc::clone(&state);
            async move {
                state.registry.lock().await.broadcast_status();
            }
        })
    };

    let pulse = {
        let state = Arc::clone(state);
        Scheduler::every("pulse", config.pulse_interval(), move || {
            let state = Arc::clone(&state);
            async move {
                state.registry.lock().await.pulse();
            }
        })
    };

    MaintenanceJobs {
        refresh,
        broadcast,
        pulse,
    }
}
