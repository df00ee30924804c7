//! Daemon - the control cycle and its scheduler
//!
//! One cycle runs at a time: authenticate, load or discover the valve
//! directory, poll levels, aggregate, step the controller and hand the
//! setpoint to the gateway. The scheduler sleeps a poll interval between
//! cycles and only observes shutdown while sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::config::{Config, ConfigStore};
use crate::control::{self, ControllerState};
use crate::demand::weather::{self, WeatherStation};
use crate::demand::{self, DemandSnapshot, WeatherInputs};
use crate::directory::{self, DeviceDirectory, DirectoryStore};
use crate::gateway::GatewayAdapter;
use crate::hub::{HubClient, Session};
use crate::status::{AlwaysConnected, Connectivity, CycleStatus, StatusBoard};
use crate::{Error, Result};

/// Where the control cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Authenticating,
    Discovering,
    Polling,
    Controlling,
    Dispatching,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Discovering => write!(f, "discovering"),
            Self::Polling => write!(f, "polling"),
            Self::Controlling => write!(f, "controlling"),
            Self::Dispatching => write!(f, "dispatching"),
        }
    }
}

/// Result of one cycle that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Cycle ran to the gateway
    Completed {
        demand: DemandSnapshot,
        setpoint: f64,
        /// Snapshot was invalid and the previous output was held
        held: bool,
    },
    /// Connectivity provider reports no network
    Offline,
    /// Credentials were rejected earlier and have not changed since
    AwaitingCredentials,
}

/// One-shot request raised by the UI and consumed by the next cycle
#[derive(Debug, Clone, Default)]
pub struct RequestFlag(Arc<AtomicBool>);

impl RequestFlag {
    /// Ask for the action at the next cycle start
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Hub address and credentials a login attempt was made with
type LoginIdentity = (String, Option<String>, Option<String>);

fn login_identity(config: &Config) -> LoginIdentity {
    (
        config.hub.address.clone(),
        config.hub.username.clone(),
        config.hub.password.clone(),
    )
}

/// The single in-flight control cycle and the state it owns
pub struct ControlLoop {
    config: ConfigStore,
    client: HubClient,
    gateway: Arc<dyn GatewayAdapter>,
    connectivity: Arc<dyn Connectivity>,
    status: StatusBoard,
    rescan: RequestFlag,
    reset: RequestFlag,
    session: Option<Session>,
    rejected_login: Option<LoginIdentity>,
    directory: Option<DeviceDirectory>,
    station: Option<(String, Option<WeatherStation>)>,
    state: ControllerState,
}

impl ControlLoop {
    /// Create a control loop; the controller starts at the fallback setpoint
    pub async fn new(
        config: ConfigStore,
        client: HubClient,
        gateway: Arc<dyn GatewayAdapter>,
    ) -> Self {
        let initial = config.snapshot().await;
        let state = ControllerState::new(&initial.control);
        Self {
            status: StatusBoard::new(state.output),
            config,
            client,
            gateway,
            connectivity: Arc::new(AlwaysConnected),
            rescan: RequestFlag::default(),
            reset: RequestFlag::default(),
            session: None,
            rejected_login: None,
            directory: None,
            station: None,
            state,
        }
    }

    /// Use a specific connectivity provider
    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Status handle for display layers
    #[must_use]
    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Configuration handle for editing layers
    #[must_use]
    pub fn config(&self) -> ConfigStore {
        self.config.clone()
    }

    /// Flag that forces rediscovery at the next cycle
    #[must_use]
    pub fn rescan_flag(&self) -> RequestFlag {
        self.rescan.clone()
    }

    /// Flag that clears integral and derivative history at the next cycle
    #[must_use]
    pub fn reset_flag(&self) -> RequestFlag {
        self.reset.clone()
    }

    #[must_use]
    pub const fn controller(&self) -> &ControllerState {
        &self.state
    }

    #[must_use]
    pub const fn directory(&self) -> Option<&DeviceDirectory> {
        self.directory.as_ref()
    }

    /// Run one full cycle
    ///
    /// Failures are recorded on the status board and the controller output
    /// is left as it was.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the cycle; `Error::Storage` is fatal
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.config.refresh().await;
        let config = self.config.snapshot().await;

        match self.cycle(&config).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(error = %e, "control cycle failed, holding output");
                } else {
                    tracing::error!(error = %e, "control cycle failed, holding output");
                }
                if matches!(e, Error::Auth(_)) {
                    self.session = None;
                    self.rejected_login = Some(login_identity(&config));
                }
                self.status.record_fault(&e).await;
                Err(e)
            }
        }
    }

    /// Close the hub session
    pub async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.client.logout(&mut session).await;
        }
        self.status.set_phase(CyclePhase::Idle).await;
    }

    async fn cycle(&mut self, config: &Config) -> Result<CycleOutcome> {
        self.apply_config_changes(config).await;

        if self.reset.take() {
            tracing::info!("controller history reset");
            self.state = self.state.reset();
        }

        let store = DirectoryStore::new(config.directory_path());
        if self.rescan.take() {
            tracing::info!("rescan requested");
            self.directory = None;
            self.station = None;
            if let Err(e) = store.invalidate() {
                self.rescan.request();
                return Err(e);
            }
        }

        if !self.connectivity.is_connected() {
            tracing::debug!("network down, skipping cycle");
            self.status.set_offline().await;
            return Ok(CycleOutcome::Offline);
        }

        if self.rejected_login.as_ref() == Some(&login_identity(config)) {
            return Ok(CycleOutcome::AwaitingCredentials);
        }

        // Authenticating
        self.status.set_phase(CyclePhase::Authenticating).await;
        if self.session.is_none() {
            let session = self
                .client
                .login(
                    &config.hub.address,
                    config.hub.username.as_deref(),
                    config.hub.password.as_deref(),
                )
                .await?;
            self.session = Some(session);
        }

        // Discovering
        if self.directory.is_none() {
            self.status.set_phase(CyclePhase::Discovering).await;
            self.directory = Some(self.load_or_discover(config, &store).await?);
        }

        // Polling
        self.status.set_phase(CyclePhase::Polling).await;
        let (Some(session), Some(directory)) = (self.session.as_mut(), self.directory.as_ref())
        else {
            return Err(Error::Session("session lost during cycle".to_string()));
        };
        let readings = demand::poll(&self.client, session, directory).await?;
        let directory_size = directory.len();
        let weather = self.weather(config).await;
        let snapshot = demand::aggregate(&readings, Utc::now());

        // Controlling
        self.status.set_phase(CyclePhase::Controlling).await;
        let elapsed = elapsed_seconds(self.state.last_run_at, snapshot.computed_at);
        let (state, setpoint) = control::step(&self.state, &snapshot, &weather, config, elapsed);
        let held = !snapshot.is_valid();
        if held {
            tracing::warn!(polled = snapshot.polled, "no valve reported a level, holding output");
        }
        self.state = state;

        // Dispatching
        self.status.set_phase(CyclePhase::Dispatching).await;
        if let Err(e) = self.gateway.deliver_setpoint(setpoint).await {
            tracing::warn!(gateway = self.gateway.name(), error = %e, "setpoint delivery failed");
        }

        tracing::info!(
            valves = snapshot.count,
            polled = snapshot.polled,
            max = snapshot.max_percent,
            avg = snapshot.average_percent,
            room = ?snapshot.max_room,
            setpoint,
            "cycle complete"
        );

        self.status
            .record_cycle(CycleStatus {
                demand: snapshot.clone(),
                setpoint,
                weather,
                directory_size,
                finished_at: Utc::now(),
                network_address: self.connectivity.address(),
            })
            .await;

        Ok(CycleOutcome::Completed {
            demand: snapshot,
            setpoint,
            held,
        })
    }

    /// Drop cached state that no longer matches the configuration
    async fn apply_config_changes(&mut self, config: &Config) {
        if self
            .rejected_login
            .as_ref()
            .is_some_and(|id| *id != login_identity(config))
        {
            tracing::info!("hub credentials changed, retrying login");
            self.rejected_login = None;
        }

        let stale_session = self.session.as_ref().is_some_and(|s| {
            !s.matches(
                &config.hub.address,
                config.hub.username.as_deref().unwrap_or_default(),
                config.hub.password.as_deref().unwrap_or_default(),
            )
        });
        if stale_session {
            tracing::info!("hub settings changed, closing session");
            if let Some(mut session) = self.session.take() {
                self.client.logout(&mut session).await;
            }
            self.directory = None;
            self.station = None;
        }

        if self
            .directory
            .as_ref()
            .is_some_and(|d| !d.is_valid_for(&config.hub.valve_device_type))
        {
            tracing::info!(
                device_type = %config.hub.valve_device_type,
                "valve device type changed, rediscovering"
            );
            self.directory = None;
        }
    }

    /// Trust the persisted directory if it matches, otherwise discover and persist
    async fn load_or_discover(
        &mut self,
        config: &Config,
        store: &DirectoryStore,
    ) -> Result<DeviceDirectory> {
        let device_type = &config.hub.valve_device_type;

        match store.load() {
            Ok(Some(dir)) if dir.is_valid_for(device_type) => {
                tracing::info!(devices = dir.len(), "using persisted device directory");
                return Ok(dir);
            }
            Ok(Some(dir)) => {
                tracing::info!(
                    persisted = %dir.device_type,
                    configured = %device_type,
                    "persisted directory built for another device type"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "cannot read persisted directory"),
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Session("no session for discovery".to_string()))?;
        let dir = directory::discover(&self.client, session, device_type).await?;
        store.save(&dir)?;
        Ok(dir)
    }

    /// Current weather inputs; lookup failures leave fields absent
    async fn weather(&mut self, config: &Config) -> WeatherInputs {
        let overrides = &config.weather;
        let fully_overridden = overrides.outdoor_temp.is_some()
            && overrides.wind_speed.is_some()
            && overrides.illumination.is_some();

        let (Some(device_type), false, Some(session)) = (
            config.hub.weather_device_type.as_deref(),
            fully_overridden,
            self.session.as_mut(),
        ) else {
            return WeatherInputs::default().with_overrides(overrides);
        };

        if self.station.as_ref().is_none_or(|(t, _)| t != device_type) {
            match weather::find_station(&self.client, session, device_type).await {
                Ok(station) => self.station = Some((device_type.to_string(), station)),
                Err(e) => tracing::warn!(error = %e, "weather station lookup failed"),
            }
        }

        let measured = match &self.station {
            Some((_, Some(station))) => weather::read_station(&self.client, session, station).await,
            _ => WeatherInputs::default(),
        };
        measured.with_overrides(overrides)
    }
}

/// Seconds since the controller last ran, zero on the first run
#[allow(clippy::cast_precision_loss)]
fn elapsed_seconds(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    last.map_or(0.0, |last| {
        ((now - last).num_milliseconds() as f64 / 1000.0).max(0.0)
    })
}

/// The heatpilot daemon - runs control cycles until interrupted
pub struct Daemon {
    control: ControlLoop,
}

impl Daemon {
    /// Create a daemon talking HTTP to the configured hub
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub async fn new(config: ConfigStore, gateway: Arc<dyn GatewayAdapter>) -> Result<Self> {
        let timeout = config.snapshot().await.hub.request_timeout;
        let client = HubClient::http(timeout)?;
        Ok(Self::with_loop(ControlLoop::new(config, client, gateway).await))
    }

    /// Wrap an already assembled control loop
    #[must_use]
    pub const fn with_loop(control: ControlLoop) -> Self {
        Self { control }
    }

    /// Status handle for display layers
    #[must_use]
    pub fn status(&self) -> StatusBoard {
        self.control.status()
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the device directory cannot be persisted
    pub async fn run(mut self) -> Result<()> {
        let config = self.control.config.snapshot().await;
        tracing::info!(
            hub = %config.hub.address,
            device_type = %config.hub.valve_device_type,
            interval_secs = config.control.poll_interval.as_secs(),
            "daemon running"
        );

        // Set up shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        loop {
            if let Err(e) = self.control.run_cycle().await
                && e.is_fatal()
            {
                tracing::error!(error = %e, "unrecoverable storage failure");
                self.control.shutdown().await;
                return Err(e);
            }

            let interval = self.control.config.snapshot().await.control.poll_interval;
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                () = tokio::time::sleep(interval) => {}
            }
        }

        self.control.shutdown().await;
        Ok(())
    }
}
