//! Read-only status shared with display and LED layers
//!
//! The control loop is the only writer. Readers get owned copies and never
//! see a half-updated cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::Error;
use crate::daemon::CyclePhase;
use crate::demand::{DemandSnapshot, WeatherInputs};

/// Network-level status of the controller
pub trait Connectivity: Send + Sync {
    /// Whether the link to the hub's network is up
    fn is_connected(&self) -> bool;

    /// Current local address, if known
    fn address(&self) -> Option<String>;
}

/// Connectivity provider for hosts whose network is managed elsewhere
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConnected;

impl Connectivity for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }

    fn address(&self) -> Option<String> {
        None
    }
}

/// Hub connection state as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No cycle has completed yet
    Starting,
    /// Last cycle completed
    Online,
    /// Connectivity provider reports no network
    Offline,
    /// Hub unreachable or timing out
    HubUnreachable,
    /// Hub rejected the credentials; persists until the configuration changes
    AuthFailed,
    /// Session kept expiring through a re-login
    SessionFault,
    /// Hub answered with something unusable
    ProtocolFault(String),
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::HubUnreachable => write!(f, "hub unreachable"),
            Self::AuthFailed => write!(f, "login rejected"),
            Self::SessionFault => write!(f, "session fault"),
            Self::ProtocolFault(msg) => write!(f, "protocol fault ({msg})"),
        }
    }
}

impl ConnectionStatus {
    /// Status to show after a cycle failed with `error`
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Network(_) | Error::Http(_) => Self::HubUnreachable,
            Error::Auth(_) => Self::AuthFailed,
            Error::Session(_) => Self::SessionFault,
            other => Self::ProtocolFault(other.to_string()),
        }
    }

    /// Whether an LED layer should render a fault
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        !matches!(self, Self::Starting | Self::Online)
    }
}

/// Point-in-time copy of everything the UI renders
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub connection: ConnectionStatus,
    pub phase: CyclePhase,
    pub network_faults: u64,
    pub session_faults: u64,
    pub auth_faults: u64,
    pub last_error: Option<String>,
    /// Last valid or invalid demand snapshot
    pub demand: Option<DemandSnapshot>,
    /// Current controller output (°C)
    pub setpoint: f64,
    /// Room with the most open valve
    pub top_room: Option<String>,
    pub weather: WeatherInputs,
    pub directory_size: Option<usize>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub network_address: Option<String>,
}

impl StatusSnapshot {
    fn new(setpoint: f64) -> Self {
        Self {
            connection: ConnectionStatus::Starting,
            phase: CyclePhase::Idle,
            network_faults: 0,
            session_faults: 0,
            auth_faults: 0,
            last_error: None,
            demand: None,
            setpoint,
            top_room: None,
            weather: WeatherInputs::default(),
            directory_size: None,
            last_cycle_at: None,
            network_address: None,
        }
    }
}

/// Shared status handle
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new(initial_setpoint: f64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusSnapshot::new(initial_setpoint))),
        }
    }

    /// Copy of the current status
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }

    pub(crate) async fn set_phase(&self, phase: CyclePhase) {
        self.inner.write().await.phase = phase;
    }

    pub(crate) async fn set_offline(&self) {
        let mut s = self.inner.write().await;
        s.connection = ConnectionStatus::Offline;
        s.network_address = None;
    }

    /// Record a failed cycle and bump the matching fault counter
    pub(crate) async fn record_fault(&self, error: &Error) {
        let mut s = self.inner.write().await;
        match error {
            Error::Network(_) | Error::Http(_) => s.network_faults += 1,
            Error::Session(_) => s.session_faults += 1,
            Error::Auth(_) => s.auth_faults += 1,
            _ => {}
        }
        s.connection = ConnectionStatus::from_error(error);
        s.last_error = Some(error.to_string());
        s.phase = CyclePhase::Idle;
    }

    /// Record a completed cycle
    pub(crate) async fn record_cycle(&self, report: CycleStatus) {
        let mut s = self.inner.write().await;
        s.connection = ConnectionStatus::Online;
        s.last_error = None;
        s.phase = CyclePhase::Idle;
        s.top_room = report.demand.max_room.clone();
        s.demand = Some(report.demand);
        s.setpoint = report.setpoint;
        s.weather = report.weather;
        s.directory_size = Some(report.directory_size);
        s.last_cycle_at = Some(report.finished_at);
        s.network_address = report.network_address;
    }
}

/// What a completed cycle reports to the board
#[derive(Debug, Clone)]
pub(crate) struct CycleStatus {
    pub demand: DemandSnapshot,
    pub setpoint: f64,
    pub weather: WeatherInputs,
    pub directory_size: usize,
    pub finished_at: DateTime<Utc>,
    pub network_address: Option<String>,
}
