//! Heatpilot - boiler setpoint control from radiator valve demand
//!
//! This library provides the demand-acquisition and control loop:
//! - Session-managed JSON-RPC client for Homematic-style hubs
//! - Valve discovery with a persisted device directory
//! - Demand polling and aggregation
//! - Weather feed-forward plus PID feedback controller
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Hub (JSON-RPC/HTTP)                  │
//! │   Session  │  Device  │  Room  │  Interface.getValue │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Control Loop                        │
//! │  Directory → Poller → Aggregator → Controller       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │      Gateway Adapter  │  Status Board (UI/LED)       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod control;
pub mod daemon;
pub mod demand;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod status;

pub use config::{Config, ConfigStore};
pub use control::ControllerState;
pub use daemon::{ControlLoop, CycleOutcome, CyclePhase, Daemon, RequestFlag};
pub use demand::{DemandSnapshot, LevelReading, WeatherInputs};
pub use directory::{DeviceDirectory, DirectoryStore, ValveDevice};
pub use error::{Error, Result};
pub use gateway::{GatewayAdapter, LogGateway};
pub use hub::{HubClient, Session};
pub use status::{ConnectionStatus, Connectivity, StatusBoard, StatusSnapshot};
