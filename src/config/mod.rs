//! Configuration management for heatpilot
//!
//! Values resolve as env > config file > defaults. The resolved [`Config`]
//! lives in a [`ConfigStore`] so the control loop can pick up edits made by
//! an operator between cycles without a restart.

pub mod file;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, RwLock};

use crate::{Error, Result};

use file::HeatpilotConfigFile;

/// Default radiator valve device type
pub const DEFAULT_VALVE_DEVICE_TYPE: &str = "HmIP-eTRV";

/// Default hub request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default control cycle interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Heatpilot configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Hub connection
    pub hub: HubConfig,

    /// WiFi credentials for the connectivity provider
    pub wifi: WifiConfig,

    /// Controller tuning and safe bounds
    pub control: ControlConfig,

    /// Weather feed-forward coefficients
    pub feedforward: FeedForwardConfig,

    /// Static weather inputs
    pub weather: WeatherOverrides,

    /// Path to data directory (device directory cache)
    pub data_dir: PathBuf,
}

/// Hub connection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Hub host or IP, without scheme
    pub address: String,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Device type substring matched during discovery
    pub valve_device_type: String,

    /// Weather station device type; `None` disables the station lookup
    pub weather_device_type: Option<String>,

    /// Bound applied to every hub call
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiConfig {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,

    /// Valve opening (percent) the most open valve is regulated towards
    pub demand_target: f64,

    /// Safe boiler setpoint band (°C)
    pub setpoint_min: f64,
    pub setpoint_max: f64,

    /// Output before the first completed cycle (°C)
    pub fallback_setpoint: f64,

    /// Largest contribution the integral term may make (°C)
    pub integral_range: f64,

    /// Valve scaling range; `[0, 100]` leaves readings untouched
    pub valve_min: f64,
    pub valve_max: f64,

    /// Time between control cycles
    pub poll_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            kp: 0.5,
            ki: 0.0005,
            kd: 0.02,
            demand_target: 10.0,
            setpoint_min: 35.0,
            setpoint_max: 72.0,
            fallback_setpoint: 55.0,
            integral_range: 5.0,
            valve_min: 0.0,
            valve_max: 100.0,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Weather feed-forward coefficients
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Boiler temperature needed at the reference outdoor temperature (°C)
    pub base_boiler_temp: f64,
    pub reference_outdoor_temp: f64,
    /// °C boiler per °C below reference
    pub temp_coeff: f64,
    /// °C boiler per km/h wind
    pub wind_coeff: f64,
    /// Extra wind weight per °C below reference
    pub wind_chill_coeff: f64,
    /// °C boiler reduction per lux
    pub sun_coeff: f64,
}

impl Default for FeedForwardConfig {
    fn default() -> Self {
        Self {
            base_boiler_temp: 41.0,
            reference_outdoor_temp: 10.0,
            temp_coeff: 1.1,
            wind_coeff: 0.1,
            wind_chill_coeff: 0.008,
            sun_coeff: 0.0001,
        }
    }
}

/// Weather values that take precedence over the hub weather station
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherOverrides {
    pub outdoor_temp: Option<f64>,
    pub wind_speed: Option<f64>,
    pub illumination: Option<f64>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::from_layers(fc, |key| std::env::var(key).ok())
    }

    /// Load configuration from an existing file, failing on read or parse errors
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` or `Error::Toml` for an unreadable or malformed
    /// file, or a config error if the resolved configuration is invalid
    pub fn load_strict(path: &Path) -> Result<Self> {
        let fc = file::read_config_file(path)?;
        Self::from_layers(fc, |key| std::env::var(key).ok())
    }

    /// Resolve a configuration from a file overlay and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn from_layers<F>(fc: HeatpilotConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let control_defaults = ControlConfig::default();
        let ff_defaults = FeedForwardConfig::default();

        let hub = HubConfig {
            address: env("HEATPILOT_HUB_ADDRESS")
                .or(fc.hub.address)
                .unwrap_or_default(),
            username: env("HEATPILOT_HUB_USER").or(fc.hub.username),
            password: env("HEATPILOT_HUB_PASSWORD").or(fc.hub.password),
            valve_device_type: env("HEATPILOT_VALVE_TYPE")
                .or(fc.hub.valve_device_type)
                .unwrap_or_else(|| DEFAULT_VALVE_DEVICE_TYPE.to_string()),
            weather_device_type: env("HEATPILOT_WEATHER_TYPE")
                .or(fc.hub.weather_device_type)
                .filter(|s| !s.is_empty()),
            request_timeout: fc
                .hub
                .request_timeout_secs
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
        };

        let poll_interval = env("HEATPILOT_POLL_INTERVAL")
            .and_then(|s| s.parse().ok())
            .or(fc.control.poll_interval_secs)
            .map_or(control_defaults.poll_interval, Duration::from_secs);

        let control = ControlConfig {
            kp: fc.control.kp.unwrap_or(control_defaults.kp),
            ki: fc.control.ki.unwrap_or(control_defaults.ki),
            kd: fc.control.kd.unwrap_or(control_defaults.kd),
            demand_target: fc
                .control
                .demand_target
                .unwrap_or(control_defaults.demand_target),
            setpoint_min: fc
                .control
                .setpoint_min
                .unwrap_or(control_defaults.setpoint_min),
            setpoint_max: fc
                .control
                .setpoint_max
                .unwrap_or(control_defaults.setpoint_max),
            fallback_setpoint: fc
                .control
                .fallback_setpoint
                .unwrap_or(control_defaults.fallback_setpoint),
            integral_range: fc
                .control
                .integral_range
                .unwrap_or(control_defaults.integral_range),
            valve_min: fc.control.valve_min.unwrap_or(control_defaults.valve_min),
            valve_max: fc.control.valve_max.unwrap_or(control_defaults.valve_max),
            poll_interval,
        };

        let feedforward = FeedForwardConfig {
            base_boiler_temp: fc
                .feedforward
                .base_boiler_temp
                .unwrap_or(ff_defaults.base_boiler_temp),
            reference_outdoor_temp: fc
                .feedforward
                .reference_outdoor_temp
                .unwrap_or(ff_defaults.reference_outdoor_temp),
            temp_coeff: fc.feedforward.temp_coeff.unwrap_or(ff_defaults.temp_coeff),
            wind_coeff: fc.feedforward.wind_coeff.unwrap_or(ff_defaults.wind_coeff),
            wind_chill_coeff: fc
                .feedforward
                .wind_chill_coeff
                .unwrap_or(ff_defaults.wind_chill_coeff),
            sun_coeff: fc.feedforward.sun_coeff.unwrap_or(ff_defaults.sun_coeff),
        };

        let data_dir = env("HEATPILOT_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let config = Self {
            hub,
            wifi: WifiConfig {
                ssid: fc.wifi.ssid,
                password: fc.wifi.password,
            },
            control,
            feedforward,
            weather: WeatherOverrides {
                outdoor_temp: fc.weather.outdoor_temp,
                wind_speed: fc.weather.wind_speed,
                illumination: fc.weather.illumination,
            },
            data_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check bounds and gains for values the controller cannot work with
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first offending field
    pub fn validate(&self) -> Result<()> {
        let c = &self.control;

        for (name, value) in [("kp", c.kp), ("ki", c.ki), ("kd", c.kd)] {
            if !value.is_finite() {
                return Err(Error::Config(format!("{name} must be a finite number")));
            }
        }

        if !(c.setpoint_min.is_finite() && c.setpoint_max.is_finite())
            || c.setpoint_min > c.setpoint_max
        {
            return Err(Error::Config(format!(
                "setpoint bounds inverted or not finite: [{}, {}]",
                c.setpoint_min, c.setpoint_max
            )));
        }

        if !(c.valve_min.is_finite() && c.valve_max.is_finite()) || c.valve_min >= c.valve_max {
            return Err(Error::Config(format!(
                "valve scaling range must be increasing: [{}, {}]",
                c.valve_min, c.valve_max
            )));
        }

        if !c.demand_target.is_finite() || !c.integral_range.is_finite() || c.integral_range < 0.0
        {
            return Err(Error::Config(
                "demand target and integral range must be finite, integral range non-negative"
                    .to_string(),
            ));
        }

        if c.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }

        if self.hub.valve_device_type.trim().is_empty() {
            return Err(Error::Config("valve device type must not be empty".to_string()));
        }

        if self.hub.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Path of the persisted device directory
    #[must_use]
    pub fn directory_path(&self) -> PathBuf {
        self.data_dir.join(crate::directory::DIRECTORY_FILE_NAME)
    }

    /// Render the effective configuration as TOML with secrets masked
    ///
    /// # Errors
    ///
    /// Returns error if TOML serialization fails
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "********".to_string());

        let fc = HeatpilotConfigFile {
            hub: file::HubFileConfig {
                address: Some(self.hub.address.clone()),
                username: self.hub.username.clone(),
                password: mask(&self.hub.password),
                valve_device_type: Some(self.hub.valve_device_type.clone()),
                weather_device_type: self.hub.weather_device_type.clone(),
                request_timeout_secs: Some(self.hub.request_timeout.as_secs()),
            },
            wifi: file::WifiFileConfig {
                ssid: self.wifi.ssid.clone(),
                password: mask(&self.wifi.password),
            },
            control: file::ControlFileConfig {
                kp: Some(self.control.kp),
                ki: Some(self.control.ki),
                kd: Some(self.control.kd),
                demand_target: Some(self.control.demand_target),
                setpoint_min: Some(self.control.setpoint_min),
                setpoint_max: Some(self.control.setpoint_max),
                fallback_setpoint: Some(self.control.fallback_setpoint),
                integral_range: Some(self.control.integral_range),
                valve_min: Some(self.control.valve_min),
                valve_max: Some(self.control.valve_max),
                poll_interval_secs: Some(self.control.poll_interval.as_secs()),
            },
            feedforward: file::FeedForwardFileConfig {
                base_boiler_temp: Some(self.feedforward.base_boiler_temp),
                reference_outdoor_temp: Some(self.feedforward.reference_outdoor_temp),
                temp_coeff: Some(self.feedforward.temp_coeff),
                wind_coeff: Some(self.feedforward.wind_coeff),
                wind_chill_coeff: Some(self.feedforward.wind_chill_coeff),
                sun_coeff: Some(self.feedforward.sun_coeff),
            },
            weather: file::WeatherFileConfig {
                outdoor_temp: self.weather.outdoor_temp,
                wind_speed: self.weather.wind_speed,
                illumination: self.weather.illumination,
            },
            data_dir: Some(self.data_dir.display().to_string()),
        };

        toml::to_string_pretty(&fc).map_err(|e| Error::Config(format!("render failed: {e}")))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub: HubConfig {
                address: String::new(),
                username: None,
                password: None,
                valve_device_type: DEFAULT_VALVE_DEVICE_TYPE.to_string(),
                weather_device_type: None,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            wifi: WifiConfig::default(),
            control: ControlConfig::default(),
            feedforward: FeedForwardConfig::default(),
            weather: WeatherOverrides::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Default data directory: `~/.local/share/heatpilot/`
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/heatpilot"),
        |d| d.data_dir().join("heatpilot"),
    )
}

/// Shared, hot-swappable configuration handle
///
/// The control loop takes a [`snapshot`](Self::snapshot) at every cycle
/// boundary; operators edit through [`replace`](Self::replace) or by
/// changing the config file, which [`refresh`](Self::refresh) picks up.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Config>>,
    source: Option<PathBuf>,
    modified: Arc<Mutex<Option<SystemTime>>>,
}

impl ConfigStore {
    /// Wrap an already resolved configuration with no backing file
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(config)),
            source: None,
            modified: Arc::new(Mutex::new(None)),
        }
    }

    /// Load configuration and remember the file for later refreshes
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let config = Config::load(path)?;
        let source = path.map(Path::to_path_buf).or_else(file::config_file_path);
        let modified = source.as_deref().and_then(modified_at);

        Ok(Self {
            current: Arc::new(RwLock::new(config)),
            source,
            modified: Arc::new(Mutex::new(modified)),
        })
    }

    /// Copy of the current configuration
    pub async fn snapshot(&self) -> Config {
        self.current.read().await.clone()
    }

    /// Swap in an edited configuration, effective from the next cycle
    ///
    /// # Errors
    ///
    /// Returns error if the new configuration is invalid; the old one stays active
    pub async fn replace(&self, config: Config) -> Result<()> {
        config.validate()?;
        *self.current.write().await = config;
        tracing::info!("configuration replaced");
        Ok(())
    }

    /// Reload from the backing file if it changed since the last load
    ///
    /// Returns whether a new configuration was installed. An invalid file
    /// keeps the previous configuration active.
    pub async fn refresh(&self) -> bool {
        let Some(path) = self.source.as_deref() else {
            return false;
        };

        let mtime = modified_at(path);
        let mut last = self.modified.lock().await;
        if mtime == *last {
            return false;
        }
        *last = mtime;

        match Config::load_strict(path) {
            Ok(config) => {
                let mut current = self.current.write().await;
                if *current == config {
                    return false;
                }
                *current = config;
                tracing::info!(path = %path.display(), "configuration reloaded");
                true
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "ignoring invalid config file change"
                );
                false
            }
        }
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
