//! TOML configuration file loading
//!
//! Supports `~/.config/heatpilot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct HeatpilotConfigFile {
    /// Hub connection
    #[serde(default)]
    pub hub: HubFileConfig,

    /// WiFi credentials handed to the connectivity provider
    #[serde(default)]
    pub wifi: WifiFileConfig,

    /// Controller tuning and bounds
    #[serde(default)]
    pub control: ControlFileConfig,

    /// Weather feed-forward coefficients
    #[serde(default)]
    pub feedforward: FeedForwardFileConfig,

    /// Static weather inputs, override the hub weather station
    #[serde(default)]
    pub weather: WeatherFileConfig,

    /// Data directory (device directory cache)
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Hub connection settings
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct HubFileConfig {
    /// Hub host or IP (e.g. "192.168.1.20")
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Device type substring of the radiator valves (e.g. "HmIP-eTRV")
    pub valve_device_type: Option<String>,

    /// Device type of the weather station (e.g. "HmIP-SWO")
    pub weather_device_type: Option<String>,

    /// Per-call timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct WifiFileConfig {
    pub ssid: Option<String>,
    pub password: Option<String>,
}

/// Controller settings
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ControlFileConfig {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,

    /// Valve opening (percent) the loop regulates the most open valve to
    pub demand_target: Option<f64>,

    /// Lowest boiler setpoint ever emitted (°C)
    pub setpoint_min: Option<f64>,

    /// Highest boiler setpoint ever emitted (°C)
    pub setpoint_max: Option<f64>,

    /// Setpoint used before the first successful cycle (°C)
    pub fallback_setpoint: Option<f64>,

    /// Largest contribution the integral term may make (°C)
    pub integral_range: Option<f64>,

    /// Valve openings at or below this count as closed
    pub valve_min: Option<f64>,

    /// Valve openings at or above this count as fully open
    pub valve_max: Option<f64>,

    /// Seconds between control cycles
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FeedForwardFileConfig {
    pub base_boiler_temp: Option<f64>,
    pub reference_outdoor_temp: Option<f64>,
    pub temp_coeff: Option<f64>,
    pub wind_coeff: Option<f64>,
    pub wind_chill_coeff: Option<f64>,
    pub sun_coeff: Option<f64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct WeatherFileConfig {
    /// Outdoor temperature (°C)
    pub outdoor_temp: Option<f64>,
    /// Wind speed (km/h)
    pub wind_speed: Option<f64>,
    /// Illumination (lux)
    pub illumination: Option<f64>,
}

/// Load the TOML config file from `path`, or the standard path when `None`
///
/// Returns `HeatpilotConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(path: Option<&Path>) -> HeatpilotConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return HeatpilotConfigFile::default();
    };

    if !path.exists() {
        return HeatpilotConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            HeatpilotConfigFile::default()
        }
    }
}

/// Read and parse the TOML config file at `path`
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read and `Error::Toml` if it
/// does not parse
pub fn read_config_file(path: &Path) -> Result<HeatpilotConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/heatpilot/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("heatpilot").join("config.toml"))
}
