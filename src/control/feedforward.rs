//! Weather-compensated baseline for the boiler setpoint
//!
//! The feedback terms only trim around this baseline, so the loop starts
//! from a sensible boiler temperature for the current outdoor conditions.

use crate::config::FeedForwardConfig;
use crate::demand::WeatherInputs;

/// Boiler temperature (°C) expected to satisfy the house in this weather
///
/// Missing inputs are neutral: outdoor temperature equal to the reference,
/// no wind and no sun, which yields exactly `base_boiler_temp`.
#[must_use]
pub fn baseline(params: &FeedForwardConfig, weather: &WeatherInputs) -> f64 {
    let outdoor = weather
        .outdoor_temp
        .unwrap_or(params.reference_outdoor_temp);
    let wind = weather.wind_speed.unwrap_or(0.0).max(0.0);
    let sun = weather.illumination.unwrap_or(0.0).max(0.0);

    let diff = params.reference_outdoor_temp - outdoor;
    let temp_term = diff * params.temp_coeff;

    // Wind only bites harder when it is colder than the reference
    let chill = if diff > 0.0 {
        diff.mul_add(params.wind_chill_coeff, 1.0)
    } else {
        1.0
    };
    let wind_term = wind * params.wind_coeff * chill;

    let sun_term = sun * params.sun_coeff;

    params.base_boiler_temp + temp_term + wind_term - sun_term
}
