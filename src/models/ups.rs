// UPS (apcupsd) model

use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct UpsInfo {
    pub status: String,
    pub model: String,
    pub battery_charge_percent: Option<f64>,
    pub load_percent: Option<f64>,
    pub time_left_mins: Option<u32>,
    pub nominal_power_watts: Option<u32>,
    /// nominal power scaled by load.
    pub current_power_watts: Option<f64>,
    pub line_voltage: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub load_apparent_va: Option<f64>,
    pub power_factor: Option<f64>,
}
