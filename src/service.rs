use serde_json::Value;
use tracing::error;

use crate::coordinator::{AccountHandle, Command};
use crate::types::Zone1Mode;
use crate::{Error, Result};

// Names and parameter keys are relied on by existing automations.
pub const SERVICE_SET_TANK_WATER_TEMPERATURE: &str = "set_tank_water_temperature";
pub const SERVICE_SET_FORCED_HOT_WATER: &str = "set_forced_hot_water";
pub const SERVICE_SET_OPERATION_MODE_ZONE1: &str = "set_operation_mode_zone1";

pub const SERVICES: [&str; 3] = [
    SERVICE_SET_TANK_WATER_TEMPERATURE,
    SERVICE_SET_FORCED_HOT_WATER,
    SERVICE_SET_OPERATION_MODE_ZONE1,
];

/// Validate a call and queue its command. Invalid calls are logged and
/// dropped without any remote request.
pub fn call_service(handle: &AccountHandle, service: &str, data: &Value) {
    match parse_service_call(service, data) {
        Ok(command) => handle.send(command),
        Err(e) => error!(service, error = %e, "service call dropped"),
    }
}

pub fn parse_service_call(service: &str, data: &Value) -> Result<Command> {
    match service {
        SERVICE_SET_TANK_WATER_TEMPERATURE => {
            let (Some(unit_id), Some(temperature)) = (unit_id(data), data.get("temperature")) else {
                return Err(missing(service, "temperature"));
            };
            Ok(Command::SetTankWaterTemperature {
                unit_id,
                temperature: integer(temperature, "temperature")?,
            })
        }
        SERVICE_SET_FORCED_HOT_WATER => {
            let (Some(unit_id), Some(enabled)) = (unit_id(data), data.get("enabled")) else {
                return Err(missing(service, "enabled"));
            };
            Ok(Command::SetForcedHotWater {
                unit_id,
                enabled: boolean(enabled)?,
            })
        }
        SERVICE_SET_OPERATION_MODE_ZONE1 => {
            let (Some(unit_id), Some(mode)) = (unit_id(data), data.get("mode")) else {
                return Err(missing(service, "mode"));
            };
            let mode = mode
                .as_str()
                .and_then(Zone1Mode::from_api_str)
                .ok_or_else(|| Error::Validation(format!("unknown zone 1 mode: {mode}")))?;
            Ok(Command::SetOperationModeZone1 { unit_id, mode })
        }
        other => Err(Error::Validation(format!("unknown service: {other}"))),
    }
}

fn missing(service: &str, param: &str) -> Error {
    Error::Validation(format!("{service} requires unit_id and {param}"))
}

fn unit_id(data: &Value) -> Option<String> {
    match data.get("unit_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Truncates toward zero.
fn integer(value: &Value, name: &str) -> Result<i64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n.is_finite() => Ok(n.trunc() as i64),
        _ => Err(Error::Validation(format!("{name} is not a number: {value}"))),
    }
}

fn boolean(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(true),
            "false" | "off" | "0" => Ok(false),
            _ => Err(Error::Validation(format!("enabled is not a boolean: {s}"))),
        },
        other => Err(Error::Validation(format!("enabled is not a boolean: {other}"))),
    }
}
