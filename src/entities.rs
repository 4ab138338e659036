use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::coordinator::{AccountHandle, Command};
use crate::types::{Capabilities, Device, HvacMode, UnitType, Zone1Mode};

pub const MANUFACTURER: &str = "Mitsubishi Electric";
pub const MODEL: &str = "ATW Heat Pump";

const DEFAULT_MIN_TEMPERATURE: f64 = 20.0;
const DEFAULT_MAX_TEMPERATURE: f64 = 50.0;
const DEFAULT_MIN_TANK_TEMPERATURE: f64 = 30.0;
const DEFAULT_MAX_TANK_TEMPERATURE: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl DeviceInfo {
    fn for_device(device: &Device) -> Self {
        Self {
            identifier: device.id.clone(),
            name: device.name().to_string(),
            manufacturer: MANUFACTURER,
            model: MODEL,
        }
    }
}

/// Which account and unit an adapter reads. Values always come from the
/// snapshot current at the time of the call.
#[derive(Clone)]
struct UnitRef {
    handle: AccountHandle,
    device_id: String,
    info: DeviceInfo,
}

impl UnitRef {
    fn new(handle: &AccountHandle, device: &Device) -> Self {
        Self {
            handle: handle.clone(),
            device_id: device.id.clone(),
            info: DeviceInfo::for_device(device),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Device) -> Option<T>) -> Option<T> {
        let snapshot = self.handle.snapshot()?;
        snapshot.device(&self.device_id).and_then(f)
    }

    fn available(&self) -> bool {
        self.handle.last_update_success() && self.read(|d| Some(d.is_connected)).unwrap_or(false)
    }
}

/// Main thermostat of an air-to-water unit (zone 1).
pub struct Climate {
    unit: UnitRef,
    name: String,
    min_temp: f64,
    max_temp: f64,
    step: f64,
}

impl Climate {
    pub fn new(handle: &AccountHandle, device: &Device) -> Self {
        let caps = &device.capabilities;
        Self {
            unit: UnitRef::new(handle, device),
            name: device.name().to_string(),
            min_temp: caps.min_set_temperature().unwrap_or(DEFAULT_MIN_TEMPERATURE),
            max_temp: caps.max_set_temperature().unwrap_or(DEFAULT_MAX_TEMPERATURE),
            step: climate_step(caps),
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_climate", self.unit.device_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.unit.info
    }

    pub fn available(&self) -> bool {
        self.unit.available()
    }

    pub fn min_temp(&self) -> f64 {
        self.min_temp
    }

    pub fn max_temp(&self) -> f64 {
        self.max_temp
    }

    pub fn target_temperature_step(&self) -> f64 {
        self.step
    }

    pub fn hvac_modes(&self) -> [HvacMode; 2] {
        [HvacMode::Heat, HvacMode::Off]
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.unit.read(Device::room_temperature)
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.unit.read(Device::target_temperature)
    }

    pub fn hvac_mode(&self) -> Option<HvacMode> {
        self.unit.read(|d| Some(d.hvac_mode()))
    }

    /// Tank readings, zone 1 mode, forced hot water and building name.
    /// Absent settings are omitted.
    pub fn extra_attributes(&self) -> Map<String, Value> {
        self.unit
            .read(|d| {
                let mut attrs = Map::new();
                if let Some(t) = d.tank_water_temperature() {
                    attrs.insert("tank_temperature".into(), t.into());
                }
                if let Some(t) = d.tank_target_temperature() {
                    attrs.insert("tank_target_temperature".into(), t.into());
                }
                if let Some(mode) = d.settings.get("OperationModeZone1") {
                    attrs.insert("zone1_mode".into(), mode.into());
                }
                if let Some(forced) = d.forced_hot_water() {
                    attrs.insert("forced_hot_water".into(), forced.into());
                }
                attrs.insert("building".into(), d.building_name.clone().into());
                Some(attrs)
            })
            .unwrap_or_default()
    }

    /// The service only takes whole degrees; fractions are truncated.
    pub fn set_temperature(&self, temperature: f64) {
        if !temperature.is_finite() {
            error!(unit_id = %self.unit.device_id, temperature, "invalid target temperature");
            return;
        }
        self.unit.handle.send(Command::SetTargetTemperature {
            unit_id: self.unit.device_id.clone(),
            temperature: temperature.trunc() as i64,
        });
    }

    /// Turning on restates the current zone 1 mode so the unit resumes the
    /// strategy it had; heat-by-room-temperature when none is known.
    pub fn set_hvac_mode(&self, mode: HvacMode) {
        let command = match mode {
            HvacMode::Off => Command::SetPower {
                unit_id: self.unit.device_id.clone(),
                on: false,
                zone1: None,
            },
            HvacMode::Heat => {
                let zone1 = self
                    .unit
                    .read(Device::zone1_mode)
                    .unwrap_or(Zone1Mode::HeatRoomTemperature);
                Command::SetPower {
                    unit_id: self.unit.device_id.clone(),
                    on: true,
                    zone1: Some(zone1),
                }
            }
            HvacMode::Cool => {
                error!(unit_id = %self.unit.device_id, "cooling is not supported on this unit");
                return;
            }
        };
        self.unit.handle.send(command);
    }
}

/// Domestic hot water tank target.
pub struct TankTargetNumber {
    unit: UnitRef,
    name: String,
    min_value: f64,
    max_value: f64,
    step: f64,
}

impl TankTargetNumber {
    pub fn new(handle: &AccountHandle, device: &Device) -> Self {
        let caps = &device.capabilities;
        Self {
            unit: UnitRef::new(handle, device),
            name: format!("{} Tank Target", device.name()),
            min_value: caps
                .number("minSetTankTemperature")
                .unwrap_or(DEFAULT_MIN_TANK_TEMPERATURE),
            max_value: caps
                .number("maxSetTankTemperature")
                .unwrap_or(DEFAULT_MAX_TANK_TEMPERATURE),
            step: tank_step(caps),
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_tank_set_temp", self.unit.device_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.unit.info
    }

    pub fn available(&self) -> bool {
        self.unit.available()
    }

    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn value(&self) -> Option<f64> {
        self.unit.read(Device::tank_target_temperature)
    }

    pub fn set_value(&self, value: f64) {
        if !value.is_finite() {
            error!(unit_id = %self.unit.device_id, value, "invalid tank temperature");
            return;
        }
        self.unit.handle.send(Command::SetTankWaterTemperature {
            unit_id: self.unit.device_id.clone(),
            temperature: value.trunc() as i64,
        });
    }
}

pub struct ForcedHotWaterSwitch {
    unit: UnitRef,
    name: String,
}

impl ForcedHotWaterSwitch {
    pub fn new(handle: &AccountHandle, device: &Device) -> Self {
        Self {
            unit: UnitRef::new(handle, device),
            name: format!("{} Forced Hot Water", device.name()),
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_forced_hot_water", self.unit.device_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.unit.info
    }

    pub fn available(&self) -> bool {
        self.unit.available()
    }

    pub fn is_on(&self) -> bool {
        self.unit.read(Device::forced_hot_water).unwrap_or(false)
    }

    pub fn turn_on(&self) {
        self.set(true);
    }

    pub fn turn_off(&self) {
        self.set(false);
    }

    fn set(&self, enabled: bool) {
        self.unit.handle.send(Command::SetForcedHotWater {
            unit_id: self.unit.device_id.clone(),
            enabled,
        });
    }
}

pub struct Zone1ModeSelect {
    unit: UnitRef,
    name: String,
}

impl Zone1ModeSelect {
    pub fn new(handle: &AccountHandle, device: &Device) -> Self {
        Self {
            unit: UnitRef::new(handle, device),
            name: format!("{} Zone 1 Mode", device.name()),
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_zone1_mode", self.unit.device_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.unit.info
    }

    pub fn available(&self) -> bool {
        self.unit.available()
    }

    pub fn options(&self) -> Vec<&'static str> {
        Zone1Mode::ALL.iter().map(Zone1Mode::as_api_str).collect()
    }

    /// Raw value as reported, even if it is not one of `options()`.
    pub fn current_option(&self) -> Option<String> {
        self.unit
            .read(|d| d.settings.get("OperationModeZone1").map(str::to_string))
    }

    pub fn select_option(&self, option: &str) {
        let Some(mode) = Zone1Mode::from_api_str(option) else {
            error!(unit_id = %self.unit.device_id, option, "invalid zone 1 mode");
            return;
        };
        self.unit.handle.send(Command::SetOperationModeZone1 {
            unit_id: self.unit.device_id.clone(),
            mode,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    RoomTemperature,
    TankTemperature,
}

impl SensorKind {
    fn key(self) -> &'static str {
        match self {
            SensorKind::RoomTemperature => "room_temperature",
            SensorKind::TankTemperature => "tank_temperature",
        }
    }

    fn setting(self) -> &'static str {
        match self {
            SensorKind::RoomTemperature => "RoomTemperatureZone1",
            SensorKind::TankTemperature => "TankWaterTemperature",
        }
    }

    fn label(self) -> &'static str {
        match self {
            SensorKind::RoomTemperature => "Room Temperature",
            SensorKind::TankTemperature => "Tank Temperature",
        }
    }
}

/// Celsius measurement read from one setting.
pub struct TemperatureSensor {
    unit: UnitRef,
    kind: SensorKind,
}

impl TemperatureSensor {
    pub fn new(handle: &AccountHandle, device: &Device, kind: SensorKind) -> Self {
        Self {
            unit: UnitRef::new(handle, device),
            kind,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.unit.device_id, self.kind.key())
    }

    pub fn name(&self) -> &'static str {
        self.kind.label()
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.unit.info
    }

    pub fn available(&self) -> bool {
        self.unit.available()
    }

    pub fn native_value(&self) -> Option<f64> {
        self.unit.read(|d| d.settings.number(self.kind.setting()))
    }
}

#[derive(Default)]
pub struct Entities {
    pub climates: Vec<Climate>,
    pub numbers: Vec<TankTargetNumber>,
    pub switches: Vec<ForcedHotWaterSwitch>,
    pub selects: Vec<Zone1ModeSelect>,
    pub sensors: Vec<TemperatureSensor>,
}

impl Entities {
    pub fn len(&self) -> usize {
        self.climates.len()
            + self.numbers.len()
            + self.switches.len()
            + self.selects.len()
            + self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create adapters for every air-to-water unit in the current snapshot.
/// Air-to-air units are tracked in snapshots but get no adapters.
pub fn setup_entities(handle: &AccountHandle) -> Entities {
    let Some(snapshot) = handle.snapshot() else {
        warn!("no snapshot yet, no entities created");
        return Entities::default();
    };

    let mut entities = Entities::default();
    for device in snapshot.devices_of(UnitType::AirToWater) {
        entities.climates.push(Climate::new(handle, device));
        if device.capabilities.has_hot_water() {
            entities.numbers.push(TankTargetNumber::new(handle, device));
        }
        entities.switches.push(ForcedHotWaterSwitch::new(handle, device));
        entities.selects.push(Zone1ModeSelect::new(handle, device));
        for kind in [SensorKind::RoomTemperature, SensorKind::TankTemperature] {
            if device.settings.contains(kind.setting()) {
                entities.sensors.push(TemperatureSensor::new(handle, device, kind));
            }
        }
    }
    entities
}

fn climate_step(caps: &Capabilities) -> f64 {
    if caps.has_half_degrees() { 0.5 } else { 1.0 }
}

fn tank_step(caps: &Capabilities) -> f64 {
    caps.number("temperatureIncrement")
        .filter(|n| n.is_finite())
        .unwrap_or(1.0)
        .max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(value: Value) -> Capabilities {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn climate_step_follows_half_degrees() {
        assert_eq!(climate_step(&caps(json!({"hasHalfDegrees": true}))), 0.5);
        assert_eq!(climate_step(&caps(json!({"hasHalfDegrees": "True"}))), 0.5);
        assert_eq!(climate_step(&caps(json!({"hasHalfDegrees": false}))), 1.0);
        assert_eq!(climate_step(&caps(json!({}))), 1.0);
    }

    #[test]
    fn tank_step_is_at_least_one() {
        assert_eq!(tank_step(&caps(json!({"temperatureIncrement": 0.5}))), 1.0);
        assert_eq!(tank_step(&caps(json!({"temperatureIncrement": 0}))), 1.0);
        assert_eq!(tank_step(&caps(json!({"temperatureIncrement": 2}))), 2.0);
        assert_eq!(tank_step(&caps(json!({}))), 1.0);
    }
}
