use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    AirToWater,
    AirToAir,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::AirToWater => "air_to_water",
            UnitType::AirToAir => "air_to_air",
        }
    }

    /// Path segment of the per-unit write endpoint (`/api/<segment>/<id>`).
    pub fn endpoint_segment(&self) -> &'static str {
        match self {
            UnitType::AirToWater => "atwunit",
            UnitType::AirToAir => "ataunit",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
}

impl HvacMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "off" => Some(HvacMode::Off),
            "heat" => Some(HvacMode::Heat),
            "cool" => Some(HvacMode::Cool),
            _ => None,
        }
    }
}

/// Zone 1 heating strategy of an air-to-water unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone1Mode {
    HeatRoomTemperature,
    HeatFlowTemperature,
    HeatCurve,
}

impl Zone1Mode {
    pub const ALL: [Zone1Mode; 3] = [
        Zone1Mode::HeatRoomTemperature,
        Zone1Mode::HeatFlowTemperature,
        Zone1Mode::HeatCurve,
    ];

    pub fn as_api_str(&self) -> &'static str {
        match self {
            Zone1Mode::HeatRoomTemperature => "HeatRoomTemperature",
            Zone1Mode::HeatFlowTemperature => "HeatFlowTemperature",
            Zone1Mode::HeatCurve => "HeatCurve",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s {
            "HeatRoomTemperature" => Some(Zone1Mode::HeatRoomTemperature),
            "HeatFlowTemperature" => Some(Zone1Mode::HeatFlowTemperature),
            "HeatCurve" => Some(Zone1Mode::HeatCurve),
            _ => None,
        }
    }
}

/// Numeric and boolean limits reported per unit. Keys vary by model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => parse_vendor_bool(s),
            _ => None,
        }
    }

    pub fn min_set_temperature(&self) -> Option<f64> {
        self.number("minSetTemperature")
    }

    pub fn max_set_temperature(&self) -> Option<f64> {
        self.number("maxSetTemperature")
    }

    pub fn has_half_degrees(&self) -> bool {
        self.flag("hasHalfDegrees").unwrap_or(false)
    }

    pub fn has_hot_water(&self) -> bool {
        self.flag("hasHotWater").unwrap_or(false)
    }
}

impl From<Map<String, Value>> for Capabilities {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub value: String,
}

/// A setting value coerced from its wire string.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SettingValue {
    pub fn parse(raw: &str) -> Self {
        if let Some(b) = parse_vendor_bool(raw) {
            return SettingValue::Bool(b);
        }
        match raw.trim().parse::<f64>() {
            Ok(n) => SettingValue::Number(n),
            Err(_) => SettingValue::Text(raw.to_string()),
        }
    }
}

/// The vendor's sparse name/value list. Lookups return `None` for absent
/// names; absent is "unknown", never false or zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Vec<Setting>);

impl Settings {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Literal `"True"` / `"False"` only.
    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(parse_vendor_bool)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn value(&self, name: &str) -> Option<SettingValue> {
        self.get(name).map(SettingValue::parse)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Setting>> for Settings {
    fn from(v: Vec<Setting>) -> Self {
        Self(v)
    }
}

fn parse_vendor_bool(s: &str) -> Option<bool> {
    match s {
        "True" => Some(true),
        "False" => Some(false),
        _ => None,
    }
}

// -- Wire documents --

/// `GET /api/user/context` response. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buildings: Vec<Building>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserContext {
    /// Display title for the account: full name, else e-mail, else a fixed label.
    pub fn account_title(&self) -> String {
        let name = format!(
            "{} {}",
            self.firstname.as_deref().unwrap_or(""),
            self.lastname.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
        match self.email.as_deref() {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => "MELCloud Home".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    #[serde(deserialize_with = "scalar_as_string")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub air_to_water_units: Vec<Unit>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub air_to_air_units: Vec<Unit>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    #[serde(deserialize_with = "scalar_as_string")]
    pub id: String,
    #[serde(default)]
    pub given_display_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_connected: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub capabilities: Capabilities,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Settings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_default<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn scalar_as_string<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    })
}

// -- Normalized model --

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub unit_type: UnitType,
    pub building_id: String,
    pub building_name: String,
    pub display_name: Option<String>,
    pub capabilities: Capabilities,
    pub settings: Settings,
    pub is_connected: bool,
}

impl Device {
    pub fn name(&self) -> &str {
        match (&self.display_name, self.unit_type) {
            (Some(name), _) if !name.is_empty() => name,
            (_, UnitType::AirToWater) => "Heat Pump",
            (_, UnitType::AirToAir) => "Air Conditioner",
        }
    }

    /// Off unless `Power` is literally true; `Cooling` maps to cool, anything
    /// else to heat.
    pub fn hvac_mode(&self) -> HvacMode {
        if self.settings.bool("Power") != Some(true) {
            return HvacMode::Off;
        }
        match self.settings.get("OperationMode") {
            Some("Cooling") => HvacMode::Cool,
            _ => HvacMode::Heat,
        }
    }

    pub fn room_temperature(&self) -> Option<f64> {
        self.settings.number("RoomTemperatureZone1")
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.settings.number("SetTemperatureZone1")
    }

    pub fn tank_water_temperature(&self) -> Option<f64> {
        self.settings.number("TankWaterTemperature")
    }

    pub fn tank_target_temperature(&self) -> Option<f64> {
        self.settings.number("SetTankWaterTemperature")
    }

    pub fn zone1_mode(&self) -> Option<Zone1Mode> {
        self.settings
            .get("OperationModeZone1")
            .and_then(Zone1Mode::from_api_str)
    }

    pub fn forced_hot_water(&self) -> Option<bool> {
        self.settings.bool("ForcedHotWaterMode")
    }
}

/// Result of one successful poll. Replaced wholesale by the next one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub context: UserContext,
    pub devices: Vec<Device>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn devices_of(&self, unit_type: UnitType) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(move |d| d.unit_type == unit_type)
    }
}

/// Changes between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DeviceAdded { device_id: String, name: String },
    DeviceRemoved { device_id: String },
    ConnectivityChanged { device_id: String, connected: bool },
    SettingChanged {
        device_id: String,
        name: String,
        old: Option<String>,
        new: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(value: Value) -> Unit {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn settings_absent_is_unknown() {
        let u = unit(json!({
            "id": "D1",
            "settings": [
                {"name": "Power", "value": "True"},
                {"name": "ForcedHotWaterMode", "value": "true"},
                {"name": "TankWaterTemperature", "value": "48.5"},
                {"name": "OperationModeZone1", "value": "HeatCurve"}
            ]
        }));
        assert_eq!(u.settings.bool("Power"), Some(true));
        assert_eq!(u.settings.bool("ForcedHotWaterMode"), None, "only literal True/False");
        assert_eq!(u.settings.bool("HolidayMode"), None);
        assert_eq!(u.settings.number("TankWaterTemperature"), Some(48.5));
        assert_eq!(u.settings.number("OperationModeZone1"), None);
        assert_eq!(
            u.settings.value("OperationModeZone1"),
            Some(SettingValue::Text("HeatCurve".into()))
        );
        assert_eq!(u.settings.value("Power"), Some(SettingValue::Bool(true)));
    }

    #[test]
    fn scalar_values_coerced_to_strings() {
        let u = unit(json!({
            "id": 42,
            "isConnected": null,
            "settings": [
                {"name": "Power", "value": true},
                {"name": "SetTemperatureZone1", "value": 45},
                {"name": "Empty", "value": null}
            ]
        }));
        assert_eq!(u.id, "42");
        assert!(!u.is_connected);
        assert_eq!(u.settings.get("Power"), Some("True"));
        assert_eq!(u.settings.get("SetTemperatureZone1"), Some("45"));
        assert_eq!(u.settings.get("Empty"), Some(""));
    }

    #[test]
    fn capabilities_accept_strings_and_bools() {
        let caps: Capabilities = serde_json::from_value(json!({
            "minSetTemperature": "10",
            "maxSetTemperature": 30.5,
            "hasHalfDegrees": "True",
            "hasHotWater": true
        }))
        .unwrap();
        assert_eq!(caps.min_set_temperature(), Some(10.0));
        assert_eq!(caps.max_set_temperature(), Some(30.5));
        assert!(caps.has_half_degrees());
        assert!(caps.has_hot_water());
        assert!(!Capabilities::default().has_hot_water());
    }

    #[test]
    fn hvac_mode_from_power_and_operation_mode() {
        let device = |settings: Vec<Setting>| Device {
            id: "D1".into(),
            unit_type: UnitType::AirToWater,
            building_id: "B1".into(),
            building_name: "Home".into(),
            display_name: None,
            capabilities: Capabilities::default(),
            settings: settings.into(),
            is_connected: true,
        };
        let s = |n: &str, v: &str| Setting {
            name: n.into(),
            value: v.into(),
        };

        assert_eq!(device(vec![]).hvac_mode(), HvacMode::Off);
        assert_eq!(device(vec![s("Power", "False")]).hvac_mode(), HvacMode::Off);
        assert_eq!(device(vec![s("Power", "True")]).hvac_mode(), HvacMode::Heat);
        assert_eq!(
            device(vec![s("Power", "True"), s("OperationMode", "Cooling")]).hvac_mode(),
            HvacMode::Cool
        );
        assert_eq!(
            device(vec![s("Power", "True"), s("OperationMode", "Auto")]).hvac_mode(),
            HvacMode::Heat
        );
        assert_eq!(device(vec![]).name(), "Heat Pump");
    }

    #[test]
    fn account_title_fallbacks() {
        let ctx: UserContext =
            serde_json::from_value(json!({"firstname": "Ada", "lastname": "Lovelace"})).unwrap();
        assert_eq!(ctx.account_title(), "Ada Lovelace");
        let ctx: UserContext = serde_json::from_value(json!({"email": "a@b.c"})).unwrap();
        assert_eq!(ctx.account_title(), "a@b.c");
        assert_eq!(UserContext::default().account_title(), "MELCloud Home");
    }
}
