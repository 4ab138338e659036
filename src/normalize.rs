use crate::types::{Building, Device, Unit, UnitType, UserContext};

/// Flatten buildings into one device list: per building, air-to-water units
/// then air-to-air units, in the order the service returned them.
pub fn normalize(context: &UserContext) -> Vec<Device> {
    let mut devices = Vec::new();
    for building in &context.buildings {
        for unit in &building.air_to_water_units {
            devices.push(device_from_unit(building, unit, UnitType::AirToWater));
        }
        for unit in &building.air_to_air_units {
            devices.push(device_from_unit(building, unit, UnitType::AirToAir));
        }
    }
    devices
}

fn device_from_unit(building: &Building, unit: &Unit, unit_type: UnitType) -> Device {
    Device {
        id: unit.id.clone(),
        unit_type,
        building_id: building.id.clone(),
        building_name: building.name.clone(),
        display_name: unit.given_display_name.clone(),
        capabilities: unit.capabilities.clone(),
        settings: unit.settings.clone(),
        is_connected: unit.is_connected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HvacMode;
    use serde_json::json;

    fn context(value: serde_json::Value) -> UserContext {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn single_heat_pump() {
        let ctx = context(json!({
            "buildings": [{
                "id": "B1",
                "name": "Home",
                "airToWaterUnits": [{
                    "id": "D1",
                    "givenDisplayName": "HP",
                    "isConnected": true,
                    "capabilities": {"minSetTemperature": 20, "maxSetTemperature": 50},
                    "settings": [
                        {"name": "Power", "value": "True"},
                        {"name": "OperationMode", "value": "Heating"},
                        {"name": "SetTemperatureZone1", "value": "45"}
                    ]
                }]
            }]
        }));
        let devices = normalize(&ctx);

        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.id, "D1");
        assert_eq!(d.unit_type, UnitType::AirToWater);
        assert_eq!(d.building_id, "B1");
        assert_eq!(d.building_name, "Home");
        assert_eq!(d.name(), "HP");
        assert!(d.is_connected);
        assert_eq!(d.capabilities.min_set_temperature(), Some(20.0));
        assert_eq!(d.hvac_mode(), HvacMode::Heat);
        assert_eq!(d.target_temperature(), Some(45.0));
    }

    #[test]
    fn count_and_building_tags_across_buildings() {
        let ctx = context(json!({
            "buildings": [
                {
                    "id": "B1", "name": "Home",
                    "airToWaterUnits": [{"id": "W1"}, {"id": "W2"}],
                    "airToAirUnits": [{"id": "A1"}]
                },
                {"id": "B2", "name": "Cabin", "airToAirUnits": [{"id": "A2"}]},
                {"id": "B3", "name": "Empty"}
            ]
        }));
        let devices = normalize(&ctx);

        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["W1", "W2", "A1", "A2"]);
        for d in &devices {
            let building = ctx.buildings.iter().find(|b| b.id == d.building_id).unwrap();
            assert_eq!(d.building_name, building.name);
        }
        assert_eq!(devices[2].unit_type, UnitType::AirToAir);
        assert_eq!(devices[3].building_name, "Cabin");
    }

    #[test]
    fn input_is_untouched() {
        let ctx = context(json!({
            "buildings": [{"id": "B1", "name": "Home", "airToWaterUnits": [{"id": "W1"}]}]
        }));
        let before = serde_json::to_value(&ctx).unwrap();
        let _ = normalize(&ctx);
        assert_eq!(serde_json::to_value(&ctx).unwrap(), before);
    }

    #[test]
    fn no_buildings() {
        let ctx = context(json!({"email": "a@b.c"}));
        assert!(normalize(&ctx).is_empty());
    }
}
