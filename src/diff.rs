use std::collections::HashMap;

use serde_json::Value;

use crate::types::*;

/// Collect `(path, old, new)` for every leaf that differs. Objects recurse by
/// key and arrays by index; paths are dot-joined.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join_path(path_prefix, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push((join_path(path_prefix, key), prev_val.clone(), Value::Null));
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) => {
            for (idx, curr_val) in curr_arr.iter().enumerate() {
                let path = join_path(path_prefix, &idx.to_string());
                match prev_arr.get(idx) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
            for (idx, prev_val) in prev_arr.iter().enumerate().skip(curr_arr.len()) {
                changes.push((join_path(path_prefix, &idx.to_string()), prev_val.clone(), Value::Null));
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Events describing how `current` differs from `previous`, in device order.
pub(crate) fn diff_snapshots(previous: &[Device], current: &[Device]) -> Vec<Event> {
    let prev_by_id: HashMap<&str, &Device> = previous.iter().map(|d| (d.id.as_str(), d)).collect();
    let mut events = Vec::new();

    for device in current {
        let Some(prev) = prev_by_id.get(device.id.as_str()) else {
            events.push(Event::DeviceAdded {
                device_id: device.id.clone(),
                name: device.name().to_string(),
            });
            continue;
        };

        if prev.is_connected != device.is_connected {
            events.push(Event::ConnectivityChanged {
                device_id: device.id.clone(),
                connected: device.is_connected,
            });
        }

        for setting in device.settings.iter() {
            let old = prev.settings.get(&setting.name);
            if old != Some(setting.value.as_str()) {
                events.push(setting_changed(
                    &device.id,
                    &setting.name,
                    old,
                    Some(&setting.value),
                ));
            }
        }
        for setting in prev.settings.iter() {
            if !device.settings.contains(&setting.name) {
                events.push(setting_changed(&device.id, &setting.name, Some(&setting.value), None));
            }
        }
    }

    for prev in previous {
        if !current.iter().any(|d| d.id == prev.id) {
            events.push(Event::DeviceRemoved {
                device_id: prev.id.clone(),
            });
        }
    }

    events
}

fn setting_changed(device_id: &str, name: &str, old: Option<&str>, new: Option<&str>) -> Event {
    Event::SettingChanged {
        device_id: device_id.to_string(),
        name: name.to_string(),
        old: old.map(str::to_string),
        new: new.map(str::to_string),
    }
}
