use std::env;
use std::sync::Arc;

use melcloud_home::{BridgeConfig, LogNotifier, UnitType};

#[tokio::main]
async fn main() -> melcloud_home::Result<()> {
    tracing_subscriber::fmt::init();

    let path = env::args().nth(1).unwrap_or_else(|| "melcloud.toml".to_string());
    let config = BridgeConfig::load(&path)?;

    println!("Connecting with {path}...");
    let handle = config.start(Arc::new(LogNotifier)).await?;
    println!("Connected. Polling every {}s...", config.options.scan_interval);

    let mut updates = handle.subscribe();
    loop {
        {
            let state = updates.borrow_and_update();
            if !state.last_update_success {
                println!("Update failed ({} in a row)", state.consecutive_failures);
            } else if let Some(snapshot) = &state.snapshot {
                println!("--- {} ---", snapshot.fetched_at.to_rfc3339());
                for device in &snapshot.devices {
                    let status = if device.is_connected { "" } else { " | offline" };
                    match device.unit_type {
                        UnitType::AirToWater => println!(
                            "[{} / {}] room: {} | target: {} | tank: {} | {}{}",
                            device.building_name,
                            device.name(),
                            fmt_temp(device.room_temperature()),
                            fmt_temp(device.target_temperature()),
                            fmt_temp(device.tank_water_temperature()),
                            device.hvac_mode().as_str(),
                            status,
                        ),
                        UnitType::AirToAir => println!(
                            "[{} / {}] {}{}",
                            device.building_name,
                            device.name(),
                            device.hvac_mode().as_str(),
                            status,
                        ),
                    }
                }
            }
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn fmt_temp(t: Option<f64>) -> String {
    t.map(|t| format!("{t:.1}\u{00b0}C"))
        .unwrap_or_else(|| "-".to_string())
}
