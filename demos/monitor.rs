//! Connect to the mount and print telemetry events to stdout.
//!
//! Usage: cargo run --example monitor
//! Press Ctrl+C to stop.

use altair::{MountClient, MountEvent};
use std::time::Duration;

fn main() {
    env_logger::init();

    let client = match MountClient::connect() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    let events = client.subscribe();

    if let Err(e) = client.ping() {
        eprintln!("Ping failed: {}", e);
    }
    if let Err(e) = client.get_positions() {
        eprintln!("Position query failed: {}", e);
    }

    println!("Listening for mount events (Ctrl+C to stop)...");

    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(MountEvent::Position { x, y, z }) => {
                println!("position  x={:>10}  y={:>10}  z={:>10}  (arcsec)", x, y, z);
            }
            Ok(MountEvent::Status(s)) => {
                println!(
                    "status    {:.1}°C  pos=({}, {}, {})  enabled={}  paused={}  tracking={}  fan={}%",
                    s.temperature_c, s.x, s.y, s.z, s.enabled, s.paused, s.celestial_tracking, s.fan_pct
                );
            }
            Ok(MountEvent::ReferenceLost) => {
                println!("reference lost -- alignment points are stale");
            }
            Err(altair::MountError::Timeout) => {
                println!("(no events in the last 5 s)");
            }
            Err(e) => {
                eprintln!("Event stream ended: {}", e);
                break;
            }
        }
    }
}
