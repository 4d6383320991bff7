//! List candidate mount serial ports and show which one discovery picks.
//!
//! Usage: cargo run --example ports

fn main() {
    env_logger::init();

    println!("Candidate ports:");
    for path in altair::serial::CANDIDATE_PORTS {
        let exists = std::path::Path::new(path).exists();
        println!("  {:<16} {}", path, if exists { "present" } else { "-" });
    }

    if let Ok(forced) = std::env::var(altair::serial::PORT_ENV) {
        println!("{} override: {}", altair::serial::PORT_ENV, forced);
    }

    match altair::serial::discover_port() {
        Some(path) => println!("\nDiscovery selects: {}", path),
        None => {
            eprintln!("\nNo mount serial device found");
            std::process::exit(1);
        }
    }
}
