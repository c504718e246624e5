//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `persistence_core` linkage.
//! - Run one open/insert/save round trip against a store location.
//! - Keep output deterministic for quick local sanity checks.
//! - Write rolling logs to `PERSISTENCE_LOG_DIR`, or to a directory named
//!   after the binary under the system temp dir. A logging failure is reported and
//!   the probe continues.
//!
//! Usage: `persistence_probe [STORE_LOCATION]` (default `:memory:`).

use persistence_core::{
    values, AttributeType, EntityDescription, FetchRequest, PersistenceCoordinator, Schema,
    StoreLocation,
};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

const LOG_DIR_ENV: &str = "PERSISTENCE_LOG_DIR";

fn probe_schema() -> Schema {
    Schema::new("probe").with_entity(
        EntityDescription::new("Probe")
            .attribute("label", AttributeType::Text)
            .attribute("core_version", AttributeType::Text),
    )
}

fn log_dir() -> PathBuf {
    std::env::var_os(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join(env!("CARGO_BIN_NAME")))
}

fn round_trip(location: StoreLocation) -> Result<usize, Box<dyn Error>> {
    let coordinator = PersistenceCoordinator::new(location, probe_schema())?;
    let child = coordinator.new_background_child_context()?;
    child.perform_and_wait(|session| {
        session.insert(
            "Probe",
            values([
                ("label", "persistence_probe"),
                ("core_version", persistence_core::core_version()),
            ]),
        )?;
        session.save()
    })??;
    coordinator.save_and_wait(true)?;

    let stored = coordinator
        .context()
        .perform_and_wait(|session| session.fetch(&FetchRequest::new("Probe")))??;
    Ok(stored.len())
}

fn main() -> ExitCode {
    println!("persistence_core ping={}", persistence_core::ping());
    println!("persistence_core version={}", persistence_core::core_version());

    let log_dir = log_dir();
    let log_dir = log_dir.to_string_lossy();
    match persistence_core::init_logging(persistence_core::default_log_level(), &log_dir) {
        Ok(()) => println!("persistence_core logs={log_dir}"),
        Err(err) => eprintln!("persistence_core logging=error error={err}"),
    }

    let location = std::env::args()
        .nth(1)
        .map(|raw| StoreLocation::parse(&raw))
        .unwrap_or(StoreLocation::InMemory);
    println!("persistence_core store={location}");

    match round_trip(location) {
        Ok(count) => {
            println!("persistence_core round_trip=ok probes={count}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("persistence_core round_trip=error error={err}");
            ExitCode::FAILURE
        }
    }
}
