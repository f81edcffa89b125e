//! Binary entry point: wires the CLI, a bus transport, structured logging,
//! and the hardware interface core together, then runs until interrupted.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use rh_hardware_interface::bus::MockTransport;
use rh_hardware_interface::callbacks::EventSink;
use rh_hardware_interface::cli::Cli;
use rh_hardware_interface::node::{LapSource, Node};
use rh_hardware_interface::HardwareInterface;

/// Default subscriber: nothing downstream is wired up yet, so surface
/// events through the same structured log stream everything else uses.
struct TracingSink;

impl EventSink for TracingSink {
    fn pass_record(&self, node: &Node, lap_time_ms: u32, source: LapSource) {
        info!(node = node.index, lap_time_ms, ?source, "lap recorded");
    }

    fn hardware_log(&self, message: &str) {
        warn!("{message}");
    }

    fn new_enter_or_exit_at(&self, node: &Node, is_enter: bool) {
        let level = if is_enter { node.enter_at_level } else { node.exit_at_level };
        info!(node = node.index, is_enter, level, "capture complete");
    }

    fn node_crossing(&self, node: &Node) {
        info!(node = node.index, crossing = node.crossing_flag, "crossing changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("hardware interface core starting");

    let transport: Box<dyn rh_hardware_interface::bus::I2cTransport> = if cli.mock {
        Box::new(MockTransport::new())
    } else {
        open_hardware_transport(cli.bus)?
    };

    let sink = Arc::new(TracingSink);
    let timing = cli.timing();
    let interface = Arc::new(HardwareInterface::discover(transport, sink, timing).await);
    info!(node_count = interface.node_count().await, "discovery complete");

    let poll_handle = interface.start();

    #[cfg(feature = "bme280-sensor")]
    spawn_environmental_poller(Arc::clone(&interface));

    info!("polling. press ctrl+c to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl+c, shutting down");
        }
        _ = poll_handle => {
            warn!("poll task ended unexpectedly");
        }
    }

    Ok(())
}

#[cfg(feature = "hardware")]
fn open_hardware_transport(bus: u8) -> Result<Box<dyn rh_hardware_interface::bus::I2cTransport>> {
    let transport = rh_hardware_interface::bus::RppalTransport::open(bus)
        .with_context(|| format!("failed to open i2c bus {bus}"))?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "hardware"))]
fn open_hardware_transport(_bus: u8) -> Result<Box<dyn rh_hardware_interface::bus::I2cTransport>> {
    bail!("built without the `hardware` feature; pass --mock or rebuild with --features hardware")
}

/// Probes for BME280 sensors on the shared bus, then samples them on a slow
/// timer for the rest of the process lifetime. Independent of the lap-timing
/// poll loop: a missing or failed sensor never affects discovery or polling.
#[cfg(feature = "bme280-sensor")]
fn spawn_environmental_poller(interface: Arc<HardwareInterface>) {
    use rh_hardware_interface::env::EnvironmentalSensors;

    const ENV_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

    tokio::spawn(async move {
        let mut env = EnvironmentalSensors::probe(interface.bus(), interface.sink().as_ref()).await;
        info!(core_temp_c = env.core_temp_c, "environmental sensors probed");
        loop {
            tokio::time::sleep(ENV_POLL_INTERVAL).await;
            env.update(interface.bus(), interface.sink().as_ref()).await;
        }
    });
}
