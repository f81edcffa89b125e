//! Command-line configuration layer. The register-map timing constants
//! remain the defaults; an operator bench-testing against slower or
//! noisier hardware can override the timing knobs without recompiling.

use std::time::Duration;

use clap::Parser;

use crate::interface::TimingConfig;

#[derive(Debug, Parser)]
#[command(name = "rh-hardware-interface", about = "Lap-timing hardware interface core")]
pub struct Cli {
    /// I2C bus device number (e.g. 1 for /dev/i2c-1). Ignored with --mock.
    #[arg(long, default_value_t = 1)]
    pub bus: u8,

    /// Run against an in-memory mock transport instead of real hardware.
    #[arg(long)]
    pub mock: bool,

    /// Tracing filter directive, e.g. "info" or "rh_hardware_interface=debug".
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Override UPDATE_SLEEP, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub update_sleep_ms: u64,

    /// Override I2C_CHILL_TIME, in milliseconds.
    #[arg(long, default_value_t = 75)]
    pub chill_time_ms: u64,

    /// Override I2C_RETRY_COUNT.
    #[arg(long, default_value_t = 5)]
    pub retry_count: u32,
}

impl Cli {
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            update_sleep: Duration::from_millis(self.update_sleep_ms),
            chill_time: Duration::from_millis(self.chill_time_ms),
            retry_count: self.retry_count,
        }
    }
}
