//! Register map and contractual timing constants. These are the
//! defaults; `cli.rs` lets an operator override the timing knobs without
//! touching the register map.

use std::time::Duration;

/// Fixed probe set the registry walks at startup (software limited to 8
/// nodes per the bus's 7-bit address space carve-out).
pub const PROBE_ADDRESSES: [u8; 8] = [8, 10, 12, 14, 16, 18, 20, 22];

// --- read registers ---
pub const READ_ADDRESS: u8 = 0x00;
pub const READ_FREQUENCY: u8 = 0x03;
pub const READ_LAP_STATS: u8 = 0x05;
pub const READ_FILTER_RATIO: u8 = 0x20; // unused in core
pub const READ_REVISION_CODE: u8 = 0x22;
pub const READ_NODE_RSSI_PEAK: u8 = 0x23;
pub const READ_NODE_RSSI_NADIR: u8 = 0x24;
pub const READ_ENTER_AT_LEVEL: u8 = 0x31;
pub const READ_EXIT_AT_LEVEL: u8 = 0x32;
pub const READ_TIME_MILLIS: u8 = 0x33; // unused in core

// --- write registers ---
pub const WRITE_FREQUENCY: u8 = 0x51;
pub const WRITE_FILTER_RATIO: u8 = 0x70;
pub const WRITE_ENTER_AT_LEVEL: u8 = 0x71;
pub const WRITE_EXIT_AT_LEVEL: u8 = 0x72;
pub const FORCE_END_CROSSING: u8 = 0x78;
/// Supplied externally by the firmware revision in use; not fixed by this
/// core, so it is a constant here rather than derived.
pub const WRITE_MARK_START_TIME: u8 = 0x7E;

pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Revision-code high byte that validates an API-level reading.
pub const REVISION_VERIFY_BYTE: u8 = 0x25;

pub const DEFAULT_FREQUENCY_KHZ: u16 = 5800;

pub const MIN_RSSI_VALUE: u16 = 1;
pub const MAX_RSSI_VALUE: u16 = 999;

pub const ENTER_AT_PEAK_MARGIN: u16 = 5;

pub const LAP_ID_NEVER: i32 = -1;

pub const BME280_ADDRESSES: [u8; 2] = [0x76, 0x77];
pub const CORE_TEMP_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Default timing knobs; overridable at the CLI (see `cli.rs`).
pub const UPDATE_SLEEP: Duration = Duration::from_millis(100);
pub const I2C_CHILL_TIME: Duration = Duration::from_millis(75);
pub const I2C_RETRY_COUNT: u32 = 5;
pub const CAP_ENTER_EXIT_AT_MILLIS: u64 = 3000;
