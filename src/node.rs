//! Per-node data model.

use tokio::time::Instant;

/// Tagged protocol-capability variant: replaces the source's
/// repeated runtime integer comparisons and prevents a frame-layout branch
/// from silently being skipped when a new level is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApiLevel {
    /// api_level == 0: revision code didn't verify, or node predates the
    /// versioned protocol.
    Legacy,
    /// 10..=12
    V10to12,
    /// 13..=16
    V13to16,
    /// == 17
    V17,
    /// >= 18
    V18Plus,
}

impl ApiLevel {
    pub fn from_raw(level: u16) -> Self {
        match level {
            0..=9 => ApiLevel::Legacy,
            10..=12 => ApiLevel::V10to12,
            13..=16 => ApiLevel::V13to16,
            17 => ApiLevel::V17,
            _ => ApiLevel::V18Plus,
        }
    }

    pub fn is_valid(self) -> bool {
        self != ApiLevel::Legacy
    }

    /// LapStats frame size in bytes, excluding the trailing checksum byte.
    pub fn lap_stats_size(self) -> usize {
        match self {
            ApiLevel::Legacy => 17,
            ApiLevel::V10to12 => 18,
            ApiLevel::V13to16 => 20,
            ApiLevel::V17 => 20,
            ApiLevel::V18Plus => 19,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapSource {
    Realtime,
    Manual,
    Recalc,
}

/// Transient averaging-window state shared by the enter-at/exit-at capture
/// procedures.
#[derive(Debug, Clone, Default)]
pub struct CaptureState {
    pub active: bool,
    pub total: u64,
    pub count: u32,
    pub deadline_ms: u64,
}

impl CaptureState {
    pub fn start(&mut self, deadline_ms: u64) {
        self.total = 0;
        self.count = 0;
        self.deadline_ms = deadline_ms;
        self.active = true;
    }

    pub fn accumulate(&mut self, rssi: u16) {
        self.total += rssi as u64;
        self.count += 1;
    }

    pub fn mean(&self) -> u16 {
        ((self.total as f64 / self.count as f64).round()) as u16
    }
}

/// One physical sensor board. Created once at discovery; lives for the
/// process.
#[derive(Debug, Clone)]
pub struct Node {
    pub index: usize,
    pub bus_address: u8,

    pub api_level: u16,
    pub api_tier: ApiLevel,
    pub api_valid_flag: bool,

    pub frequency_khz: u16,

    pub enter_at_level: u16,
    pub exit_at_level: u16,

    pub node_peak_rssi: u16,
    pub node_nadir_rssi: u16,

    pub current_rssi: u16,
    pub pass_peak_rssi: u16,
    pub loop_time_us: u32,

    pub crossing_flag: bool,

    /// -1 sentinel ("never observed") suppresses emission on first sight.
    pub last_lap_id: i32,
    pub lap_ms_since_start: u32,

    pub history_values: Vec<u16>,
    pub history_times: Vec<Instant>,

    pub cap_enter_at: CaptureState,
    pub cap_exit_at: CaptureState,
}

impl Node {
    pub fn new(index: usize, bus_address: u8) -> Self {
        Node {
            index,
            bus_address,
            api_level: 0,
            api_tier: ApiLevel::Legacy,
            api_valid_flag: false,
            frequency_khz: 0,
            enter_at_level: 0,
            exit_at_level: 0,
            node_peak_rssi: 0,
            node_nadir_rssi: 0,
            current_rssi: 0,
            pass_peak_rssi: 0,
            loop_time_us: 0,
            crossing_flag: false,
            last_lap_id: -1,
            lap_ms_since_start: 0,
            history_values: Vec::new(),
            history_times: Vec::new(),
            cap_enter_at: CaptureState::default(),
            cap_exit_at: CaptureState::default(),
        }
    }

    /// Appends a paired history sample; keeps `history_values` and
    /// `history_times` in lockstep.
    pub fn push_history(&mut self, rssi: u16, at: Instant) {
        self.history_values.push(rssi);
        self.history_times.push(at);
    }

    /// Drains both history buffers atomically under the caller's lock,
    /// leaving empty buffers behind (a consistent drain).
    pub fn drain_history(&mut self) -> (Vec<u16>, Vec<Instant>) {
        (
            std::mem::take(&mut self.history_values),
            std::mem::take(&mut self.history_times),
        )
    }
}
